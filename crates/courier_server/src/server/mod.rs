#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod directory;
pub mod engine;
pub mod events;
pub mod health;
pub mod notify;
pub mod presence;
pub mod room_hub;
pub mod store;
pub mod tokens;
pub mod wire;


#[cfg(test)]
mod engine_tests;


#[cfg(test)]
mod presence_tests;



#[cfg(test)]
mod store_tests;
