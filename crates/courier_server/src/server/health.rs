#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::warn;

use crate::server::presence::{PresenceRegistry, PresenceStats};
use crate::server::room_hub::RoomHub;

#[derive(Clone)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	presence: Arc<PresenceRegistry>,
	hub: RoomHub,
}

/// Body of `/statusz`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
	pub ready: bool,
	#[serde(flatten)]
	pub presence: PresenceStats,
	pub outlets: usize,
}

impl HealthState {
	pub fn new(presence: Arc<PresenceRegistry>, hub: RoomHub) -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			presence,
			hub,
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}

	pub fn snapshot(&self) -> StatusSnapshot {
		StatusSnapshot {
			ready: self.is_ready(),
			presence: self.presence.stats(),
			outlets: self.hub.outlet_count(),
		}
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body.into()));
	*resp.status_mut() = status;
	resp
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	Ok(route(req.uri().path(), &state))
}

fn route(path: &str, state: &HealthState) -> Response<Full<Bytes>> {
	match path {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" => {
			if state.is_ready() {
				respond(StatusCode::OK, Bytes::from_static(b"ready"))
			} else {
				respond(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready"))
			}
		}
		"/statusz" => match serde_json::to_vec(&state.snapshot()) {
			Ok(json) => {
				let mut resp = respond(StatusCode::OK, json);
				resp.headers_mut()
					.insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
				resp
			}
			Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
		},
		_ => respond(StatusCode::NOT_FOUND, Bytes::new()),
	}
}
