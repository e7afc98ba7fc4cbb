#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

/// Upper bound for any single history page.
pub const MAX_HISTORY_PAGE: usize = 10_000;

/// Default config path: `~/.courier/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".courier").join("config.toml"))
}

/// Load the server config from TOML at `path`, then apply env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// String that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub delivery: DeliverySettings,
	pub persistence: PersistenceSettings,
	pub push: PushSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Name reported in `Welcome`.
	pub server_name: String,
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for signed bearer tokens.
	pub auth_hmac_secret: Option<SecretString>,
	/// Shared dev token; clients presenting it may declare their own identity.
	pub dev_auth_token: Option<SecretString>,
	pub max_frame_bytes: usize,
	/// Bounded per-connection event queue.
	pub outbound_queue_capacity: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			server_name: "courier_server".to_string(),
			tls_cert_path: None,
			tls_key_path: None,
			metrics_bind: None,
			health_bind: None,
			auth_hmac_secret: None,
			dev_auth_token: None,
			max_frame_bytes: courier_protocol::DEFAULT_MAX_FRAME_SIZE,
			outbound_queue_capacity: 256,
		}
	}
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
	/// Messages sent as `load_history` on join.
	pub history_limit: usize,
	/// Upper bound for an explicit history page.
	pub max_history_page: usize,
	/// Maximum text length in characters.
	pub max_text_len: usize,
}

impl Default for DeliverySettings {
	fn default() -> Self {
		Self {
			history_limit: 50,
			max_history_page: 200,
			max_text_len: 4096,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	pub enabled: bool,
	/// `sqlite:` URL.
	pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PushSettings {
	pub enabled: bool,
	/// Title used when the sender has no display name.
	pub title_fallback: String,
}

impl Default for PushSettings {
	fn default() -> Self {
		Self {
			enabled: true,
			title_fallback: "New message".to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	delivery: FileDeliverySettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	push: FilePushSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	server_name: Option<String>,
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	dev_auth_token: Option<String>,
	max_frame_bytes: Option<usize>,
	outbound_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDeliverySettings {
	history_limit: Option<usize>,
	max_history_page: Option<usize>,
	max_text_len: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePushSettings {
	enabled: Option<bool>,
	title_fallback: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let server_defaults = ServerSettings::default();
		let delivery_defaults = DeliverySettings::default();
		let push_defaults = PushSettings::default();

		Self {
			server: ServerSettings {
				server_name: non_blank(file.server.server_name).unwrap_or(server_defaults.server_name),
				tls_cert_path: non_blank(file.server.tls_cert_path).map(PathBuf::from),
				tls_key_path: non_blank(file.server.tls_key_path).map(PathBuf::from),
				metrics_bind: non_blank(file.server.metrics_bind),
				health_bind: non_blank(file.server.health_bind),
				auth_hmac_secret: non_blank(file.server.auth_hmac_secret).map(SecretString::new),
				dev_auth_token: non_blank(file.server.dev_auth_token).map(SecretString::new),
				max_frame_bytes: file
					.server
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(server_defaults.max_frame_bytes),
				outbound_queue_capacity: file
					.server
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(server_defaults.outbound_queue_capacity),
			},
			delivery: DeliverySettings {
				history_limit: file.delivery.history_limit.unwrap_or(delivery_defaults.history_limit),
				max_history_page: file
					.delivery
					.max_history_page
					.filter(|v| *v > 0)
					.unwrap_or(delivery_defaults.max_history_page),
				max_text_len: file
					.delivery
					.max_text_len
					.filter(|v| *v > 0)
					.unwrap_or(delivery_defaults.max_text_len),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: non_blank(file.persistence.database_url),
			},
			push: PushSettings {
				enabled: file.push.enabled.unwrap_or(push_defaults.enabled),
				title_fallback: non_blank(file.push.title_fallback).unwrap_or(push_defaults.title_fallback),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let string = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = string("COURIER_SERVER_TLS_CERT") {
		cfg.server.tls_cert_path = Some(PathBuf::from(v));
		info!("server config: tls_cert_path overridden by env");
	}

	if let Some(v) = string("COURIER_SERVER_TLS_KEY") {
		cfg.server.tls_key_path = Some(PathBuf::from(v));
		info!("server config: tls_key_path overridden by env");
	}

	if let Some(v) = string("COURIER_SERVER_AUTH_HMAC_SECRET") {
		cfg.server.auth_hmac_secret = Some(SecretString::new(v));
		info!("server auth: auth_hmac_secret overridden by env");
	}

	if let Some(v) = string("COURIER_SERVER_DEV_AUTH_TOKEN") {
		cfg.server.dev_auth_token = Some(SecretString::new(v));
		info!("server auth: dev_auth_token overridden by env");
	}

	if let Some(v) = string("COURIER_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = string("COURIER_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = string("COURIER_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.parse::<usize>()
		&& capacity > 0
	{
		cfg.server.outbound_queue_capacity = capacity;
		info!(capacity, "server config: outbound_queue_capacity overridden by env");
	}

	if let Some(v) = string("COURIER_HISTORY_LIMIT")
		&& let Ok(limit) = v.parse::<usize>()
	{
		cfg.delivery.history_limit = limit;
		info!(limit, "delivery: history_limit overridden by env");
	}

	if let Some(v) = string("COURIER_MAX_TEXT_LEN")
		&& let Ok(len) = v.parse::<usize>()
		&& len > 0
	{
		cfg.delivery.max_text_len = len;
		info!(len, "delivery: max_text_len overridden by env");
	}

	if let Some(v) = string("COURIER_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Some(v) = string("COURIER_PERSISTENCE_DATABASE_URL") {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if let Some(v) = string("COURIER_PUSH_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.push.enabled = enabled;
		info!(enabled, "push: enabled overridden by env");
	}

	if cfg.delivery.max_history_page > MAX_HISTORY_PAGE {
		warn!(
			max_history_page = cfg.delivery.max_history_page,
			cap = MAX_HISTORY_PAGE,
			"delivery: max_history_page too large; capping"
		);
		cfg.delivery.max_history_page = MAX_HISTORY_PAGE;
	}

	if cfg.delivery.history_limit > cfg.delivery.max_history_page {
		warn!(
			history_limit = cfg.delivery.history_limit,
			max_history_page = cfg.delivery.max_history_page,
			"delivery: history_limit > max_history_page; clamping"
		);
		cfg.delivery.history_limit = cfg.delivery.max_history_page;
	}

	if cfg.server.tls_cert_path.is_some() != cfg.server.tls_key_path.is_some() {
		warn!("server config: tls_cert_path and tls_key_path must be set together; falling back to dev cert");
	}
}
