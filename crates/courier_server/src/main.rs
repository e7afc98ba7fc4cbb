#![forbid(unsafe_code)]

mod config;
mod quic;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use courier_domain::ConnectionId;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::PersistenceSettings;
use crate::quic::config::QuicServerConfig;
use crate::server::auth::{Authenticator, ConfiguredAuthenticator};
use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::engine::{DeliveryEngine, EngineConfig};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::notify::{LoggingPushSink, NotificationDispatcher};
use crate::server::presence::PresenceRegistry;
use crate::server::room_hub::{RoomHub, RoomHubConfig};
use crate::server::store::{InMemoryMessageStore, MessageStore, SqliteMessageStore};
use crate::server::tokens::{InMemoryTokenStore, SqliteTokenStore, TokenRegistry, TokenStore};
use crate::util::endpoint::parse_quic_bind;

const DEFAULT_BIND: &str = "quic://127.0.0.1:18300";

struct Args {
	bind: SocketAddr,
	config_path: Option<PathBuf>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: courier_server [--bind quic://host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Bind endpoint (default: quic://127.0.0.1:18300)\n\
\t          Format: quic://host:port\n\
\t--config   Config file (default: ~/.courier/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut bind_endpoint = DEFAULT_BIND.to_string();
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected quic://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = parse_quic_bind(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args { bind, config_path }
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,courier_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("courier_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn open_stores(cfg: &PersistenceSettings) -> anyhow::Result<(Arc<dyn MessageStore>, Arc<dyn TokenStore>)> {
	if !cfg.enabled {
		info!("persistence disabled; using in-memory stores");
		let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
		let tokens: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
		return Ok((store, tokens));
	}

	let Some(database_url) = cfg.database_url.as_deref() else {
		return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
	};
	let sqlite = SqliteMessageStore::connect(database_url).await?;
	let tokens: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::new(sqlite.pool()));
	let store: Arc<dyn MessageStore> = Arc::new(sqlite);
	info!("persistence enabled; using sqlite stores");
	Ok((store, tokens))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let (store, token_store) = open_stores(&server_cfg.persistence).await?;

	let presence = Arc::new(PresenceRegistry::new());
	let hub = RoomHub::new(RoomHubConfig {
		outlet_queue_capacity: server_cfg.server.outbound_queue_capacity,
		debug_logs: false,
	});
	let notifier = server_cfg.push.enabled.then(|| {
		NotificationDispatcher::new(
			Arc::new(LoggingPushSink),
			Arc::clone(&token_store),
			Arc::clone(&presence),
			server_cfg.push.title_fallback.clone(),
		)
	});
	let engine = Arc::new(DeliveryEngine::new(
		store,
		Arc::clone(&presence),
		hub.clone(),
		TokenRegistry::new(token_store),
		notifier,
		EngineConfig::from(&server_cfg.delivery),
	));
	let auth: Arc<dyn Authenticator> = Arc::new(ConfiguredAuthenticator::from_settings(&server_cfg.server));

	let health_state = HealthState::new(Arc::clone(&presence), hub);
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let quic_cfg = QuicServerConfig::dev(args.bind);
	let endpoint = if let (Some(cert_path), Some(key_path)) = (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS cert/key");
		quic_cfg.bind_endpoint_with_tls(cert_path, key_path)?
	} else {
		let (endpoint, server_cert_der) = quic_cfg.bind_dev_endpoint()?;
		info!(
			bind = %args.bind,
			cert_der_len = server_cert_der.len(),
			"courier_server: QUIC endpoint ready (dev self-signed cert)"
		);
		endpoint
	};

	let conn_settings = ConnectionSettings::from(&server_cfg.server);

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let Some(incoming) = endpoint.accept().await else {
			break;
		};

		let conn_id = ConnectionId(next_conn_id);
		next_conn_id += 1;
		metrics::counter!("courier_server_connections_total").increment(1);

		let engine = Arc::clone(&engine);
		let auth = Arc::clone(&auth);
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			match incoming.await {
				Ok(connection) => {
					info!(%conn_id, remote = %connection.remote_address(), "accepted connection");
					if let Err(e) = handle_connection(conn_id, connection, engine, auth, conn_settings).await {
						warn!(%conn_id, error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(%conn_id, error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}

	Ok(())
}
