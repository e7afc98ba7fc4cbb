#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use courier_domain::{ConnectionId, ConversationId, DomainError, Identity, MessageId, UserId};
use courier_protocol::framing::{FrameReader, FramingError, encode_frame};
use courier_protocol::{envelope, pb, version};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerSettings;
use crate::server::auth::{Authenticator, Credentials};
use crate::server::engine::DeliveryEngine;
use crate::server::room_hub::HubItem;
use crate::server::wire;
use crate::util::time::unix_ms_now;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a rejected peer gets to receive its error frame and hang up.
const REJECT_LINGER: Duration = Duration::from_secs(2);

/// Application close code for connections refused during the handshake.
const CLOSE_REJECTED: u32 = 1;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub server_name: String,
	pub max_frame_bytes: usize,
	/// Envelopes waiting for the stream writer.
	pub outbound_queue_capacity: usize,
}

impl From<&ServerSettings> for ConnectionSettings {
	fn from(s: &ServerSettings) -> Self {
		Self {
			server_name: s.server_name.clone(),
			max_frame_bytes: s.max_frame_bytes,
			outbound_queue_capacity: s.outbound_queue_capacity.max(1),
		}
	}
}

/// Serve one QUIC connection: hello, authentication, then the command loop
/// on the control stream while hub events are forwarded on the same stream.
pub async fn handle_connection(
	conn_id: ConnectionId,
	connection: quinn::Connection,
	engine: Arc<DeliveryEngine>,
	auth: Arc<dyn Authenticator>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	let (mut control_send, mut control_recv) =
		connection.accept_bi().await.context("accept control bidirectional stream")?;

	let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<pb::Envelope>();
	let max_frame = settings.max_frame_bytes;
	let reader_task = tokio::spawn(async move {
		let mut reader = FrameReader::new(max_frame);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match control_recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("control stream read failed")),
			};
			metrics::counter!("courier_server_control_bytes_in_total").increment(n as u64);
			reader.push(&tmp[..n]);

			loop {
				match reader.next_frame::<pb::Envelope>() {
					Ok(Some(env)) => {
						metrics::counter!("courier_server_envelopes_in_total").increment(1);
						if ctrl_tx.send(env).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(e) => {
						metrics::counter!("courier_server_control_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode control frame"));
					}
				}
			}
		}
	});

	let (env_version, hello) = match tokio::time::timeout(HELLO_TIMEOUT, wait_for_hello(&mut ctrl_rx)).await {
		Ok(hello) => hello?,
		Err(_) => {
			reader_task.abort();
			return Err(anyhow!("no Hello within {HELLO_TIMEOUT:?}"));
		}
	};

	if version::major_of(env_version) != version::PROTOCOL_MAJOR {
		reader_task.abort();
		reject(
			&connection,
			control_send,
			connection_error("UNSUPPORTED_VERSION", format!("server speaks v{}", version::PROTOCOL_MAJOR)),
			max_frame,
		)
		.await;
		return Err(anyhow!("unsupported protocol version {env_version:#x}"));
	}

	let credentials = Credentials {
		auth_token: hello.auth_token.clone(),
		user_id: hello.user_id.clone(),
		display_name: hello.display_name.clone(),
	};
	let identity = match auth.authenticate(&credentials) {
		Ok(identity) => identity,
		Err(e) => {
			warn!(%conn_id, error = %e, "unauthorized");
			metrics::counter!("courier_server_auth_failures_total", "reason" => e.code()).increment(1);
			reader_task.abort();
			reject(&connection, control_send, connection_error("UNAUTHORIZED", e.to_string()), max_frame).await;
			return Err(anyhow!("unauthorized"));
		}
	};

	info!(
		%conn_id,
		client_name = %hello.client_name,
		user_id = %identity.user_id,
		"received Hello"
	);
	metrics::counter!("courier_server_hello_total").increment(1);

	let welcome = pb::envelope::Msg::Welcome(pb::Welcome {
		server_name: settings.server_name.clone(),
		protocol_major: version::PROTOCOL_MAJOR,
		protocol_minor: version::PROTOCOL_MINOR,
		connection_id: conn_id.0,
		user_id: identity.user_id.to_string(),
		display_name: identity.display_name.clone(),
		server_time_unix_ms: unix_ms_now(),
		max_frame_bytes: u32::try_from(max_frame).unwrap_or(u32::MAX),
	});
	send_envelope(&mut control_send, envelope(String::new(), welcome), max_frame).await?;

	let hub_rx = engine.connect(conn_id, &identity);

	let (out_tx, mut out_rx) = mpsc::channel::<pb::Envelope>(settings.outbound_queue_capacity);
	let writer_task = tokio::spawn(async move {
		while let Some(env) = out_rx.recv().await {
			match send_envelope(&mut control_send, env, max_frame).await {
				Ok(()) => {}
				Err(e) if e.downcast_ref::<FramingError>().is_some() => {
					metrics::counter!("courier_server_oversized_envelopes_total").increment(1);
					warn!(%conn_id, error = %e, "dropping oversized envelope");
				}
				Err(e) => return Err(e),
			}
		}
		let _ = control_send.finish();
		Ok::<(), anyhow::Error>(())
	});

	let forward_task = tokio::spawn(forward_hub_items(hub_rx, out_tx.clone()));

	while let Some(env) = ctrl_rx.recv().await {
		let Some(msg) = env.msg else { continue };
		let command = command_name(&msg);

		let reply = match handle_command(&engine, conn_id, &identity, msg).await {
			Ok(reply) => {
				metrics::counter!("courier_server_commands_total", "command" => command, "status" => "ok").increment(1);
				reply
			}
			Err(e) => {
				debug!(%conn_id, user_id = %identity.user_id, command, error = %e, "command rejected");
				metrics::counter!("courier_server_commands_total", "command" => command, "status" => e.code())
					.increment(1);
				Some(pb::envelope::Msg::Ack(ack_error(&e)))
			}
		};

		if let Some(reply) = reply
			&& out_tx.send(envelope(env.request_id, reply)).await.is_err()
		{
			break;
		}
	}

	engine.disconnect(conn_id);
	drop(out_tx);
	info!(%conn_id, user_id = %identity.user_id, "connection closed");

	let _ = forward_task.await;
	let writer_result = writer_task.await;
	reader_task.abort();

	match writer_result {
		Ok(result) => result,
		Err(e) => Err(anyhow!(e).context("writer task panicked")),
	}
}

async fn forward_hub_items(mut hub_rx: mpsc::Receiver<HubItem>, out_tx: mpsc::Sender<pb::Envelope>) {
	while let Some(item) = hub_rx.recv().await {
		let event = match item {
			HubItem::Event(event) => wire::event_to_pb(&event, unix_ms_now()),
			HubItem::Lagged { dropped } => pb::Event {
				conversation_id: String::new(),
				server_time_unix_ms: unix_ms_now(),
				kind: Some(pb::event::Kind::Lagged(pb::Lagged { dropped })),
			},
		};
		if out_tx
			.send(envelope(String::new(), pb::envelope::Msg::Event(event)))
			.await
			.is_err()
		{
			break;
		}
	}
}

async fn wait_for_hello(ctrl_rx: &mut mpsc::UnboundedReceiver<pb::Envelope>) -> anyhow::Result<(u32, pb::Hello)> {
	while let Some(env) = ctrl_rx.recv().await {
		let Some(msg) = env.msg else { continue };
		if let pb::envelope::Msg::Hello(h) = msg {
			return Ok((env.version, h));
		}
	}
	Err(anyhow!("connection closed before Hello"))
}

/// Execute one client command. `Ok(None)` means no reply is due.
async fn handle_command(
	engine: &DeliveryEngine,
	conn_id: ConnectionId,
	identity: &Identity,
	msg: pb::envelope::Msg,
) -> Result<Option<pb::envelope::Msg>, DomainError> {
	use pb::envelope::Msg;

	let me = &identity.user_id;
	let ack = match msg {
		Msg::Hello(_) => ack_status(pb::AckStatus::Ignored, "already authenticated"),
		Msg::Join(j) => {
			let conversation_id = parse_conversation_id(&j.conversation_id)?;
			let report = engine.join(conn_id, me, &conversation_id).await?;
			if let Some(left) = &report.left {
				debug!(%conn_id, %left, joined = %conversation_id, "switched conversation");
			}
			let conversation = engine.directory().get(&conversation_id).await?;
			pb::Ack {
				detail: format!(
					"delivered={} history={} online={}",
					report.delivered,
					report.history,
					report.online.len()
				),
				conversation: Some(wire::conversation_to_pb(&conversation, me)),
				..ack_ok()
			}
		}
		Msg::Leave(_) => match engine.leave(conn_id) {
			Some(_) => ack_ok(),
			None => ack_status(pb::AckStatus::Ignored, "not in a conversation"),
		},
		Msg::SendMessage(s) => {
			let conversation_id = parse_conversation_id(&s.conversation_id)?;
			let body = wire::body_from_pb(s.body)?;
			let message = engine.submit(identity, &conversation_id, body).await?;
			pb::Ack {
				message: Some(wire::message_to_pb(&message)),
				..ack_ok()
			}
		}
		Msg::MarkRead(m) => {
			let conversation_id = parse_conversation_id(&m.conversation_id)?;
			let count = engine.mark_read(me, &conversation_id).await?;
			pb::Ack {
				detail: format!("read={count}"),
				..ack_ok()
			}
		}
		Msg::EditMessage(e) => {
			let conversation_id = parse_conversation_id(&e.conversation_id)?;
			match engine
				.edit_message(me, &conversation_id, MessageId(e.message_id), &e.text)
				.await?
			{
				Some(message) => pb::Ack {
					message: Some(wire::message_to_pb(&message)),
					..ack_ok()
				},
				None => ack_status(pb::AckStatus::Ignored, "not the author"),
			}
		}
		Msg::DeleteMessage(d) => {
			let conversation_id = parse_conversation_id(&d.conversation_id)?;
			match engine.delete_message(me, &conversation_id, MessageId(d.message_id)).await? {
				Some(message) => pb::Ack {
					message: Some(wire::message_to_pb(&message)),
					..ack_ok()
				},
				None => ack_status(pb::AckStatus::Ignored, "already deleted"),
			}
		}
		Msg::ToggleReaction(r) => {
			let conversation_id = parse_conversation_id(&r.conversation_id)?;
			let message = engine
				.toggle_reaction(me, &conversation_id, MessageId(r.message_id), &r.emoji)
				.await?;
			pb::Ack {
				message: Some(wire::message_to_pb(&message)),
				..ack_ok()
			}
		}
		Msg::Typing(t) => {
			if let Ok(conversation_id) = ConversationId::new(t.conversation_id) {
				engine.typing(identity, &conversation_id, t.is_typing).await;
			}
			return Ok(None);
		}
		Msg::FetchHistory(f) => {
			let conversation_id = parse_conversation_id(&f.conversation_id)?;
			let count = engine
				.fetch_history(
					conn_id,
					me,
					&conversation_id,
					f.limit as usize,
					f.before_message_id.map(MessageId),
				)
				.await?;
			pb::Ack {
				detail: format!("messages={count}"),
				..ack_ok()
			}
		}
		Msg::OpenDirect(o) => {
			let peer = parse_user_id(&o.peer_user_id)?;
			let conversation = engine.open_direct(me, &peer).await?;
			pb::Ack {
				conversation: Some(wire::conversation_to_pb(&conversation, me)),
				..ack_ok()
			}
		}
		Msg::CreateGroup(g) => {
			let members = parse_user_ids(&g.member_ids)?;
			let name = g.name.filter(|n| !n.trim().is_empty());
			let conversation = engine.create_group(me, name, members).await?;
			pb::Ack {
				conversation: Some(wire::conversation_to_pb(&conversation, me)),
				..ack_ok()
			}
		}
		Msg::AddMembers(a) => {
			let conversation_id = parse_conversation_id(&a.conversation_id)?;
			let members = parse_user_ids(&a.member_ids)?;
			let conversation = engine.add_members(me, &conversation_id, &members).await?;
			pb::Ack {
				conversation: Some(wire::conversation_to_pb(&conversation, me)),
				..ack_ok()
			}
		}
		Msg::RegisterPushToken(p) => {
			engine.register_push_token(me, &p.token).await?;
			ack_ok()
		}
		Msg::UnregisterPushToken(p) => {
			if engine.unregister_push_token(&p.token).await? {
				ack_ok()
			} else {
				ack_status(pb::AckStatus::Ignored, "unknown token")
			}
		}
		Msg::Ping(p) => {
			return Ok(Some(Msg::Pong(pb::Pong {
				client_time_unix_ms: p.client_time_unix_ms,
				server_time_unix_ms: unix_ms_now(),
			})));
		}
		Msg::Welcome(_) | Msg::Pong(_) | Msg::Ack(_) | Msg::Error(_) | Msg::Event(_) => {
			return Err(DomainError::invalid("server-to-client message"));
		}
	};

	Ok(Some(Msg::Ack(ack)))
}

fn command_name(msg: &pb::envelope::Msg) -> &'static str {
	use pb::envelope::Msg;

	match msg {
		Msg::Hello(_) => "hello",
		Msg::Join(_) => "join",
		Msg::Leave(_) => "leave",
		Msg::SendMessage(_) => "send_message",
		Msg::MarkRead(_) => "mark_read",
		Msg::EditMessage(_) => "edit_message",
		Msg::DeleteMessage(_) => "delete_message",
		Msg::ToggleReaction(_) => "toggle_reaction",
		Msg::Typing(_) => "typing",
		Msg::FetchHistory(_) => "fetch_history",
		Msg::OpenDirect(_) => "open_direct",
		Msg::CreateGroup(_) => "create_group",
		Msg::AddMembers(_) => "add_members",
		Msg::RegisterPushToken(_) => "register_push_token",
		Msg::UnregisterPushToken(_) => "unregister_push_token",
		Msg::Ping(_) => "ping",
		Msg::Welcome(_) | Msg::Pong(_) | Msg::Ack(_) | Msg::Error(_) | Msg::Event(_) => "unexpected",
	}
}

fn parse_conversation_id(raw: &str) -> Result<ConversationId, DomainError> {
	ConversationId::new(raw.trim()).map_err(|e| DomainError::invalid(format!("conversation_id: {e}")))
}

fn parse_user_id(raw: &str) -> Result<UserId, DomainError> {
	UserId::new(raw.trim()).map_err(|e| DomainError::invalid(format!("user_id: {e}")))
}

/// Blank entries are skipped.
fn parse_user_ids(raw: &[String]) -> Result<Vec<UserId>, DomainError> {
	raw.iter().filter(|s| !s.trim().is_empty()).map(|s| parse_user_id(s)).collect()
}

fn ack_ok() -> pb::Ack {
	ack_status(pb::AckStatus::Ok, "")
}

fn ack_status(status: pb::AckStatus, detail: &str) -> pb::Ack {
	pb::Ack {
		status: status as i32,
		detail: detail.to_string(),
		message: None,
		conversation: None,
	}
}

fn ack_error(err: &DomainError) -> pb::Ack {
	ack_status(wire::ack_status_for(err), &err.to_string())
}

/// Deliver a handshake error and close the connection once the peer has
/// acknowledged the frame (or hung up).
async fn reject(connection: &quinn::Connection, mut send: quinn::SendStream, env: pb::Envelope, max_frame: usize) {
	let code = match &env.msg {
		Some(pb::envelope::Msg::Error(e)) => e.code.clone(),
		_ => String::new(),
	};
	if let Err(e) = send_envelope(&mut send, env, max_frame).await {
		debug!(error = %e, "failed to write handshake error");
	}
	let _ = send.finish();
	if tokio::time::timeout(REJECT_LINGER, send.stopped()).await.is_err() {
		debug!("handshake error not acknowledged in time");
	}
	let _ = tokio::time::timeout(REJECT_LINGER, connection.closed()).await;
	connection.close(quinn::VarInt::from_u32(CLOSE_REJECTED), code.as_bytes());
}

fn connection_error(code: &str, message: String) -> pb::Envelope {
	envelope(
		String::new(),
		pb::envelope::Msg::Error(pb::Error {
			code: code.to_string(),
			message,
		}),
	)
}

async fn send_envelope(send: &mut quinn::SendStream, env: pb::Envelope, max_frame: usize) -> anyhow::Result<()> {
	let frame = encode_frame(&env, max_frame)?;
	metrics::counter!("courier_server_envelopes_out_total").increment(1);
	metrics::counter!("courier_server_control_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}
