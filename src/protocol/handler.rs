//! Protocol Handler (C7): the WebSocket accept loop and per-session state
//! machine.
//!
//! Grounded on `call_server.rs`'s `handle_connection` — split the stream
//! into sender/receiver halves, forward all outbound traffic through one
//! spawned task reading from an mpsc channel (so heartbeat pings and
//! transcript results never race writing to the socket), and drive a
//! `tokio::select!` loop over inbound frames until close.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::chunk_processor::ChunkProcessor;
use crate::config::ServerContext;
use crate::engine::{build_engine, resolve_options};
use crate::error::ServerError;
use crate::protocol::messages::{ClientMessage, ServerMessage, WelcomeInfo};
use crate::session::{self, Liveness, SessionSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PreAuth,
    Ready,
    Finishing,
    Closed,
}

pub async fn handle_connection(raw_stream: TcpStream, context: Arc<ServerContext>) {
    let ws_stream = match tokio_tungstenite::accept_async(raw_stream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("websocket handshake failed: {e}");
            return;
        }
    };

    let session_id = session::new_session_id();
    let span = tracing::info_span!("session", id = %session_id);
    let _enter = span.enter();
    tracing::info!("session connected");

    run_session(ws_stream, context).await;

    tracing::info!("session closed");
}

async fn run_session(ws_stream: WebSocketStream<TcpStream>, context: Arc<ServerContext>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let sink = Arc::new(SessionSink::new(outbound_tx.clone()));
    let liveness = Liveness::new();

    // Single owned writer task: every outbound message, from the heartbeat
    // or from transcript results, goes through this one path. The close
    // code sent at teardown reflects whichever reason (if any) the session
    // recorded via `Liveness::request_close` — 1013 for an idle timeout,
    // 1000 otherwise.
    let forward_liveness = liveness.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("failed to serialize outbound message: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let code = match forward_liveness.close_code() {
            1013 => tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Again,
            _ => tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
        };
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "".into(),
            })))
            .await;
    });
    let heartbeat_task = session::spawn_heartbeat(
        context.clone(),
        liveness.clone(),
        outbound_tx.clone(),
        sink.clone(),
    );

    let mut state = State::PreAuth;
    let mut processor: Option<ChunkProcessor> = None;
    let mut welcome_msg_id: u64 = 0;

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = liveness.closed() => {
                // The heartbeat task timed out the session and has nothing
                // further to read for; tear down even though the client
                // itself has gone silent instead of explicitly closing.
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("websocket read error: {e}");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                if handle_text_frame(
                    &text,
                    &mut state,
                    &mut processor,
                    &context,
                    &sink,
                    &outbound_tx,
                    &liveness,
                    &mut welcome_msg_id,
                )
                .await
                .is_break()
                {
                    break;
                }
            }
            Message::Binary(data) => {
                handle_binary_frame(&data, state, &mut processor, &sink, &liveness).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    liveness.mark_dead();
    if let Some(mut processor) = processor.take() {
        let _ = processor.close().await;
    }
    heartbeat_task.abort();
    drop(outbound_tx);
    let _ = forward_task.await;
}

enum Flow {
    Continue,
    Break,
}

impl Flow {
    fn is_break(&self) -> bool {
        matches!(self, Flow::Break)
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_text_frame(
    text: &str,
    state: &mut State,
    processor: &mut Option<ChunkProcessor>,
    context: &Arc<ServerContext>,
    sink: &Arc<SessionSink>,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    liveness: &Liveness,
    welcome_msg_id: &mut u64,
) -> Flow {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let message = match parsed {
        Ok(m) => m,
        Err(e) => {
            sink.send_error(ServerError::InvalidMessage(e.to_string()))
                .await;
            return Flow::Continue;
        }
    };

    match (&message, *state) {
        (ClientMessage::Welcome { .. }, State::PreAuth) => {
            handle_welcome(message, state, processor, context, sink, outbound_tx, welcome_msg_id)
                .await
        }
        (ClientMessage::Welcome { .. }, _) => {
            sink.send_error(ServerError::NotPossible("duplicate welcome".to_string()))
                .await;
            Flow::Continue
        }
        (_, State::PreAuth) => {
            sink.send_error(ServerError::Unauthorized(
                "only welcome is accepted before authentication".to_string(),
            ))
            .await;
            Flow::Continue
        }
        (ClientMessage::Pong { .. }, _) => {
            liveness.on_data_activity();
            Flow::Continue
        }
        (ClientMessage::AudioEnd { msg_id, .. }, State::Ready) => {
            *state = State::Finishing;
            let ack_id = msg_id.unwrap_or(0);
            let _ = outbound_tx.send(ServerMessage::Response {
                msg_id: ack_id,
                code: 200,
                response_to: "audioend".to_string(),
            });
            if let Some(proc) = processor.as_mut() {
                if let Err(e) = proc.finish_processing().await {
                    sink.send_error(e).await;
                }
            }
            Flow::Continue
        }
        (ClientMessage::AudioEnd { .. }, _) => Flow::Continue,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_welcome(
    message: ClientMessage,
    state: &mut State,
    processor: &mut Option<ChunkProcessor>,
    context: &Arc<ServerContext>,
    sink: &Arc<SessionSink>,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    welcome_msg_id: &mut u64,
) -> Flow {
    let ClientMessage::Welcome {
        data,
        client_id,
        access_token,
        msg_id,
    } = message
    else {
        unreachable!()
    };

    *welcome_msg_id = msg_id.unwrap_or(0);

    if !session::authenticate(context, client_id.as_deref(), access_token.as_deref()) {
        sink.send_error(ServerError::Unauthorized("invalid token".to_string()))
            .await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        return Flow::Break;
    }

    let options = match resolve_options(&context.config, &data) {
        Ok(o) => o,
        Err(e) => {
            sink.send_error(e).await;
            return Flow::Break;
        }
    };

    let engine = match build_engine(
        options.clone(),
        context.model_cache.clone(),
        &context.config.recordings_path,
        sink.clone(),
    )
    .await
    {
        Ok(e) => e,
        Err(e) => {
            sink.send_error(e).await;
            return Flow::Break;
        }
    };

    *processor = Some(ChunkProcessor::new(engine));
    *state = State::Ready;

    let info = WelcomeInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: options.engine.clone(),
        models: context
            .config
            .models
            .iter()
            .map(|m| m.name.clone().unwrap_or_else(|| m.path.clone()))
            .collect(),
        languages: context.distinct_languages(),
        features: vec!["words_to_digits", "datetime_normalization", "alternatives"],
        options,
    };

    let _ = outbound_tx.send(ServerMessage::Welcome {
        msg_id: *welcome_msg_id,
        code: 200,
        info,
    });

    Flow::Continue
}

async fn handle_binary_frame(
    data: &[u8],
    state: State,
    processor: &mut Option<ChunkProcessor>,
    sink: &Arc<SessionSink>,
    liveness: &Liveness,
) {
    if state == State::PreAuth {
        sink.send_error(ServerError::Unauthorized(
            "binary frame before authentication".to_string(),
        ))
        .await;
        return;
    }

    liveness.on_data_activity();

    let Some(proc) = processor.as_mut() else {
        sink.send_error(ServerError::ProcessError).await;
        return;
    };

    if let Err(e) = proc.process(data).await {
        sink.send_error(e).await;
    }
}
