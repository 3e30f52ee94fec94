//! Live sync over WebSocket
//!
//! Connection registry, heartbeat sweep, broadcast of service events and
//! dispatch of client requests.

pub mod dispatch;
pub mod registry;

pub use registry::{BroadcastReport, ConnectionState, Outbound, Registry, SweepReport};

use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use costsync_core::DataEvent;
use costsync_types::{ProducerState, ProjectScope, Reply, ServerMessage};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let id = state.registry.register(tx);
    info!(connection = id, clients = state.registry.len(), "Live client connected");

    let writer = tokio::spawn(write_outbound(sink, rx));
    greet(&state, id).await;
    serve_connection(&state, id, stream, writer).await;

    info!(connection = id, clients = state.registry.len(), "Live client disconnected");
}

/// Drain a connection's outbound queue into the socket.
///
/// Ends after a close frame, a failed send, or once the registry drops the
/// sending half.
async fn write_outbound<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let message = match outbound {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Ping => Message::Ping(Bytes::new()),
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

/// Read client frames until the peer leaves or the writer stops.
///
/// A swept client gets a close frame but a dead peer never answers it, so the
/// end of the writer also ends the read side.
async fn serve_connection<R, E>(
    state: &Arc<AppState>,
    id: u64,
    mut stream: R,
    mut writer: JoinHandle<()>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        let received = tokio::select! {
            received = stream.next() => received,
            _ = &mut writer => {
                debug!(connection = id, "Writer stopped, dropping socket");
                break;
            }
        };
        let message = match received {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(connection = id, error = %e, "Live socket read failed");
                break;
            }
            None => break,
        };
        state.registry.touch(id);

        match message {
            Message::Text(text) => {
                let state = Arc::clone(state);
                let text = text.as_str().to_owned();
                tokio::spawn(async move {
                    let reply = dispatch::handle_text(&state, &text).await;
                    if !state.registry.send_to(id, &reply) {
                        debug!(connection = id, "Client gone before reply");
                    }
                });
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                let reply = ServerMessage::Error {
                    reply: Reply::error(None, "Binary frames are not supported"),
                };
                state.registry.send_to(id, &reply);
            }
        }
    }

    state.registry.unregister(id);
    writer.abort();
}

/// Producer state and the current code list for a new client
async fn greet(state: &Arc<AppState>, id: u64) {
    let status = ServerMessage::ConnectionStatus {
        connection_id: id,
        status: "connected".to_string(),
        kafka: ProducerState::from(state.service.gateway().is_connected()),
    };
    state.registry.send_to(id, &status);

    let codes = match dispatch::available_codes(state, None, ProjectScope::default()).await {
        Ok(message) => message,
        Err(e) => {
            warn!(connection = id, error = %e, "Initial code list unavailable");
            ServerMessage::failure(
                "get_available_ebkp_codes",
                Reply::error(None, format!("{:#}", e)),
            )
        }
    };
    state.registry.send_to(id, &codes);
}

/// Map a service event to the frame pushed to every client
pub fn event_frame(event: &DataEvent) -> Option<ServerMessage> {
    match event {
        DataEvent::ProducerStatusChanged(connected) => Some(ServerMessage::KafkaStatus {
            status: ProducerState::from(*connected),
        }),
        DataEvent::ProjectUpdated(update) => Some(ServerMessage::ProjectUpdated {
            project_name: update.project_name.clone(),
            project_id: update.project_id.clone(),
            element_count: update.element_count,
            total_cost: update.total_cost,
        }),
        DataEvent::StoreStatusChanged(_) | DataEvent::ProjectDataDeleted(_) => None,
    }
}

/// Start the heartbeat sweep, event forwarding and producer handshake retry
pub fn spawn_background(state: &Arc<AppState>) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(3);

    let registry = Arc::clone(&state.registry);
    let every = state.live.heartbeat_interval();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = registry.sweep();
            if report.closed > 0 {
                info!(closed = report.closed, remaining = registry.len(), "Heartbeat sweep");
            }
        }
    }));

    let registry = Arc::clone(&state.registry);
    let mut events = state.service.events().subscribe();
    tasks.push(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(frame) = event_frame(&event) {
                        registry.broadcast(&frame);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Live event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }));

    let service = Arc::clone(&state.service);
    tasks.push(tokio::spawn(
        service.producer_retry_loop(state.live.producer_retry()),
    ));

    tasks
}
