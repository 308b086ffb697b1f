//! WebSocket transport for room connections.
//!
//! Each connection gets one `ClientSession` actor holding an explicit session
//! record (connection id, current room key) — no ambient state. Frames are
//! JSON text events; the actor decodes them and routes commands into the
//! registry, and forwards the room's outbound frames back to the socket.

use crate::registry::RoomRegistry;
use crate::room::{JoinRequest, RoomCommand};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use puzzleroom_protocol::{ClientEvent, ConnectionId, RoomKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth of the per-connection outbound frame queue.
const OUTBOUND_DEPTH: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state for the WebSocket route.
pub struct WsState {
    pub registry: RoomRegistry,
}

/// GET /ws — upgrade to a coordinator session.
pub async fn connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<WsState>,
) -> Result<HttpResponse, actix_web::Error> {
    ws::start(ClientSession::new(state.registry.clone()), &req, stream)
}

/// Outbound frame forwarded from the room task to the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct OutboundFrame(String);

/// WebSocket actor for one client connection.
pub struct ClientSession {
    conn: ConnectionId,
    registry: RoomRegistry,
    /// Room this connection has joined, if any.
    current_room: Option<RoomKey>,
    /// Sink handed to rooms on join.
    outbound_tx: mpsc::Sender<String>,
    /// Receiver side, consumed by the forwarder once the actor starts.
    outbound_rx: Option<mpsc::Receiver<String>>,
    last_heartbeat: Instant,
}

impl ClientSession {
    pub fn new(registry: RoomRegistry) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_DEPTH);
        Self {
            conn: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst)),
            registry,
            current_room: None,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::debug!(conn = act.conn.0, "client heartbeat timeout");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Forward frames produced by room tasks into the socket.
    fn start_forwarder(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(mut rx) = self.outbound_rx.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if addr.try_send(OutboundFrame(frame)).is_err() {
                        break;
                    }
                }
            });
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { room_id, name } => {
                // One current room per connection: leave the previous one first.
                if let Some(prev) = self.current_room.take() {
                    self.registry
                        .dispatch(&prev, RoomCommand::Disconnect { conn: self.conn });
                }
                self.current_room = Some(room_id.clone());
                self.registry.join(
                    &room_id,
                    JoinRequest {
                        conn: self.conn,
                        name,
                        outbound: self.outbound_tx.clone(),
                    },
                );
            }
            event => {
                // Events before join are late or out of order; drop them.
                if let Some(key) = &self.current_room {
                    self.registry.dispatch(
                        key,
                        RoomCommand::Client {
                            from: self.conn,
                            event,
                        },
                    );
                }
            }
        }
    }
}

impl Actor for ClientSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(conn = self.conn.0, "connection opened");
        self.heartbeat(ctx);
        self.start_forwarder(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(conn = self.conn.0, "connection closed");
        if let Some(key) = self.current_room.take() {
            self.registry
                .dispatch(&key, RoomCommand::Disconnect { conn: self.conn });
        }
    }
}

impl Handler<OutboundFrame> for ClientSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match ClientEvent::decode(&text) {
                Ok(event) => self.handle_client_event(event),
                Err(error) => {
                    // A malformed frame must not take down the session or
                    // the room; log and move on.
                    tracing::debug!(conn = self.conn.0, %error, "malformed frame dropped");
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::debug!(conn = self.conn.0, "unexpected binary frame dropped");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(conn = self.conn.0, ?reason, "close frame");
                ctx.stop();
            }
            Err(error) => {
                tracing::debug!(conn = self.conn.0, %error, "protocol error");
                ctx.stop();
            }
            _ => (),
        }
    }
}
