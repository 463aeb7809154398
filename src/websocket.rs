//! # WebSocket Data Plane
//!
//! Clients connect to `/ws/data` and receive one binary message per
//! acquired frame: `channel_count * chunk_size` signed 16-bit little-endian
//! integers, per-channel contiguous. The stream is one-way; the channel
//! count needed to reshape the payload comes from `/config`.
//!
//! ## Connection lifecycle:
//! 1. On start the actor registers itself with the subscriber registry and
//!    pipes the registry's frame channel into the socket.
//! 2. Frames produced while the connection is open are forwarded in
//!    production order; there is no replay of earlier frames.
//! 3. If the registry drops the subscriber (failed or timed-out sends),
//!    the frame channel closes and the actor shuts the connection down.

use crate::broadcast::SubscriberRegistry;
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the server pings each client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a client may stay silent before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one data-plane subscriber.
pub struct DataWebSocket {
    registry: Arc<SubscriberRegistry>,
    subscriber_id: Option<Uuid>,
    last_heartbeat: Instant,
}

impl DataWebSocket {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            subscriber_id: None,
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for DataWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Register with the subscriber set and start forwarding frames.
    fn started(&mut self, ctx: &mut Self::Context) {
        let (id, receiver) = self.registry.connect();
        self.subscriber_id = Some(id);
        ctx.add_stream(ReceiverStream::new(receiver));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Deregister so broadcasts stop targeting this connection.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.subscriber_id.take() {
            self.registry.disconnect(id);
        }
        info!("WebSocket connection stopped");
    }
}

/// Frames arriving from the broadcaster, forwarded as binary messages.
impl StreamHandler<web::Bytes> for DataWebSocket {
    fn handle(&mut self, payload: web::Bytes, ctx: &mut Self::Context) {
        ctx.binary(payload);
    }

    /// The frame channel closed: the registry already removed this
    /// subscriber, so the connection has nothing left to carry.
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("Frame channel closed, shutting down connection");
        ctx.stop();
    }
}

/// Control messages from the client. The data plane is strictly one-way;
/// only connection upkeep is handled here.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DataWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(_)) => {
                // Clients of the original protocol send keep-alive text;
                // it carries no information.
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Unexpected binary message from data-plane client");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed by client: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// HTTP → WebSocket upgrade for the data stream.
pub async fn data_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New data-plane connection from {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(
        DataWebSocket::new(Arc::clone(&app_state.registry)),
        &req,
        stream,
    )
}
