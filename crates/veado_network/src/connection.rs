//! Websocket session with a single peer.
//!
//! A [`PeerConnection`] owns one background worker that connects, reads
//! frames until the socket closes, and then retries after a fixed interval.
//! Decoded frames are published as [`ModelEvent`]s on the bus it was handed.
//! Outbound requests go through a [`PeerLink`], which only accepts them while
//! a socket is live.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use veado_core::EventBus;

use crate::codec::{self, DecodeError, Request, Response};
use crate::events::ModelEvent;
use crate::peer::PeerInstance;

/// Default delay between a failed or closed session and the next attempt.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tunables for a peer connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub retry_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
        }
    }
}

/// Cloneable send handle for a connection's current socket.
#[derive(Clone, Default)]
pub struct PeerLink {
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
}

impl PeerLink {
    /// Queue a request on the live socket. Never blocks.
    ///
    /// Returns `false`, and sends nothing, when no socket is open.
    pub fn send(&self, request: &Request) -> bool {
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(Message::Text(request.encode().into())).is_ok(),
            None => {
                trace!("Dropping {request:?}: not connected");
                false
            }
        }
    }

    /// Whether a socket is currently open.
    pub fn is_open(&self) -> bool {
        self.outbound.lock().is_some()
    }

    fn install(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.outbound.lock() = Some(tx);
    }

    fn clear(&self) {
        self.outbound.lock().take();
    }
}

/// A managed, self-reconnecting connection to one peer.
pub struct PeerConnection {
    peer: PeerInstance,
    link: PeerLink,
    shutdown_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Spawn the connection worker. Must be called within a tokio runtime.
    ///
    /// `link` is opened for sends once the socket is up and closed again when
    /// it drops, so callers can publish the link before the worker runs.
    pub fn connect(
        peer: PeerInstance,
        link: PeerLink,
        events: EventBus<ModelEvent>,
        settings: &ConnectionSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run_connection(
            peer.clone(),
            link.clone(),
            events,
            settings.retry_interval,
            shutdown_rx,
        ));

        Self {
            peer,
            link,
            shutdown_tx,
            worker: Some(worker),
        }
    }

    pub fn peer(&self) -> &PeerInstance {
        &self.peer
    }

    /// A send handle that stays valid after this connection is moved.
    pub fn link(&self) -> PeerLink {
        self.link.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    /// See [`PeerLink::send`].
    pub fn send(&self, request: &Request) -> bool {
        self.link.send(request)
    }

    /// Close the socket, stop retrying, and wait for the worker to exit.
    ///
    /// Idempotent. If a session was open, `Connected(false)` has been
    /// published by the time this returns.
    pub async fn terminate(&mut self) {
        self.shutdown_tx.send_replace(true);
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Err(e) = worker.await {
            warn!("Connection worker for {} ended abnormally: {e}", self.peer);
        }
        debug!("Connection to {} terminated", self.peer);
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn run_connection(
    peer: PeerInstance,
    link: PeerLink,
    events: EventBus<ModelEvent>,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = peer.url();
    loop {
        debug!("Connecting to {url}");
        let attempt = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok((stream, _)) => {
                info!("Connected to {peer}");
                run_session(&peer, stream, &link, &events, &mut shutdown).await;
                info!("Disconnected from {peer}");
            }
            Err(e) => info!("Unable to connect to {peer}: {e}"),
        }

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(retry_interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    trace!("Connection worker for {peer} exiting");
}

async fn run_session(
    peer: &PeerInstance,
    stream: ClientStream,
    link: &PeerLink,
    events: &EventBus<ModelEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Subscribe goes out before anything the Connected handlers send.
    let _ = tx.send(Message::Text(Request::Subscribe.encode().into()));
    link.install(tx);
    events.publish(&ModelEvent::Connected(true));

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(peer, text.as_str(), events),
                Some(Ok(Message::Close(frame))) => {
                    debug!("{peer} closed the socket: {frame:?}");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Websocket error from {peer}: {e}");
                    break;
                }
                None => break,
            },
            Some(message) = rx.recv() => {
                if let Err(e) = sink.send(message).await {
                    warn!("Failed to send to {peer}: {e}");
                    break;
                }
            }
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    link.clear();
    events.publish(&ModelEvent::Connected(false));
}

fn handle_frame(peer: &PeerInstance, text: &str, events: &EventBus<ModelEvent>) {
    match codec::decode(text) {
        Ok(response) => {
            if let Some(event) = into_event(response) {
                events.publish(&event);
            }
        }
        Err(DecodeError::Unrecognized(event)) => {
            debug!("Ignoring {event:?} message from {peer}");
        }
        Err(e) => warn!("Dropping frame from {peer}: {e}"),
    }
}

/// Map a decoded response onto the event it announces. Thumbnails with a
/// payload that is not valid base64 are logged and dropped.
fn into_event(response: Response) -> Option<ModelEvent> {
    match response {
        Response::List(states) => Some(ModelEvent::AllStates(states)),
        Response::Peek(state_id) => Some(ModelEvent::ActiveState(state_id)),
        Response::Thumbnail(thumb) => match BASE64.decode(thumb.png.as_bytes()) {
            Ok(png) => Some(ModelEvent::Thumbnail {
                state_id: thumb.state_id,
                hash: thumb.hash,
                png,
            }),
            Err(e) => {
                warn!("Thumbnail for {} is not valid base64: {e}", thumb.state_id);
                None
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
