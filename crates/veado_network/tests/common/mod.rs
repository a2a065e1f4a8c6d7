//! In-process websocket peer for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// Accepts any number of clients; frames can be pushed to the most recent.
pub struct FakePeer {
    pub port: u16,
    received: mpsc::UnboundedReceiver<String>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    accepted: Arc<AtomicUsize>,
    listener: JoinHandle<()>,
}

impl FakePeer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let current = Arc::clone(&current);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, received_tx.clone(), Arc::clone(&current)));
                }
            })
        };

        Self {
            port,
            received,
            current,
            accepted,
            listener: task,
        }
    }

    /// Number of websocket clients accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Push a raw frame to the most recent client.
    pub fn push(&self, frame: String) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Message::Text(frame.into()));
        }
    }

    /// Close the most recent client's socket from the server side.
    pub fn close_client(&self) {
        if let Some(tx) = self.current.lock().take() {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Wait for the next inbound frame and return its inner `payload.event`.
    pub async fn next_request(&mut self) -> String {
        let frame = tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("fake peer stopped");
        inner_event(&frame)
    }

    /// Collect inbound request names until `count` have arrived.
    pub async fn requests(&mut self, count: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.next_request().await);
        }
        names
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn serve(
    stream: TcpStream,
    received: mpsc::UnboundedSender<String>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    *current.lock() = Some(tx);

    loop {
        tokio::select! {
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = received.send(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            Some(outbound) = rx.recv() => {
                let closing = matches!(outbound, Message::Close(_));
                let _ = sink.send(outbound).await;
                if closing {
                    break;
                }
            }
        }
    }
}

/// The `payload.event` of a `"nodes:<json>"` request frame.
pub fn inner_event(frame: &str) -> String {
    let (channel, body) = frame.split_once(':').expect("frame has a channel");
    assert_eq!(channel, "nodes");
    let value: Value = serde_json::from_str(body).expect("frame body is JSON");
    value["payload"]["event"]
        .as_str()
        .expect("payload has an event")
        .to_owned()
}

/// Poll `condition` until it holds or the wait expires.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
