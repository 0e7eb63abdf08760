// src/io/connection.rs
//
// Serial link lifecycle: connect, disconnect, and the reader/consumer pair
// attached while connected.
//
// States: Disconnected -> Connecting -> Connected | Failed
//         Connected -> Disconnected (explicit disconnect, transport error, end of stream)
// There is no automatic reconnect; callers re-invoke `connect`.

use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::serial::{run_line_reader, LinkOpener, RawLine, ReadEnd};
use crate::error::TransportError;
use crate::pipeline::IngestPipeline;

/// Default depth of the line queue between reader and pipeline.
pub const DEFAULT_LINE_QUEUE_CAPACITY: usize = 256;

/// Link state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// Snapshot for status reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub dropped_lines: u64,
}

/// Tasks attached to one open link.
struct ActiveLink {
    address: String,
    cancel: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Owns the single transport handle. Passed to the service at startup.
pub struct ConnectionManager {
    opener: Arc<dyn LinkOpener>,
    pipeline: Arc<IngestPipeline>,
    queue_capacity: usize,
    state: Arc<Mutex<LinkState>>,
    target: Mutex<Option<(String, u32)>>,
    dropped_lines: Arc<AtomicU64>,
    active: tokio::sync::Mutex<Option<ActiveLink>>,
}

fn set_state(state: &Mutex<LinkState>, next: LinkState) {
    if let Ok(mut guard) = state.lock() {
        if *guard != next {
            tlog!("[connection] {:?} -> {:?}", *guard, next);
            *guard = next;
        }
    }
}

impl ConnectionManager {
    pub fn new(
        opener: Arc<dyn LinkOpener>,
        pipeline: Arc<IngestPipeline>,
        queue_capacity: usize,
    ) -> Self {
        ConnectionManager {
            opener,
            pipeline,
            queue_capacity: queue_capacity.max(1),
            state: Arc::new(Mutex::new(LinkState::Disconnected)),
            target: Mutex::new(None),
            dropped_lines: Arc::new(AtomicU64::new(0)),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| LinkState::Failed(format!("state mutex poisoned: {}", e)))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        let target = self.target.lock().ok().and_then(|t| t.clone());
        ConnectionStatus {
            connected: self.is_connected(),
            port: target.as_ref().map(|(port, _)| port.clone()),
            baud_rate: target.map(|(_, baud)| baud),
            dropped_lines: self.dropped_lines.load(Ordering::Relaxed),
        }
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    /// Open the link and start routing its lines through the pipeline.
    ///
    /// An open failure leaves the manager in `Failed` and is returned to the
    /// caller; nothing is retried.
    pub async fn connect(&self, address: &str, baud_rate: u32) -> Result<(), TransportError> {
        let mut active = self.active.lock().await;

        if let Some(link) = active.as_ref() {
            if self.is_connected() {
                return Err(TransportError::AlreadyConnected(link.address.clone()));
            }
        }
        // A link that ended on its own still has tasks to reap
        if let Some(stale) = active.take() {
            Self::join_link(stale).await;
        }

        if let Ok(mut target) = self.target.lock() {
            *target = Some((address.to_string(), baud_rate));
        }
        set_state(&self.state, LinkState::Connecting);

        let opener = self.opener.clone();
        let open_address = address.to_string();
        let opened = tokio::task::spawn_blocking(move || opener.open(&open_address, baud_rate))
            .await
            .unwrap_or_else(|e| {
                Err(TransportError::Open {
                    address: address.to_string(),
                    reason: format!("open task failed: {}", e),
                })
            });

        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                tlog!("[connection] Failed to connect to {}: {}", address, e);
                set_state(&self.state, LinkState::Failed(e.to_string()));
                return Err(e);
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel::<RawLine>(self.queue_capacity);

        // Connected before the reader starts, so an immediate end of stream
        // lands on Disconnected rather than being overwritten.
        set_state(&self.state, LinkState::Connected);

        // The consumer drains the queue when the link ends by itself, but an
        // explicit disconnect stops it before the next line.
        let pipeline = self.pipeline.clone();
        let consumer_cancel = cancel.clone();
        let consumer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if consumer_cancel.load(Ordering::Relaxed) {
                    break;
                }
                pipeline.handle_line(&line).await;
            }
        });

        let reader_cancel = cancel.clone();
        let reader_state = self.state.clone();
        let dropped = self.dropped_lines.clone();
        let reader_address = address.to_string();
        let overflow = self.opener.overflow();
        let reader = tokio::task::spawn_blocking(move || {
            let end = run_line_reader(link, &reader_address, overflow, reader_cancel, tx, dropped);
            match end {
                ReadEnd::Cancelled => {}
                ReadEnd::EndOfStream | ReadEnd::ConsumerGone | ReadEnd::Failed(_) => {
                    set_state(&reader_state, LinkState::Disconnected);
                }
            }
        });

        tlog!("[connection] Connected to {} at {} baud", address, baud_rate);
        *active = Some(ActiveLink {
            address: address.to_string(),
            cancel,
            reader,
            consumer,
        });
        Ok(())
    }

    /// Close the link. The reader stops at its next read boundary and the
    /// consumer stops after the line it is handling; queued lines are
    /// discarded. Idempotent.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        if let Some(link) = active.take() {
            link.cancel.store(true, Ordering::Relaxed);
            let address = link.address.clone();
            Self::join_link(link).await;
            tlog!("[connection] Serial port {} closed", address);
        }
        set_state(&self.state, LinkState::Disconnected);
    }

    /// Wait for the current link to end by itself (end of stream or transport
    /// error) and for every line it produced to be processed.
    pub async fn wait_for_end(&self) {
        let mut active = self.active.lock().await;
        if let Some(link) = active.take() {
            Self::join_link(link).await;
        }
    }

    async fn join_link(link: ActiveLink) {
        if let Err(e) = link.reader.await {
            tlog!("[connection] Reader task for {} panicked: {:?}", link.address, e);
        }
        // Reader has dropped its sender, so the consumer exits once the queue
        // is drained or the cancel flag stops it
        if let Err(e) = link.consumer.await {
            tlog!("[connection] Consumer task for {} panicked: {:?}", link.address, e);
        }
    }
}
