// src/pipeline.rs
//
// Ingestion pipeline: decoded events in, persisted and broadcast records out.
//
// Events are handled one at a time in arrival order. Only `Data` events reach
// the store; a store failure drops that event and processing continues.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::broadcast::RecordListener;
use crate::io::serial::{decode, DecodedEvent, RawLine};
use crate::record::{NewRecord, SpeedRecord};
use crate::record_store::RecordStore;

/// What happened to one event.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    /// Stored and handed to the listener.
    Persisted(SpeedRecord),
    /// A measurement the store refused; not broadcast.
    Dropped,
    /// Diagnostic or unrecognized text; never stored.
    Ignored,
}

/// Counter snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub persisted: u64,
    pub store_failures: u64,
    pub info: u64,
    pub unrecognized: u64,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    store_failures: AtomicU64,
    info: AtomicU64,
    unrecognized: AtomicU64,
}

pub struct IngestPipeline {
    store: Arc<dyn RecordStore>,
    listener: Arc<dyn RecordListener>,
    counters: Counters,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn RecordStore>, listener: Arc<dyn RecordListener>) -> Self {
        IngestPipeline {
            store,
            listener,
            counters: Counters::default(),
        }
    }

    /// Decode one framed line and handle the resulting event, if any.
    pub async fn handle_line(&self, line: &RawLine) -> Option<IngestOutcome> {
        if line.incomplete {
            tlog!("[pipeline] Line ended without newline: {:?}", line.text);
        }
        let event = decode(line)?;
        Some(self.handle(event).await)
    }

    /// Handle one decoded event.
    pub async fn handle(&self, event: DecodedEvent) -> IngestOutcome {
        match event {
            DecodedEvent::Data {
                session_id,
                object_no,
                speed,
            } => {
                let candidate = NewRecord::stamped_now(session_id, object_no, speed);
                match self.store.append(&candidate).await {
                    Ok(record) => {
                        self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                        tlog!(
                            "[pipeline] [Session {}] Object #{} - Speed {:.2} km/h (id {})",
                            record.session_id,
                            record.object_no,
                            record.speed,
                            record.id
                        );
                        self.listener.notify(&record);
                        IngestOutcome::Persisted(record)
                    }
                    Err(e) => {
                        self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                        tlog!(
                            "[pipeline] Failed to save session {} object {}: {}",
                            session_id,
                            object_no,
                            e
                        );
                        IngestOutcome::Dropped
                    }
                }
            }
            DecodedEvent::Info { text } => {
                self.counters.info.fetch_add(1, Ordering::Relaxed);
                tlog!("[device] {}", text);
                IngestOutcome::Ignored
            }
            DecodedEvent::Unrecognized { text, reason } => {
                self.counters.unrecognized.fetch_add(1, Ordering::Relaxed);
                tlog!("[pipeline] Ignored line ({}): {:?}", reason, text);
                IngestOutcome::Ignored
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            store_failures: self.counters.store_failures.load(Ordering::Relaxed),
            info: self.counters.info.load(Ordering::Relaxed),
            unrecognized: self.counters.unrecognized.load(Ordering::Relaxed),
        }
    }
}
