// src/lib.rs
//
// Speed-sensor ingestion: serial line framing and decoding, persistence to
// SQLite, and live push of new records to dashboard clients.

#[macro_use]
pub mod logging;

pub mod broadcast;
pub mod error;
pub mod export;
pub mod io;
pub mod live;
pub mod pipeline;
pub mod record;
pub mod record_db;
pub mod record_store;
pub mod service;
pub mod settings;

pub use broadcast::{Broadcaster, RecordListener};
pub use error::{StoreError, TransportError};
pub use io::{ConnectionManager, ConnectionStatus, LinkState};
pub use pipeline::{IngestOutcome, IngestPipeline, PipelineStats};
pub use record::{NewRecord, SpeedRecord};
pub use record_db::SqliteRecordStore;
pub use record_store::{RecordOrder, RecordStore, Statistics};
pub use settings::Settings;
