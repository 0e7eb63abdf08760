// src/service.rs
//
// Startup wiring for the ingestion service: store -> pipeline -> connection
// manager, plus the live push server. Everything is an owned instance created
// here and handed down; nothing is process-global except the log file.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::Broadcaster;
use crate::error::TransportError;
use crate::io::serial::{FileOpener, LinkOpener, SerialOpener};
use crate::io::ConnectionManager;
use crate::live;
use crate::pipeline::{IngestPipeline, PipelineStats};
use crate::record_db::SqliteRecordStore;
use crate::record_store::RecordStore;
use crate::settings::Settings;

/// A started service. Dropping it without `stop` leaves tasks running.
pub struct RunningService {
    pub live_addr: SocketAddr,
    /// Set when the initial connection failed and the service runs without live data.
    pub link_error: Option<TransportError>,
    connection: Arc<ConnectionManager>,
    broadcaster: Arc<Broadcaster>,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<()>,
}

impl RunningService {
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn is_degraded(&self) -> bool {
        self.link_error.is_some()
    }

    /// Close the serial link, then stop accepting live clients.
    pub async fn stop(self) {
        tlog!("[service] Shutting down...");
        self.connection.disconnect().await;
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.server.await {
            tlog!("[service] Live server task failed: {:?}", e);
        }
        tlog!("[service] Stopped");
    }
}

/// Bind the live endpoint, then attempt the serial connection once.
///
/// A failed connection does not fail startup: the service keeps serving
/// live clients in degraded mode and the error is kept in `link_error`.
pub async fn start(
    settings: &Settings,
    store: Arc<dyn RecordStore>,
    opener: Arc<dyn LinkOpener>,
) -> Result<RunningService, String> {
    let broadcaster = Arc::new(Broadcaster::new(settings.subscriber_capacity));
    let pipeline = Arc::new(IngestPipeline::new(store, broadcaster.clone()));
    let connection = Arc::new(ConnectionManager::new(
        opener,
        pipeline,
        settings.line_queue_capacity,
    ));

    let listener = TcpListener::bind(&settings.live_addr)
        .await
        .map_err(|e| format!("Failed to bind live endpoint {}: {}", settings.live_addr, e))?;
    let live_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read live endpoint address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(live::serve(
        listener,
        broadcaster.clone(),
        connection.clone(),
        shutdown_rx,
    ));

    let link_error = match connection
        .connect(&settings.serial_port, settings.baud_rate)
        .await
    {
        Ok(()) => {
            tlog!("[service] Sensor connection established");
            None
        }
        Err(e) => {
            tlog!("[service] Failed to connect to sensor: {}", e);
            tlog!("[service] Live clients can still connect, but no data will be collected");
            tlog!(
                "[service] To fix: verify the sensor is connected to {} and powered on",
                settings.serial_port
            );
            Some(e)
        }
    };

    Ok(RunningService {
        live_addr,
        link_error,
        connection,
        broadcaster,
        shutdown_tx,
        server,
    })
}

/// Run the service against the configured serial port until SIGINT/SIGTERM.
pub async fn run(settings: Settings) -> Result<(), String> {
    let store = Arc::new(SqliteRecordStore::open(&settings.database_path).map_err(|e| e.to_string())?);
    let opener = Arc::new(SerialOpener::new(settings.line_settings()));

    let service = start(&settings, store, opener).await?;
    shutdown_signal().await;
    service.stop().await;
    Ok(())
}

/// Outcome of a capture replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub pipeline: PipelineStats,
    /// Lines lost to a full queue. Zero for file captures, which wait instead.
    pub dropped_lines: u64,
}

/// Feed a captured device log through the pipeline into the store.
pub async fn replay(store: Arc<dyn RecordStore>, capture: &str) -> Result<ReplayReport, String> {
    let broadcaster = Arc::new(Broadcaster::default());
    let pipeline = Arc::new(IngestPipeline::new(store, broadcaster));
    let connection = ConnectionManager::new(
        Arc::new(FileOpener),
        pipeline.clone(),
        crate::io::DEFAULT_LINE_QUEUE_CAPACITY,
    );

    connection
        .connect(capture, 0)
        .await
        .map_err(|e| e.to_string())?;
    connection.wait_for_end().await;

    let report = ReplayReport {
        pipeline: pipeline.stats(),
        dropped_lines: connection.status().dropped_lines,
    };
    if report.dropped_lines > 0 {
        tlog!("[service] Replay dropped {} lines", report.dropped_lines);
    }
    Ok(report)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tlog!("[service] SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
