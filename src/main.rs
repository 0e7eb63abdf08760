// src/main.rs
//
// speedtrap command line: run the ingestion service, or inspect and maintain
// the record store.

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use speedtrap_lib::export;
use speedtrap_lib::io::serial::list_serial_ports;
use speedtrap_lib::logging::{init_file_logging, stop_file_logging};
use speedtrap_lib::service;
use speedtrap_lib::{RecordOrder, RecordStore, Settings, SqliteRecordStore};

#[derive(Parser)]
#[command(name = "speedtrap")]
#[command(version)]
#[command(about = "Serial speed-sensor ingestion with live dashboard push")]
struct Cli {
    /// Settings file (defaults to <config dir>/speedtrap/settings.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the sensor and serve live updates (default)
    Serve,
    /// List serial ports
    Ports,
    /// Print stored records
    Records {
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Most recent first
        #[arg(long)]
        newest: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print aggregate statistics
    Stats,
    /// Export all records as CSV
    Export {
        /// Output file (defaults to speed_records_<date>.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete records older than the retention period
    Prune {
        /// Overrides `retention_days` from settings
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete records by id
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Delete every record
    Clear,
    /// Ingest a captured device log as if it came from the sensor
    Replay { file: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        stop_file_logging();
        std::process::exit(1);
    }
    stop_file_logging();
}

async fn run(cli: Cli) -> Result<(), String> {
    let settings = Settings::load(cli.config.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Serve);
    if let Commands::Serve = command {
        if let Some(dir) = &settings.log_dir {
            init_file_logging(dir)?;
        }
        return service::run(settings).await;
    }
    if let Commands::Ports = command {
        return print_ports();
    }

    let store = Arc::new(SqliteRecordStore::open(&settings.database_path).map_err(|e| e.to_string())?);

    match command {
        Commands::Records { limit, newest, json } => {
            let order = if newest {
                RecordOrder::NewestFirst
            } else {
                RecordOrder::OldestFirst
            };
            let records = store.query(limit, order).await.map_err(|e| e.to_string())?;
            if json {
                let text = serde_json::to_string_pretty(&records).map_err(|e| e.to_string())?;
                println!("{}", text);
            } else {
                println!(
                    "{:>8}  {:>8}  {:>9}  {:>12}  {:<10}  {:<8}",
                    "ID", "Session", "Object No", "Speed (km/h)", "Date", "Time"
                );
                for r in &records {
                    println!(
                        "{:>8}  {:>8}  {:>9}  {:>12.2}  {:<10}  {:<8}",
                        r.id, r.session_id, r.object_no, r.speed, r.date, r.time
                    );
                }
            }
        }
        Commands::Stats => {
            let stats = store.statistics().await.map_err(|e| e.to_string())?;
            let text = serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?;
            println!("{}", text);
        }
        Commands::Export { out } => {
            let path = out.unwrap_or_else(|| PathBuf::from(export::default_file_name()));
            let records = store
                .query(usize::MAX, RecordOrder::OldestFirst)
                .await
                .map_err(|e| e.to_string())?;
            let file = std::fs::File::create(&path)
                .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
            let rows = export::write_csv(std::io::BufWriter::new(file), &records)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            println!("Exported {} records to {}", rows, path.display());
        }
        Commands::Prune { days } => {
            let days = days.unwrap_or(settings.retention_days);
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let deleted = store
                .delete_older_than(cutoff)
                .await
                .map_err(|e| e.to_string())?;
            println!("Deleted {} records older than {} days", deleted, days);
        }
        Commands::Delete { ids } => {
            let deleted = store.delete_by_ids(&ids).await.map_err(|e| e.to_string())?;
            println!("Deleted {} records", deleted);
        }
        Commands::Clear => {
            let deleted = store.delete_all().await.map_err(|e| e.to_string())?;
            println!("Deleted {} records", deleted);
        }
        Commands::Replay { file } => {
            let report = service::replay(store, &file.to_string_lossy()).await?;
            let stats = &report.pipeline;
            println!(
                "Replayed {}: {} stored, {} store failures, {} info, {} unrecognized, {} dropped",
                file.display(),
                stats.persisted,
                stats.store_failures,
                stats.info,
                stats.unrecognized,
                report.dropped_lines
            );
        }
        Commands::Serve | Commands::Ports => {}
    }

    Ok(())
}

fn print_ports() -> Result<(), String> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let mut line = format!("{}  ({})", port.port_name, port.port_type);
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            line.push_str(&format!("  {:04x}:{:04x}", vid, pid));
        }
        if let Some(product) = port.product {
            line.push_str(&format!("  {}", product));
        }
        println!("{}", line);
    }
    Ok(())
}
