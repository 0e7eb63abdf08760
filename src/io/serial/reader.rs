// src/io/serial/reader.rs
//
// Serial link opening and the blocking line reader.
// The reader frames bytes into lines and hands them to the pipeline consumer
// over a bounded channel without ever waiting on it.

use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

use super::framer::{FramedLines, RawLine};
use super::utils::LineSettings;
use crate::error::TransportError;

/// Read timeout on the port. Bounds how long a cancelled reader can stay
/// blocked inside `read`.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// A readable byte source for one connection.
pub type LinkReader = Box<dyn Read + Send>;

/// What the reader does when the pipeline queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Drop the new line and count it. The source keeps streaming regardless.
    #[default]
    DropNewest,
    /// Block the read loop until the consumer makes room.
    Wait,
}

/// Opens the transport for a connection request.
pub trait LinkOpener: Send + Sync {
    fn open(&self, address: &str, baud_rate: u32) -> Result<LinkReader, TransportError>;

    /// Queue overflow policy for links from this opener.
    fn overflow(&self) -> Overflow {
        Overflow::DropNewest
    }
}

// ============================================================================
// Serial port
// ============================================================================

/// Opens a real serial port through the serialport crate.
#[derive(Clone, Debug)]
pub struct SerialOpener {
    pub line: LineSettings,
    pub read_timeout: Duration,
}

impl SerialOpener {
    pub fn new(line: LineSettings) -> Self {
        SerialOpener {
            line,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

struct PortReader(Box<dyn serialport::SerialPort>);

impl Read for PortReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl LinkOpener for SerialOpener {
    fn open(&self, address: &str, baud_rate: u32) -> Result<LinkReader, TransportError> {
        let builder = self
            .line
            .apply(serialport::new(address, baud_rate))
            .timeout(self.read_timeout);

        let port = builder.open().map_err(|e| TransportError::Open {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        tlog!(
            "[serial] Opened {} at {} baud ({})",
            address,
            baud_rate,
            self.line.describe()
        );
        Ok(Box::new(PortReader(port)))
    }
}

// ============================================================================
// Capture file replay
// ============================================================================

/// Treats the connection address as the path of a captured device log.
/// The baud rate is ignored. End of file ends the connection.
#[derive(Clone, Debug, Default)]
pub struct FileOpener;

impl LinkOpener for FileOpener {
    fn open(&self, address: &str, _baud_rate: u32) -> Result<LinkReader, TransportError> {
        let path = PathBuf::from(address);
        let file = std::fs::File::open(&path).map_err(|e| TransportError::Open {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        tlog!("[serial] Replaying capture {}", path.display());
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    // A file is read faster than it can be stored; nothing is lost by waiting.
    fn overflow(&self) -> Overflow {
        Overflow::Wait
    }
}

// ============================================================================
// Reader loop
// ============================================================================

/// Why a reader loop returned.
#[derive(Debug)]
pub enum ReadEnd {
    /// The cancel flag was set.
    Cancelled,
    /// The transport reported end of stream.
    EndOfStream,
    /// The transport failed.
    Failed(TransportError),
    /// The pipeline consumer went away.
    ConsumerGone,
}

/// Blocking read loop for one connection. Run it on the blocking pool.
///
/// With `Overflow::DropNewest` lines are offered with `try_send`: when the
/// queue is full the line is dropped and counted in `dropped`, so a slow store
/// never stalls the port. With `Overflow::Wait` the loop blocks until the
/// consumer takes the line or goes away.
pub fn run_line_reader(
    link: LinkReader,
    address: &str,
    overflow: Overflow,
    cancel: Arc<AtomicBool>,
    tx: mpsc::Sender<RawLine>,
    dropped: Arc<AtomicU64>,
) -> ReadEnd {
    let mut lines = FramedLines::new(link, cancel.clone());

    loop {
        match lines.next() {
            Some(Ok(line)) if overflow == Overflow::Wait => {
                if tx.blocking_send(line).is_err() {
                    return ReadEnd::ConsumerGone;
                }
            }
            Some(Ok(line)) => match tx.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(line)) => {
                    let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tlog!(
                        "[serial:{}] Pipeline queue full, dropped line {:?} (total dropped: {})",
                        address,
                        line.text,
                        total
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return ReadEnd::ConsumerGone,
            },
            Some(Err(e)) => {
                tlog!("[serial:{}] Transport failure: {}", address, e);
                return ReadEnd::Failed(e);
            }
            None => {
                if cancel.load(Ordering::Relaxed) {
                    return ReadEnd::Cancelled;
                }
                tlog!("[serial:{}] Stream ended", address);
                return ReadEnd::EndOfStream;
            }
        }
    }
}

// ============================================================================
// Port enumeration
// ============================================================================

/// A port the sensor could be attached to, as shown by `speedtrap ports`.
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    /// `USB`, `Bluetooth`, `PCI` or `Unknown`.
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(port: serialport::SerialPortInfo) -> Self {
        let mut info = SerialPortInfo {
            port_name: port.port_name,
            port_type: String::new(),
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
        };
        info.port_type = match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                info.manufacturer = usb.manufacturer;
                info.product = usb.product;
                info.serial_number = usb.serial_number;
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                "USB"
            }
            serialport::SerialPortType::BluetoothPort => "Bluetooth",
            serialport::SerialPortType::PciPort => "PCI",
            serialport::SerialPortType::Unknown => "Unknown",
        }
        .to_string();
        info
    }
}

/// Whether a port is worth offering as a sensor address. macOS exposes each
/// device twice; the `/dev/tty.*` twin waits for carrier detect on open, so
/// only the `/dev/cu.*` side is listed there.
fn is_listed(port_name: &str) -> bool {
    !(cfg!(target_os = "macos") && port_name.starts_with("/dev/tty."))
}

/// Serial ports present on this host, sorted by name.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports = serialport::available_ports()
        .map_err(|e| format!("Failed to enumerate serial ports: {}", e))?;

    let mut listed: Vec<SerialPortInfo> = ports
        .into_iter()
        .filter(|p| is_listed(&p.port_name))
        .map(SerialPortInfo::from)
        .collect();
    listed.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(listed)
}
