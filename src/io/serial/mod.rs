// src/io/serial/mod.rs
//
// Serial link to the speed sensor.
//
// - framer: bytes to newline-delimited lines
// - codec: lines to typed events
// - reader: opening the link and the blocking read loop

pub mod codec;
pub mod framer;
pub mod reader;
pub mod utils;

pub use codec::{decode, decode_str, DecodedEvent, UnrecognizedReason};
pub use framer::{FramedLines, LineFramer, RawLine};
pub use reader::{
    list_serial_ports, run_line_reader, FileOpener, LinkOpener, LinkReader, Overflow, ReadEnd,
    SerialOpener, SerialPortInfo,
};
pub use utils::{LineSettings, Parity};
