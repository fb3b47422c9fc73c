use std::path::PathBuf;

use thiserror::Error;

/// Failures on the serial link to the board.
///
/// None of these are fatal: the event loop aborts the current tick, drains the
/// pending response channels and retries on the next clock edge.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Serial port is not connected")]
    NotConnected,
    #[error("No '{tag}' response within {timeout_ms}ms")]
    Timeout { tag: char, timeout_ms: u128 },
    #[error("Response channel for '{0}' closed")]
    Closed(char),
    #[error("Board rejected '{tag}' with code {code:#04X}")]
    Nak { tag: char, code: u8 },
    #[error("No serial port configured")]
    NoPort,
    #[error("Serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),
}

/// Failures loading or saving the persisted opcode table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Failed to access opcode table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed opcode table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Opcode table is missing {0} of 256 entries")]
    Incomplete(usize),
    #[error("Opcode {0:#04X} is defined more than once")]
    Duplicate(u8),
    #[error("Opcode {opcode:#04X} declares {steps} steps (expected 1-8)")]
    Steps { opcode: u8, steps: u8 },
}

/// Failures loading a program image into host memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Failed to read ROM {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ROM of {len} bytes does not fit at {origin:#06X}")]
    TooLarge { len: usize, origin: u16 },
    #[error("Failed to access break points {path}: {source}")]
    Breakpoints {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An edit refused by the phase rules of the control lines. Nothing was mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LineRejected(pub &'static str);
