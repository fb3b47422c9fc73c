//! Host side of a breadboard 6502: the microcode matrix, its editor, the
//! serial link to the board and the event loop that drives a clock tick
//! end to end.

pub mod driver;
pub mod editor;
pub mod error;
pub mod memory;
pub mod microcode;
pub mod notify;
pub mod serial;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use driver::{Driver, DriverSettings, EventLoop, Frame, Hub, Key, Page, RedrawQueue, Screen, Status};
pub use editor::ControlLineEditor;
pub use error::{LineRejected, LinkError, MemoryError, TableError};
pub use memory::Memory;
pub use microcode::{ControlWord, OpCode, OpCodeTable, Phase};
pub use serial::{Board, SerialLink, SerialPortOpener};
