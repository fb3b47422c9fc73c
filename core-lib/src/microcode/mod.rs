//! The microcode matrix: 256 opcodes, each a 16 x 8 x 2 grid of 48-bit
//! control words indexed by flags nibble, step and clock phase.
//!
//! [`OpCodeTable::new`] compiles the grid from instruction shapes layered on
//! addressing-mode skeletons. The table can also be persisted as JSON and
//! exported as the three EPROM images the board is programmed with.

mod lines;
mod opcode;
mod shapes;
mod table;

pub use lines::{default_for, Bus, BusSource, ControlWord, Phase, DEFAULTS, LINE_COUNT};
pub use opcode::{flag, AddressMode, Describe, Matrix, OpCode, FLAG_SLOTS, MAX_STEPS};
pub use table::{EditedCell, OpCodeTable, OPCODE_COUNT};
