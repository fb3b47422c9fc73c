use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use tracing::{info, instrument, warn};

use super::lines::{ControlWord as L, Phase, LINE_COUNT};
use super::opcode::{flag, AddressMode, OpCode, FLAG_SLOTS, MAX_STEPS};
use super::shapes::{self, operand, StackOp};
use crate::error::{LineRejected, TableError};

/// Number of opcode values.
pub const OPCODE_COUNT: usize = 256;

/// One matrix cell whose word no longer matches its declared preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditedCell {
    pub op_code: u8,
    pub flags: u8,
    pub step: u8,
    pub phase: Phase,
    pub word: L,
    pub preset: L,
}

static BUILTIN: Lazy<OpCodeTable> = Lazy::new(OpCodeTable::new);

/// All 256 opcodes, indexed by opcode byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpCodeTable {
    ops: Vec<OpCode>,
}

impl Default for OpCodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCodeTable {
    /// Builds the declarative table. Every word starts equal to its preset.
    #[must_use]
    pub fn new() -> Self {
        let mut ops: Vec<OpCode> = (0..=u8::MAX).map(shapes::undefined).collect();
        for oc in define() {
            let index = oc.op_code as usize;
            ops[index] = oc;
        }
        for oc in &mut ops {
            oc.presets = oc.lines;
        }
        Self { ops }
    }

    /// The declarative table, compiled once per process.
    #[must_use]
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    #[must_use]
    pub fn lookup(&self, op_code: u8) -> &OpCode {
        &self.ops[op_code as usize]
    }

    pub fn lookup_mut(&mut self, op_code: u8) -> &mut OpCode {
        &mut self.ops[op_code as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpCode> {
        self.ops.iter()
    }

    /// Checks whether `bit` may be edited in `phase`. Nothing is mutated either way.
    pub const fn validate_line(step: u8, phase: Phase, bit: u8) -> Result<(), LineRejected> {
        if step as usize >= MAX_STEPS {
            return Err(LineRejected("No such step"));
        }
        if bit >= LINE_COUNT {
            return Err(LineRejected("No such control line"));
        }
        let line = L::line(bit);
        let phi1 = matches!(phase, Phase::Phi1);

        let reason = if line.contains(L::PAUS) {
            Some("Break points are set with 'b' on the memory page")
        } else if line.contains(L::CTMR) {
            Some("Timer reset cannot be changed")
        } else if line.contains(L::ALLD) && !phi1 {
            Some("Address bus low can only be loaded on phi-1")
        } else if line.contains(L::AHLD) && !phi1 {
            Some("Address bus high can only be loaded on phi-1")
        } else if line.contains(L::AULA) && !phi1 {
            // The built-in shapes drive this bit on phi-2 as the carry-in override.
            Some("ALU A register can only be loaded on phi-1")
        } else if line.contains(L::AULB) && !phi1 {
            Some("ALU B register can only be loaded on phi-1")
        } else if line.contains(L::SPLD) && !phi1 {
            Some("Stack pointer can only be loaded on phi-1")
        } else if line.contains(L::PCIN) && phi1 {
            Some("Program counter can only be incremented on phi-2")
        } else if line.contains(L::PCLL) && phi1 {
            Some("Program counter low can only be loaded on phi-2")
        } else if line.contains(L::PCLH) && phi1 {
            Some("Program counter high can only be loaded on phi-2")
        } else if line.intersects(FLAG_CAPTURE) && phi1 {
            Some("Flag updates can only be performed on phase 2")
        } else if line.contains(L::SBLA) && phi1 {
            Some("Accumulator can only be loaded on phi-2")
        } else if line.contains(L::SBLX) && phi1 {
            Some("X register can only be loaded on phi-2")
        } else if line.contains(L::SBLY) && phi1 {
            Some("Y register can only be loaded on phi-2")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(LineRejected(reason)),
            None => Ok(()),
        }
    }

    /// Reads a persisted table. Anything short of 256 well-formed, unique
    /// entries is an error and the caller keeps whatever table it had.
    #[instrument(level = "debug", err)]
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let raw = fs::read(path).map_err(|source| TableError::Io {
            path: path.to_owned(),
            source,
        })?;
        let entries: Vec<OpCode> = serde_json::from_slice(&raw)?;

        let mut slots: Vec<Option<OpCode>> = vec![None; OPCODE_COUNT];
        for oc in entries {
            if !(1..=MAX_STEPS).contains(&(oc.steps as usize)) {
                return Err(TableError::Steps {
                    opcode: oc.op_code,
                    steps: oc.steps,
                });
            }
            let index = oc.op_code as usize;
            if slots[index].replace(oc).is_some() {
                return Err(TableError::Duplicate(index as u8));
            }
        }

        let missing = slots.iter().filter(|slot| slot.is_none()).count();
        if missing > 0 {
            return Err(TableError::Incomplete(missing));
        }

        info!(path = %path.display(), "Opcode table loaded");
        Ok(Self {
            ops: slots.into_iter().flatten().collect(),
        })
    }

    /// Loads `path`, falling back to the built-in table on any failure.
    #[must_use]
    pub fn load_or_builtin(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "No saved opcode table, using built-in definitions");
            return Self::builtin().clone();
        }
        Self::load(path).unwrap_or_else(|err| {
            warn!(%err, "Using built-in opcode table");
            Self::builtin().clone()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        let json = serde_json::to_vec(&self.ops)?;
        fs::write(path, json).map_err(|source| TableError::Io {
            path: path.to_owned(),
            source,
        })?;
        info!(path = %path.display(), "Opcode table saved");
        Ok(())
    }

    /// The three EPROM pair images, most significant lines first.
    ///
    /// Addresses run opcode, step, phase, flags from most to least
    /// significant, two bytes per address, each byte bit-reversed to match
    /// the socket wiring.
    #[must_use]
    pub fn eprom_images(&self) -> [Vec<u8>; 3] {
        let size = OPCODE_COUNT * MAX_STEPS * 2 * FLAG_SLOTS * 2;
        let mut images = [
            Vec::with_capacity(size),
            Vec::with_capacity(size),
            Vec::with_capacity(size),
        ];
        for oc in &self.ops {
            for step in 0..MAX_STEPS as u8 {
                for phase in Phase::ALL {
                    for flags in 0..FLAG_SLOTS as u8 {
                        let word = oc.word(flags, step, phase).bits();
                        for (image, shift) in images.iter_mut().zip([32, 16, 0]) {
                            image.push(((word >> (shift + 8)) as u8).reverse_bits());
                            image.push(((word >> shift) as u8).reverse_bits());
                        }
                    }
                }
            }
        }
        images
    }

    /// Writes `microcode0.bin` to `microcode2.bin` into `dir`.
    pub fn export_eproms(&self, dir: &Path) -> Result<Vec<PathBuf>, TableError> {
        let mut written = Vec::with_capacity(3);
        for (index, image) in self.eprom_images().iter().enumerate() {
            let path = dir.join(format!("microcode{index}.bin"));
            fs::write(&path, image).map_err(|source| TableError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        info!(dir = %dir.display(), "EPROM images exported");
        Ok(written)
    }

    #[must_use]
    pub fn edited_cells(&self) -> Vec<EditedCell> {
        let mut cells = Vec::new();
        for oc in &self.ops {
            for flags in 0..FLAG_SLOTS as u8 {
                for step in 0..MAX_STEPS as u8 {
                    for phase in Phase::ALL {
                        let (word, preset) = (oc.word(flags, step, phase), oc.preset(flags, step, phase));
                        if word != preset {
                            cells.push(EditedCell {
                                op_code: oc.op_code,
                                flags,
                                step,
                                phase,
                                word,
                                preset,
                            });
                        }
                    }
                }
            }
        }
        cells
    }
}

const FLAG_CAPTURE: L = L::FSCA
    .union(L::FSCB)
    .union(L::FSIA)
    .union(L::FSIB)
    .union(L::FSVA)
    .union(L::FSVB);

/// Every special-bus driver line: selects the idle source when XORed onto the defaults.
const SB_ALL: L = L::SBD0.union(L::SBD1).union(L::SBD2);
const ADD: L = SB_ALL;
const SUBTRACT: L = L::AUIB.union(SB_ALL);
const STORE_A: L = L::SBLA.union(L::FSVA);
const LOGIC_A: L = L::AULA.union(SB_ALL);

/// Declares one instruction in each listed addressing mode.
///
/// Each row is `(mode, operand syntax, opcode, length, cycles, page cross)`.
macro_rules! family {
    ($ops:ident, $name:literal, $build:expr, [$(($mode:ident, $syntax:literal, $code:literal, $len:literal, $cycles:literal, $cross:literal)),+ $(,)?]) => {
        $(
            $ops.push(($build)(operand(AddressMode::$mode, $name, $syntax, $code, $len, $cycles, $cross)));
        )+
    };
}

/// Every documented opcode plus the RST/NMI/IRQ pseudo-instructions.
#[allow(clippy::too_many_lines)]
fn define() -> Vec<OpCode> {
    let mut ops = Vec::with_capacity(160);

    family!(ops, "ADC", |oc| shapes::arithmetic(oc, ADD, STORE_A), [
        (Imm, "#$44",    0x69, 2, 2, false),
        (Zpg, "$44",     0x65, 2, 3, false),
        (Zpx, "$44,X",   0x75, 2, 4, false),
        (Abs, "$4400",   0x6D, 3, 4, false),
        (Abx, "$4400,X", 0x7D, 3, 4, true),
        (Aby, "$4400,Y", 0x79, 3, 4, true),
        (Izx, "($44,X)", 0x61, 2, 6, false),
        (Izy, "($44),Y", 0x71, 2, 5, true),
    ]);
    family!(ops, "AND", |oc| shapes::logic(oc, L::AUO2, LOGIC_A), [
        (Imm, "#$44",    0x29, 2, 2, false),
        (Zpg, "$44",     0x25, 2, 3, false),
        (Zpx, "$44,X",   0x35, 2, 4, false),
        (Abs, "$4400",   0x2D, 3, 4, false),
        (Abx, "$4400,X", 0x3D, 3, 4, true),
        (Aby, "$4400,Y", 0x39, 3, 4, true),
        (Izx, "($44,X)", 0x21, 2, 6, false),
        (Izy, "($44),Y", 0x31, 2, 5, true),
    ]);
    family!(ops, "ASL", |oc| shapes::shift(oc, L::AUS1 | L::AUS2, L::empty()), [
        (Acc, "A",       0x0A, 1, 2, false),
        (Zpg, "$44",     0x06, 2, 5, false),
        (Zpx, "$44,X",   0x16, 2, 6, false),
        (Abs, "$4400",   0x0E, 3, 6, false),
        (Abx, "$4400,X", 0x1E, 3, 7, false),
    ]);
    family!(ops, "BIT", shapes::bit_test, [
        (Zpg, "$44",   0x24, 2, 3, false),
        (Abs, "$4400", 0x2C, 3, 4, false),
    ]);

    for (name, code, bit, set) in [
        ("BPL", 0x10, flag::N, false),
        ("BMI", 0x30, flag::N, true),
        ("BVC", 0x50, flag::V, false),
        ("BVS", 0x70, flag::V, true),
        ("BCC", 0x90, flag::C, false),
        ("BCS", 0xB0, flag::C, true),
        ("BNE", 0xD0, flag::Z, false),
        ("BEQ", 0xF0, flag::Z, true),
    ] {
        ops.push(shapes::branch(name, code, bit, set));
    }

    for (name, code) in [("BRK", 0x00), ("RST", 0x02), ("NMI", 0x12), ("IRQ", 0x22)] {
        ops.push(shapes::interrupt(name, code));
    }

    family!(ops, "CMP", |oc| shapes::arithmetic(oc, SUBTRACT, L::empty()), [
        (Imm, "#$44",    0xC9, 2, 2, false),
        (Zpg, "$44",     0xC5, 2, 3, false),
        (Zpx, "$44,X",   0xD5, 2, 4, false),
        (Abs, "$4400",   0xCD, 3, 4, false),
        (Abx, "$4400,X", 0xDD, 3, 4, true),
        (Aby, "$4400,Y", 0xD9, 3, 4, true),
        (Izx, "($44,X)", 0xC1, 2, 6, false),
        (Izy, "($44),Y", 0xD1, 2, 5, true),
    ]);
    family!(ops, "CPX", |oc| shapes::arithmetic(oc, L::AUIB | L::SBD0 | L::SBD2, L::empty()), [
        (Imm, "#$44",  0xE0, 2, 2, false),
        (Zpg, "$44",   0xE4, 2, 3, false),
        (Abs, "$4400", 0xEC, 3, 4, false),
    ]);
    family!(ops, "CPY", |oc| shapes::arithmetic(oc, L::AUIB | L::SBD1 | L::SBD2, L::empty()), [
        (Imm, "#$44",  0xC0, 2, 2, false),
        (Zpg, "$44",   0xC4, 2, 3, false),
        (Abs, "$4400", 0xCC, 3, 4, false),
    ]);
    family!(ops, "DEC", |oc| shapes::modify(oc, L::empty()), [
        (Zpg, "$44",     0xC6, 2, 5, false),
        (Zpx, "$44,X",   0xD6, 2, 6, false),
        (Abs, "$4400",   0xCE, 3, 6, false),
        (Abx, "$4400,X", 0xDE, 3, 6, true),
    ]);
    family!(ops, "EOR", |oc| shapes::logic(oc, L::AUO2 | L::AUO1, LOGIC_A), [
        (Imm, "#$44",    0x49, 2, 2, false),
        (Zpg, "$44",     0x45, 2, 3, false),
        (Zpx, "$44,X",   0x55, 2, 4, false),
        (Abs, "$4400",   0x4D, 3, 4, false),
        (Abx, "$4400,X", 0x5D, 3, 4, true),
        (Aby, "$4400,Y", 0x59, 3, 4, true),
        (Izx, "($44,X)", 0x41, 2, 6, false),
        (Izy, "($44),Y", 0x51, 2, 5, true),
    ]);

    // Decimal mode has no hardware, so CLD/SED only touch the manual line.
    for (name, code, select, set) in [
        ("CLC", 0x18, L::FSCB, false),
        ("CLD", 0xD8, L::empty(), false),
        ("CLI", 0x58, L::FSIB, false),
        ("CLV", 0xB8, L::FSVB, false),
        ("SEC", 0x38, L::FSCB, true),
        ("SED", 0xF8, L::empty(), true),
        ("SEI", 0x78, L::FSIB, true),
    ] {
        let manual = if set { L::FMAN } else { L::empty() };
        ops.push(shapes::implied(name, code, L::empty(), select | manual));
    }

    family!(ops, "INC", |oc| shapes::modify(oc, L::AHC1), [
        (Zpg, "$44",     0xE6, 2, 5, false),
        (Zpx, "$44,X",   0xF6, 2, 6, false),
        (Abs, "$4400",   0xEE, 3, 6, false),
        (Abx, "$4400,X", 0xFE, 3, 7, false),
    ]);

    ops.push(shapes::jump(AddressMode::Abs, "$5597", 0x4C, 3));
    ops.push(shapes::jump(AddressMode::Ind, "($5597)", 0x6C, 5));
    ops.push(shapes::jump_subroutine(0x20));

    family!(ops, "LDA", |oc| shapes::load(oc, L::SBLA), [
        (Imm, "#$44",    0xA9, 2, 2, false),
        (Zpg, "$44",     0xA5, 2, 3, false),
        (Zpx, "$44,X",   0xB5, 2, 4, false),
        (Abs, "$4400",   0xAD, 3, 4, false),
        (Abx, "$4400,X", 0xBD, 3, 4, true),
        (Aby, "$4400,Y", 0xB9, 3, 4, true),
        (Izx, "($44,X)", 0xA1, 2, 6, false),
        (Izy, "($44),Y", 0xB1, 2, 5, true),
    ]);
    family!(ops, "LDX", |oc| shapes::load(oc, L::SBLX), [
        (Imm, "#$44",    0xA2, 2, 2, false),
        (Zpg, "$44",     0xA6, 2, 3, false),
        (Zpy, "$44,Y",   0xB6, 2, 4, false),
        (Abs, "$4400",   0xAE, 3, 4, false),
        (Aby, "$4400,Y", 0xBE, 3, 4, true),
    ]);
    family!(ops, "LDY", |oc| shapes::load(oc, L::SBLY), [
        (Imm, "#$44",    0xA0, 2, 2, false),
        (Zpg, "$44",     0xA4, 2, 3, false),
        (Zpx, "$44,X",   0xB4, 2, 4, false),
        (Abs, "$4400",   0xAC, 3, 4, false),
        (Abx, "$4400,X", 0xBC, 3, 4, true),
    ]);
    family!(ops, "LSR", |oc| shapes::shift(oc, L::AUS1 | L::AUS2, L::AULR), [
        (Acc, "A",       0x4A, 1, 2, false),
        (Zpg, "$44",     0x46, 2, 5, false),
        (Zpx, "$44,X",   0x56, 2, 6, false),
        (Abs, "$4400",   0x4E, 3, 6, false),
        (Abx, "$4400,X", 0x5E, 3, 7, false),
    ]);
    family!(ops, "NOP", shapes::no_operation, [(Imp, "", 0xEA, 1, 2, false)]);
    family!(ops, "ORA", |oc| shapes::logic(oc, L::AUO1, LOGIC_A), [
        (Imm, "#$44",    0x09, 2, 2, false),
        (Zpg, "$44",     0x05, 2, 3, false),
        (Zpx, "$44,X",   0x15, 2, 4, false),
        (Abs, "$4400",   0x0D, 3, 4, false),
        (Abx, "$4400,X", 0x1D, 3, 4, true),
        (Aby, "$4400,Y", 0x19, 3, 4, true),
        (Izx, "($44,X)", 0x01, 2, 6, false),
        (Izy, "($44),Y", 0x11, 2, 5, true),
    ]);

    let (x_to_alu, y_to_alu) = (L::SBD0 | L::SBD2, L::SBD1 | L::SBD2);
    let bus_to_db = L::DBD0 | L::DBD2;
    for (name, code, phi1, phi2) in [
        ("DEX", 0xCA, L::AULB | L::AULA | L::AUSB | x_to_alu, bus_to_db | L::SBLX | L::SBD2 | L::FSIA),
        ("DEY", 0x88, L::AULB | L::AULA | L::AUSB | y_to_alu, bus_to_db | L::SBLY | L::SBD2 | L::FSIA),
        (
            "INX",
            0xE8,
            bus_to_db | L::AULB | L::AULA | L::AUSA | x_to_alu,
            bus_to_db | L::CARRY_IN | L::SBLX | L::SBD2 | L::CENB | L::FSIA,
        ),
        (
            "INY",
            0xC8,
            bus_to_db | L::AULB | L::AULA | L::AUSA | y_to_alu,
            bus_to_db | L::CARRY_IN | L::SBLY | L::SBD2 | L::CENB | L::FSIA,
        ),
        ("TAX", 0xAA, L::empty(), bus_to_db | L::SBLX | SB_ALL | L::FSIA),
        ("TXA", 0x8A, L::empty(), bus_to_db | L::SBLA | x_to_alu | L::FSIA),
        ("TAY", 0xA8, L::empty(), bus_to_db | L::SBLY | SB_ALL | L::FSIA),
        ("TYA", 0x98, L::empty(), bus_to_db | L::SBLA | y_to_alu | L::FSIA),
    ] {
        ops.push(shapes::implied(name, code, phi1, phi2));
    }

    family!(ops, "ROL", |oc| shapes::shift(oc, L::AUS2, L::empty()), [
        (Acc, "A",       0x2A, 1, 2, false),
        (Zpg, "$44",     0x26, 2, 5, false),
        (Zpx, "$44,X",   0x36, 2, 6, false),
        (Abs, "$4400",   0x2E, 3, 6, false),
        (Abx, "$4400,X", 0x3E, 3, 7, false),
    ]);
    family!(ops, "ROR", |oc| shapes::shift(oc, L::AUS2, L::AULR), [
        (Acc, "A",       0x6A, 1, 2, false),
        (Zpg, "$44",     0x66, 2, 5, false),
        (Zpx, "$44,X",   0x76, 2, 6, false),
        (Abs, "$4400",   0x6E, 3, 6, false),
        (Abx, "$4400,X", 0x7E, 3, 7, false),
    ]);
    family!(ops, "RTI", shapes::return_interrupt, [(Imp, "", 0x40, 1, 6, false)]);
    family!(ops, "RTS", shapes::return_subroutine, [(Imp, "", 0x60, 1, 5, false)]);
    family!(ops, "SBC", |oc| shapes::arithmetic(oc, SUBTRACT, STORE_A), [
        (Imm, "#$44",    0xE9, 2, 2, false),
        (Zpg, "$44",     0xE5, 2, 3, false),
        (Zpx, "$44,X",   0xF5, 2, 4, false),
        (Abs, "$4400",   0xED, 3, 4, false),
        (Abx, "$4400,X", 0xFD, 3, 4, true),
        (Aby, "$4400,Y", 0xF9, 3, 4, true),
        (Izx, "($44,X)", 0xE1, 2, 6, false),
        (Izy, "($44),Y", 0xF1, 2, 5, true),
    ]);
    family!(ops, "STA", |oc| shapes::store(oc, L::DBD0 | L::DBD1 | L::DBD2), [
        (Zpg, "$44",     0x85, 2, 3, false),
        (Zpx, "$44,X",   0x95, 2, 4, false),
        (Abs, "$4400",   0x8D, 3, 4, false),
        (Abx, "$4400,X", 0x9D, 3, 4, true),
        (Aby, "$4400,Y", 0x99, 3, 4, true),
        (Izx, "($44,X)", 0x81, 2, 6, false),
        (Izy, "($44),Y", 0x91, 2, 5, true),
    ]);

    for (name, code, steps, op) in [
        ("TXS", 0x9A, 2, StackOp::Txs),
        ("TSX", 0xBA, 2, StackOp::Tsx),
        ("PHA", 0x48, 3, StackOp::Push(bus_to_db | SB_ALL)),
        ("PLA", 0x68, 4, StackOp::Pull(L::SBLA | L::FSIA)),
        ("PHP", 0x08, 3, StackOp::Push(L::DBD2)),
        (
            "PLP",
            0x28,
            4,
            StackOp::Pull(L::FSVA | L::FSIB | L::FSVB | L::FSCB | L::FSCA | L::FSIA),
        ),
    ] {
        ops.push(shapes::stack(name, code, steps, op));
    }

    family!(ops, "STX", |oc| shapes::store(oc, bus_to_db | x_to_alu), [
        (Zpg, "$44",   0x86, 2, 3, false),
        (Zpy, "$44,Y", 0x96, 2, 4, false),
        (Abs, "$4400", 0x8E, 3, 4, false),
    ]);
    family!(ops, "STY", |oc| shapes::store(oc, bus_to_db | y_to_alu), [
        (Zpg, "$44",   0x84, 2, 3, false),
        (Zpx, "$44,X", 0x94, 2, 4, false),
        (Abs, "$4400", 0x8C, 3, 4, false),
    ]);

    ops
}
