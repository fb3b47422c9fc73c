use serde::{Deserialize, Serialize};

use super::lines::{default_for, ControlWord, Phase};
use super::shapes;

/// Entries in the flags dimension of the matrix.
pub const FLAG_SLOTS: usize = 16;
/// Maximum steps of one instruction.
pub const MAX_STEPS: usize = 8;

/// Control words indexed by flags nibble, step and phase.
pub type Matrix = [[[ControlWord; 2]; MAX_STEPS]; FLAG_SLOTS];

/// Operand fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressMode {
    Imm,
    Imp,
    Izx,
    Izy,
    Zpg,
    Zpx,
    Zpy,
    Rel,
    Abs,
    Abx,
    Aby,
    Ind,
    Acc,
}

impl AddressMode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Imm => "IMM",
            Self::Imp => "IMP",
            Self::Izx => "IZX",
            Self::Izy => "IZY",
            Self::Zpg => "ZPG",
            Self::Zpx => "ZPX",
            Self::Zpy => "ZPY",
            Self::Rel => "REL",
            Self::Abs => "ABS",
            Self::Abx => "ABX",
            Self::Aby => "ABY",
            Self::Ind => "IND",
            Self::Acc => "ACC",
        }
    }
}

/// Bits of the 4-bit flags nibble the board feeds back into the EPROM address.
pub mod flag {
    pub const C: u8 = 1;
    pub const Z: u8 = 2;
    pub const V: u8 = 4;
    pub const N: u8 = 8;
}

/// Formatting of [`OpCode::describe_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Describe<'a> {
    /// Line positions per output group.
    pub group_size: usize,
    pub joiner: &'a str,
    pub prefix: &'a str,
    /// Cancel the lines contributed by the addressing skeleton and the trailer.
    pub skip_addressing: bool,
}

impl Default for Describe<'_> {
    fn default() -> Self {
        Self {
            group_size: 8,
            joiner: " ",
            prefix: "",
            skip_addressing: false,
        }
    }
}

/// One instruction and its full control-word matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpCode {
    pub name: String,
    pub op_code: u8,
    pub syntax: String,
    pub addr_mode: AddressMode,
    pub operands: u8,
    pub steps: u8,
    pub page_cross: bool,
    pub branch_bit: u8,
    pub branch_set: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    #[serde(with = "matrix")]
    pub lines: Matrix,
    #[serde(with = "matrix")]
    pub presets: Matrix,
    /// Built on an addressing-mode skeleton.
    #[serde(default)]
    pub(crate) uses_addressing: bool,
    /// Ends with the shared program counter trailer.
    #[serde(default)]
    pub(crate) uses_trailer: bool,
}

impl OpCode {
    /// An opcode with its matrix set to the phase defaults and the timer reset
    /// asserted on every phi-2 from the last step on.
    pub(crate) fn blank(
        op_code: u8,
        name: &str,
        syntax: String,
        addr_mode: AddressMode,
        operands: u8,
        steps: u8,
    ) -> Self {
        let mut oc = Self {
            name: name.to_owned(),
            op_code,
            syntax,
            addr_mode,
            operands,
            steps,
            page_cross: false,
            branch_bit: 0,
            branch_set: false,
            is_virtual: false,
            lines: [[[ControlWord::empty(); 2]; MAX_STEPS]; FLAG_SLOTS],
            presets: [[[ControlWord::empty(); 2]; MAX_STEPS]; FLAG_SLOTS],
            uses_addressing: false,
            uses_trailer: false,
        };
        oc.reset_lines();
        oc
    }

    pub(crate) fn reset_lines(&mut self) {
        let last = self.last_step();
        for slot in &mut self.lines {
            for (step, cell) in slot.iter_mut().enumerate() {
                cell[0] = default_for(Phase::Phi1);
                cell[1] = default_for(Phase::Phi2);
                if step >= last {
                    cell[1] ^= ControlWord::CTMR;
                }
            }
        }
    }

    /// Index of the final step.
    #[must_use]
    pub const fn last_step(&self) -> usize {
        self.steps.saturating_sub(1) as usize
    }

    #[must_use]
    pub const fn word(&self, flags: u8, step: u8, phase: Phase) -> ControlWord {
        self.lines[(flags & 0x0F) as usize][(step & 0x07) as usize][phase.index()]
    }

    #[must_use]
    pub const fn preset(&self, flags: u8, step: u8, phase: Phase) -> ControlWord {
        self.presets[(flags & 0x0F) as usize][(step & 0x07) as usize][phase.index()]
    }

    pub fn word_mut(&mut self, flags: u8, step: u8, phase: Phase) -> &mut ControlWord {
        &mut self.lines[(flags & 0x0F) as usize][(step & 0x07) as usize][phase.index()]
    }

    /// Lines edited away from the declared preset.
    #[must_use]
    pub fn overrides(&self, flags: u8, step: u8, phase: Phase) -> ControlWord {
        self.word(flags, step, phase) ^ self.preset(flags, step, phase)
    }

    /// Lines asserted relative to the phase default, most significant first.
    ///
    /// Lines are grouped by position: each group covers `group_size`
    /// consecutive bits and empty groups are dropped.
    #[must_use]
    pub fn describe_line(&self, flags: u8, step: u8, phase: Phase, how: &Describe<'_>) -> Vec<String> {
        let mut word = self.word(flags, step, phase) ^ default_for(phase);
        if how.skip_addressing {
            word ^= shapes::skeleton(self)[(flags & 0x0F) as usize][(step & 0x07) as usize][phase.index()];
        }

        let group_size = how.group_size.max(1);
        let mut groups = Vec::new();
        let mut collector = Vec::new();
        for (index, (bit, set)) in word.bits_msb_first().enumerate() {
            if set {
                collector.push(format!("{}{}", how.prefix, ControlWord::mnemonic(bit, phase)));
            }
            if (index + 1) % group_size == 0 && !collector.is_empty() {
                groups.push(collector.join(how.joiner));
                collector.clear();
            }
        }
        if !collector.is_empty() {
            groups.push(collector.join(how.joiner));
        }
        groups
    }

    /// Whether a conditional branch is taken for the given flags nibble.
    #[must_use]
    pub const fn branch_taken(&self, flags: u8) -> bool {
        let wanted = if self.branch_set { self.branch_bit } else { 0 };
        flags & self.branch_bit == wanted
    }
}

/// Serializes a [`Matrix`] as nested arrays of raw 48-bit integers.
mod matrix {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{ControlWord, Matrix, FLAG_SLOTS, MAX_STEPS};

    pub fn serialize<S: Serializer>(matrix: &Matrix, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: Vec<Vec<[u64; 2]>> = matrix
            .iter()
            .map(|slot| {
                slot.iter()
                    .map(|cell| [cell[0].bits(), cell[1].bits()])
                    .collect()
            })
            .collect();
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Matrix, D::Error> {
        let raw = Vec::<Vec<[u64; 2]>>::deserialize(deserializer)?;
        if raw.len() != FLAG_SLOTS {
            return Err(D::Error::invalid_length(raw.len(), &"16 flag slots"));
        }
        let mut matrix = [[[ControlWord::empty(); 2]; MAX_STEPS]; FLAG_SLOTS];
        for (slot, steps) in matrix.iter_mut().zip(raw) {
            if steps.len() != MAX_STEPS {
                return Err(D::Error::invalid_length(steps.len(), &"8 steps"));
            }
            for (cell, [phi1, phi2]) in slot.iter_mut().zip(steps) {
                if (phi1 | phi2) >> 48 != 0 {
                    return Err(D::Error::custom("control word wider than 48 bits"));
                }
                *cell = [
                    ControlWord::from_bits_retain(phi1),
                    ControlWord::from_bits_retain(phi2),
                ];
            }
        }
        Ok(matrix)
    }
}
