//! The 48 control lines driven by the microcode EPROMs.
//!
//! Bit 0 is `CENB`, bit 47 is `CTMR`. Displays walk the word from bit 47
//! down, which is also the order the EPROM pairs are wired in (three EPROM
//! pairs of 16 lines each).
//!
//! Most lines are active low, so a quiescent word is not zero: it is one of
//! the two [`DEFAULTS`], and instruction shapes XOR their lines onto it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlWord: u64 {
        /// Carry enable
        const CENB = 1 << 0;
        /// Flag select NZI-A (0=Reg/Manual(I), 1=Reg/Bus)
        const FSIA = 1 << 1;
        /// Flag manual setting
        const FMAN = 1 << 2;
        /// Flag select C-A (0=Reg/Manual, 1=CPU/Bus)
        const FSCA = 1 << 3;
        /// Flag select C-B
        const FSCB = 1 << 4;
        /// Flag select V-B
        const FSVB = 1 << 5;
        /// Flag select NZI-B
        const FSIB = 1 << 6;
        /// Flag select V-A (0=Reg/Manual, 1=CPU/Bus)
        const FSVA = 1 << 7;

        const SBD2 = 1 << 8;
        const SBD1 = 1 << 9;
        const SBD0 = 1 << 10;
        /// Special bus load X
        const SBLX = 1 << 11;
        /// Special bus load Y
        const SBLY = 1 << 12;
        /// Special bus load accumulator
        const SBLA = 1 << 13;
        /// Shift direction (0=Left, 1=Right)
        const AULR = 1 << 14;
        const AUS2 = 1 << 15;

        const AUS1 = 1 << 16;
        const AUO1 = 1 << 17;
        const AUO2 = 1 << 18;
        /// ALU A source (0=Special bus, 1=zeros)
        const AUSA = 1 << 19;
        /// ALU B source (0=Data bus, 1=Address bus low)
        const AUSB = 1 << 20;
        /// Invert data bus into ALU B
        const AUIB = 1 << 21;
        /// Manual clock step mode
        const PAUS = 1 << 22;
        /// ALU input A load on phi-1, carry-in override on phi-2
        const AULA = 1 << 23;

        /// ALU input B load
        const AULB = 1 << 24;
        const CRST = 1 << 25;
        const ALC0 = 1 << 26;
        const ALC1 = 1 << 27;
        const ALC2 = 1 << 28;
        /// Stack pointer load
        const SPLD = 1 << 29;
        /// Latch address bus high
        const AHLD = 1 << 30;
        /// Latch address bus low
        const ALLD = 1 << 31;

        const PCLH = 1 << 32;
        const PCLL = 1 << 33;
        /// Program counter increment
        const PCIN = 1 << 34;
        /// Route the secondary (page cross) flags into the flags nibble
        const FLG2 = 1 << 35;
        /// Data bus direction (0=Write, 1=Read)
        const DBRW = 1 << 36;
        const ALD2 = 1 << 37;
        const ALD1 = 1 << 38;
        const ALD0 = 1 << 39;

        const DBD2 = 1 << 40;
        const DBD1 = 1 << 41;
        const DBD0 = 1 << 42;
        const AHC0 = 1 << 43;
        const AHC1 = 1 << 44;
        const AHD1 = 1 << 45;
        const AHD0 = 1 << 46;
        /// Timer reset, ends the instruction
        const CTMR = 1 << 47;
    }
}

/// Number of control lines in a word.
pub const LINE_COUNT: u8 = 48;

/// The two half cycles of the system clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Phi1 = 0,
    Phi2 = 1,
}

impl Phase {
    pub const ALL: [Self; 2] = [Self::Phi1, Self::Phi2];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Phi1 => Self::Phi2,
            Self::Phi2 => Self::Phi1,
        }
    }

    /// Clock level to phase: low is phi-1, high is phi-2.
    #[must_use]
    pub const fn from_level(high: bool) -> Self {
        if high {
            Self::Phi2
        } else {
            Self::Phi1
        }
    }
}

impl ControlWord {
    /// Phase-2 meaning of `AULA`.
    pub const CARRY_IN: Self = Self::AULA;

    /// Lines that put the program counter on the address buses and latch them.
    pub const FETCH: Self = Self::from_bits_retain(
        Self::AHD0.bits()
            | Self::AHD1.bits()
            | Self::ALD1.bits()
            | Self::ALD2.bits()
            | Self::AHLD.bits()
            | Self::ALLD.bits(),
    );

    /// The single line at `bit`. Bits past 47 produce an empty word.
    #[must_use]
    pub const fn line(bit: u8) -> Self {
        if bit < LINE_COUNT {
            Self::from_bits_retain(1 << bit)
        } else {
            Self::empty()
        }
    }

    #[must_use]
    pub const fn is_set(self, bit: u8) -> bool {
        self.intersects(Self::line(bit))
    }

    #[must_use]
    pub fn mnemonic(bit: u8, phase: Phase) -> &'static str {
        match (bit, phase) {
            (23, Phase::Phi2) => "CIOV",
            _ => MNEMONICS.get(bit as usize).copied().unwrap_or("????"),
        }
    }

    #[must_use]
    pub fn description(bit: u8, phase: Phase) -> &'static str {
        match (bit, phase) {
            (23, Phase::Phi2) => "Carry-in override (0=off, 1=on)",
            _ => DESCRIPTIONS.get(bit as usize).copied().unwrap_or(""),
        }
    }

    /// Parses mnemonics (optionally carrying `prefix`) back into the lines they
    /// name. Unknown names yield `None`.
    pub fn from_mnemonics<'a>(
        names: impl IntoIterator<Item = &'a str>,
        phase: Phase,
        prefix: &str,
    ) -> Option<Self> {
        let mut word = Self::empty();
        for name in names {
            let name = name.trim();
            let name = name.strip_prefix(prefix).unwrap_or(name);
            let bit = (0..LINE_COUNT).find(|&bit| Self::mnemonic(bit, phase) == name)?;
            word |= Self::line(bit);
        }
        Some(word)
    }

    /// Bits of the word, most significant line first.
    pub fn bits_msb_first(self) -> impl Iterator<Item = (u8, bool)> {
        (0..LINE_COUNT).rev().map(move |bit| (bit, self.is_set(bit)))
    }
}

const MNEMONICS: [&str; LINE_COUNT as usize] = [
    "CENB", "FSIA", "FMAN", "FSCA", "FSCB", "FSVB", "FSIB", "FSVA", //
    "SBD2", "SBD1", "SBD0", "SBLX", "SBLY", "SBLA", "AULR", "AUS2", //
    "AUS1", "AUO1", "AUO2", "AUSA", "AUSB", "AUIB", "PAUS", "AULA", //
    "AULB", "CRST", "ALC0", "ALC1", "ALC2", "SPLD", "AHLD", "ALLD", //
    "PCLH", "PCLL", "PCIN", "FLG2", "DBRW", "ALD2", "ALD1", "ALD0", //
    "DBD2", "DBD1", "DBD0", "AHC0", "AHC1", "AHD1", "AHD0", "CTMR", //
];

const DESCRIPTIONS: [&str; LINE_COUNT as usize] = [
    "Enable carry-in for ALU",
    "Flag select NZI-A (0=Reg/Manual(I), 1=Reg/Bus)",
    "Manual setting line for flags",
    "Flag select C-A (0=Reg/Manual, 1=CPU/Bus)",
    "Flag select C-B (0=first, 1=second)",
    "Flag select V-B (0=first, 1=second)",
    "Flag select NZI-B (0=first, 1=second)",
    "Flag select V-A (0=Reg/Manual, 1=CPU/Bus)",
    "Special Bus driver 4-bit",
    "Special Bus driver 2-bit",
    "Special Bus driver 1-bit",
    "Special Bus load X",
    "Special Bus load Y",
    "Special Bus load Accumulator",
    "Shift direction selector (0=Left, 1=Right)",
    "ALU Shift #2 selector (0=first, 1=second)",
    "ALU Shift #1 selector (0=Log/Rot, 1=Arth/Sum)",
    "ALU Op Selector #1 (0=Sum/And, 1=Or/Xor)",
    "ALU Op Selector #2 (0=first, 1=second)",
    "ALU Load A Selector (0=Special Bus, 1=zeros)",
    "ALU Load B Selector (0=DB, 1=ABL)",
    "ALU Load Invert data bus",
    "Set clock manual step mode",
    "ALU Input A Load",
    "ALU Input B Load",
    "Clear Reset",
    "Address Low constant (0)",
    "Address Low constant (1)",
    "Address Low constant (2)",
    "Stack pointer load",
    "Load address bus high from ABH",
    "Load address bus low from ABL",
    "Load program counter from ABH",
    "Load program counter from ABL",
    "Increment program counter",
    "Select secondary flags (carry/sign of the last address add)",
    "Data bus Read/Write (0=Write, 1=Read)",
    "Address Low driver 4-bit",
    "Address Low driver 2-bit",
    "Address Low driver 1-bit",
    "Data Bus driver 4-bit",
    "Data Bus driver 2-bit",
    "Data Bus driver 1-bit",
    "Address Bus High Constant (0)",
    "Address Bus High Constant (1-7)",
    "Address High driver 2-bit",
    "Address High driver 1-bit",
    "Timer reset",
];

const IDLE: ControlWord = ControlWord::from_bits_retain(
    ControlWord::AHD0.bits()
        | ControlWord::AHC0.bits()
        | ControlWord::AHC1.bits()
        | ControlWord::DBD1.bits()
        | ControlWord::DBD2.bits()
        | ControlWord::PCLH.bits()
        | ControlWord::PCLL.bits()
        | ControlWord::DBRW.bits()
        | ControlWord::PCIN.bits()
        | ControlWord::ALD0.bits()
        | ControlWord::ALD1.bits()
        | ControlWord::ALD2.bits()
        | ControlWord::CRST.bits()
        | ControlWord::ALC0.bits()
        | ControlWord::ALC1.bits()
        | ControlWord::ALC2.bits()
        | ControlWord::SPLD.bits()
        | ControlWord::ALLD.bits()
        | ControlWord::AHLD.bits()
        | ControlWord::AUS1.bits()
        | ControlWord::AULA.bits()
        | ControlWord::AULB.bits()
        | ControlWord::AUS2.bits()
        | ControlWord::SBD2.bits()
        | ControlWord::SBD1.bits()
        | ControlWord::SBD0.bits()
        | ControlWord::SBLX.bits()
        | ControlWord::SBLY.bits()
        | ControlWord::SBLA.bits(),
);

/// Bus-idle words for phi-1 and phi-2. Phi-2 differs only in the carry-in override.
pub const DEFAULTS: [ControlWord; 2] = [
    IDLE,
    ControlWord::from_bits_retain(IDLE.bits() ^ ControlWord::CARRY_IN.bits()),
];

#[must_use]
pub const fn default_for(phase: Phase) -> ControlWord {
    DEFAULTS[phase.index()]
}

/// One selectable source of a bus or ALU input, as wired on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSource {
    pub lines: ControlWord,
    pub name: &'static str,
}

const fn src(bits: u64, name: &'static str) -> BusSource {
    BusSource {
        lines: ControlWord::from_bits_retain(bits),
        name,
    }
}

const DBD0: u64 = ControlWord::DBD0.bits();
const DBD1: u64 = ControlWord::DBD1.bits();
const DBD2: u64 = ControlWord::DBD2.bits();
const AHD0: u64 = ControlWord::AHD0.bits();
const AHD1: u64 = ControlWord::AHD1.bits();
const ALD0: u64 = ControlWord::ALD0.bits();
const ALD1: u64 = ControlWord::ALD1.bits();
const ALD2: u64 = ControlWord::ALD2.bits();
const SBD0: u64 = ControlWord::SBD0.bits();
const SBD1: u64 = ControlWord::SBD1.bits();
const SBD2: u64 = ControlWord::SBD2.bits();
const AUS1: u64 = ControlWord::AUS1.bits();
const AUS2: u64 = ControlWord::AUS2.bits();
const AUO1: u64 = ControlWord::AUO1.bits();
const AUO2: u64 = ControlWord::AUO2.bits();
const AUIB: u64 = ControlWord::AUIB.bits();
const AULR: u64 = ControlWord::AULR.bits();

// Names ending in '*' are the sources selected by the idle word.
const DATA_BUS: [BusSource; 8] = [
    src(0, "None (0)"),
    src(DBD0, "Accumulator"),
    src(DBD1, "Processor status"),
    src(DBD0 | DBD1, "Special bus"),
    src(DBD2, "Program counter high"),
    src(DBD0 | DBD2, "Program counter low"),
    src(DBD1 | DBD2, "Input data latch*"),
    src(DBD0 | DBD1 | DBD2, "None (7)"),
];

const ADDRESS_HIGH: [BusSource; 4] = [
    src(0, "Input data latch"),
    src(AHD0, "Constants*"),
    src(AHD1, "Program counter"),
    src(AHD0 | AHD1, "Special bus"),
];

const ADDRESS_LOW: [BusSource; 8] = [
    src(0, "Input data latch"),
    src(ALD0, "Program counter"),
    src(ALD1, "Constants"),
    src(ALD0 | ALD1, "Stack pointer"),
    src(ALD2, "ALU"),
    src(ALD0 | ALD2, "PC Low Register"),
    src(ALD1 | ALD2, "None (6)"),
    src(ALD0 | ALD1 | ALD2, "None* (7)"),
];

const SPECIAL_BUS: [BusSource; 8] = [
    src(0, "Accumulator"),
    src(SBD0, "Y register"),
    src(SBD1, "X register"),
    src(SBD0 | SBD1, "ALU"),
    src(SBD2, "Stack pointer"),
    src(SBD0 | SBD2, "Data bus"),
    src(SBD1 | SBD2, "Address high bus"),
    src(SBD0 | SBD1 | SBD2, "None* (7)"),
];

const ALU_A: [BusSource; 2] = [
    src(0, "Special Bus*"),
    src(ControlWord::AUSA.bits(), "Zeros"),
];

const ALU_B: [BusSource; 2] = [
    src(0, "Data bus*"),
    src(ControlWord::AUSB.bits(), "Address bus low"),
];

const ALU_OP: [BusSource; 14] = [
    src(0, "Logical Shift"),
    src(AUS1, "Rotation Shift"),
    src(AUS2, "Arithmetic Shift"),
    src(AUS1 | AUS2, "Add*"),
    src(AUS1 | AUS2 | AUO1, "OR"),
    src(AUS1 | AUS2 | AUO2, "AND"),
    src(AUS1 | AUS2 | AUO1 | AUO2, "XOR"),
    src(AUIB, "Logical Shift"),
    src(AUIB | AUS1, "Rotation Shift"),
    src(AUIB | AUS2, "Arithmetic Shift"),
    src(AUIB | AUS1 | AUS2, "Subtract"),
    src(AUIB | AUS1 | AUS2 | AUO1, "OR"),
    src(AUIB | AUS1 | AUS2 | AUO2, "AND"),
    src(AUIB | AUS1 | AUS2 | AUO1 | AUO2, "XOR"),
];

const SHIFT_DIRECTION: [BusSource; 8] = [
    src(0, "Left"),
    src(AULR, "Right"),
    src(AUS1, "Left"),
    src(AUS1 | AULR, "Right"),
    src(AUS2, "Left"),
    src(AUS2 | AULR, "Right"),
    src(AUS1 | AUS2, ""),
    src(AUS1 | AUS2 | AULR, ""),
];

/// A group of control lines that together select one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    Data,
    AddressHigh,
    AddressLow,
    Special,
    AluA,
    AluB,
    AluOp,
    ShiftDirection,
}

impl Bus {
    /// The buses whose source can be cycled from the dashboard.
    pub const ROUTED: [Self; 4] = [Self::Data, Self::AddressHigh, Self::AddressLow, Self::Special];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Data => "DB",
            Self::AddressHigh => "ABH",
            Self::AddressLow => "ABL",
            Self::Special => "SB",
            Self::AluA => "ALU-A",
            Self::AluB => "ALU-B",
            Self::AluOp => "OP",
            Self::ShiftDirection => "Dir",
        }
    }

    #[must_use]
    pub const fn mask(self) -> ControlWord {
        ControlWord::from_bits_retain(match self {
            Self::Data => DBD0 | DBD1 | DBD2,
            Self::AddressHigh => AHD0 | AHD1,
            Self::AddressLow => ALD0 | ALD1 | ALD2,
            Self::Special => SBD0 | SBD1 | SBD2,
            Self::AluA => ControlWord::AUSA.bits(),
            Self::AluB => ControlWord::AUSB.bits(),
            Self::AluOp => AUIB | AUS1 | AUS2 | AUO1 | AUO2,
            Self::ShiftDirection => AUS1 | AUS2 | AULR,
        })
    }

    #[must_use]
    pub const fn sources(self) -> &'static [BusSource] {
        match self {
            Self::Data => &DATA_BUS,
            Self::AddressHigh => &ADDRESS_HIGH,
            Self::AddressLow => &ADDRESS_LOW,
            Self::Special => &SPECIAL_BUS,
            Self::AluA => &ALU_A,
            Self::AluB => &ALU_B,
            Self::AluOp => &ALU_OP,
            Self::ShiftDirection => &SHIFT_DIRECTION,
        }
    }

    /// Position and entry of the source `word` selects, if the table has one.
    #[must_use]
    pub fn resolve(self, word: ControlWord) -> Option<(usize, &'static BusSource)> {
        let selected = word & self.mask();
        self.sources()
            .iter()
            .enumerate()
            .find(|(_, source)| source.lines == selected)
    }

    #[must_use]
    pub fn source_name(self, word: ControlWord) -> &'static str {
        self.resolve(word).map_or("Unknown", |(_, source)| source.name)
    }

    /// Replaces this bus's lines in `word` with the source `offset` entries away.
    /// Moving past either end of the table yields `None`.
    #[must_use]
    pub fn cycle(self, word: ControlWord, offset: isize) -> Option<ControlWord> {
        let (index, _) = self.resolve(word)?;
        let next = index.checked_add_signed(offset)?;
        let source = self.sources().get(next)?;
        Some(word.difference(self.mask()) | source.lines)
    }
}
