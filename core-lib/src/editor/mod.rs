//! Cursor-addressed editing of one opcode's control-word matrix.
//!
//! The editor never owns the opcode. The event loop passes in the bound
//! [`OpCode`] for each operation, so the matrix has a single writer.

use tracing::debug;

use crate::error::LineRejected;
use crate::microcode::{default_for, Bus, ControlWord, Describe, OpCode, OpCodeTable, Phase, LINE_COUNT};

/// Cursor and bus-selector movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// How [`ControlLineEditor::set_line`] changes the addressed bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Clear,
    Set,
    /// Back to the declared preset
    Preset,
    Toggle,
}

/// A displayed bit compared against its preset and the phase default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitState {
    /// Matches both.
    Baseline,
    /// Asserted by the instruction definition.
    Preset,
    /// Changed by the user away from an untouched default.
    Override,
    /// A preset line the user put back to its default level.
    Reverted,
}

impl BitState {
    #[must_use]
    pub const fn classify(current: bool, preset: bool, default: bool) -> Self {
        match (current == default, preset == default) {
            (true, true) => Self::Baseline,
            (false, false) => Self::Preset,
            (false, true) => Self::Override,
            (true, false) => Self::Reverted,
        }
    }
}

/// Bit column (1 is line 47) and matrix row (`step * 2 + phase`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    column: u8,
    row: u8,
}

impl Cursor {
    pub const HOME: Self = Self { column: 1, row: 0 };

    #[must_use]
    pub const fn column(self) -> u8 {
        self.column
    }

    #[must_use]
    pub const fn row(self) -> u8 {
        self.row
    }

    #[must_use]
    pub const fn bit(self) -> u8 {
        LINE_COUNT - self.column
    }

    #[must_use]
    pub const fn step(self) -> u8 {
        self.row / 2
    }

    #[must_use]
    pub const fn phase(self) -> Phase {
        Phase::from_level(self.row % 2 == 1)
    }
}

/// The cells an edit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub step: u8,
    pub phase: Phase,
    /// The other phase of the same step was changed too.
    pub mirrored: bool,
}

impl Edit {
    /// Whether the edit changed the word for `step`/`phase`.
    #[must_use]
    pub fn touches(&self, step: u8, phase: Phase) -> bool {
        self.step == step && (self.phase == phase || self.mirrored)
    }
}

/// Navigation state over one opcode's matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLineEditor {
    cursor: Cursor,
    steps: u8,
    bus_mode: bool,
    bus: usize,
}

impl Default for ControlLineEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlLineEditor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cursor: Cursor::HOME,
            steps: 1,
            bus_mode: false,
            bus: 0,
        }
    }

    #[must_use]
    pub const fn cursor(&self) -> Cursor {
        self.cursor
    }

    #[must_use]
    pub const fn steps(&self) -> u8 {
        self.steps
    }

    /// Adopts the step count of a newly bound opcode. The cursor goes home
    /// only when the count actually changes.
    pub fn bind(&mut self, steps: u8) -> bool {
        let steps = steps.max(1);
        if steps == self.steps {
            return false;
        }
        self.steps = steps;
        self.cursor = Cursor::HOME;
        true
    }

    /// Moves the cursor. Returns `false` (and stays put) past an edge.
    pub fn navigate(&mut self, direction: Direction) -> bool {
        let Cursor { column, row } = self.cursor;
        let moved = match direction {
            Direction::Up => row.checked_sub(1).map(|row| Cursor { column, row }),
            Direction::Down => (row + 1 < self.steps * 2).then_some(Cursor { column, row: row + 1 }),
            Direction::Left => (column > 1).then_some(Cursor { column: column - 1, row }),
            Direction::Right => (column < LINE_COUNT).then_some(Cursor { column: column + 1, row }),
        };
        moved.map_or(false, |cursor| {
            self.cursor = cursor;
            true
        })
    }

    /// Puts the cursor row on the live step and phase.
    pub fn follow(&mut self, step: u8, phase: Phase) {
        let row = step * 2 + phase as u8;
        if row < self.steps * 2 {
            self.cursor.row = row;
        }
    }

    #[must_use]
    pub const fn bus_mode(&self) -> bool {
        self.bus_mode
    }

    pub fn toggle_bus_mode(&mut self) -> bool {
        self.bus_mode = !self.bus_mode;
        self.bus_mode
    }

    #[must_use]
    pub const fn selected_bus(&self) -> Bus {
        Bus::ROUTED[self.bus]
    }

    /// Moves the bus selector up or down the routed buses.
    pub fn select_bus(&mut self, direction: Direction) -> bool {
        let next = match direction {
            Direction::Up => self.bus.checked_sub(1),
            Direction::Down => Some(self.bus + 1).filter(|&bus| bus < Bus::ROUTED.len()),
            Direction::Left | Direction::Right => None,
        };
        next.map_or(false, |bus| {
            self.bus = bus;
            true
        })
    }

    /// Validates, then changes one bit of one cell.
    ///
    /// The data bus direction line is mirrored onto the other phase of the
    /// same step so both halves of the cycle agree.
    pub fn set_line(
        oc: &mut OpCode,
        flags: u8,
        step: u8,
        phase: Phase,
        bit: u8,
        mode: SetMode,
    ) -> Result<Edit, LineRejected> {
        OpCodeTable::validate_line(step, phase, bit)?;

        let mask = ControlWord::line(bit);
        let preset = oc.preset(flags, step, phase);
        let word = oc.word_mut(flags, step, phase);
        match mode {
            SetMode::Clear => word.remove(mask),
            SetMode::Set => word.insert(mask),
            SetMode::Preset => *word = word.difference(mask) | (preset & mask),
            SetMode::Toggle => word.toggle(mask),
        }
        let asserted = word.contains(mask);

        let mirrored = mask == ControlWord::DBRW;
        if mirrored {
            oc.word_mut(flags, step, phase.other()).set(mask, asserted);
        }

        debug!(op = %oc.name, flags, step, ?phase, bit, ?mode, asserted, "Control line edited");
        Ok(Edit {
            step,
            phase,
            mirrored,
        })
    }

    /// [`Self::set_line`] on the cell and bit under the cursor.
    pub fn set_at_cursor(&self, oc: &mut OpCode, flags: u8, mode: SetMode) -> Result<Edit, LineRejected> {
        let cursor = self.cursor;
        Self::set_line(oc, flags, cursor.step(), cursor.phase(), cursor.bit(), mode)
    }

    /// Steps the selected bus's source in the cell under the cursor.
    /// `None` past either end of the source table.
    pub fn cycle_bus(&self, oc: &mut OpCode, flags: u8, offset: isize) -> Option<Edit> {
        let (step, phase) = (self.cursor.step(), self.cursor.phase());
        let bus = self.selected_bus();
        let next = bus.cycle(oc.word(flags, step, phase), offset)?;
        *oc.word_mut(flags, step, phase) = next;
        debug!(op = %oc.name, bus = bus.label(), source = bus.source_name(next), "Bus source changed");
        Some(Edit {
            step,
            phase,
            mirrored: false,
        })
    }

    /// Source names for every bus and ALU input of the cell under the cursor.
    #[must_use]
    pub fn projections(&self, oc: &OpCode, flags: u8) -> [(Bus, &'static str); 8] {
        let word = oc.word(flags, self.cursor.step(), self.cursor.phase());
        [
            Bus::AddressHigh,
            Bus::Data,
            Bus::AddressLow,
            Bus::Special,
            Bus::AluB,
            Bus::AluA,
            Bus::AluOp,
            Bus::ShiftDirection,
        ]
        .map(|bus| (bus, bus.source_name(word)))
    }

    /// Description of the line under the cursor in the cursor's phase.
    #[must_use]
    pub fn line_help(&self) -> &'static str {
        ControlWord::description(self.cursor.bit(), self.cursor.phase())
    }

    /// One `CL_`-prefixed, `|`-joined line for pasting into source, without
    /// the timer reset. `None` when nothing else is asserted.
    #[must_use]
    pub fn summary(oc: &OpCode, flags: u8, step: u8, phase: Phase, skip_addressing: bool) -> Option<String> {
        let how = Describe {
            group_size: 64,
            joiner: " | ",
            prefix: "CL_",
            skip_addressing,
        };
        let line = oc.describe_line(flags, step, phase, &how).into_iter().next()?;
        let line = line
            .strip_prefix("CL_CTMR | ")
            .or_else(|| line.strip_prefix("CL_CTMR"))
            .unwrap_or(&line);
        (!line.is_empty()).then(|| line.to_owned())
    }

    /// `T<n>` timing label of a matrix row.
    #[must_use]
    pub fn row_label(step: u8, phase: Phase, steps: u8) -> String {
        match phase {
            Phase::Phi1 => format!("T{}", step + 2),
            Phase::Phi2 if step + 1 == steps => "T1".to_owned(),
            Phase::Phi2 => step.to_string(),
        }
    }

    /// Bits of a cell, most significant first, with their display state.
    pub fn classify_row(oc: &OpCode, flags: u8, step: u8, phase: Phase) -> impl Iterator<Item = (bool, BitState)> {
        let (word, preset, default) = (oc.word(flags, step, phase), oc.preset(flags, step, phase), default_for(phase));
        word.bits_msb_first()
            .map(move |(bit, set)| (set, BitState::classify(set, preset.is_set(bit), default.is_set(bit))))
    }
}
