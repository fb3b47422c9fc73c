//! Rendering. Pages draw onto a [`Screen`]; the event loop records them into
//! a [`Frame`] that the terminal host replays.

use tracing::Level;

use super::input::MemoryCursor;
use super::Driver;
use crate::editor::{BitState, ControlLineEditor};
use crate::microcode::{Bus, ControlWord, Describe, Phase, LINE_COUNT};
use crate::serial::Board;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Default,
    Grey,
    White,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    BrightRed,
    BrightGreen,
}

/// What a renderer has to provide.
pub trait Screen {
    fn size(&self) -> (u16, u16);
    fn clear(&mut self);
    /// `col` and `row` are 1-based.
    fn print(&mut self, col: u16, row: u16, color: Color, text: &str);
    /// Shows the cursor at a cell, or hides it.
    fn cursor(&mut self, at: Option<(u16, u16)>);
    fn bell(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    Clear,
    Text {
        col: u16,
        row: u16,
        color: Color,
        text: String,
    },
    Cursor(Option<(u16, u16)>),
    Bell,
}

/// A recorded sequence of draw operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    cols: u16,
    rows: u16,
    ops: Vec<DrawOp>,
}

impl Frame {
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            ops: Vec::new(),
        }
    }

    #[must_use]
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn replay(&self, screen: &mut dyn Screen) {
        for op in &self.ops {
            match op {
                DrawOp::Clear => screen.clear(),
                DrawOp::Text {
                    col,
                    row,
                    color,
                    text,
                } => screen.print(*col, *row, *color, text),
                DrawOp::Cursor(at) => screen.cursor(*at),
                DrawOp::Bell => screen.bell(),
            }
        }
    }

    /// The text a terminal would show on `row`, trailing blanks trimmed.
    #[must_use]
    pub fn row_text(&self, row: u16) -> String {
        let mut line: Vec<char> = Vec::new();
        for op in &self.ops {
            match op {
                DrawOp::Clear => line.clear(),
                DrawOp::Text { col, row: at, text, .. } if *at == row => {
                    let start = usize::from(col.saturating_sub(1));
                    for (offset, ch) in text.chars().enumerate() {
                        let index = start + offset;
                        if line.len() <= index {
                            line.resize(index + 1, ' ');
                        }
                        line[index] = ch;
                    }
                }
                _ => {}
            }
        }
        line.into_iter().collect::<String>().trim_end().to_owned()
    }

    /// Whether any row shows `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        (1..=self.rows).any(|row| self.row_text(row).contains(needle))
    }
}

impl Screen for Frame {
    fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    fn clear(&mut self) {
        self.ops.push(DrawOp::Clear);
    }

    fn print(&mut self, col: u16, row: u16, color: Color, text: &str) {
        if row == 0 || row > self.rows || col == 0 || col > self.cols {
            return;
        }
        let room = usize::from(self.cols - col + 1);
        self.ops.push(DrawOp::Text {
            col,
            row,
            color,
            text: text.chars().take(room).collect(),
        });
    }

    fn cursor(&mut self, at: Option<(u16, u16)>) {
        self.ops.push(DrawOp::Cursor(at));
    }

    fn bell(&mut self) {
        self.ops.push(DrawOp::Bell);
    }
}

/// One entry of the view stack. Only the top entry draws and takes keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    Help,
    History { offset: usize },
    Error(String),
    Ports(Vec<String>),
    Memory(MemoryCursor),
}

const MEMORY_ROW: u16 = 3;
const MEMORY_ROWS: usize = 16;
const SIDE_COL: u16 = 58;
const LINES_ROW: u16 = 20;
const NAMES_ROW: u16 = LINES_ROW + 1;
pub(super) const MATRIX_ROW: u16 = NAMES_ROW + 4;
const MATRIX_COL: u16 = 7;
const BUS_COL: u16 = 64;

const KEYS: [(&str, &str); 15] = [
    ("arrows", "Move the cursor, or pick and cycle a bus in bus mode"),
    ("0 / 1", "Clear / set the line under the cursor"),
    ("backspace", "Put the line back to its preset"),
    ("space", "Toggle the line"),
    ("b", "Bus mode"),
    ("f", "Use the flags dimension"),
    ("c / C", "Log the cell's lines without / with addressing lines"),
    ("d / D", "Debug logging on / off"),
    ("h", "This page"),
    ("l", "Notification history"),
    ("m", "Memory page: enter edits a byte, ctrl-z undoes, b toggles a break point"),
    ("p", "Serial ports"),
    ("w", "Save the opcode table"),
    ("e", "Export EPROM images"),
    ("q", "Quit"),
];

/// Screen column of a byte on the memory page.
const fn memory_col(column: u16) -> u16 {
    7 + column * 3
}

/// Screen column of a matrix bit column. Bits are grouped by eight.
const fn bit_col(column: u8) -> u16 {
    let index = column as u16 - 1;
    MATRIX_COL + index + index / 8
}

const fn state_color(state: BitState) -> Color {
    match state {
        BitState::Baseline => Color::Blue,
        BitState::Preset => Color::Yellow,
        BitState::Override => Color::BrightRed,
        BitState::Reverted => Color::Magenta,
    }
}

const fn level_color(level: Level) -> Color {
    match level {
        Level::ERROR => Color::BrightRed,
        Level::WARN => Color::Yellow,
        _ => Color::White,
    }
}

fn padded(text: &str, width: u16) -> String {
    format!("{text:<width$}", width = usize::from(width))
}

impl<B: Board> Driver<B> {
    /// Draws the page on top of the stack.
    pub fn draw(&mut self, screen: &mut dyn Screen, connected: bool, initialize: bool) {
        if initialize {
            screen.clear();
        }
        if self.bell.pending {
            self.bell.pending = false;
            screen.bell();
        }
        match self.page().clone() {
            Page::Dashboard => self.draw_dashboard(screen, connected),
            Page::Help => draw_help(screen),
            Page::History { offset } => self.draw_history(screen, offset),
            Page::Error(message) => draw_error(screen, &message),
            Page::Ports(ports) => draw_ports(screen, &ports),
            Page::Memory(cursor) => self.draw_memory(screen, &cursor),
        }
    }

    /// Entries that fit on the history page.
    pub(super) fn history_rows(&self) -> usize {
        usize::from(self.screen.1.saturating_sub(3))
    }

    fn draw_dashboard(&self, screen: &mut dyn Screen, connected: bool) {
        let (cols, rows) = screen.size();
        let live = &self.live;
        let flags = self.flags_slot();

        if connected {
            screen.print(1, 1, Color::BrightGreen, " CONNECTED    ");
        } else {
            screen.print(1, 1, Color::BrightRed, " DISCONNECTED ");
        }
        let oc = live.op_code.map(|op_code| self.table.lookup(op_code));
        let title = oc.map_or_else(
            || "No opcode loaded".to_owned(),
            |oc| format!("{} ({:02X}) {} [{}]", oc.name, oc.op_code, oc.syntax, oc.addr_mode.name()),
        );
        screen.print(16, 1, Color::White, &padded(&title, 40));

        let first = live.address.wrapping_sub(0x40);
        for (row, line) in (MEMORY_ROW..).zip(self.memory.hex_rows(first, MEMORY_ROWS)) {
            let current = line.starts_with(&format!("{:04X}", live.address & 0xFFF0));
            screen.print(1, row, if current { Color::Yellow } else { Color::Grey }, &line);
        }

        self.draw_cpu(screen);

        let header = if self.ignore_flags {
            "Control Lines (Ignoring flags)".to_owned()
        } else {
            format!("Control Lines (Flags {flags:04b})")
        };
        screen.print(1, LINES_ROW, Color::White, &padded(&header, 40));

        let Some(oc) = oc else {
            screen.cursor(None);
            return;
        };

        let cursor = self.editor.cursor();
        for line in 0..4 {
            for column in 1..=LINE_COUNT {
                let bit = LINE_COUNT - column;
                let name = ControlWord::mnemonic(bit, cursor.phase());
                let ch = name.chars().nth(line).unwrap_or(' ');
                screen.print(bit_col(column), NAMES_ROW + line as u16, Color::Cyan, &ch.to_string());
            }
        }

        let steps = self.editor.steps();
        for step in 0..steps {
            for phase in Phase::ALL {
                let row_index = u16::from(step) * 2 + phase.index() as u16;
                let row = MATRIX_ROW + row_index;
                let is_live = step == live.step && phase == live.phase;
                let label = ControlLineEditor::row_label(step, phase, steps);
                let label_color = if is_live { Color::BrightGreen } else { Color::White };
                screen.print(1, row, label_color, &padded(&label, 5));
                for (column, (set, state)) in (1..).zip(ControlLineEditor::classify_row(oc, flags, step, phase)) {
                    screen.print(bit_col(column), row, state_color(state), if set { "1" } else { "0" });
                }
            }
        }
        let below = MATRIX_ROW + u16::from(steps) * 2;
        let help = format!(
            "{}: {}",
            ControlWord::mnemonic(cursor.bit(), cursor.phase()),
            self.editor.line_help()
        );
        screen.print(1, below + 1, Color::White, &padded(&help, BUS_COL - 2));

        screen.print(BUS_COL, LINES_ROW, Color::White, if self.editor.bus_mode() { "Buses (bus mode)" } else { "Buses           " });
        for (row, (bus, name)) in (NAMES_ROW..).zip(self.editor.projections(oc, flags)) {
            let selected = self.editor.bus_mode() && bus == self.editor.selected_bus();
            let color = if selected { Color::Cyan } else { Color::Grey };
            screen.print(BUS_COL, row, color, &padded(&format!("{:<6}{name}", bus.label()), 30));
        }
        let active = oc.describe_line(flags, cursor.step(), cursor.phase(), &Describe::default());
        for (row, group) in (NAMES_ROW + 9..).zip(active.iter()) {
            screen.print(BUS_COL, row, Color::Yellow, &padded(group, 40));
        }

        let first_note = below + 3;
        if first_note < rows {
            let notes = self.history.recent(0, usize::from(rows - first_note + 1));
            for (row, entry) in (first_note..=rows).zip(notes) {
                screen.print(1, row, level_color(entry.level), &padded(&entry.message, cols));
            }
        }

        screen.cursor(Some((bit_col(cursor.column()), MATRIX_ROW + u16::from(cursor.row()))));
    }

    fn draw_cpu(&self, screen: &mut dyn Screen) {
        let live = &self.live;
        screen.print(SIDE_COL, MEMORY_ROW, Color::White, "Status");
        for (index, (name, mask)) in [("N", 0x80), ("V", 0x40), ("I", 0x20), ("Z", 0x10), ("C", 0x08)]
            .into_iter()
            .enumerate()
        {
            let color = if live.status & mask != 0 { Color::BrightGreen } else { Color::Grey };
            screen.print(SIDE_COL + 8 + index as u16 * 2, MEMORY_ROW, color, name);
        }

        screen.print(SIDE_COL, MEMORY_ROW + 1, Color::White, "Step");
        for step in 0..self.editor.steps() {
            let color = if step == live.step { Color::Cyan } else { Color::Grey };
            screen.print(SIDE_COL + 8 + u16::from(step) * 2, MEMORY_ROW + 1, color, &step.to_string());
        }
        let phase = match live.phase {
            Phase::Phi1 => "Phase 1",
            Phase::Phi2 => "Phase 2",
        };
        screen.print(SIDE_COL, MEMORY_ROW + 2, Color::White, phase);

        // Lines are active low.
        for (index, (name, level)) in [("IRQ", live.irq), ("NMI", live.nmi), ("RST", live.reset)]
            .into_iter()
            .enumerate()
        {
            let color = if level { Color::Grey } else { Color::BrightRed };
            screen.print(SIDE_COL + index as u16 * 5, MEMORY_ROW + 3, color, name);
        }
        screen.print(
            SIDE_COL,
            MEMORY_ROW + 4,
            Color::White,
            &format!("Address ${:04X}  Data ${:02X}", live.address, self.memory.read(live.address)),
        );

        screen.print(SIDE_COL, MEMORY_ROW + 6, Color::White, "Instructions");
        let listing = self.memory.disassemble(&self.table, live.instruction_address, 8);
        for (index, (row, line)) in (MEMORY_ROW + 7..).zip(listing).enumerate() {
            let color = if index == 0 { Color::BrightGreen } else { Color::Grey };
            screen.print(SIDE_COL, row, color, &padded(&line, 24));
        }
    }

    fn draw_memory(&self, screen: &mut dyn Screen, cursor: &MemoryCursor) {
        let (cols, rows) = screen.size();
        let base = cursor.base();
        screen.print(1, 1, Color::White, &padded(&format!("Memory ${base:04X}"), cols));
        screen.print(1, 2, Color::Yellow, "      0  1  2  3  4  5  6  7  8  9  A  B  C  D  E  F");

        for row in 0..16u16 {
            let line = base.wrapping_add(row * 16);
            screen.print(1, 3 + row, Color::Yellow, &format!("{line:04X}:"));
            for column in 0..16u16 {
                let address = line.wrapping_add(column);
                let color = if self.memory.is_breakpoint(address) {
                    Color::Red
                } else if address == self.live.address {
                    Color::BrightGreen
                } else {
                    Color::Grey
                };
                let text = format!("{:02X}", self.memory.read(address));
                screen.print(memory_col(column), 3 + row, color, &text);
            }
        }

        let cell = (memory_col(cursor.column()), 3 + cursor.row());
        if let Some(digits) = &cursor.input {
            screen.print(cell.0, cell.1, Color::BrightRed, &format!("{digits:_<2}"));
        }

        let below = 3 + 16 + 1;
        let listing = match self.memory.instruction_start(&self.table, cursor.address) {
            Some(start) => self.memory.disassemble(&self.table, start, 1).join(""),
            None => "Data".to_owned(),
        };
        screen.print(1, below, Color::White, &padded(&format!("${:04X}  {listing}", cursor.address), cols));
        let marks: Vec<String> = self.memory.breakpoints().map(|address| format!("${address:04X}")).collect();
        let marks = if marks.is_empty() { "none".to_owned() } else { marks.join(" ") };
        screen.print(1, below + 1, Color::Red, &padded(&format!("Break points: {marks}"), cols));

        screen.print(
            1,
            rows,
            Color::Grey,
            "Arrows move, enter/backspace edit, esc cancels, ctrl-z undoes, b break point, [ ] change block, q returns",
        );
        screen.cursor(Some(cell));
    }

    fn draw_history(&self, screen: &mut dyn Screen, offset: usize) {
        let (cols, rows) = screen.size();
        let total = self.history.len();
        screen.print(1, 1, Color::White, &padded(&format!("Notifications ({total})"), cols));
        let entries = self.history.recent(offset, self.history_rows());
        for (row, entry) in (2..rows).zip(entries) {
            screen.print(1, row, level_color(entry.level), &padded(&entry.message, cols));
        }
        let bell = if self.bell.silenced { "off" } else { "on" };
        screen.print(
            1,
            rows,
            Color::Grey,
            &format!("Arrows scroll, q/a page up/down, c clears, s toggles the bell ({bell}), any other key returns"),
        );
        screen.cursor(None);
    }
}

fn draw_help(screen: &mut dyn Screen) {
    screen.print(1, 1, Color::White, "Keys");
    for (row, (key, action)) in (2..).zip(KEYS) {
        screen.print(3, row, Color::Cyan, key);
        screen.print(15, row, Color::Grey, action);
    }

    let top = 3 + KEYS.len() as u16;
    for (index, bus) in Bus::ROUTED.into_iter().enumerate() {
        let col = 1 + index as u16 * 28;
        screen.print(col, top, Color::White, bus.label());
        for (row, (position, source)) in (top + 1..).zip(bus.sources().iter().enumerate()) {
            screen.print(col, row, Color::Grey, &format!("{position} {}", source.name));
        }
    }

    let (_, rows) = screen.size();
    screen.print(1, rows, Color::Grey, "Press any key to return");
    screen.cursor(None);
}

fn draw_error(screen: &mut dyn Screen, message: &str) {
    screen.print(1, 1, Color::White, "Something went wrong");
    screen.print(1, 3, Color::BrightRed, message);
    let (_, rows) = screen.size();
    screen.print(1, rows, Color::Grey, "Press any key to continue");
    screen.cursor(None);
}

fn draw_ports(screen: &mut dyn Screen, ports: &[String]) {
    screen.print(1, 1, Color::White, "Serial ports");
    if ports.is_empty() {
        screen.print(3, 3, Color::Grey, "No ports found");
    }
    for (row, port) in (3..).zip(ports) {
        screen.print(3, row, Color::Cyan, port);
    }
    let (_, rows) = screen.size();
    screen.print(1, rows, Color::Grey, "Press any key to return");
    screen.cursor(None);
}
