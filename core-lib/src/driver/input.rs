use tracing::{info, warn};

use super::{Driver, Page};
use crate::editor::{ControlLineEditor, Direction, SetMode};
use crate::serial::{available_ports, Board};

/// A key press, independent of the terminal backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Up,
    Down,
    Left,
    Right,
    Backspace,
    Enter,
    Escape,
    /// A letter typed with control held.
    Ctrl(char),
    /// The terminal changed size.
    Resize(u16, u16),
    Other,
}

impl Key {
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::Up => Some(Direction::Up),
            Self::Down => Some(Direction::Down),
            Self::Left => Some(Direction::Left),
            Self::Right => Some(Direction::Right),
            _ => None,
        }
    }
}

/// Where the memory page's cursor sits, and the hex digits typed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCursor {
    pub address: u16,
    pub input: Option<String>,
}

impl MemoryCursor {
    #[must_use]
    pub const fn new(address: u16) -> Self {
        Self { address, input: None }
    }

    /// First address of the 256-byte block on show.
    #[must_use]
    pub const fn base(&self) -> u16 {
        self.address & 0xFF00
    }

    #[must_use]
    pub const fn row(&self) -> u16 {
        (self.address >> 4) & 0x0F
    }

    #[must_use]
    pub const fn column(&self) -> u16 {
        self.address & 0x0F
    }

    /// Moves within the block. Returns `false` at its edges.
    pub fn step(&mut self, direction: Direction) -> bool {
        let (row, column) = (self.row(), self.column());
        let next = match direction {
            Direction::Up if row > 0 => self.address - 0x10,
            Direction::Down if row < 15 => self.address + 0x10,
            Direction::Left if column > 0 => self.address - 1,
            Direction::Right if column < 15 => self.address + 1,
            _ => return false,
        };
        self.address = next;
        true
    }

    /// Adds a digit to the entry. Returns the byte once two digits are in.
    pub fn type_digit(&mut self, ch: char) -> Option<u8> {
        let digits = self.input.as_mut()?;
        digits.push(ch.to_ascii_uppercase());
        if digits.len() < 2 {
            return None;
        }
        let value = u8::from_str_radix(digits, 16).ok();
        self.input = None;
        value
    }
}

impl<B: Board> Driver<B> {
    /// Hands a key to the page on top of the stack. Returns `true` once the
    /// operator asked to quit.
    pub fn process(&mut self, key: Key) -> bool {
        if let Key::Resize(cols, rows) = key {
            self.screen = (cols, rows);
            self.redraw.redraw(true);
            return false;
        }

        let pop = match self.pages.last() {
            None => return true,
            Some(Page::Dashboard) => return self.dashboard_key(key),
            Some(&Page::History { offset }) => match self.history_key(key, offset) {
                Some(offset) => {
                    if let Some(Page::History { offset: current }) = self.pages.last_mut() {
                        *current = offset;
                    }
                    false
                }
                None => true,
            },
            Some(Page::Memory(cursor)) => {
                let mut cursor = cursor.clone();
                let close = self.memory_key(key, &mut cursor);
                if let Some(Page::Memory(current)) = self.pages.last_mut() {
                    *current = cursor;
                }
                close
            }
            Some(Page::Help | Page::Ports(_) | Page::Error(_)) => true,
        };

        if pop {
            self.pages.pop();
            self.redraw.redraw(true);
        }
        self.pages.is_empty()
    }

    fn dashboard_key(&mut self, key: Key) -> bool {
        if let Some(direction) = key.direction() {
            self.arrow(direction);
            return false;
        }
        match key {
            Key::Char('0') => self.edit_line(SetMode::Clear),
            Key::Char('1') => self.edit_line(SetMode::Set),
            Key::Backspace => self.edit_line(SetMode::Preset),
            Key::Char(' ') => self.edit_line(SetMode::Toggle),
            Key::Char('b') => {
                self.editor.toggle_bus_mode();
                self.redraw.redraw(true);
            }
            Key::Char('f') => {
                self.ignore_flags = !self.ignore_flags;
                self.redraw.redraw(true);
            }
            Key::Char('c') => self.log_summary(true),
            Key::Char('C') => self.log_summary(false),
            Key::Char('d') => {
                if self.log_level.set_debug(true) {
                    info!("Debug logging on");
                }
            }
            Key::Char('D') => {
                if self.log_level.set_debug(false) {
                    info!("Debug logging off");
                }
            }
            Key::Char('h') => self.push_page(Page::Help),
            Key::Char('l') => self.push_page(Page::History { offset: 0 }),
            Key::Char('m') => self.push_page(Page::Memory(MemoryCursor::new(self.live.address))),
            Key::Char('p') => match available_ports() {
                Ok(ports) => self.push_page(Page::Ports(ports)),
                Err(err) => self.show_error(err.to_string()),
            },
            Key::Char('w') => match self.table.save(&self.settings.table_path) {
                Ok(()) => info!(path = %self.settings.table_path.display(), "Opcode table saved"),
                Err(err) => self.show_error(err.to_string()),
            },
            Key::Char('e') => match self.table.export_eproms(&self.settings.export_dir) {
                Ok(files) => info!(files = files.len(), dir = %self.settings.export_dir.display(), "EPROM images exported"),
                Err(err) => self.show_error(err.to_string()),
            },
            Key::Char('q') => return true,
            other => warn!(key = ?other, "Unmapped key"),
        }
        false
    }

    fn push_page(&mut self, page: Page) {
        self.pages.push(page);
        self.redraw.redraw(true);
    }

    fn arrow(&mut self, direction: Direction) {
        let moved = if !self.editor.bus_mode() {
            self.editor.navigate(direction)
        } else {
            match direction {
                Direction::Up | Direction::Down => self.editor.select_bus(direction),
                Direction::Left => self.cycle_bus(-1),
                Direction::Right => self.cycle_bus(1),
            }
        };
        if moved {
            self.redraw.redraw(false);
        } else {
            self.ring();
        }
    }

    fn cycle_bus(&mut self, offset: isize) -> bool {
        let Some(op_code) = self.live.op_code else {
            return false;
        };
        let flags = self.flags_slot();
        let Some(edit) = self.editor.cycle_bus(self.table.lookup_mut(op_code), flags, offset) else {
            return false;
        };
        self.push_if_live(op_code, flags, &edit);
        true
    }

    fn edit_line(&mut self, mode: SetMode) {
        let Some(op_code) = self.live.op_code else {
            warn!("No opcode loaded yet");
            return;
        };
        let flags = self.flags_slot();
        match self.editor.set_at_cursor(self.table.lookup_mut(op_code), flags, mode) {
            Ok(edit) => {
                self.push_if_live(op_code, flags, &edit);
                self.redraw.redraw(false);
            }
            Err(rejected) => {
                warn!("{rejected}");
                self.ring();
            }
        }
    }

    fn log_summary(&self, skip_addressing: bool) {
        let Some(op_code) = self.live.op_code else {
            warn!("No opcode loaded yet");
            return;
        };
        let cursor = self.editor.cursor();
        let oc = self.table.lookup(op_code);
        match ControlLineEditor::summary(oc, self.flags_slot(), cursor.step(), cursor.phase(), skip_addressing) {
            Some(summary) if skip_addressing => info!("Mnemonics without addressing lines: {summary}"),
            Some(summary) => info!("Mnemonics: {summary}"),
            None if skip_addressing => info!("No lines set outside of addressing lines"),
            None => info!("No lines set"),
        }
    }

    /// Keys on the memory page. Returns `true` when the page should close.
    fn memory_key(&mut self, key: Key, cursor: &mut MemoryCursor) -> bool {
        let accepted = if cursor.input.is_some() {
            match key {
                Key::Escape => {
                    cursor.input = None;
                    true
                }
                Key::Char(ch) if ch.is_ascii_hexdigit() => {
                    if let Some(value) = cursor.type_digit(ch) {
                        self.memory.edit(cursor.address, value);
                    }
                    true
                }
                _ => false,
            }
        } else {
            match key {
                Key::Enter | Key::Backspace => {
                    cursor.input = Some(String::new());
                    true
                }
                Key::Ctrl('z') => match self.memory.undo() {
                    Some(address) => {
                        cursor.address = address;
                        true
                    }
                    None => false,
                },
                Key::Char('b') => self.toggle_breakpoint(cursor.address),
                Key::Char('[') => {
                    cursor.address = cursor.address.wrapping_sub(0x100);
                    true
                }
                Key::Char(']') => {
                    cursor.address = cursor.address.wrapping_add(0x100);
                    true
                }
                Key::Escape | Key::Char('q') => return true,
                other => other.direction().is_some_and(|direction| cursor.step(direction)),
            }
        };
        if accepted {
            self.redraw.redraw(false);
        } else {
            self.ring();
        }
        false
    }

    fn toggle_breakpoint(&mut self, address: u16) -> bool {
        let Some((root, set)) = self.memory.toggle_breakpoint(&self.table, address) else {
            warn!(address = format_args!("{address:#06X}"), "Selected value is data, not an opcode");
            return false;
        };
        info!(address = format_args!("{root:#06X}"), set, "Break point toggled");
        if let Err(err) = self.memory.save_breakpoints() {
            warn!(%err, "Failed to save break points");
        }
        true
    }

    /// The new scroll offset, or `None` when the page should close.
    fn history_key(&mut self, key: Key, offset: usize) -> Option<usize> {
        let page = self.history_rows().max(1);
        let max = self.history.len().saturating_sub(page);
        let offset = match key {
            Key::Up => offset.saturating_sub(1),
            Key::Down => (offset + 1).min(max),
            Key::Char('q') => offset.saturating_sub(page),
            Key::Char('a') => (offset + page).min(max),
            Key::Char('c') => {
                self.history.clear();
                0
            }
            Key::Char('s') => {
                self.bell.silenced = !self.bell.silenced;
                info!(silenced = self.bell.silenced, "Bell toggled");
                return Some(offset);
            }
            _ => return None,
        };
        self.redraw.redraw(true);
        Some(offset)
    }
}
