//! Host-side 64 KiB memory the board reads and writes through the link.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::MemoryError;
use crate::microcode::{AddressMode, OpCodeTable};

pub const MEMORY_SIZE: usize = 0x1_0000;
/// Where the interrupt and reset vectors point until a ROM overrides them.
pub const DEFAULT_VECTOR: u16 = 0x0200;

pub struct Memory {
    bytes: Box<[u8; MEMORY_SIZE]>,
    /// Where the ROM image starts.
    origin: u16,
    /// Bytes loaded from the ROM image.
    loaded: usize,
    /// Address and previous value of the last operator edit.
    last_edit: Option<(u16, u8)>,
    breakpoints: BTreeSet<u16>,
    breakpoint_file: Option<PathBuf>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    #[must_use]
    pub fn new() -> Self {
        let mut memory = Self {
            bytes: Box::new([0; MEMORY_SIZE]),
            origin: 0,
            loaded: 0,
            last_edit: None,
            breakpoints: BTreeSet::new(),
            breakpoint_file: None,
        };
        let [lo, hi] = DEFAULT_VECTOR.to_le_bytes();
        for vector in [0xFFFA, 0xFFFC, 0xFFFE] {
            memory.write(vector, lo);
            memory.write(vector + 1, hi);
        }
        memory
    }

    /// Overlays a program image at `origin`. The vectors keep their defaults
    /// unless the image covers them.
    pub fn load_rom(&mut self, path: &Path, origin: u16) -> Result<usize, MemoryError> {
        let image = std::fs::read(path).map_err(|source| MemoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_image(&image, origin)?;
        self.breakpoint_file = Some(breakpoint_path(path));
        info!(bytes = image.len(), path = %path.display(), "ROM loaded");
        Ok(image.len())
    }

    pub fn load_image(&mut self, image: &[u8], origin: u16) -> Result<(), MemoryError> {
        let start = usize::from(origin);
        let end = start + image.len();
        if end > MEMORY_SIZE {
            return Err(MemoryError::TooLarge {
                len: image.len(),
                origin,
            });
        }
        self.bytes[start..end].copy_from_slice(image);
        self.origin = origin;
        self.loaded = image.len();
        Ok(())
    }

    #[must_use]
    pub fn read(&self, address: u16) -> u8 {
        self.bytes[usize::from(address)]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        debug!(address = format_args!("{address:#06X}"), value = format_args!("{value:#04X}"), "Memory write");
        self.bytes[usize::from(address)] = value;
    }

    #[must_use]
    pub const fn loaded(&self) -> usize {
        self.loaded
    }

    #[must_use]
    pub const fn origin(&self) -> u16 {
        self.origin
    }

    /// An operator edit. Only the latest one can be undone.
    pub fn edit(&mut self, address: u16, value: u8) {
        self.last_edit = Some((address, self.read(address)));
        self.write(address, value);
        info!(address = format_args!("{address:#06X}"), value = format_args!("{value:#04X}"), "Memory edited");
    }

    /// Puts back the byte the last edit replaced. Returns its address.
    pub fn undo(&mut self) -> Option<u16> {
        let (address, value) = self.last_edit.take()?;
        self.write(address, value);
        info!(address = format_args!("{address:#06X}"), "Memory edit undone");
        Some(address)
    }

    /// The first byte of the instruction covering `address`, walking the
    /// listing from the ROM origin. Bytes outside the image and undefined
    /// opcodes are data.
    #[must_use]
    pub fn instruction_start(&self, table: &OpCodeTable, address: u16) -> Option<u16> {
        let start = usize::from(self.origin);
        let end = start + self.loaded;
        let at = usize::from(address);
        if !(start..end).contains(&at) {
            return None;
        }
        let mut pc = start;
        while pc < end {
            let oc = table.lookup(self.bytes[pc]);
            let len = if oc.is_virtual { 1 } else { 1 + usize::from(oc.operands) };
            if at < pc + len {
                return (!oc.is_virtual).then_some(pc as u16);
            }
            pc += len;
        }
        None
    }

    #[must_use]
    pub fn is_breakpoint(&self, address: u16) -> bool {
        self.breakpoints.contains(&address)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u16> + '_ {
        self.breakpoints.iter().copied()
    }

    /// Flips the break point on the instruction covering `address`. Returns
    /// the instruction's address and whether a break point is now set there.
    pub fn toggle_breakpoint(&mut self, table: &OpCodeTable, address: u16) -> Option<(u16, bool)> {
        let root = self.instruction_start(table, address)?;
        let set = self.breakpoints.insert(root);
        if !set {
            self.breakpoints.remove(&root);
        }
        debug!(address = format_args!("{root:#06X}"), set, "Break point toggled");
        Some((root, set))
    }

    /// Reads the break points saved next to the ROM. A missing file means
    /// none were saved. Addresses that do not start an instruction are dropped.
    pub fn load_breakpoints(&mut self, table: &OpCodeTable) -> Result<usize, MemoryError> {
        let Some(path) = self.breakpoint_file.clone() else {
            return Ok(0);
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(MemoryError::Breakpoints { path, source }),
        };
        self.breakpoints = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .filter(|&address| self.instruction_start(table, address) == Some(address))
            .collect();
        info!(count = self.breakpoints.len(), path = %path.display(), "Break points loaded");
        Ok(self.breakpoints.len())
    }

    /// Writes the break points next to the ROM as little-endian addresses.
    /// Without a ROM file they only live for the session.
    pub fn save_breakpoints(&self) -> Result<(), MemoryError> {
        let Some(path) = &self.breakpoint_file else {
            debug!("No ROM file, break points not saved");
            return Ok(());
        };
        let bytes: Vec<u8> = self.breakpoints.iter().flat_map(|address| address.to_le_bytes()).collect();
        std::fs::write(path, bytes).map_err(|source| MemoryError::Breakpoints {
            path: path.clone(),
            source,
        })
    }

    /// `rows` lines of 16 bytes, starting at the line holding `address`.
    #[must_use]
    pub fn hex_rows(&self, address: u16, rows: usize) -> Vec<String> {
        let first = usize::from(address & 0xFFF0);
        (0..rows)
            .map(|row| (first + row * 16) % MEMORY_SIZE)
            .map(|base| {
                let mut line = format!("{base:04X}:");
                for byte in &self.bytes[base..base + 16] {
                    let _ = write!(line, " {byte:02X}");
                }
                line
            })
            .collect()
    }

    /// Decodes `count` instructions from `address`. Undefined opcodes end the
    /// listing.
    #[must_use]
    pub fn disassemble(&self, table: &OpCodeTable, address: u16, count: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(count);
        let mut pc = address;
        while lines.len() < count {
            let oc = table.lookup(self.read(pc));
            if oc.is_virtual {
                break;
            }
            let lo = self.read(pc.wrapping_add(1));
            let hi = self.read(pc.wrapping_add(2));
            let word = u16::from_le_bytes([lo, hi]);
            let operand = match oc.addr_mode {
                AddressMode::Imm => format!("#${lo:02X}"),
                AddressMode::Zpg => format!("${lo:02X}"),
                AddressMode::Zpx => format!("${lo:02X},X"),
                AddressMode::Zpy => format!("${lo:02X},Y"),
                AddressMode::Izx => format!("(${lo:02X},X)"),
                AddressMode::Izy => format!("(${lo:02X}),Y"),
                AddressMode::Abs => format!("${word:04X}"),
                AddressMode::Abx => format!("${word:04X},X"),
                AddressMode::Aby => format!("${word:04X},Y"),
                AddressMode::Ind => format!("(${word:04X})"),
                AddressMode::Rel => {
                    let target = pc.wrapping_add(2).wrapping_add_signed(i16::from(lo as i8));
                    format!("${target:04X}")
                }
                AddressMode::Acc => "A".to_owned(),
                AddressMode::Imp => String::new(),
            };
            lines.push(format!("${pc:04X}: {} {operand}", oc.name).trim_end().to_owned());
            pc = pc.wrapping_add(1 + u16::from(oc.operands));
        }
        lines
    }
}

/// `.<stem>.bp` beside the ROM file.
#[must_use]
pub fn breakpoint_path(rom: &Path) -> PathBuf {
    let stem = rom.file_stem().map_or_else(|| "rom".into(), |stem| stem.to_string_lossy());
    rom.with_file_name(format!(".{stem}.bp"))
}
