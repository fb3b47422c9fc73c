// core-lib/src/serial/protocol.rs
//! Byte-level framing of the board protocol, free of any I/O.
//!
//! Requests are one command byte plus newline. Responses start with the
//! request's tag byte followed by a fixed-size payload. Any other byte in the
//! inbound stream is an asynchronous hardware event.

use crate::microcode::ControlWord;

/// A request the host can make of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Address,
    OpCode,
    Status,
    Data,
    WriteData(u8),
    /// Drive the 48 control lines directly. The board does not answer.
    SetLines(ControlWord),
}

impl Request {
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        match self {
            Self::Address => b"a\n".to_vec(),
            Self::OpCode => b"o\n".to_vec(),
            Self::Status => b"s\n".to_vec(),
            Self::Data => b"d\n".to_vec(),
            Self::WriteData(byte) => vec![b'D', byte, b'\n'],
            Self::SetLines(word) => {
                let mut frame = Vec::with_capacity(8);
                frame.push(b'L');
                frame.extend_from_slice(&word.bits().to_be_bytes()[2..]);
                frame.push(b'\n');
                frame
            }
        }
    }

    /// Tag of the expected response, `None` for fire-and-forget requests.
    #[must_use]
    pub const fn response(self) -> Option<Tag> {
        match self {
            Self::Address => Some(Tag::Address),
            Self::OpCode => Some(Tag::OpCode),
            Self::Status => Some(Tag::Status),
            Self::Data => Some(Tag::Data),
            Self::WriteData(_) => Some(Tag::WriteAck),
            Self::SetLines(_) => None,
        }
    }
}

/// Leading byte of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Address,
    OpCode,
    Status,
    Data,
    WriteAck,
}

impl Tag {
    pub const ALL: [Self; 5] = [Self::Address, Self::OpCode, Self::Status, Self::Data, Self::WriteAck];

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'a' => Some(Self::Address),
            b'o' => Some(Self::OpCode),
            b's' => Some(Self::Status),
            b'd' => Some(Self::Data),
            b'D' => Some(Self::WriteAck),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Address => 'a',
            Self::OpCode => 'o',
            Self::Status => 's',
            Self::Data => 'd',
            Self::WriteAck => 'D',
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Payload bytes following the tag. The address is little-endian.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Address => 2,
            _ => 1,
        }
    }
}

/// Untagged edges reported by the board. `true` is the high level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Clock(bool),
    Irq(bool),
    Nmi(bool),
    Reset(bool),
}

impl HardwareEvent {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'c' => Some(Self::Clock(false)),
            b'C' => Some(Self::Clock(true)),
            b'i' => Some(Self::Irq(false)),
            b'I' => Some(Self::Irq(true)),
            b'n' => Some(Self::Nmi(false)),
            b'N' => Some(Self::Nmi(true)),
            b'r' => Some(Self::Reset(false)),
            b'R' => Some(Self::Reset(true)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Clock(false) => b'c',
            Self::Clock(true) => b'C',
            Self::Irq(false) => b'i',
            Self::Irq(true) => b'I',
            Self::Nmi(false) => b'n',
            Self::Nmi(true) => b'N',
            Self::Reset(false) => b'r',
            Self::Reset(true) => b'R',
        }
    }
}

/// One decoded unit of the inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Response { tag: Tag, value: u16 },
    Event(HardwareEvent),
    Unknown(u8),
}

#[derive(Debug, Clone, Copy)]
struct Partial {
    tag: Tag,
    payload: [u8; 2],
    filled: usize,
}

/// Splits the inbound byte stream into responses and events.
///
/// Payload bytes are taken verbatim, so an event byte inside a response
/// payload is data, not an event.
#[derive(Debug, Default)]
pub struct Demux {
    partial: Option<Partial>,
}

impl Demux {
    #[must_use]
    pub const fn new() -> Self {
        Self { partial: None }
    }

    pub fn push(&mut self, byte: u8) -> Option<Inbound> {
        if let Some(partial) = self.partial.as_mut() {
            partial.payload[partial.filled] = byte;
            partial.filled += 1;
            if partial.filled < partial.tag.payload_len() {
                return None;
            }
            let Partial { tag, payload, .. } = self.partial.take()?;
            let value = match tag {
                Tag::Address => u16::from_le_bytes(payload),
                _ => u16::from(payload[0]),
            };
            return Some(Inbound::Response { tag, value });
        }

        if let Some(tag) = Tag::from_byte(byte) {
            self.partial = Some(Partial {
                tag,
                payload: [0; 2],
                filled: 0,
            });
            return None;
        }

        Some(HardwareEvent::from_byte(byte).map_or(Inbound::Unknown(byte), Inbound::Event))
    }

    /// Drops a half-received response.
    pub fn clear(&mut self) {
        self.partial = None;
    }
}
