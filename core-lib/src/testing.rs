//! In-memory board simulator speaking the wire protocol over channel pipes.
//!
//! [`SimBoard`] answers requests from a shared [`SimState`] that tests script
//! directly. Its [`PipeOpener`] plugs into [`SerialLink`](crate::serial::SerialLink)
//! in place of a real port.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::error::LinkError;
use crate::microcode::ControlWord;
use crate::serial::{HardwareEvent, PortOpener, PortReader, PortWriter};

/// Host side of the board-to-host pipe. Reads time out like a serial port.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    poll: Duration,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.poll) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// Host side of the host-to-board pipe.
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What the simulated board reports, and what the host did to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimState {
    pub status: u8,
    pub opcode: u8,
    pub address: u16,
    pub data: u8,
    /// Code returned for `D` writes. Zero acknowledges.
    pub write_ack: u8,
    /// Swallow requests without answering.
    pub mute: bool,
    pub lines: Vec<ControlWord>,
    pub written: Vec<u8>,
    /// Command bytes in arrival order.
    pub requests: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<SimState>>,
    to_host: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    failures: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl SimBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An opener whose reads poll every `poll`.
    #[must_use]
    pub fn opener(&self, poll: Duration) -> PipeOpener {
        PipeOpener {
            board: self.clone(),
            poll,
        }
    }

    pub fn update(&self, change: impl FnOnce(&mut SimState)) {
        change(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    #[must_use]
    pub fn snapshot(&self) -> SimState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The next `count` opens fail as if the device were absent.
    pub fn fail_next_opens(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Sends raw bytes to the host. `false` when no port is open.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        self.to_host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(bytes.to_vec()).is_ok())
    }

    pub fn emit(&self, event: HardwareEvent) -> bool {
        self.inject(&[event.as_byte()])
    }

    /// Pulls the cable: the host reader sees end of stream.
    pub fn unplug(&self) {
        self.to_host.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Asserts the control words the host pushed, in order.
    pub fn assert_lines(&self, expected: &[ControlWord]) {
        assert_eq!(self.snapshot().lines, expected);
    }

    fn serve(&self, requests: &Receiver<Vec<u8>>) {
        let mut inbound = VecDeque::new();
        while let Ok(bytes) = requests.recv() {
            inbound.extend(bytes);
            while let Some(frame) = take_frame(&mut inbound) {
                self.answer(&frame);
            }
        }
    }

    fn answer(&self, frame: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.requests.push(frame[0]);
        let reply = match frame[0] {
            b'a' => {
                let [lo, hi] = state.address.to_le_bytes();
                Some(vec![b'a', lo, hi])
            }
            b'o' => Some(vec![b'o', state.opcode]),
            b's' => Some(vec![b's', state.status]),
            b'd' => Some(vec![b'd', state.data]),
            b'D' => {
                state.written.push(frame[1]);
                Some(vec![b'D', state.write_ack])
            }
            b'L' => {
                let mut bits = [0u8; 8];
                bits[2..].copy_from_slice(&frame[1..7]);
                state.lines.push(ControlWord::from_bits_retain(u64::from_be_bytes(bits)));
                None
            }
            _ => None,
        };
        let mute = state.mute;
        drop(state);
        if let Some(reply) = reply.filter(|_| !mute) {
            self.inject(&reply);
        }
    }
}

/// Pops one complete request frame, skipping stray bytes.
fn take_frame(inbound: &mut VecDeque<u8>) -> Option<Vec<u8>> {
    loop {
        let len = match inbound.front()? {
            b'a' | b'o' | b's' | b'd' => 2,
            b'D' => 3,
            b'L' => 8,
            _ => {
                inbound.pop_front();
                continue;
            }
        };
        if inbound.len() < len {
            return None;
        }
        return Some(inbound.drain(..len).collect());
    }
}

/// Opens in-memory pipes to a [`SimBoard`].
pub struct PipeOpener {
    board: SimBoard,
    poll: Duration,
}

impl PortOpener for PipeOpener {
    fn open(&self) -> Result<(PortReader, PortWriter), LinkError> {
        let failed = self
            .board
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LinkError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "simulated port is absent",
            )));
        }
        self.board.opens.fetch_add(1, Ordering::SeqCst);

        let (host_tx, board_rx) = mpsc::channel();
        let (board_tx, host_rx) = mpsc::channel();
        *self
            .board
            .to_host
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(board_tx);

        let board = self.board.clone();
        thread::Builder::new()
            .name("sim-board".into())
            .spawn(move || board.serve(&board_rx))?;

        Ok((
            Box::new(PipeReader {
                rx: host_rx,
                pending: VecDeque::new(),
                poll: self.poll,
            }),
            Box::new(PipeWriter { tx: host_tx }),
        ))
    }

    fn describe(&self) -> String {
        "sim".to_owned()
    }
}
