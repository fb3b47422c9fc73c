//! Serial link to the board.
//!
//! A reader thread owns the inbound half of the port and feeds a [`Demux`].
//! Responses land in one channel per tag, hardware events go to an
//! [`EventSink`]. Requests write under a mutex and then wait on their tag's
//! channel with a bounded timeout.

mod protocol;

use std::future::Future;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use common::{Parity, SerialConfig, StopBits, TimingConfig};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::LinkError;
use crate::microcode::ControlWord;

pub use protocol::{Demux, HardwareEvent, Inbound, Request, Tag};

pub type PortReader = Box<dyn Read + Send>;
pub type PortWriter = Box<dyn Write + Send>;

/// Opens the byte stream to the board. Each call yields a fresh pair.
pub trait PortOpener: Send + Sync {
    fn open(&self) -> Result<(PortReader, PortWriter), LinkError>;

    /// Name for log messages.
    fn describe(&self) -> String;
}

/// Receives what the board reports without being asked.
pub trait EventSink: Send + Sync {
    fn hardware(&self, event: HardwareEvent);

    /// Called once per transition of the link state.
    fn connection(&self, connected: bool);
}

/// Pushes a control word to the board. Never waits for the board.
pub trait LineSetter {
    fn set_lines(&self, word: ControlWord) -> Result<(), LinkError>;
}

/// Everything the event loop needs from the board.
pub trait Board: LineSetter + Send + Sync {
    fn is_connected(&self) -> bool;
    fn read_status(&self) -> impl Future<Output = Result<u8, LinkError>> + Send;
    fn read_opcode(&self) -> impl Future<Output = Result<u8, LinkError>> + Send;
    fn read_address(&self) -> impl Future<Output = Result<u16, LinkError>> + Send;
    fn read_data(&self) -> impl Future<Output = Result<u8, LinkError>> + Send;
    fn write_data(&self, byte: u8) -> impl Future<Output = Result<(), LinkError>> + Send;
    fn reconnect(&self) -> impl Future<Output = Result<(), LinkError>> + Send;
    /// Drops in-flight responses and closes the port after a desync.
    fn reset(&self) -> impl Future<Output = ()> + Send;
}

/// Opens a real serial device with the configured line settings.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    settings: SerialConfig,
    read_poll: Duration,
}

impl SerialPortOpener {
    #[must_use]
    pub const fn new(settings: SerialConfig, read_poll: Duration) -> Self {
        Self { settings, read_poll }
    }
}

impl PortOpener for SerialPortOpener {
    fn open(&self) -> Result<(PortReader, PortWriter), LinkError> {
        if self.settings.port_name.is_empty() {
            return Err(LinkError::NoPort);
        }
        let data_bits = match self.settings.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match self.settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let parity = match self.settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let port = serialport::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(self.read_poll)
            .open()?;
        let reader = port.try_clone()?;
        Ok((Box::new(reader), Box::new(port)))
    }

    fn describe(&self) -> String {
        self.settings.port_name.clone()
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, LinkError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|port| port.port_name)
        .collect())
}

/// State shared with the reader thread.
struct Shared {
    connected: AtomicBool,
    /// Bumped on every open and reset. A reader whose generation is stale exits.
    generation: AtomicU64,
    sink: Arc<dyn EventSink>,
    responses: Vec<UnboundedSender<u16>>,
}

impl Shared {
    /// Records a link state change and reports it when it is an edge.
    fn transition(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            self.sink.connection(connected);
        }
    }
}

pub struct SerialLink {
    opener: Box<dyn PortOpener>,
    timing: TimingConfig,
    shared: Arc<Shared>,
    writer: Mutex<Option<PortWriter>>,
    receivers: Vec<tokio::sync::Mutex<UnboundedReceiver<u16>>>,
}

impl SerialLink {
    pub fn new(opener: Box<dyn PortOpener>, sink: Arc<dyn EventSink>, timing: TimingConfig) -> Self {
        let (responses, receivers) = Tag::ALL
            .iter()
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, tokio::sync::Mutex::new(rx))
            })
            .unzip();
        Self {
            opener,
            timing,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                sink,
                responses,
            }),
            writer: Mutex::new(None),
            receivers,
        }
    }

    /// Opens the port, starts the reader and waits out the board's reset
    /// pulse. First-attempt failures are errors, reconnect failures are noise.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect(&self, is_reconnect: bool) -> Result<(), LinkError> {
        let (reader, writer) = match self.opener.open() {
            Ok(pair) => pair,
            Err(err) => {
                if is_reconnect {
                    debug!(%err, port = %self.opener.describe(), "Reconnect attempt failed");
                } else {
                    error!(%err, port = %self.opener.describe(), "Failed to open serial port");
                }
                return Err(err);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.drain_responses().await;
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || read_loop(reader, &shared, generation))?;
        *self.lock_writer() = Some(writer);

        tokio::time::sleep(self.timing.connect_settle()).await;
        if !self.shared.connected.load(Ordering::SeqCst) {
            info!(port = %self.opener.describe(), "Opened serial port");
        }
        self.shared.transition(true);
        Ok(())
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Drains every response channel and closes the port. The event loop's
    /// reconnect poll reopens it.
    pub async fn reset_channels(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.lock_writer().take();
        self.drain_responses().await;
        self.shared.transition(false);
        debug!("Serial channels reset");
    }

    async fn drain_responses(&self) {
        for receiver in &self.receivers {
            let mut receiver = receiver.lock().await;
            while receiver.try_recv().is_ok() {}
        }
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, Option<PortWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, request: Request) -> Result<(), LinkError> {
        if !self.connected() {
            return Err(LinkError::NotConnected);
        }
        let frame = request.encode();
        trace!(?request, bytes = frame.len(), "Sending request");
        let mut writer = self.lock_writer();
        let port = writer.as_mut().ok_or(LinkError::NotConnected)?;
        port.write_all(&frame)
            .and_then(|()| port.flush())
            .map_err(|err| {
                error!(%err, ?request, "Failed to send request");
                LinkError::Io(err)
            })
    }

    /// One round trip: send, then wait for the tagged response.
    async fn request(&self, request: Request, tag: Tag) -> Result<u16, LinkError> {
        // Held across the write so a concurrent caller cannot take our reply.
        let mut receiver = self.receivers[tag.index()].lock().await;
        self.send(request)?;
        match timeout(self.timing.response_timeout(), receiver.recv()).await {
            Ok(Some(value)) => {
                trace!(tag = %tag.as_char(), value, "Response received");
                Ok(value)
            }
            Ok(None) => Err(LinkError::Closed(tag.as_char())),
            Err(_) => {
                warn!(tag = %tag.as_char(), "Response not received");
                Err(LinkError::Timeout {
                    tag: tag.as_char(),
                    timeout_ms: self.timing.response_timeout().as_millis(),
                })
            }
        }
    }

    pub async fn read_address(&self) -> Result<u16, LinkError> {
        self.request(Request::Address, Tag::Address).await
    }

    pub async fn read_opcode(&self) -> Result<u8, LinkError> {
        self.request(Request::OpCode, Tag::OpCode).await.map(|v| v as u8)
    }

    pub async fn read_status(&self) -> Result<u8, LinkError> {
        self.request(Request::Status, Tag::Status).await.map(|v| v as u8)
    }

    pub async fn read_data(&self) -> Result<u8, LinkError> {
        self.request(Request::Data, Tag::Data).await.map(|v| v as u8)
    }

    pub async fn write_data(&self, byte: u8) -> Result<(), LinkError> {
        debug!(data = format_args!("{byte:#04X}"), "Sending data");
        match self.request(Request::WriteData(byte), Tag::WriteAck).await? {
            0 => Ok(()),
            code => Err(LinkError::Nak {
                tag: Tag::WriteAck.as_char(),
                code: code as u8,
            }),
        }
    }
}

impl LineSetter for SerialLink {
    fn set_lines(&self, word: ControlWord) -> Result<(), LinkError> {
        debug!(word = format_args!("{:012X}", word.bits()), "Setting control lines");
        self.send(Request::SetLines(word))
    }
}

impl Board for SerialLink {
    fn is_connected(&self) -> bool {
        self.connected()
    }

    fn read_status(&self) -> impl Future<Output = Result<u8, LinkError>> + Send {
        Self::read_status(self)
    }

    fn read_opcode(&self) -> impl Future<Output = Result<u8, LinkError>> + Send {
        Self::read_opcode(self)
    }

    fn read_address(&self) -> impl Future<Output = Result<u16, LinkError>> + Send {
        Self::read_address(self)
    }

    fn read_data(&self) -> impl Future<Output = Result<u8, LinkError>> + Send {
        Self::read_data(self)
    }

    fn write_data(&self, byte: u8) -> impl Future<Output = Result<(), LinkError>> + Send {
        Self::write_data(self, byte)
    }

    fn reconnect(&self) -> impl Future<Output = Result<(), LinkError>> + Send {
        self.connect(true)
    }

    fn reset(&self) -> impl Future<Output = ()> + Send {
        self.reset_channels()
    }
}

/// Runs until the port closes or a newer connection supersedes this one.
/// Reads time out periodically so a stale generation is noticed.
fn read_loop(mut reader: PortReader, shared: &Shared, generation: u64) {
    let mut demux = Demux::new();
    let mut buffer = [0u8; 100];
    let current = || shared.generation.load(Ordering::SeqCst) == generation;

    while current() {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(%err, "Serial read failed");
                break;
            }
        };
        // A reset may have landed while the read was blocked.
        if !current() {
            trace!(generation, dropped = read, "Dropping bytes from a superseded port");
            break;
        }
        for &byte in &buffer[..read] {
            let inbound = demux.push(byte);
            if inbound.is_some() && !current() {
                break;
            }
            match inbound {
                Some(Inbound::Response { tag, value }) => {
                    // The receiver lives as long as the link.
                    let _ = shared.responses[tag.index()].send(value);
                }
                Some(Inbound::Event(event)) => shared.sink.hardware(event),
                Some(Inbound::Unknown(byte)) => warn!(byte = format_args!("{byte:#04X}"), "Unknown byte"),
                None => {}
            }
        }
    }

    if current() {
        info!("Lost serial port");
        shared.transition(false);
    }
    trace!(generation, "Serial reader stopped");
}

#[cfg(test)]
mod tests;
