//! The event loop and the live CPU state it owns.
//!
//! One task runs [`EventLoop::run`] and is the only writer of the microcode
//! table, the editor cursor and the live snapshot. The serial reader, the
//! keyboard reader and the renderer talk to it through channels.

mod input;
mod view;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::editor::{ControlLineEditor, Edit};
use crate::error::LinkError;
use crate::memory::Memory;
use crate::microcode::{ControlWord, OpCodeTable, Phase};
use crate::notify::{FixedLevel, History, LogLevelControl, Notifier};
use crate::serial::{Board, EventSink, HardwareEvent};

pub use input::{Key, MemoryCursor};
pub use view::{Color, DrawOp, Frame, Page, Screen};

/// Link and interrupt line changes, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connected(bool),
    Irq(bool),
    Nmi(bool),
    Reset(bool),
}

/// Schedules ticks for clock edges.
pub trait TickSource {
    /// Returns `false` when the tick was dropped.
    fn trigger(&self, phase: Phase) -> bool;
}

/// Accepts a tick only while none is in flight. Dropped ticks are gone, not
/// queued, so a slow round trip never leaves a backlog of stale edges.
#[derive(Debug, Clone)]
pub struct Ticker {
    tx: mpsc::Sender<Phase>,
    busy: Arc<AtomicBool>,
}

impl Ticker {
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<Phase>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx,
                busy: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Marks the in-flight tick as finished.
    pub fn complete(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl TickSource for Ticker {
    fn trigger(&self, phase: Phase) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!(?phase, "Tick dropped");
            return false;
        }
        if self.tx.try_send(phase).is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }
}

/// At most one pending redraw. Requests made before it is taken merge, and
/// the merged request clears the screen if any of them asked to.
#[derive(Debug, Default)]
pub struct RedrawQueue {
    pending: Mutex<Option<bool>>,
    notify: Notify,
}

impl RedrawQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Option<bool> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Waits for the next redraw and returns its clear flag.
    pub async fn next(&self) -> bool {
        loop {
            if let Some(clear) = self.take() {
                return clear;
            }
            self.notify.notified().await;
        }
    }
}

impl Notifier for RedrawQueue {
    fn redraw(&self, clear: bool) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            *pending = Some(pending.unwrap_or(false) | clear);
        }
        self.notify.notify_one();
    }
}

/// Routes what the link reports into the event loop's channels.
pub struct Hub {
    status: mpsc::UnboundedSender<Status>,
    ticker: Ticker,
}

/// The event loop's ends of the [`Hub`] channels.
pub struct HubReceivers {
    pub status: mpsc::UnboundedReceiver<Status>,
    pub ticks: mpsc::Receiver<Phase>,
    pub ticker: Ticker,
}

impl Hub {
    #[must_use]
    pub fn new() -> (Self, HubReceivers) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ticker, ticks) = Ticker::new();
        (
            Self {
                status: status_tx,
                ticker: ticker.clone(),
            },
            HubReceivers {
                status: status_rx,
                ticks,
                ticker,
            },
        )
    }

    fn send(&self, status: Status) {
        // Only fails once the event loop is gone.
        let _ = self.status.send(status);
    }
}

impl EventSink for Hub {
    fn hardware(&self, event: HardwareEvent) {
        match event {
            HardwareEvent::Clock(high) => {
                self.ticker.trigger(Phase::from_level(high));
            }
            HardwareEvent::Irq(level) => self.send(Status::Irq(level)),
            HardwareEvent::Nmi(level) => self.send(Status::Nmi(level)),
            HardwareEvent::Reset(level) => self.send(Status::Reset(level)),
        }
    }

    fn connection(&self, connected: bool) {
        self.send(Status::Connected(connected));
    }
}

/// Paths and delays the driver needs at runtime.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub tick_settle: Duration,
    pub table_path: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            tick_settle: Duration::from_millis(50),
            table_path: PathBuf::from("microcode.json"),
            export_dir: PathBuf::from("."),
        }
    }
}

/// What the board last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveState {
    pub address: u16,
    /// Address of the last real instruction fetched.
    pub instruction_address: u16,
    pub op_code: Option<u8>,
    pub status: u8,
    pub step: u8,
    /// `N V Z C` nibble extracted from the status byte.
    pub flags: u8,
    pub phase: Phase,
    /// Line levels. The lines are active low.
    pub irq: bool,
    pub nmi: bool,
    pub reset: bool,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            address: 0,
            instruction_address: 0,
            op_code: None,
            status: 0,
            step: 0,
            flags: 0,
            phase: Phase::Phi1,
            irq: true,
            nmi: true,
            reset: true,
        }
    }
}

impl LiveState {
    fn set_status(&mut self, status: u8, phase: Phase) {
        self.status = status;
        self.step = status & 0x07;
        self.flags = ((status & 0xC0) >> 4) | ((status & 0x18) >> 3);
        self.phase = phase;
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bell {
    silenced: bool,
    pending: bool,
}

pub struct Driver<B> {
    board: Arc<B>,
    table: OpCodeTable,
    editor: ControlLineEditor,
    memory: Memory,
    history: Arc<History>,
    log_level: Arc<dyn LogLevelControl>,
    redraw: Arc<dyn Notifier>,
    settings: DriverSettings,
    live: LiveState,
    ignore_flags: bool,
    connected: bool,
    pages: Vec<Page>,
    bell: Bell,
    screen: (u16, u16),
}

impl<B: Board> Driver<B> {
    pub fn new(
        board: Arc<B>,
        table: OpCodeTable,
        memory: Memory,
        redraw: Arc<dyn Notifier>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            board,
            table,
            editor: ControlLineEditor::new(),
            memory,
            history: Arc::new(History::default()),
            log_level: Arc::new(FixedLevel),
            redraw,
            settings,
            live: LiveState::default(),
            ignore_flags: true,
            connected: false,
            pages: vec![Page::Dashboard],
            bell: Bell::default(),
            screen: (100, 40),
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<History>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_log_control(mut self, control: Arc<dyn LogLevelControl>) -> Self {
        self.log_level = control;
        self
    }

    #[must_use]
    pub const fn live(&self) -> &LiveState {
        &self.live
    }

    #[must_use]
    pub const fn table(&self) -> &OpCodeTable {
        &self.table
    }

    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    #[must_use]
    pub const fn editor(&self) -> &ControlLineEditor {
        &self.editor
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        self.pages.last().unwrap_or(&Page::Dashboard)
    }

    #[must_use]
    pub const fn ignores_flags(&self) -> bool {
        self.ignore_flags
    }

    #[must_use]
    pub const fn screen_size(&self) -> (u16, u16) {
        self.screen
    }

    /// Flags slot used for lookups and edits.
    const fn flags_slot(&self) -> u8 {
        if self.ignore_flags {
            0
        } else {
            self.live.flags
        }
    }

    /// Puts a message page on top of the view stack.
    pub fn show_error(&mut self, message: impl Into<String>) {
        self.pages.push(Page::Error(message.into()));
        self.redraw.redraw(true);
    }

    pub fn status(&mut self, status: Status) {
        match status {
            Status::Connected(connected) => {
                self.connected = connected;
                self.redraw.redraw(true);
                return;
            }
            Status::Irq(level) => self.live.irq = level,
            Status::Nmi(level) => self.live.nmi = level,
            Status::Reset(level) => self.live.reset = level,
        }
        self.redraw.redraw(false);
    }

    fn bind(&mut self, op_code: u8) {
        let oc = self.table.lookup(op_code);
        if self.live.op_code != Some(op_code) {
            self.live.op_code = Some(op_code);
            self.editor.bind(oc.steps);
        }
        if !oc.is_virtual {
            self.live.instruction_address = self.live.address;
        }
        debug!(op = %oc.name, "Loaded opcode");
    }

    fn set_address(&mut self, address: u16) {
        if self.live.address != address {
            self.live.address = address;
            debug!(address = format_args!("{address:#06X}"), "Address set");
        }
    }

    /// Gives up on the current tick and resynchronises the link.
    async fn abort(&self, what: &str, err: LinkError) {
        error!(%err, "{what}");
        self.board.reset().await;
    }

    /// One clock edge: drive the live cell's word and move the addressed byte.
    #[instrument(skip(self), level = "debug")]
    pub async fn tick(&mut self, phase: Phase) {
        match self.board.read_status().await {
            Ok(status) => self.live.set_status(status, phase),
            Err(err) => return self.abort("Failed to read status during tick", err).await,
        }

        if self.live.op_code.is_none() || (self.live.step == 0 && phase == Phase::Phi1) {
            match self.board.read_opcode().await {
                Ok(op_code) => self.bind(op_code),
                Err(err) => return self.abort("Failed to read opcode during tick", err).await,
            }
        }
        let Some(op_code) = self.live.op_code else {
            return;
        };

        let step = self.live.step;
        let oc = self.table.lookup(op_code);
        if step > oc.steps {
            error!(step, steps = oc.steps, "Invalid state");
            return;
        }
        let word = oc.word(self.flags_slot(), step, phase);
        if let Err(err) = self.board.set_lines(word) {
            return self.abort("Failed to set control lines", err).await;
        }

        tokio::time::sleep(self.settings.tick_settle).await;
        match self.board.read_address().await {
            Ok(address) => self.set_address(address),
            Err(err) => return self.abort("Failed to retrieve address", err).await,
        }

        let address = self.live.address;
        if phase == Phase::Phi1 || word.contains(ControlWord::DBRW) {
            let data = self.memory.read(address);
            if let Err(err) = self.board.write_data(data).await {
                return self.abort("Failed to send data during tick", err).await;
            }
        } else {
            match self.board.read_data().await {
                Ok(data) => self.memory.write(address, data),
                Err(err) => return self.abort("Failed to read data during tick", err).await,
            }
        }

        self.editor.follow(step, phase);
        trace!(step, flags = self.live.flags, ?phase, "Tick complete");
        self.redraw.redraw(false);
    }

    /// Pushes the live cell again when an edit changed it.
    fn push_if_live(&self, op_code: u8, flags: u8, edit: &Edit) {
        if !self.connected || !edit.touches(self.live.step, self.live.phase) {
            return;
        }
        let word = self.table.lookup(op_code).word(flags, self.live.step, self.live.phase);
        if let Err(err) = self.board.set_lines(word) {
            warn!(%err, "Failed to push edited lines");
        }
    }

    fn ring(&mut self) {
        if !self.bell.silenced {
            self.bell.pending = true;
            self.redraw.redraw(false);
        }
    }
}

/// Owns the driver and multiplexes every input into it.
pub struct EventLoop<B> {
    driver: Driver<B>,
    hub: HubReceivers,
    input: mpsc::Receiver<Key>,
    redraw: Arc<RedrawQueue>,
    frames: watch::Sender<Frame>,
    reconnect_every: Duration,
}

impl<B: Board + 'static> EventLoop<B> {
    pub const fn new(
        driver: Driver<B>,
        hub: HubReceivers,
        input: mpsc::Receiver<Key>,
        redraw: Arc<RedrawQueue>,
        frames: watch::Sender<Frame>,
        reconnect_every: Duration,
    ) -> Self {
        Self {
            driver,
            hub,
            input,
            redraw,
            frames,
            reconnect_every,
        }
    }

    /// Runs until the operator quits, the input closes or the renderer goes
    /// away. Returns the driver so callers can inspect the final state.
    pub async fn run(mut self) -> Driver<B> {
        let mut reconnect = tokio::time::interval(self.reconnect_every);
        reconnect.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Opening a port waits out the board's reset pulse, so attempts run
        // beside the loop instead of inside it.
        let mut reconnecting: Option<JoinHandle<Result<(), LinkError>>> = None;
        self.redraw.redraw(true);

        loop {
            tokio::select! {
                biased;
                Some(status) = self.hub.status.recv() => self.driver.status(status),
                Some(phase) = self.hub.ticks.recv() => {
                    self.driver.tick(phase).await;
                    self.hub.ticker.complete();
                }
                key = self.input.recv() => match key {
                    Some(key) => {
                        if self.driver.process(key) {
                            break;
                        }
                    }
                    None => break,
                },
                clear = self.redraw.next() => {
                    let (cols, rows) = self.driver.screen_size();
                    let mut frame = Frame::new(cols, rows);
                    let connected = self.driver.connected;
                    self.driver.draw(&mut frame, connected, clear);
                    if self.frames.send(frame).is_err() {
                        break;
                    }
                }
                _ = reconnect.tick(), if reconnecting.is_none() && !self.driver.board.is_connected() => {
                    let board = Arc::clone(&self.driver.board);
                    reconnecting = Some(tokio::spawn(async move { board.reconnect().await }));
                }
                // Failures are logged by the link at debug level.
                _ = join_attempt(&mut reconnecting), if reconnecting.is_some() => reconnecting = None,
            }
        }

        if let Some(attempt) = reconnecting {
            attempt.abort();
        }

        info!("Event loop stopped");
        self.driver
    }
}

async fn join_attempt(attempt: &mut Option<JoinHandle<Result<(), LinkError>>>) {
    match attempt {
        Some(handle) => {
            if let Err(err) = handle.await {
                warn!(%err, "Reconnect task failed");
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
