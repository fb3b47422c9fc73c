#![allow(clippy::unwrap_used)]
use std::sync::Arc;
use std::time::Duration;

use common::TimingConfig;
use core_lib::driver::{Driver, DriverSettings, EventLoop, Frame, Hub, Key, Page, RedrawQueue};
use core_lib::memory::Memory;
use core_lib::microcode::{ControlWord, OpCodeTable, Phase};
use core_lib::serial::{HardwareEvent, SerialLink};
use core_lib::testing::SimBoard;
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
});

const ORIGIN: u16 = 0x0200;

fn timing() -> TimingConfig {
    TimingConfig {
        response_timeout_ms: 1_000,
        connect_settle_ms: 0,
        tick_settle_ms: 0,
        reconnect_interval_ms: 20,
        read_poll_ms: 5,
    }
}

struct Session {
    board: SimBoard,
    link: Arc<SerialLink>,
    keys: mpsc::Sender<Key>,
    frames: watch::Receiver<Frame>,
    handle: JoinHandle<Driver<SerialLink>>,
}

impl Session {
    /// Connects a fresh board with `rom` at the reset vector and starts the
    /// event loop.
    async fn start(rom: &[u8]) -> Self {
        Lazy::force(&TRACING);
        let board = SimBoard::new();
        board.update(|state| {
            state.opcode = rom[0];
            state.address = ORIGIN;
        });

        let (hub, receivers) = Hub::new();
        let link = Arc::new(SerialLink::new(
            Box::new(board.opener(Duration::from_millis(5))),
            Arc::new(hub),
            timing(),
        ));
        link.connect(false).await.unwrap();

        let mut memory = Memory::new();
        memory.load_image(rom, ORIGIN).unwrap();
        let redraw = Arc::new(RedrawQueue::new());
        let dir = std::env::temp_dir();
        let settings = DriverSettings {
            tick_settle: Duration::ZERO,
            table_path: dir.join("session-microcode.json"),
            export_dir: dir,
        };
        let driver = Driver::new(Arc::clone(&link), OpCodeTable::new(), memory, redraw.clone(), settings);

        let (keys, input) = mpsc::channel(8);
        let (frames_tx, frames) = watch::channel(Frame::default());
        let event_loop = EventLoop::new(driver, receivers, input, redraw, frames_tx, timing().reconnect_interval());
        let handle = tokio::spawn(event_loop.run());
        info!("Session started");

        Self {
            board,
            link,
            keys,
            frames,
            handle,
        }
    }

    async fn press(&self, key: Key) {
        self.keys.send(key).await.unwrap();
    }

    async fn quit(self) -> Driver<SerialLink> {
        self.press(Key::Char('q')).await;
        self.handle.await.unwrap()
    }

    fn screen_shows(&self, needle: &str) -> bool {
        self.frames.borrow().contains(needle)
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_clock_edge_drives_one_tick() {
    let session = Session::start(&[0xA9, 0x44]).await;

    session.board.emit(HardwareEvent::Clock(false));
    assert!(eventually(|| !session.board.snapshot().written.is_empty()).await);

    let state = session.board.snapshot();
    assert_eq!(state.requests, b"soLaD".to_vec());
    assert_eq!(state.written, vec![0xA9]);
    assert_eq!(
        state.lines,
        vec![OpCodeTable::builtin().lookup(0xA9).word(0, 0, Phase::Phi1)]
    );

    let driver = session.quit().await;
    assert_eq!(driver.live().op_code, Some(0xA9));
    assert_eq!(driver.live().address, ORIGIN);
}

#[tokio::test]
async fn test_edge_during_a_tick_is_dropped() {
    let session = Session::start(&[0xEA]).await;
    session.board.update(|state| state.mute = true);

    // the first tick waits on a status reply that never comes
    session.board.inject(b"cC");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(session.board.snapshot().requests, vec![b's']);
    session.quit().await;
}

#[tokio::test]
async fn test_lost_board_is_reconnected() {
    let session = Session::start(&[0xEA]).await;
    assert!(eventually(|| session.screen_shows(" CONNECTED")).await);

    session.board.unplug();
    assert!(eventually(|| session.board.opens() == 2).await);
    assert!(eventually(|| session.link.connected()).await);
    assert!(eventually(|| session.screen_shows(" CONNECTED")).await);

    session.board.emit(HardwareEvent::Clock(false));
    assert!(eventually(|| session.board.snapshot().written == vec![0xEA]).await);
    session.quit().await;
}

#[tokio::test]
async fn test_interrupt_levels_reach_the_dashboard() {
    let session = Session::start(&[0xEA]).await;
    session.board.emit(HardwareEvent::Irq(false));
    session.board.emit(HardwareEvent::Nmi(false));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let driver = session.quit().await;
    assert!(!driver.live().irq);
    assert!(!driver.live().nmi);
    assert!(driver.live().reset);
}

#[tokio::test]
async fn test_help_page_opens_and_closes() {
    let session = Session::start(&[0xEA]).await;

    session.press(Key::Char('h')).await;
    assert!(eventually(|| session.screen_shows("Press any key to return")).await);

    session.press(Key::Enter).await;
    assert!(eventually(|| session.screen_shows("Control Lines")).await);

    let driver = session.quit().await;
    assert_eq!(driver.page(), &Page::Dashboard);
}

#[tokio::test]
async fn test_edit_on_the_live_cell_reaches_the_board() {
    let session = Session::start(&[0xEA]).await;
    let stock = OpCodeTable::builtin().lookup(0xEA).word(0, 0, Phase::Phi1);
    assert!(stock.contains(ControlWord::AHD0));

    session.board.emit(HardwareEvent::Clock(false));
    assert!(eventually(|| session.board.snapshot().lines.len() == 1).await);

    // one step right of the timer reset line is AHD0, asserted in the stock NOP fetch
    session.press(Key::Right).await;
    session.press(Key::Char('0')).await;
    assert!(eventually(|| session.board.snapshot().lines.len() == 2).await);

    let board = session.board.clone();
    let driver = session.quit().await;
    let word = driver.table().lookup(0xEA).word(0, 0, Phase::Phi1);
    assert!(!word.contains(ControlWord::AHD0));
    assert_eq!(word, stock - ControlWord::AHD0);

    let state = board.snapshot();
    assert_eq!(state.lines, vec![stock, word]);
    assert_eq!(state.requests.last(), Some(&b'L'));
}
