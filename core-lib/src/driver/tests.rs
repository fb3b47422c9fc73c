use std::future::{ready, Future};
use std::sync::MutexGuard;

use super::*;
use crate::editor::{Direction, SetMode};
use crate::notify::History;
use crate::serial::LineSetter;
use pretty_assertions::assert_eq;
use tracing::Level;

#[derive(Default)]
struct Stub {
    status: u8,
    opcode: u8,
    address: u16,
    data: u8,
    fail_status: bool,
    connected: bool,
    lines: Vec<ControlWord>,
    written: Vec<u8>,
    resets: usize,
    reconnects: usize,
    reconnect_delay: Duration,
}

#[derive(Default)]
struct StubBoard(Mutex<Stub>);

impl StubBoard {
    fn state(&self) -> MutexGuard<'_, Stub> {
        self.0.lock().unwrap()
    }
}

impl LineSetter for StubBoard {
    fn set_lines(&self, word: ControlWord) -> Result<(), LinkError> {
        self.state().lines.push(word);
        Ok(())
    }
}

impl Board for StubBoard {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn read_status(&self) -> impl Future<Output = Result<u8, LinkError>> + Send {
        let state = self.state();
        ready(if state.fail_status {
            Err(LinkError::Timeout {
                tag: 's',
                timeout_ms: 5,
            })
        } else {
            Ok(state.status)
        })
    }

    fn read_opcode(&self) -> impl Future<Output = Result<u8, LinkError>> + Send {
        ready(Ok(self.state().opcode))
    }

    fn read_address(&self) -> impl Future<Output = Result<u16, LinkError>> + Send {
        ready(Ok(self.state().address))
    }

    fn read_data(&self) -> impl Future<Output = Result<u8, LinkError>> + Send {
        ready(Ok(self.state().data))
    }

    fn write_data(&self, byte: u8) -> impl Future<Output = Result<(), LinkError>> + Send {
        self.state().written.push(byte);
        ready(Ok(()))
    }

    fn reconnect(&self) -> impl Future<Output = Result<(), LinkError>> + Send {
        let delay = {
            let mut stub = self.state();
            stub.reconnects += 1;
            stub.reconnect_delay
        };
        async move {
            tokio::time::sleep(delay).await;
            self.state().connected = true;
            Ok(())
        }
    }

    fn reset(&self) -> impl Future<Output = ()> + Send {
        self.state().resets += 1;
        ready(())
    }
}

#[derive(Default)]
struct Redraws(Mutex<Vec<bool>>);

impl Notifier for Redraws {
    fn redraw(&self, clear: bool) {
        self.0.lock().unwrap().push(clear);
    }
}

fn settings(dir: &std::path::Path) -> DriverSettings {
    DriverSettings {
        tick_settle: Duration::ZERO,
        table_path: dir.join("microcode.json"),
        export_dir: dir.to_path_buf(),
    }
}

fn driver_with(board: &Arc<StubBoard>, table: OpCodeTable) -> (Driver<StubBoard>, Arc<Redraws>) {
    let redraws = Arc::new(Redraws::default());
    let driver = Driver::new(
        Arc::clone(board),
        table,
        Memory::new(),
        redraws.clone(),
        settings(&std::env::temp_dir()),
    );
    (driver, redraws)
}

fn driver(board: &Arc<StubBoard>) -> (Driver<StubBoard>, Arc<Redraws>) {
    driver_with(board, OpCodeTable::new())
}

fn nop_board() -> Arc<StubBoard> {
    let board = Arc::new(StubBoard::default());
    {
        let mut state = board.state();
        state.opcode = 0xEA;
        state.address = 0x0200;
        state.connected = true;
    }
    board
}

#[tokio::test]
async fn test_second_trigger_is_dropped_while_busy() {
    let (ticker, mut ticks) = Ticker::new();
    assert!(ticker.trigger(Phase::Phi1));
    assert!(!ticker.trigger(Phase::Phi2));

    assert_eq!(ticks.try_recv().unwrap(), Phase::Phi1);
    assert!(ticks.try_recv().is_err());

    ticker.complete();
    assert!(ticker.trigger(Phase::Phi2));
    assert_eq!(ticks.recv().await, Some(Phase::Phi2));
}

#[tokio::test]
async fn test_redraw_requests_merge() {
    let queue = RedrawQueue::new();
    queue.redraw(false);
    queue.redraw(true);
    queue.redraw(false);
    assert_eq!(queue.take(), Some(true));
    assert_eq!(queue.take(), None);

    queue.redraw(false);
    assert!(!queue.next().await);
}

#[test]
fn test_hub_routes_clock_edges_and_line_levels() {
    let (hub, mut rx) = Hub::new();
    hub.hardware(HardwareEvent::Clock(true));
    hub.hardware(HardwareEvent::Irq(false));
    hub.connection(true);

    assert_eq!(rx.ticks.try_recv().unwrap(), Phase::Phi2);
    assert_eq!(rx.status.try_recv().unwrap(), Status::Irq(false));
    assert_eq!(rx.status.try_recv().unwrap(), Status::Connected(true));
}

#[tokio::test]
async fn test_tick_binds_opcode_and_pushes_the_live_word() {
    let board = nop_board();
    let (mut driver, redraws) = driver(&board);
    driver.memory.write(0x0200, 0xEA);

    driver.tick(Phase::Phi1).await;

    let expected = driver.table().lookup(0xEA).word(0, 0, Phase::Phi1);
    let state = board.state();
    assert_eq!(state.lines, vec![expected]);
    assert_eq!(state.written, vec![0xEA]);
    assert_eq!(driver.live().op_code, Some(0xEA));
    assert_eq!(driver.live().address, 0x0200);
    assert_eq!(redraws.0.lock().unwrap().last(), Some(&false));
}

#[tokio::test]
async fn test_phase_two_reads_back_when_the_board_writes() {
    let mut table = OpCodeTable::new();
    ControlLineEditor::set_line(table.lookup_mut(0xEA), 0, 0, Phase::Phi2, 36, SetMode::Clear).unwrap();
    let board = nop_board();
    {
        let mut state = board.state();
        state.address = 0x3000;
        state.data = 0x5A;
    }
    let (mut driver, _) = driver_with(&board, table);

    driver.tick(Phase::Phi1).await;
    driver.tick(Phase::Phi2).await;

    assert_eq!(driver.memory().read(0x3000), 0x5A);
    assert_eq!(board.state().written.len(), 1);
    assert_eq!(driver.editor().cursor().row(), 1);
}

#[tokio::test]
async fn test_failed_status_read_resets_the_link() {
    let board = nop_board();
    board.state().fail_status = true;
    let (mut driver, _) = driver(&board);

    driver.tick(Phase::Phi1).await;

    let state = board.state();
    assert_eq!(state.resets, 1);
    assert!(state.lines.is_empty());
    assert_eq!(driver.live().op_code, None);
}

#[tokio::test]
async fn test_step_past_the_end_is_skipped() {
    let board = nop_board();
    board.state().status = 0x05;
    let (mut driver, _) = driver(&board);

    driver.tick(Phase::Phi2).await;

    let state = board.state();
    assert!(state.lines.is_empty());
    assert_eq!(state.resets, 0);
    assert_eq!(driver.live().step, 5);
}

#[tokio::test]
async fn test_flags_dimension_follows_the_f_key() {
    let board = nop_board();
    board.state().status = 0b1100_1000;
    let (mut driver, _) = driver(&board);

    driver.tick(Phase::Phi1).await;
    assert_eq!(driver.live().flags, 0b1101);
    assert_eq!(board.state().lines[0], driver.table().lookup(0xEA).word(0, 0, Phase::Phi1));

    assert!(!driver.process(Key::Char('f')));
    assert!(!driver.ignores_flags());
    driver.tick(Phase::Phi1).await;
    assert_eq!(board.state().lines[1], driver.table().lookup(0xEA).word(0b1101, 0, Phase::Phi1));
}

#[tokio::test]
async fn test_edit_on_the_live_cell_is_pushed() {
    let board = nop_board();
    let (mut driver, _) = driver(&board);
    driver.status(Status::Connected(true));
    driver.tick(Phase::Phi1).await;

    driver.process(Key::Right);
    driver.process(Key::Char('1'));

    let word = driver.table().lookup(0xEA).word(0, 0, Phase::Phi1);
    assert!(word.contains(ControlWord::AHD0));
    let state = board.state();
    assert_eq!(state.lines.len(), 2);
    assert_eq!(state.lines[1], word);
}

#[tokio::test]
async fn test_edit_on_another_cell_is_not_pushed() {
    let board = nop_board();
    let (mut driver, _) = driver(&board);
    driver.status(Status::Connected(true));
    driver.tick(Phase::Phi1).await;

    driver.process(Key::Down);
    driver.process(Key::Right);
    driver.process(Key::Char(' '));

    assert_ne!(
        driver.table().lookup(0xEA).word(0, 0, Phase::Phi2),
        driver.table().lookup(0xEA).preset(0, 0, Phase::Phi2)
    );
    assert_eq!(board.state().lines.len(), 1);
}

#[tokio::test]
async fn test_rejected_edit_rings_and_changes_nothing() {
    let board = nop_board();
    let (mut driver, _) = driver(&board);
    driver.tick(Phase::Phi1).await;
    let before = driver.table().clone();

    // the cursor starts on the timer reset line
    driver.process(Key::Char('1'));

    assert_eq!(driver.table(), &before);
    let mut frame = Frame::new(120, 60);
    driver.draw(&mut frame, true, false);
    assert!(frame.ops().contains(&DrawOp::Bell));
}

#[test]
fn test_pages_stack_and_quit() {
    let board = nop_board();
    let (mut driver, _) = driver(&board);

    assert!(!driver.process(Key::Char('h')));
    assert_eq!(driver.page(), &Page::Help);
    assert!(!driver.process(Key::Char('x')));
    assert_eq!(driver.page(), &Page::Dashboard);

    assert!(!driver.process(Key::Char('z')));
    assert!(driver.process(Key::Char('q')));
}

#[test]
fn test_error_page_stays_until_a_key() {
    let board = nop_board();
    let (mut driver, _) = driver(&board);
    driver.show_error("Port vanished");

    let mut frame = Frame::new(80, 24);
    driver.draw(&mut frame, false, true);
    assert_eq!(frame.row_text(3), "Port vanished");
    assert_eq!(frame.ops()[0], DrawOp::Clear);

    assert!(!driver.process(Key::Enter));
    assert_eq!(driver.page(), &Page::Dashboard);
}

#[test]
fn test_history_page_scrolls_and_clears() {
    let history = Arc::new(History::default());
    for index in 0..5 {
        history.push(Level::INFO, format!("note {index}"));
    }
    let board = nop_board();
    let (driver, _) = driver(&board);
    let mut driver = driver.with_history(Arc::clone(&history));

    driver.process(Key::Resize(80, 5));
    driver.process(Key::Char('l'));
    assert_eq!(driver.page(), &Page::History { offset: 0 });

    driver.process(Key::Down);
    assert_eq!(driver.page(), &Page::History { offset: 1 });
    driver.process(Key::Char('a'));
    assert_eq!(driver.page(), &Page::History { offset: 3 });
    driver.process(Key::Char('q'));
    assert_eq!(driver.page(), &Page::History { offset: 1 });

    let mut frame = Frame::new(80, 5);
    driver.draw(&mut frame, true, true);
    assert_eq!(frame.row_text(2), "note 3");

    driver.process(Key::Char('c'));
    assert!(history.is_empty());
    assert_eq!(driver.page(), &Page::History { offset: 0 });

    driver.process(Key::Escape);
    assert_eq!(driver.page(), &Page::Dashboard);
}

#[test]
fn test_save_and_export_keys_write_files() {
    let dir = tempfile::tempdir().unwrap();
    let board = nop_board();
    let redraws = Arc::new(Redraws::default());
    let mut driver = Driver::new(board, OpCodeTable::new(), Memory::new(), redraws, settings(dir.path()));

    driver.process(Key::Char('w'));
    driver.process(Key::Char('e'));

    assert!(dir.path().join("microcode.json").exists());
    for name in ["microcode0.bin", "microcode1.bin", "microcode2.bin"] {
        assert!(dir.path().join(name).exists(), "{name}");
    }
    assert_eq!(driver.page(), &Page::Dashboard);
}

#[tokio::test]
async fn test_dashboard_shows_the_bound_opcode() {
    let board = nop_board();
    let (mut driver, _) = driver(&board);
    driver.tick(Phase::Phi1).await;

    let mut frame = Frame::new(120, 60);
    driver.draw(&mut frame, true, true);

    assert!(frame.row_text(1).starts_with(" CONNECTED"));
    assert!(frame.contains("NOP (EA)"));
    assert!(frame.contains("Control Lines (Ignoring flags)"));
    assert!(frame.row_text(view::MATRIX_ROW).starts_with("T2"));
    assert!(frame
        .ops()
        .iter()
        .any(|op| matches!(op, DrawOp::Cursor(Some(_)))));
}

#[tokio::test]
async fn test_event_loop_runs_ticks_before_quitting() {
    let board = nop_board();
    let redraw = Arc::new(RedrawQueue::new());
    let driver = Driver::new(
        Arc::clone(&board),
        OpCodeTable::new(),
        Memory::new(),
        redraw.clone(),
        settings(&std::env::temp_dir()),
    );
    let (hub, receivers) = Hub::new();
    let (keys, input) = mpsc::channel(8);
    let (frames, _frame_rx) = watch::channel(Frame::default());

    hub.connection(true);
    hub.hardware(HardwareEvent::Clock(false));
    keys.send(Key::Char('q')).await.unwrap();

    let event_loop = EventLoop::new(driver, receivers, input, redraw, frames, Duration::from_millis(10));
    let driver = event_loop.run().await;

    assert_eq!(driver.live().op_code, Some(0xEA));
    assert_eq!(board.state().lines.len(), 1);
}

#[tokio::test]
async fn test_keys_are_served_while_a_reconnect_is_pending() {
    let board = Arc::new(StubBoard::default());
    board.state().reconnect_delay = Duration::from_secs(30);
    let redraw = Arc::new(RedrawQueue::new());
    let driver = Driver::new(
        Arc::clone(&board),
        OpCodeTable::new(),
        Memory::new(),
        redraw.clone(),
        settings(&std::env::temp_dir()),
    );
    let (_hub, receivers) = Hub::new();
    let (keys, input) = mpsc::channel(8);
    let (frames, _frame_rx) = watch::channel(Frame::default());

    let event_loop = EventLoop::new(driver, receivers, input, redraw, frames, Duration::from_millis(5));
    let handle = tokio::spawn(event_loop.run());

    for _ in 0..100 {
        if board.state().reconnects > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(board.state().reconnects, 1);

    keys.send(Key::Char('h')).await.unwrap();
    keys.send(Key::Char('q')).await.unwrap();
    keys.send(Key::Char('q')).await.unwrap();
    let driver = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("event loop stalled behind the reconnect")
        .unwrap();

    assert_eq!(driver.page(), &Page::Dashboard);
    assert_eq!(board.state().reconnects, 1);
    assert!(!board.state().connected);
}

fn rom_driver(dir: &std::path::Path) -> (Arc<StubBoard>, Driver<StubBoard>) {
    let rom = dir.join("blink.bin");
    std::fs::write(&rom, [0xA9, 0x44, 0xEA]).unwrap();
    let mut memory = Memory::new();
    memory.load_rom(&rom, 0x8000).unwrap();

    let board = nop_board();
    board.state().address = 0x8000;
    let driver = Driver::new(
        Arc::clone(&board),
        OpCodeTable::new(),
        memory,
        Arc::new(Redraws::default()),
        settings(dir),
    );
    (board, driver)
}

#[test]
fn test_memory_cursor_stays_inside_its_block() {
    let mut cursor = MemoryCursor::new(0x8000);
    assert!(!cursor.step(Direction::Up));
    assert!(!cursor.step(Direction::Left));
    assert!(cursor.step(Direction::Down));
    assert_eq!(cursor.address, 0x8010);

    let mut cursor = MemoryCursor::new(0x80FF);
    assert!(!cursor.step(Direction::Down));
    assert!(!cursor.step(Direction::Right));
    assert_eq!(cursor.base(), 0x8000);
}

#[tokio::test]
async fn test_memory_page_edits_and_undoes_a_byte() {
    let dir = tempfile::tempdir().unwrap();
    let (_board, mut driver) = rom_driver(dir.path());
    driver.tick(Phase::Phi1).await;

    driver.process(Key::Char('m'));
    assert_eq!(driver.page(), &Page::Memory(MemoryCursor::new(0x8000)));

    for key in [Key::Right, Key::Enter, Key::Char('7'), Key::Char('f')] {
        assert!(!driver.process(key));
    }
    assert_eq!(driver.memory().read(0x8001), 0x7F);
    assert_eq!(driver.page(), &Page::Memory(MemoryCursor::new(0x8001)));

    driver.process(Key::Ctrl('z'));
    assert_eq!(driver.memory().read(0x8001), 0x44);
    assert!(!driver.bell.pending);

    driver.process(Key::Ctrl('z'));
    assert!(driver.bell.pending);

    driver.process(Key::Escape);
    assert_eq!(driver.page(), &Page::Dashboard);
}

#[tokio::test]
async fn test_escape_abandons_a_half_typed_byte() {
    let dir = tempfile::tempdir().unwrap();
    let (_board, mut driver) = rom_driver(dir.path());
    driver.tick(Phase::Phi1).await;

    driver.process(Key::Char('m'));
    driver.process(Key::Backspace);
    driver.process(Key::Char('5'));
    let Page::Memory(cursor) = driver.page() else {
        panic!("memory page closed");
    };
    assert_eq!(cursor.input.as_deref(), Some("5"));

    driver.process(Key::Char('x'));
    assert!(driver.bell.pending);

    driver.process(Key::Escape);
    assert_eq!(driver.page(), &Page::Memory(MemoryCursor::new(0x8000)));
    assert_eq!(driver.memory().read(0x8000), 0xA9);
}

#[tokio::test]
async fn test_breakpoint_key_marks_and_saves_the_instruction() {
    let dir = tempfile::tempdir().unwrap();
    let (_board, mut driver) = rom_driver(dir.path());
    driver.tick(Phase::Phi1).await;

    // the cursor lands on the immediate operand of LDA
    for key in [Key::Char('m'), Key::Right, Key::Char('b')] {
        driver.process(key);
    }
    assert!(driver.memory().is_breakpoint(0x8000));
    assert_eq!(std::fs::read(dir.path().join(".blink.bp")).unwrap(), vec![0x00, 0x80]);

    let mut frame = Frame::new(120, 40);
    driver.draw(&mut frame, true, true);
    assert!(frame.contains("Memory $8000"));
    assert!(frame.contains("Break points: $8000"));
    assert!(frame.contains("$8001  $8000: LDA #$44"));
}
