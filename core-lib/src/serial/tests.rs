use super::*;
use crate::testing::SimBoard;
use pretty_assertions::assert_eq;
use test_case::test_case;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<HardwareEvent>>,
    edges: Mutex<Vec<bool>>,
}

impl Recorder {
    fn events(&self) -> Vec<HardwareEvent> {
        self.events.lock().unwrap().clone()
    }

    fn edges(&self) -> Vec<bool> {
        self.edges.lock().unwrap().clone()
    }
}

impl EventSink for Recorder {
    fn hardware(&self, event: HardwareEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn connection(&self, connected: bool) {
        self.edges.lock().unwrap().push(connected);
    }
}

fn timing() -> TimingConfig {
    TimingConfig {
        response_timeout_ms: 500,
        connect_settle_ms: 0,
        tick_settle_ms: 0,
        reconnect_interval_ms: 10,
        read_poll_ms: 5,
    }
}

fn link(board: &SimBoard) -> (SerialLink, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let link = SerialLink::new(
        Box::new(board.opener(Duration::from_millis(5))),
        recorder.clone(),
        timing(),
    );
    (link, recorder)
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn decode(bytes: &[u8]) -> Vec<Inbound> {
    let mut demux = Demux::new();
    bytes.iter().filter_map(|&byte| demux.push(byte)).collect()
}

#[test]
fn test_address_is_little_endian() {
    assert_eq!(
        decode(&[b'a', 0x34, 0x12]),
        vec![Inbound::Response {
            tag: Tag::Address,
            value: 0x1234
        }]
    );
}

#[test]
fn test_payload_bytes_are_never_events() {
    assert_eq!(
        decode(&[b'o', b'c', b'C']),
        vec![
            Inbound::Response {
                tag: Tag::OpCode,
                value: u16::from(b'c')
            },
            Inbound::Event(HardwareEvent::Clock(true)),
        ]
    );
}

#[test_case(b'c', Inbound::Event(HardwareEvent::Clock(false)))]
#[test_case(b'I', Inbound::Event(HardwareEvent::Irq(true)))]
#[test_case(b'n', Inbound::Event(HardwareEvent::Nmi(false)))]
#[test_case(b'R', Inbound::Event(HardwareEvent::Reset(true)))]
#[test_case(b'x', Inbound::Unknown(b'x'))]
fn test_untagged_bytes(byte: u8, expected: Inbound) {
    assert_eq!(decode(&[byte]), vec![expected]);
}

#[test]
fn test_cleared_demux_drops_partial_response() {
    let mut demux = Demux::new();
    assert_eq!(demux.push(b'a'), None);
    assert_eq!(demux.push(0x34), None);
    demux.clear();
    assert_eq!(demux.push(b'N'), Some(Inbound::Event(HardwareEvent::Nmi(true))));
}

#[test]
fn test_request_frames() {
    assert_eq!(Request::Status.encode(), b"s\n");
    assert_eq!(Request::WriteData(0x7F).encode(), vec![b'D', 0x7F, b'\n']);
    assert_eq!(
        Request::SetLines(ControlWord::CTMR | ControlWord::CENB).encode(),
        vec![b'L', 0x80, 0x00, 0x00, 0x00, 0x00, 0x01, b'\n']
    );
    assert_eq!(Request::SetLines(ControlWord::empty()).response(), None);
    assert_eq!(Request::WriteData(0).response(), Some(Tag::WriteAck));
}

#[tokio::test]
async fn test_read_address_round_trip() {
    let board = SimBoard::new();
    board.update(|state| state.address = 0x1234);
    let (link, _) = link(&board);

    link.connect(false).await.unwrap();
    assert_eq!(link.read_address().await.unwrap(), 0x1234);
    assert_eq!(board.snapshot().requests, vec![b'a']);
}

#[tokio::test]
async fn test_reads_fail_when_disconnected() {
    let board = SimBoard::new();
    let (link, _) = link(&board);
    assert!(matches!(link.read_status().await, Err(LinkError::NotConnected)));
    assert!(matches!(link.set_lines(ControlWord::empty()), Err(LinkError::NotConnected)));
}

#[tokio::test]
async fn test_connect_reports_one_edge_after_failures() {
    let board = SimBoard::new();
    board.fail_next_opens(2);
    let (link, recorder) = link(&board);

    assert!(link.connect(false).await.is_err());
    assert!(link.connect(true).await.is_err());
    assert!(recorder.edges().is_empty());

    link.connect(true).await.unwrap();
    assert!(link.connected());
    assert_eq!(recorder.edges(), vec![true]);
    assert_eq!(board.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_response_times_out() {
    let board = SimBoard::new();
    board.update(|state| state.mute = true);
    let (link, _) = link(&board);
    link.connect(false).await.unwrap();

    let err = link.read_status().await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout { tag: 's', timeout_ms: 500 }));
}

#[tokio::test]
async fn test_write_data_acknowledged_and_rejected() {
    let board = SimBoard::new();
    let (link, _) = link(&board);
    link.connect(false).await.unwrap();

    link.write_data(0x42).await.unwrap();
    board.update(|state| state.write_ack = 3);
    let err = link.write_data(0x43).await.unwrap_err();
    assert!(matches!(err, LinkError::Nak { tag: 'D', code: 3 }));
    assert_eq!(board.snapshot().written, vec![0x42, 0x43]);
}

#[tokio::test]
async fn test_set_lines_pushes_the_word() {
    let board = SimBoard::new();
    let (link, _) = link(&board);
    link.connect(false).await.unwrap();

    let word = ControlWord::DBRW | ControlWord::PCIN;
    link.set_lines(word).unwrap();
    assert!(eventually(|| !board.snapshot().lines.is_empty()).await);
    board.assert_lines(&[word]);
}

#[tokio::test]
async fn test_hardware_events_reach_the_sink() {
    let board = SimBoard::new();
    let (link, recorder) = link(&board);
    link.connect(false).await.unwrap();

    board.emit(HardwareEvent::Clock(true));
    board.emit(HardwareEvent::Irq(false));
    assert!(eventually(|| recorder.events().len() == 2).await);
    assert_eq!(
        recorder.events(),
        vec![HardwareEvent::Clock(true), HardwareEvent::Irq(false)]
    );
}

#[tokio::test]
async fn test_lost_port_is_reported_once() {
    let board = SimBoard::new();
    let (link, recorder) = link(&board);
    link.connect(false).await.unwrap();

    board.unplug();
    assert!(eventually(|| !link.connected()).await);
    assert_eq!(recorder.edges(), vec![true, false]);
}

#[tokio::test]
async fn test_reset_discards_stale_responses() {
    let board = SimBoard::new();
    let (link, recorder) = link(&board);
    link.connect(false).await.unwrap();

    // an answer nobody asked for
    board.inject(&[b's', 0x07]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    link.reset_channels().await;
    assert!(!link.connected());

    board.update(|state| state.status = 0x21);
    link.connect(true).await.unwrap();
    assert_eq!(link.read_status().await.unwrap(), 0x21);
    assert_eq!(recorder.edges(), vec![true, false, true]);
}

#[tokio::test]
async fn test_late_reply_on_a_reset_port_is_dropped() {
    let board = SimBoard::new();
    let recorder = Arc::new(Recorder::default());
    // The old reader sits in a long blocking read when the reset lands.
    let link = SerialLink::new(Box::new(board.opener(Duration::from_secs(1))), recorder, timing());
    link.connect(false).await.unwrap();
    link.reset_channels().await;

    assert!(board.inject(&[b's', 0x07]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    board.update(|state| state.status = 0x21);
    link.connect(true).await.unwrap();
    assert_eq!(link.read_status().await.unwrap(), 0x21);
}
