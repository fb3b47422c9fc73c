//! The crossterm host: raw-mode screen, keyboard reader thread and the
//! renderer task that replays frames from the event loop.

use std::io::{self, Stdout, Write};
use std::thread;
use std::time::Duration;

use core_lib::driver::{Color, Frame, Key, Screen};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{self, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self as term, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// How often the keyboard thread checks whether the session is over.
const KEY_POLL: Duration = Duration::from_millis(200);

/// The terminal in raw mode on the alternate screen. Dropping it restores
/// the shell's screen.
pub struct Terminal {
    out: Stdout,
    /// First write failure since the last flush.
    failed: Option<io::Error>,
}

impl Terminal {
    pub fn enter() -> io::Result<Self> {
        term::enable_raw_mode()?;
        let mut out = io::stdout();
        if let Err(err) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = term::disable_raw_mode();
            return Err(err);
        }
        Ok(Self { out, failed: None })
    }

    fn record(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            self.failed.get_or_insert(err);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }
        self.out.flush()
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        let _ = term::disable_raw_mode();
    }
}

const fn color(color: Color) -> style::Color {
    match color {
        Color::Default => style::Color::Reset,
        Color::Grey => style::Color::DarkGrey,
        Color::White => style::Color::White,
        Color::Red => style::Color::DarkRed,
        Color::Green => style::Color::DarkGreen,
        Color::Yellow => style::Color::Yellow,
        Color::Blue => style::Color::Blue,
        Color::Magenta => style::Color::Magenta,
        Color::Cyan => style::Color::Cyan,
        Color::BrightRed => style::Color::Red,
        Color::BrightGreen => style::Color::Green,
    }
}

impl Screen for Terminal {
    fn size(&self) -> (u16, u16) {
        term::size().unwrap_or((80, 24))
    }

    fn clear(&mut self) {
        let result = queue!(self.out, term::Clear(ClearType::All));
        self.record(result);
    }

    fn print(&mut self, col: u16, row: u16, fg: Color, text: &str) {
        let result = queue!(
            self.out,
            MoveTo(col.saturating_sub(1), row.saturating_sub(1)),
            SetForegroundColor(color(fg)),
            Print(text),
            ResetColor
        );
        self.record(result);
    }

    fn cursor(&mut self, at: Option<(u16, u16)>) {
        let result = match at {
            Some((col, row)) => queue!(self.out, MoveTo(col.saturating_sub(1), row.saturating_sub(1)), Show),
            None => queue!(self.out, Hide),
        };
        self.record(result);
    }

    fn bell(&mut self) {
        let result = queue!(self.out, Print('\u{7}'));
        self.record(result);
    }
}

/// Maps a key press to the backend-neutral [`Key`].
pub fn map_key(code: KeyCode, modifiers: KeyModifiers) -> Key {
    match code {
        KeyCode::Char(ch) if modifiers.contains(KeyModifiers::CONTROL) => Key::Ctrl(ch.to_ascii_lowercase()),
        KeyCode::Char(ch) => Key::Char(ch),
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Backspace | KeyCode::Delete => Key::Backspace,
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Escape,
        _ => Key::Other,
    }
}

/// Reads keys on a dedicated thread until the event loop drops its receiver.
pub fn spawn_keyboard(keys: mpsc::Sender<Key>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("keyboard".into()).spawn(move || loop {
        match event::poll(KEY_POLL) {
            Ok(true) => {}
            Ok(false) if keys.is_closed() => break,
            Ok(false) => continue,
            Err(err) => {
                warn!(%err, "Keyboard poll failed");
                break;
            }
        }
        let key = match event::read() {
            Ok(Event::Key(press)) if press.kind == KeyEventKind::Press => map_key(press.code, press.modifiers),
            Ok(Event::Resize(cols, rows)) => Key::Resize(cols, rows),
            Ok(_) => continue,
            Err(err) => {
                warn!(%err, "Keyboard read failed");
                break;
            }
        };
        if keys.blocking_send(key).is_err() {
            break;
        }
    })
}

/// Replays every new frame until the event loop drops its sender.
pub fn spawn_renderer(mut screen: Terminal, mut frames: watch::Receiver<Frame>) -> JoinHandle<io::Result<()>> {
    tokio::spawn(async move {
        while frames.changed().await.is_ok() {
            let frame = frames.borrow_and_update().clone();
            frame.replay(&mut screen);
            screen.flush()?;
        }
        Ok(())
    })
}
