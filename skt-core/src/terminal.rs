//! The interactive terminal menu.
//!
//! Raw, non-echoing, single-keystroke terminal input via `crossterm`
//! (already a dependency elsewhere in this workspace, e.g.
//! `sq/src/sq.rs`'s use of `crossterm::terminal`), driving the
//! paginated key menu to standard output.

use tokio::sync::mpsc;

use crate::engine::KeyHandle;
use crate::error::{Error, Result};

/// One keystroke, already decoded into the menu protocol's alphabet
/// Decoding happens once, at the terminal boundary, so the
/// session state machine never has to reason about raw key codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    /// `Ctrl-C`, `Ctrl-D`, `q`/`Q`, or `Esc`.
    Quit,
    /// `1`-`8`, already reduced to a zero-based offset into the
    /// current page (`0..=7`).
    Digit(u8),
    /// `9`: advance the pagination cursor.
    NextPage,
    /// `0`: reserved "send a file", not implemented. Accepted but
    /// deliberately inert.
    SendFile,
    /// Anything else; ignored.
    Other,
}

impl Keystroke {
    fn from_event(ev: crossterm::event::KeyEvent) -> Self {
        use crossterm::event::{KeyCode, KeyModifiers};

        if ev.modifiers.contains(KeyModifiers::CONTROL) {
            return match ev.code {
                KeyCode::Char('c') | KeyCode::Char('d') => Keystroke::Quit,
                _ => Keystroke::Other,
            };
        }
        match ev.code {
            KeyCode::Esc => Keystroke::Quit,
            KeyCode::Char('q') | KeyCode::Char('Q') => Keystroke::Quit,
            KeyCode::Char(c) if ('1'..='8').contains(&c) => Keystroke::Digit(c as u8 - b'1'),
            KeyCode::Char('9') => Keystroke::NextPage,
            KeyCode::Char('0') => Keystroke::SendFile,
            _ => Keystroke::Other,
        }
    }
}

/// A scoped acquisition of raw mode with guaranteed release:
/// `Drop` always restores the terminal, on every exit path including
/// an early return or a panic unwind.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn acquire() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()
            .map_err(|e| Error::TerminalUnavailable(e.to_string()))?;
        Ok(RawModeGuard { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Spawns a blocking reader task (`crossterm::event::read` blocks the
/// OS thread it runs on) that forwards decoded keystrokes over a
/// bounded channel, preserving arrival order (O4). The task exits
/// after forwarding a `Quit`, or when the receiver is dropped.
pub fn spawn_reader() -> (mpsc::Receiver<Keystroke>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::task::spawn_blocking(move || loop {
        match crossterm::event::read() {
            Ok(crossterm::event::Event::Key(ev)) => {
                let key = Keystroke::from_event(ev);
                if tx.blocking_send(key).is_err() {
                    break;
                }
                if key == Keystroke::Quit {
                    break;
                }
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    });
    (rx, handle)
}

/// Renders the current page of the Key Catalog.
/// `cursor` is the index of the first entry on the page.
pub fn render_menu(page: &[KeyHandle], cursor: usize, total: usize) {
    use std::io::Write as _;

    println!();
    if total == 0 {
        println!("(no secret keys found; waiting to receive instead)");
    } else {
        for (i, key) in page.iter().enumerate() {
            println!("  {}) {}  {}", i + 1, key.fingerprint, key.user_id);
        }
        println!(
            "  9) next page ({}-{} of {total})",
            cursor + 1,
            cursor + page.len()
        );
    }
    println!("  q) quit");
    print!("> ");
    let _ = std::io::stdout().flush();
}
