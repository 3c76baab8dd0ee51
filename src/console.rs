use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::warn;

/// What one poll of the host terminal produced.
pub enum ConsoleInput {
    /// A byte for the serial receive register.
    Byte(u8),
    /// The user asked to leave the emulator (Ctrl-]).
    Quit,
}

//Ctrl-] in its ASCII form.
const EXIT_BYTE: u8 = 0x1d;

/// Raw-mode guard around stdin/stdout.
///
/// Raw mode turns off echo, line buffering and signal generation, so
/// control characters (including Ctrl-C) travel in-band to the guest ROM;
/// only Ctrl-] is intercepted. The terminal is restored on drop. When stdin
/// is not a TTY the console stays in cooked mode and only output works,
/// which is enough to pipe programs through the emulator.
pub struct Console {
    raw: bool,
}

impl Console {
    pub fn new() -> Console {
        if !io::stdin().is_terminal() {
            warn!("stdin is not a terminal, running without raw mode");
            return Console { raw: false };
        }
        match enable_raw_mode() {
            Ok(()) => Console { raw: true },
            Err(e) => {
                warn!("could not enter raw mode: {}", e);
                Console { raw: false }
            }
        }
    }

    /// Non-blocking poll for one key, translated to the byte a serial
    /// terminal would have sent.
    pub fn poll(&mut self) -> Option<ConsoleInput> {
        if !self.raw {
            return None;
        }
        match event::poll(Duration::from_millis(0)) {
            Ok(true) => {}
            _ => return None,
        }
        let key = match event::read() {
            Ok(Event::Key(key @ KeyEvent { kind: KeyEventKind::Press, .. })) => key,
            _ => return None,
        };
        let byte = match key.code {
            KeyCode::Char(ch) if key.modifiers.contains(KeyModifiers::CONTROL) => {
                //Ctrl-A..Ctrl-_ fold onto 0x01..0x1f
                (ch.to_ascii_uppercase() as u8) & 0x1f
            }
            KeyCode::Char(ch) if ch.is_ascii() => ch as u8,
            KeyCode::Enter => b'\r',
            KeyCode::Backspace => 0x7f,
            KeyCode::Tab => b'\t',
            KeyCode::Esc => 0x1b,
            _ => return None,
        };
        if byte == EXIT_BYTE {
            return Some(ConsoleInput::Quit);
        }
        Some(ConsoleInput::Byte(byte))
    }

    /// Write one byte of guest output. The ROMs end lines with a bare CR,
    /// which the host terminal wants expanded to CR-LF.
    pub fn put_byte(&mut self, byte: u8) {
        let mut out = io::stdout();
        let _ = if byte == b'\r' {
            out.write_all(b"\r\n")
        } else {
            out.write_all(&[byte])
        };
        let _ = out.flush();
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        if self.raw {
            let _ = disable_raw_mode();
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
