use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::io::{self, IsTerminal};
use std::time::Duration;

/// Puts the terminal in raw mode for single-key input; restores it on drop,
/// including while unwinding.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// No-op when stdin is not a terminal.
    pub fn enable() -> Result<Self> {
        if !io::stdin().is_terminal() {
            return Ok(Self { active: false });
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { active: true })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

/// Keys that stop a capture. Raw mode swallows SIGINT, so Ctrl+C is a key here.
pub fn is_stop_key(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Why [`wait_for_stop`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Key,
    Requested(String),
}

/// Blocks until a stop key is pressed or something sends on `shutdown`.
pub fn wait_for_stop(shutdown: &Receiver<String>, read_keys: bool) -> Result<StopReason> {
    loop {
        if let Ok(reason) = shutdown.try_recv() {
            return Ok(StopReason::Requested(reason));
        }
        if read_keys {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if is_stop_key(&key) {
                        return Ok(StopReason::Key);
                    }
                }
            }
        } else if let Ok(reason) = shutdown.recv_timeout(Duration::from_millis(100)) {
            return Ok(StopReason::Requested(reason));
        }
    }
}
