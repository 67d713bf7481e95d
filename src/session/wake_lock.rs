//! Exclusive-execution resource
//!
//! Keeps the host awake for the duration of a session. On Linux this holds a
//! `systemd-inhibit` sleep lock, on macOS a `caffeinate` assertion. Both
//! helpers are started with the hold ceiling as their own lifetime, so the
//! inhibitor lapses even if the client dies without releasing it.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Resource held for the lifetime of one session
pub trait ExclusiveResource: Send {
    /// Take the resource for at most `max_hold`; no-op if already held
    fn acquire(&mut self, max_hold: Duration);

    /// Give the resource back; idempotent
    fn release(&mut self);

    /// Whether the resource is currently held
    fn is_held(&self) -> bool;
}

/// Sleep inhibitor backed by a platform helper process
#[derive(Debug, Default)]
pub struct WakeLock {
    held_since: Option<Instant>,
    helper: Option<Child>,
}

impl WakeLock {
    /// Create an unheld lock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How long the lock has been held
    #[must_use]
    pub fn held_for(&self) -> Option<Duration> {
        self.held_since.map(|since| since.elapsed())
    }
}

impl ExclusiveResource for WakeLock {
    fn acquire(&mut self, max_hold: Duration) {
        if self.held_since.is_some() {
            tracing::debug!("wake lock already held");
            return;
        }

        match inhibitor_command(max_hold) {
            Some(mut cmd) => match cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => {
                    tracing::debug!(pid = child.id(), "sleep inhibitor started");
                    self.helper = Some(child);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to start sleep inhibitor, continuing without it");
                }
            },
            None => tracing::debug!("no sleep inhibitor on this platform"),
        }

        self.held_since = Some(Instant::now());
        tracing::info!(max_hold_secs = max_hold.as_secs(), "wake lock acquired");
    }

    fn release(&mut self) {
        if let Some(mut child) = self.helper.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "sleep inhibitor already exited");
            }
            let _ = child.wait();
        }

        if let Some(held) = self.held_for() {
            self.held_since = None;
            tracing::info!(held_secs = held.as_secs(), "wake lock released");
        }
    }

    fn is_held(&self) -> bool {
        self.held_since.is_some()
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Helper command that inhibits sleep for `max_hold`
#[allow(clippy::unnecessary_wraps)]
fn inhibitor_command(max_hold: Duration) -> Option<Command> {
    let secs = max_hold.as_secs().max(1).to_string();

    #[cfg(target_os = "linux")]
    {
        let mut cmd = Command::new("systemd-inhibit");
        cmd.args([
            "--what=sleep:idle",
            "--who=vca",
            "--why=Voice session active",
            "--mode=block",
            "sleep",
            secs.as_str(),
        ]);
        Some(cmd)
    }

    #[cfg(target_os = "macos")]
    {
        let mut cmd = Command::new("caffeinate");
        cmd.args(["-i", "-t", secs.as_str()]);
        Some(cmd)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = secs;
        None
    }
}
