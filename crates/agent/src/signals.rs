//! Process signals mapped onto the agent's two stop controls.
//!
//! SIGUSR1 asks for a graceful shutdown (finish the current job, fetch no more),
//! SIGTERM and SIGINT ask for immediate termination of the running module.

use libc::c_int;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

extern "C" fn on_shutdown(_: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_terminate(_: c_int) {
    TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
}

/// Stop controls observed by the agent loop and the running module.
///
/// Terminating implies shutting down: `shutdown` is a child of `terminate`.
#[derive(Debug, Clone)]
pub struct Controls {
    pub terminate: CancellationToken,
    pub shutdown: CancellationToken,
}

impl Controls {
    pub fn new() -> Self {
        let terminate = CancellationToken::new();
        let shutdown = terminate.child_token();
        Self { terminate, shutdown }
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}

/// Installed signal handlers; the previous handlers come back when this is dropped.
pub struct SignalGuard {
    previous: Vec<(c_int, libc::sigaction)>,
}

impl SignalGuard {
    pub fn install() -> io::Result<Self> {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        TERMINATE_REQUESTED.store(false, Ordering::SeqCst);
        let mut guard = SignalGuard { previous: Vec::with_capacity(3) };
        let handlers: [(c_int, extern "C" fn(c_int)); 3] =
            [(libc::SIGUSR1, on_shutdown), (libc::SIGTERM, on_terminate), (libc::SIGINT, on_terminate)];
        for (signum, handler) in handlers {
            // on error the guard drops here and restores what was already replaced
            let old = set_handler(signum, handler as libc::sighandler_t)?;
            guard.previous.push((signum, old));
        }
        Ok(guard)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for (signum, old) in self.previous.drain(..).rev() {
            // SAFETY: restoring a sigaction previously returned by the kernel
            unsafe {
                libc::sigaction(signum, &old, std::ptr::null_mut());
            }
        }
    }
}

fn set_handler(signum: c_int, handler: libc::sighandler_t) -> io::Result<libc::sigaction> {
    // SAFETY: the handlers only store to atomics, which is async-signal-safe
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        let mut old: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signum, &action, &mut old) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(old)
    }
}

/// Turn received signals into cancellations until `done` fires.
pub async fn forward_signals(controls: Controls, done: CancellationToken) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if TERMINATE_REQUESTED.swap(false, Ordering::SeqCst) {
            info!("terminate requested");
            controls.terminate.cancel();
        }
        if SHUTDOWN_REQUESTED.swap(false, Ordering::SeqCst) {
            info!("shutdown requested");
            controls.shutdown.cancel();
        }
    }
}

/// Run `fut` with signal handlers installed and forwarded to `controls`.
pub async fn with_signals<F: std::future::Future>(controls: &Controls, fut: F) -> io::Result<F::Output> {
    let _guard = SignalGuard::install()?;
    let done = CancellationToken::new();
    let forwarder = tokio::spawn(forward_signals(controls.clone(), done.clone()));
    let out = fut.await;
    done.cancel();
    let _ = forwarder.await;
    Ok(out)
}

/// Send `signum` to another process, as `agent --shutdown/--terminate` does.
pub fn send_signal(pid: i32, signum: c_int) -> io::Result<()> {
    // SAFETY: kill(2) has no memory safety preconditions
    if unsafe { libc::kill(pid, signum) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
