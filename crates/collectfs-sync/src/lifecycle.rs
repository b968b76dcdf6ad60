//! Lifecycle management
//!
//! The merged destination is a derived artifact; it must not outlive the
//! process that maintains it. This module provides the pieces the binary
//! wires together:
//!
//! - [`Teardown`]: one idempotent, synchronous, recursive removal of the
//!   destination
//! - [`TeardownGuard`]: runs the teardown when dropped (normal exit)
//! - [`install_panic_hook`]: runs the teardown on an uncaught panic
//! - [`shutdown_signal`]: cancels a token on SIGINT, SIGTERM, SIGUSR1 or
//!   SIGUSR2
//!
//! ## Design
//!
//! ```text
//!  signal ──→ shutdown_signal ──→ token.cancel()
//!                                     │
//!                           live loop stops intake
//!                                     │
//!                    Teardown::run (guard drop / explicit call)
//! ```
//!
//! Removal is best-effort: a process killed with SIGKILL leaves the
//! destination behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct TeardownState {
    destination: PathBuf,
    done: AtomicBool,
}

/// Removes the destination directory exactly once
///
/// Cloning shares the same state, so the signal path, the panic hook and
/// the drop guard can all hold a handle and only the first call acts.
#[derive(Debug, Clone)]
pub struct Teardown {
    state: Arc<TeardownState>,
}

impl Teardown {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(TeardownState {
                destination: destination.into(),
                done: AtomicBool::new(false),
            }),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.state.destination
    }

    /// Whether a teardown has already been performed
    pub fn has_run(&self) -> bool {
        self.state.done.load(Ordering::SeqCst)
    }

    /// Recursively delete the destination
    ///
    /// Returns `true` if this call performed the removal, `false` if an
    /// earlier call already did. A missing destination is success; any
    /// other failure is logged and swallowed.
    pub fn run(&self) -> bool {
        if self.state.done.swap(true, Ordering::SeqCst) {
            return false;
        }

        let destination = &self.state.destination;
        match std::fs::remove_dir_all(destination) {
            Ok(()) => info!(destination = %destination.display(), "Destination removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(destination = %destination.display(), "Destination already absent");
            }
            Err(e) => {
                warn!(destination = %destination.display(), error = %e, "Failed to remove destination");
            }
        }
        true
    }

    /// Guard that runs this teardown when dropped
    pub fn guard(&self) -> TeardownGuard {
        TeardownGuard {
            teardown: self.clone(),
        }
    }
}

/// Runs a [`Teardown`] on drop
#[derive(Debug)]
pub struct TeardownGuard {
    teardown: Teardown,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.teardown.run();
    }
}

/// Run `teardown` before the previously installed panic hook
pub fn install_panic_hook(teardown: Teardown) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        teardown.run();
        previous(panic_info);
    }));
}

/// Wait for a termination signal, then cancel `token`
///
/// On unix this listens for SIGINT, SIGTERM, SIGUSR1 and SIGUSR2; elsewhere
/// only for Ctrl+C. A handler that cannot be installed is logged and never
/// fires.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let others = async {
        use tokio::signal::unix::SignalKind;

        tokio::select! {
            name = unix_signal(SignalKind::terminate(), "SIGTERM") => name,
            name = unix_signal(SignalKind::user_defined1(), "SIGUSR1") => name,
            name = unix_signal(SignalKind::user_defined2(), "SIGUSR2") => name,
        }
    };

    #[cfg(not(unix))]
    let others = std::future::pending::<&'static str>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        name = others => {
            info!(signal = name, "Received termination signal");
        }
    }

    token.cancel();
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &'static str) -> &'static str {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
            name
        }
        Err(e) => {
            warn!(signal = name, error = %e, "Failed to install signal handler");
            std::future::pending().await
        }
    }
}
