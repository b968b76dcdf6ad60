//! Watch command - keep the target in sync until a termination signal
//!
//! Wiring:
//! 1. a [`Teardown`] for the target, run by a drop guard, by the panic hook
//!    and explicitly once the live loop has stopped
//! 2. a signal task that cancels the shutdown token
//! 3. the [`OverlaySync`] live loop, printing every mutation
//!
//! The target is removed before the process exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use collectfs_core::config::Config;
use collectfs_sync::lifecycle::{install_panic_hook, shutdown_signal, Teardown};
use collectfs_sync::overlay::{OverlayOptions, OverlaySync};
use collectfs_sync::paths::check_destination;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::overlay_inputs;
use crate::output::{get_formatter, ConsoleObserver, OutputFormat};

pub async fn execute(config: &Config, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let (sources, target) = overlay_inputs(config)?;
    // Never arm a teardown that would delete part of a source
    let target = check_destination(&sources, &target)
        .await
        .with_context(|| format!("Refusing to sync into {}", target.display()))?;

    let teardown = Teardown::new(&target);
    let _guard = teardown.guard();
    install_panic_hook(teardown.clone());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let overlay = OverlaySync::new(sources, &target, OverlayOptions::from(&config.sync))
        .with_observer(Arc::new(ConsoleObserver::new(format)));

    formatter.info(&format!(
        "Watching {} source(s) into {} (Ctrl+C to stop)",
        config.sources.len(),
        target.display()
    ));

    let result = overlay
        .run(shutdown)
        .await
        .with_context(|| format!("Live sync into {} failed", target.display()));

    teardown.run();

    match result {
        Ok(stats) => {
            info!(handled = stats.handled, failed = stats.failed, "Watch stopped");
            formatter.success(&format!(
                "Stopped after {} event(s); removed {}",
                stats.handled + stats.failed,
                target.display()
            ));
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Watch exiting with error");
            Err(e)
        }
    }
}
