//! OS shutdown signal handling.

use std::io;

/// Waits for an OS shutdown signal.
///
/// On Unix systems this waits for SIGTERM or SIGINT; elsewhere only for
/// Ctrl+C. Fails if the signal handlers cannot be registered.
pub async fn wait_for_os_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}
