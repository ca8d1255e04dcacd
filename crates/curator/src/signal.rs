//! Process signal handling.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
///
/// Fails only if the signal handlers cannot be installed.
pub async fn shutdown_signal() -> std::io::Result<ShutdownReason> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|()| ShutdownReason::Interrupt),
            _ = terminate.recv() => Ok(ShutdownReason::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(ShutdownReason::Interrupt)
    }
}

/// Cancel `cancel` when a shutdown signal arrives.
///
/// The task exits quietly if the token is cancelled by someone else first.
pub fn cancel_on_signal(cancel: CancellationToken) -> JoinHandle<Option<ShutdownReason>> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => None,
            signal = shutdown_signal() => match signal {
                Ok(reason) => {
                    tracing::info!(?reason, "Shutdown signal received, cancelling run");
                    cancel.cancel();
                    Some(reason)
                }
                Err(e) => {
                    // Without handlers the run can still finish or time out.
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    None
                }
            },
        }
    })
}
