//! Process shutdown signal.

use log::{error, info};

/// Resolves when the process receives SIGINT (ctrl-c) or, on unix, SIGTERM.
/// Each service's dispatcher loop selects on this so shutdown takes effect
/// between commands, never in the middle of one.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!("cannot install SIGTERM handler: {}", err);
                wait_ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = wait_ctrl_c() => {}
            _ = term.recv() => info!("SIGTERM received, shutting down"),
        }
    }
    #[cfg(not(unix))]
    wait_ctrl_c().await;
}

async fn wait_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("cannot listen for ctrl-c: {}", err);
        // Without a signal source the future must never resolve, or every
        // service would shut down immediately.
        std::future::pending::<()>().await;
    }
    info!("interrupt received, shutting down");
}
