use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel provisioning on SIGTERM or SIGINT.
///
/// `Provisioner::run` watches the returned token through every phase: the
/// Django pin lookup, the worker manager's `up` (its child process is killed)
/// and the in-flight bootstrap jobs.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                tracing::warn!(
                    signal,
                    "Cancelling provisioning: stopping worker manager and bootstrap jobs"
                );
                cancel.cancel();
            }
            // Without handlers the process just dies on a signal
            Err(e) => tracing::warn!(error = %e, "Failed to install signal handlers"),
        }
    });

    token
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
