use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel a token on the first SIGTERM or SIGINT.
///
/// The dispatcher, runners and the observer watch the returned token and
/// stop their loops cooperatively. Registering the signal streams happens
/// up front so a failure surfaces as a startup error.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let received = first_signal(sigterm, sigint).await;
        tracing::info!(signal = received, "Shutdown requested");
        cancel.cancel();
    });

    Ok(token)
}

async fn first_signal(mut sigterm: Signal, mut sigint: Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}
