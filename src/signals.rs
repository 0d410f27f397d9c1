use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio::sync::oneshot;

/// Tell systemd (if any) that the webhook is accepting requests.
pub fn notify_ready() {
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);
}

/// What should we do when the user stops this program?
///
/// The returned future resolves on the first SIGINT or SIGTERM. A second
/// signal while requests are still draining exits immediately.
pub fn handle_shutdown() -> std::io::Result<impl std::future::Future<Output = ()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = oneshot::channel::<i32>();

    std::thread::spawn(move || {
        let mut forever = signals.forever();
        if let Some(signal) = forever.next() {
            let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
            let _ = tx.send(signal);
        }
        if let Some(signal) = forever.next() {
            log::warn!("Received signal {signal} again, exiting without draining");
            std::process::exit(1);
        }
    });

    Ok(async move {
        if let Ok(signal) = rx.await {
            log::info!("Received signal {signal}, server is shutting down...");
        }
    })
}
