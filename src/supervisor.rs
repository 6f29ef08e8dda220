use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause before a restart, so a loop that fails straight away does not spin.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Keeps the acquisition loop alive. `make_loop` builds a fresh loop each
/// time; if it returns or panics it is logged and started again after
/// `restart_delay`.
pub async fn supervise<F, Fut>(restart_delay: Duration, mut make_loop: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut starts: u32 = 0;
    loop {
        if starts == 0 {
            info!("{}", start_message(starts));
        } else {
            tokio::time::sleep(restart_delay).await;
            warn!(restarts = starts, "{}", start_message(starts));
        }
        starts = starts.saturating_add(1);

        match tokio::spawn(make_loop()).await {
            Ok(()) => warn!("Acquisition loop exited"),
            Err(e) if e.is_panic() => error!("Acquisition loop panicked: {e}"),
            Err(e) => error!("Acquisition loop cancelled: {e}"),
        }
    }
}

/// Log line for the `starts`-th start of the loop, counting from zero.
fn start_message(starts: u32) -> &'static str {
    if starts == 0 {
        "Starting up"
    } else {
        "Restarting acquisition loop after error"
    }
}
