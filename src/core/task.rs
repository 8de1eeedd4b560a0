//! Handle to a background stage loop with bounded-time shutdown.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A spawned stage loop together with the token that stops it.
pub struct StageHandle {
    name: &'static str,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl StageHandle {
    /// Spawn `make_loop(token)` on the current runtime.
    pub fn spawn<F, Fut>(name: &'static str, make_loop: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(make_loop(cancel_token.clone()));
        Self {
            name,
            cancel_token,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and wait up to `timeout` for it to exit.
    ///
    /// A loop that overruns the timeout is aborted and a warning is logged;
    /// shutdown always proceeds.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel_token.cancel();

        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => info!(stage = self.name, "stage stopped"),
            Ok(Err(err)) => warn!(stage = self.name, "stage task ended abnormally: {err}"),
            Err(_) => {
                warn!(
                    stage = self.name,
                    "stage did not stop within {:?}, abandoning it", timeout
                );
                abort.abort();
            }
        }
    }
}
