//! Process-wide cancellation tied to the interrupt signal.
//!
//! The listener only cancels the token. Deciding to exit the process is left
//! to the binary, after the interrupted operation has returned.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancellation context shared by every operation that can block.
#[derive(Debug)]
pub struct InterruptGuard {
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl InterruptGuard {
    /// Cancel when `signal` resolves.
    pub fn on<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                _ = signal => {
                    tracing::info!("Received interrupt, cancelling");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
        Self { token, listener }
    }

    /// Cancel on Ctrl+C (SIGINT).
    pub fn on_interrupt() -> Self {
        Self::on(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for interrupt signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Run `fut` unless `ctx` is cancelled first.
pub(crate) async fn or_cancelled<F, T>(ctx: &CancellationToken, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn signal_cancels_token() {
        let (tx, rx) = oneshot::channel::<()>();
        let guard = InterruptGuard::on(async move {
            let _ = rx.await;
        });
        assert!(!guard.is_interrupted());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), guard.token().cancelled())
            .await
            .expect("token should be cancelled");
        assert!(guard.is_interrupted());
    }

    #[tokio::test]
    async fn pending_work_is_abandoned_on_cancel() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let out = or_cancelled(&ctx, std::future::pending::<u32>()).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn completed_work_is_returned() {
        let ctx = CancellationToken::new();
        assert_eq!(or_cancelled(&ctx, async { 7 }).await, Some(7));
    }
}
