//! Supervised background tasks.

use std::future::Future;

/// Spawn `fut` and watch it from a second task.
///
/// A panic inside `fut` is caught at the join point and logged; it never
/// reaches the caller or any other connection.
pub(crate) fn spawn_supervised<F>(task: &'static str, owner: u64, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(task, owner, error = %e, "Task panicked");
            } else {
                tracing::debug!(task, owner, "Task cancelled");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn panic_is_contained() {
        spawn_supervised("boom", 1, async {
            panic!("boom");
        });

        let (tx, rx) = oneshot::channel();
        spawn_supervised("ok", 2, async move {
            let _ = tx.send(7);
        });

        let value = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(value, 7);
    }
}
