// Dispatch Handle
//
// Observable completion of one background dispatch. The handle can be
// cloned, awaited any number of times, polled, or dropped; dropping it
// does not cancel the dispatch.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use tokio::sync::watch;

use super::DispatchError;
use crate::log::BucketRevision;

#[derive(Debug, Clone)]
enum DispatchState {
    Pending,
    Done(Result<(), DispatchError>),
}

/// In-flight dispatch of one commit.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    bucket_revision: BucketRevision,
    rx: watch::Receiver<DispatchState>,
}

/// Sending half, owned by the dispatch task.
pub(crate) struct DispatchReporter {
    tx: watch::Sender<DispatchState>,
}

impl DispatchReporter {
    pub fn finish(self, outcome: Result<(), DispatchError>) {
        self.tx.send_replace(DispatchState::Done(outcome));
    }
}

impl DispatchHandle {
    pub(crate) fn pending(bucket_revision: BucketRevision) -> (Self, DispatchReporter) {
        let (tx, rx) = watch::channel(DispatchState::Pending);
        (Self { bucket_revision, rx }, DispatchReporter { tx })
    }

    /// Bucket revision of the commit being dispatched.
    pub fn bucket_revision(&self) -> BucketRevision {
        self.bucket_revision
    }

    /// Wait for the dispatch to finish and return its outcome.
    ///
    /// A failed dispatch yields the same error on every call.
    pub async fn wait(&self) -> Result<(), DispatchError> {
        let mut rx = self.rx.clone();
        let state = match rx.wait_for(|s| matches!(s, DispatchState::Done(_))).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(DispatchError::Abandoned),
        };

        match state {
            DispatchState::Done(outcome) => outcome,
            DispatchState::Pending => Err(DispatchError::Abandoned),
        }
    }

    /// The outcome if the dispatch already finished.
    pub fn outcome(&self) -> Option<Result<(), DispatchError>> {
        match &*self.rx.borrow() {
            DispatchState::Done(outcome) => Some(outcome.clone()),
            DispatchState::Pending => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(&*self.rx.borrow(), DispatchState::Done(_))
    }
}

impl IntoFuture for DispatchHandle {
    type Output = Result<(), DispatchError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn success_is_visible_to_every_clone() {
        let (handle, reporter) = DispatchHandle::pending(7);
        let other = handle.clone();
        assert!(!handle.is_finished());
        assert!(handle.outcome().is_none());

        reporter.finish(Ok(()));

        assert!(handle.wait().await.is_ok());
        assert!(other.await.is_ok());
        assert_eq!(handle.bucket_revision(), 7);
    }

    #[tokio::test]
    async fn failure_is_reproduced_on_each_observation() {
        let (handle, reporter) = DispatchHandle::pending(1);
        reporter.finish(Err(DispatchError::Failed {
            bucket: "b".into(),
            bucket_revision: 1,
            dispatcher: "mock".into(),
            cause: Arc::new(anyhow::anyhow!("boom")),
        }));

        for _ in 0..2 {
            let err = handle.wait().await.unwrap_err();
            assert!(err.to_string().contains("boom"));
        }
        assert!(matches!(handle.outcome(), Some(Err(_))));
    }

    #[tokio::test]
    async fn dropped_reporter_reads_as_abandoned() {
        let (handle, reporter) = DispatchHandle::pending(1);
        drop(reporter);

        assert!(matches!(handle.wait().await, Err(DispatchError::Abandoned)));
    }
}
