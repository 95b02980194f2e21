#![allow(dead_code)]

use async_trait::async_trait;
use ledger_kernel::log::MemoryCommitStore;
use ledger_kernel::{Bucket, CommitStore, Dispatcher, Event, Ledger, LedgerConfig};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error raised by [`RecordingDispatcher`] while failing.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MyError(pub String);

/// Dispatcher that records every event and can be switched into failure.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: AtomicUsize,
    failing: AtomicBool,
    poison: Mutex<Option<Event>>,
    seen: Mutex<Vec<Event>>,
}

impl RecordingDispatcher {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only on events equal to `event`.
    pub fn fail_on(&self, event: Event) {
        *self.poison.lock() = Some(event);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Event> {
        self.seen.lock().clone()
    }

    /// Forget recorded calls and stop failing.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.failing.store(false, Ordering::SeqCst);
        *self.poison.lock() = None;
        self.seen.lock().clear();
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn dispatch(&self, event: &Event) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let poisoned = self.poison.lock().as_ref() == Some(event);
        if poisoned || self.failing.load(Ordering::SeqCst) {
            return Err(MyError("Some dispatch exception".into()).into());
        }
        self.seen.lock().push(event.clone());
        Ok(())
    }
}

/// Fresh in-memory ledger with one randomly named bucket and a recording dispatcher.
pub struct LedgerFixture {
    pub bucket_name: String,
    pub ledger: Ledger,
    pub bucket: Bucket,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl LedgerFixture {
    pub fn new() -> Self {
        Self::with_ledger(Ledger::in_memory())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::with_ledger(Ledger::with_config(Arc::new(MemoryCommitStore::new()), config))
    }

    pub fn with_store(store: Arc<dyn CommitStore>) -> Self {
        Self::with_ledger(Ledger::new(store))
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        let bucket_name = random_name(10);
        let dispatcher = Arc::new(RecordingDispatcher::default());

        ledger.register_dispatcher(dispatcher.clone());
        let bucket = ledger.bucket(&bucket_name).unwrap();

        Self {
            bucket_name,
            ledger,
            bucket,
            dispatcher,
        }
    }

    pub async fn cleanup(self) {
        self.ledger.delete_bucket(&self.bucket_name).await.unwrap();
    }
}

pub fn random_name(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}
