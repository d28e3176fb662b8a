//! Scheduling of synchronization passes.
//!
//! Passes run on a fixed interval and whenever a [`SyncTrigger`] fires. The
//! trigger holds at most one pending request; firing it again before the
//! worker wakes replaces the pending request instead of queueing another.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::SyncExecutor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncRequest {
    /// Release that prompted the request, when known.
    pub release_id: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SyncTrigger {
    tx: watch::Sender<Option<SyncRequest>>,
}

impl Default for SyncTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTrigger {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Ask for a pass as soon as possible. Never blocks and never fails.
    pub fn trigger(&self, release_id: Option<Uuid>) {
        let request = SyncRequest {
            release_id,
            requested_at: Utc::now(),
        };
        if let Some(previous) = self.tx.send_replace(Some(request))
            && previous.release_id != release_id
        {
            debug!("Replaced pending sync request for {:?}", previous.release_id);
        }
        info!("Sync triggered for release {:?}", release_id);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SyncRequest>> {
        self.tx.subscribe()
    }
}

/// Drives [`SyncExecutor`] from the timer and the trigger.
pub struct SyncWorker {
    executor: Arc<SyncExecutor>,
    trigger: SyncTrigger,
    interval: Duration,
    initial_delay: Duration,
}

impl SyncWorker {
    pub fn new(
        executor: Arc<SyncExecutor>,
        trigger: SyncTrigger,
        interval: Duration,
        initial_delay: Duration,
    ) -> Self {
        Self {
            executor,
            trigger,
            interval,
            initial_delay,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut requests = self.trigger.subscribe();
        info!(
            "Release sync worker started (interval {:?}, initial delay {:?})",
            self.interval, self.initial_delay
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Release sync worker stopped before first pass");
                return;
            }
            _ = sleep(self.initial_delay) => {}
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = requests.changed() => {
                    if changed.is_err() {
                        warn!("Sync trigger closed");
                        break;
                    }
                    let request = *requests.borrow_and_update();
                    if let Some(request) = request {
                        info!(
                            "Running triggered sync for release {:?} (requested {})",
                            request.release_id, request.requested_at
                        );
                    }
                }
                _ = ticker.tick() => debug!("Running scheduled sync"),
            }

            let report = self.executor.run(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            if !report.success {
                warn!(
                    "Sync pass failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        info!("Release sync worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use be_remote_db::Repositories;

    use super::*;
    use crate::executor::tests::StaticSource;

    #[tokio::test]
    async fn test_trigger_keeps_only_latest_request() {
        let trigger = SyncTrigger::new();
        let mut rx = trigger.subscribe();

        let first = Uuid::now_v7();
        let last = Uuid::now_v7();
        trigger.trigger(Some(first));
        trigger.trigger(None);
        trigger.trigger(Some(last));

        assert!(rx.has_changed().unwrap());
        let pending = *rx.borrow_and_update();
        assert_eq!(pending.unwrap().release_id, Some(last));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_trigger_without_worker_does_not_fail() {
        let trigger = SyncTrigger::new();
        trigger.trigger(None);
        trigger.trigger(None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_runs_on_delay_trigger_and_interval() {
        let source = Arc::new(StaticSource::default());
        let executor = Arc::new(SyncExecutor::new(
            Some(source.clone()),
            &Repositories::in_memory(),
        ));
        let trigger = SyncTrigger::new();
        let cancel = CancellationToken::new();
        let worker = SyncWorker::new(
            executor,
            trigger.clone(),
            Duration::from_secs(300),
            Duration::from_secs(10),
        );
        let handle = tokio::spawn(worker.run(cancel.clone()));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(6)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        trigger.trigger(None);
        trigger.trigger(None);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

        sleep(Duration::from_secs(300)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_during_initial_delay() {
        let executor = Arc::new(SyncExecutor::new(None, &Repositories::in_memory()));
        let cancel = CancellationToken::new();
        let worker = SyncWorker::new(
            executor,
            SyncTrigger::new(),
            Duration::from_secs(300),
            Duration::from_secs(3600),
        );
        let handle = tokio::spawn(worker.run(cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
    }
}
