//! Revalidation Scheduler (C4): single-flight background rebuilds for ISR, and
//! single-flight shell builds for PPR, both bounded by a global concurrency semaphore.
//!
//! The two single-flight policies intentionally differ, per §4.4: ISR already has a
//! stale response to serve immediately, so a duplicate rebuild request for an in-flight
//! key is simply dropped. PPR has no shell to serve on a miss, so followers instead wait
//! on a completion signal (a [`tokio::sync::Notify`]) within a bounded window before
//! falling back to an inline, uncached render.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore};

use crate::config::RevalidationConfig;
use crate::signals::{self, Signal};

/// Outcome of attempting to begin a PPR shell build for a fingerprint.
pub enum ShellBuildSlot {
    /// No build was in flight; the caller must build the shell and call
    /// [`RevalidationScheduler::finish_shell_build`] when done.
    Builder,
    /// A build was already in flight; the caller should wait on
    /// [`RevalidationScheduler::wait_for_shell`] instead of building.
    Follower,
}

struct Inner {
    isr_inflight: DashMap<String, ()>,
    ppr_inflight: DashMap<String, Arc<Notify>>,
    isr_semaphore: Arc<Semaphore>,
    shell_wait_window: Duration,
}

/// Coordinates ISR background rebuilds and PPR shell builds (C4).
#[derive(Clone)]
pub struct RevalidationScheduler {
    inner: Arc<Inner>,
}

impl RevalidationScheduler {
    pub fn new(config: &RevalidationConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                isr_inflight: DashMap::new(),
                ppr_inflight: DashMap::new(),
                isr_semaphore: Arc::new(Semaphore::new(config.isr_concurrency.max(1))),
                shell_wait_window: config.shell_wait_window(),
            }),
        }
    }

    /// Schedules a background ISR rebuild for `fp`. If a rebuild for this key is already
    /// in flight, the new request is dropped (per §4.4's ISR policy) rather than queued.
    ///
    /// `rebuild` must perform the render and store the result itself (typically through
    /// the `RenderOrchestrator`/`PageCache`); on failure it should leave the existing
    /// cached entry untouched and report to the signal bus, never to a caller.
    pub fn schedule_isr<F, Fut>(&self, fp: String, rebuild: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.isr_inflight.insert(fp.clone(), ()).is_some() {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            signals::app_signals()
                .emit(Signal::new(ids::ISR_SCHEDULED))
                .await;

            let permit = inner.isr_semaphore.clone().acquire_owned().await;
            rebuild().await;
            drop(permit);

            inner.isr_inflight.remove(&fp);
        });
    }

    /// Returns `true` if an ISR rebuild is currently in flight for `fp` (testing hook).
    pub fn is_isr_in_flight(&self, fp: &str) -> bool {
        self.inner.isr_inflight.contains_key(fp)
    }

    /// Attempts to become the single builder of a PPR shell for `fp`. Exactly one caller
    /// observes [`ShellBuildSlot::Builder`] among any number of concurrent callers.
    pub fn try_begin_shell_build(&self, fp: &str) -> ShellBuildSlot {
        use dashmap::mapref::entry::Entry;

        match self.inner.ppr_inflight.entry(fp.to_string()) {
            Entry::Occupied(_) => ShellBuildSlot::Follower,
            Entry::Vacant(v) => {
                v.insert(Arc::new(Notify::new()));
                ShellBuildSlot::Builder
            }
        }
    }

    /// Waits for the in-flight shell build for `fp` to complete, bounded by the
    /// configured wait window. Returns `true` if the build completed in time, `false` if
    /// the wait window elapsed first (the caller should then render inline, uncached).
    pub async fn wait_for_shell(&self, fp: &str) -> bool {
        let Some(notify) = self.inner.ppr_inflight.get(fp).map(|e| e.clone()) else {
            return true;
        };
        tokio::time::timeout(self.inner.shell_wait_window, notify.notified())
            .await
            .is_ok()
    }

    /// Marks a PPR shell build complete, waking any followers waiting on it.
    pub fn finish_shell_build(&self, fp: &str) {
        if let Some((_, notify)) = self.inner.ppr_inflight.remove(fp) {
            notify.notify_waiters();
        }
    }
}

/// Well-known signal ids emitted by the Revalidation Scheduler (A1).
pub mod ids {
    pub const ISR_SCHEDULED: &str = "revalidate.isr_scheduled";
    pub const ISR_COMPLETED: &str = "revalidate.isr_completed";
    pub const ISR_FAILED: &str = "revalidate.isr_failed";
    pub const PPR_SHELL_STARTED: &str = "revalidate.ppr_shell_started";
    pub const PPR_SHELL_COMPLETED: &str = "revalidate.ppr_shell_completed";
    pub const PPR_SHELL_RACED: &str = "revalidate.ppr_shell_raced";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn duplicate_isr_rebuild_is_dropped() {
        let scheduler = RevalidationScheduler::new(&RevalidationConfig::default());
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = runs.clone();
            scheduler.schedule_isr("/a".to_string(), move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_isr_in_flight("/a"));
    }

    #[tokio::test]
    async fn exactly_one_ppr_builder_among_concurrent_followers() {
        let scheduler = RevalidationScheduler::new(&RevalidationConfig::default());
        let builders = (0..8)
            .filter(|_| matches!(scheduler.try_begin_shell_build("/c"), ShellBuildSlot::Builder))
            .count();
        assert_eq!(builders, 1);
    }

    #[tokio::test]
    async fn follower_wakes_up_when_builder_finishes() {
        let scheduler = RevalidationScheduler::new(&RevalidationConfig::default());
        assert!(matches!(
            scheduler.try_begin_shell_build("/c"),
            ShellBuildSlot::Builder
        ));
        assert!(matches!(
            scheduler.try_begin_shell_build("/c"),
            ShellBuildSlot::Follower
        ));

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait_for_shell("/c").await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.finish_shell_build("/c");

        assert!(waiter.await.unwrap());
    }
}
