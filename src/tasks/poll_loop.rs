use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use crate::clients::feed_client::FeedFetcher;
use crate::error::StoreError;
use crate::models::event::ResolvedOccurrence;
use crate::service::notification_service::Notifier;
use crate::service::registry::Registry;
use crate::service::resolver;

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Outcome of one poll cycle, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub channels: usize,
    pub failed_fetches: usize,
    pub notified: usize,
    pub failed_sends: usize,
    pub discarded: bool,
}

/// Runs fetch -> resolve -> notify over every registered channel.
pub struct Poller {
    registry: Registry,
    fetcher: Arc<dyn FeedFetcher>,
    notifier: Notifier,
    max_concurrent_fetches: usize,
    halted: AtomicBool,
    // Bumped on every start and stop; a cycle only notifies for the run it began in.
    generation: AtomicU64,
}

impl Poller {
    pub fn new(registry: Registry, fetcher: Arc<dyn FeedFetcher>, notifier: Notifier) -> Self {
        Self {
            registry,
            fetcher,
            notifier,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            halted: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    /// Cycles still in flight drop their results instead of notifying.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Clears the halt and opens a new run. Cycles from earlier runs stay discarded.
    fn resume(&self) -> u64 {
        self.halted.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.halted.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// One full pass. `now` is used for every feed of the cycle. A registry
    /// failure aborts the cycle; feed failures only empty their own channel.
    pub async fn poll_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.run_cycle(now, generation).await
    }

    async fn run_cycle(&self, now: DateTime<Utc>, generation: u64) -> Result<CycleReport, StoreError> {
        let calendars = self.registry.list_calendars().await?;
        let mut report = CycleReport::default();

        let permits = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let mut tasks = JoinSet::new();
        for calendar in calendars {
            let Some(url) = calendar.pollable_url().map(str::to_string) else {
                tracing::debug!("Skipping {}: no calendar URL", calendar.channel_id);
                continue;
            };
            report.channels += 1;

            let fetcher = self.fetcher.clone();
            let permits = permits.clone();
            let channel_id = calendar.channel_id;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let fetched = fetcher.fetch(&url).await;
                let resolved = fetched.map(|events| resolver::resolve(&channel_id, &events, now));
                (channel_id, url, resolved)
            });
        }

        let mut occurrences: Vec<ResolvedOccurrence> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(found))) => occurrences.extend(found),
                Ok((channel_id, url, Err(err))) => {
                    tracing::warn!("Feed {} for {} skipped this cycle: {}", url, channel_id, err);
                    report.failed_fetches += 1;
                }
                Err(err) => {
                    tracing::warn!("Feed task did not complete: {}", err);
                    report.failed_fetches += 1;
                }
            }
        }

        for occurrence in &occurrences {
            if !self.is_current(generation) {
                tracing::debug!("Poller halted, discarding remaining occurrences");
                report.discarded = true;
                break;
            }
            match self
                .notifier
                .notify(&occurrence.channel_id, occurrence, now)
                .await
            {
                Ok(()) => report.notified += 1,
                Err(err) => {
                    tracing::warn!("Notifying {} failed: {}", occurrence.channel_id, err);
                    report.failed_sends += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Owns the recurring timer driving the poller.
pub struct Scheduler {
    poller: Arc<Poller>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
    // Shared by every run, so a restart never overlaps a cycle left over from before.
    cycle_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(poller: Arc<Poller>, interval: Duration) -> Self {
        Self {
            poller,
            interval,
            handle: None,
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Starts ticking. The first cycle runs one interval after start. A tick
    /// that fires while the previous cycle is still running is skipped.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let generation = self.poller.resume();

        let poller = self.poller.clone();
        let interval = self.interval;
        let cycle_lock = self.cycle_lock.clone();
        tracing::info!("Calendar poller started (interval: {:?})", interval);

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(guard) = cycle_lock.clone().try_lock_owned() else {
                    tracing::warn!("Previous poll cycle still running, skipping tick");
                    continue;
                };
                let poller = poller.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    tracing::debug!("Running calendar poll cycle");
                    match poller.run_cycle(Utc::now(), generation).await {
                        Ok(report) => tracing::debug!("Poll cycle finished: {:?}", report),
                        Err(err) => tracing::error!("Poll cycle aborted: {}", err),
                    }
                });
            }
        }));
    }

    /// Cancels the timer. Fetches already running finish on their own and
    /// their results are discarded.
    pub fn stop(&mut self) {
        self.poller.halt();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::info!("Calendar poller stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
