//! Alliance monitor scheduler.
//!
//! Each enabled alliance gets a waiter that sleeps for the configured
//! interval, re-reads the interval and, if still enabled, enqueues a check.
//! Waiters never call the player API themselves; everything goes through
//! the request queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::WaiterHandle;
use crate::Result;
use crate::database::repositories::AllianceRepository;
use crate::queue::{Operation, RequestQueue};

/// Refresh-day checks run once a day.
const MONTHLY_CHECK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Length of one interval unit; schedules are stored in minutes.
    pub interval_unit: Duration,
    /// How often waiters are reconciled with the stored schedules.
    pub reconcile_interval: Duration,
    /// Delay between the first sleeps of the initial waiters.
    pub start_stagger: Duration,
    /// Day of month for the full roster refresh, 0 disables it.
    pub monthly_refresh_day: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_unit: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(60),
            start_stagger: Duration::from_millis(500),
            monthly_refresh_day: 1,
        }
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<i64>,
    pub stopped: Vec<i64>,
    pub restarted: Vec<i64>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

struct Inner<A: AllianceRepository + 'static> {
    alliances: Arc<A>,
    queue: RequestQueue,
    config: MonitorConfig,
    waiters: Mutex<HashMap<i64, WaiterHandle>>,
    next_generation: AtomicU64,
    cancellation_token: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// (year, month) of the last monthly refresh.
    last_monthly_refresh: Mutex<Option<(i32, u32)>>,
}

/// Keeps one waiter per enabled alliance.
pub struct AllianceMonitor<A: AllianceRepository + 'static> {
    inner: Arc<Inner<A>>,
}

impl<A: AllianceRepository + 'static> Clone for AllianceMonitor<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn interval_duration(unit: Duration, interval_minutes: i64) -> Duration {
    let factor = u32::try_from(interval_minutes.max(0)).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn spawn_waiter<A: AllianceRepository + 'static>(
    inner: &Arc<Inner<A>>,
    alliance_id: i64,
    interval_minutes: i64,
    initial_delay: Duration,
) -> WaiterHandle {
    let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
    let token = inner.cancellation_token.child_token();
    let join = tokio::spawn(run_waiter(
        inner.clone(),
        alliance_id,
        interval_minutes,
        generation,
        token.clone(),
        initial_delay,
    ));
    debug!(alliance_id, interval_minutes, generation, "Waiter spawned");
    WaiterHandle::new(alliance_id, interval_minutes, generation, token, join)
}

async fn run_waiter<A: AllianceRepository + 'static>(
    inner: Arc<Inner<A>>,
    alliance_id: i64,
    mut interval_minutes: i64,
    mut generation: u64,
    token: CancellationToken,
    initial_delay: Duration,
) {
    if !initial_delay.is_zero() {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }
    }

    loop {
        let sleep_for = interval_duration(inner.config.interval_unit, interval_minutes);
        tokio::select! {
            _ = token.cancelled() => {
                debug!(alliance_id, "Waiter cancelled");
                return;
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }

        let current = match inner.alliances.get_interval(alliance_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(alliance_id, "Failed to re-read check interval, keeping schedule: {}", e);
                continue;
            }
        };

        let mut waiters = inner.waiters.lock();
        let is_current = waiters
            .get(&alliance_id)
            .is_some_and(|h| h.generation == generation)
            && !token.is_cancelled();
        if !is_current {
            return;
        }

        match current.filter(|minutes| *minutes > 0) {
            None => {
                waiters.remove(&alliance_id);
                info!(alliance_id, "Alliance checks disabled, waiter stopped");
                return;
            }
            Some(new_interval) if new_interval != interval_minutes => {
                // Re-arm the slot in place: exactly one waiter, fresh sleep.
                let next = inner.next_generation.fetch_add(1, Ordering::Relaxed);
                if let Some(handle) = waiters.get_mut(&alliance_id) {
                    handle.interval_minutes = new_interval;
                    handle.generation = next;
                }
                info!(
                    alliance_id,
                    old = interval_minutes,
                    new = new_interval,
                    "Check interval changed, waiter restarted"
                );
                interval_minutes = new_interval;
                generation = next;
            }
            Some(_) => {
                let operation = Operation::alliance_check(alliance_id).with_origin("scheduler");
                match inner.queue.enqueue(operation) {
                    Ok(id) => debug!(alliance_id, operation_id = %id, "Scheduled check enqueued"),
                    Err(e) => {
                        warn!(alliance_id, "Failed to enqueue scheduled check: {}", e);
                        return;
                    }
                }
            }
        }
    }
}

impl<A: AllianceRepository + 'static> AllianceMonitor<A> {
    pub fn new(alliances: Arc<A>, queue: RequestQueue, config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                alliances,
                queue,
                config,
                waiters: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                cancellation_token: CancellationToken::new(),
                background: Mutex::new(Vec::new()),
                last_monthly_refresh: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Spawn one waiter per enabled alliance plus the background loops.
    pub async fn start(&self) -> Result<usize> {
        let schedules = self.inner.alliances.list_schedules().await?;
        let stagger = self.inner.config.start_stagger;

        let started = {
            let mut waiters = self.inner.waiters.lock();
            let mut started = 0u32;
            for schedule in schedules.iter().filter(|s| s.is_enabled()) {
                if waiters.contains_key(&schedule.alliance_id) {
                    continue;
                }
                let handle = spawn_waiter(
                    &self.inner,
                    schedule.alliance_id,
                    schedule.interval_minutes,
                    stagger.saturating_mul(started),
                );
                waiters.insert(schedule.alliance_id, handle);
                started += 1;
            }
            started as usize
        };
        info!(waiters = started, alliances = schedules.len(), "Alliance monitor started");

        let mut background = self.inner.background.lock();
        let monitor = self.clone();
        background.push(tokio::spawn(async move { monitor.reconcile_loop().await }));
        if self.inner.config.monthly_refresh_day > 0 {
            let monitor = self.clone();
            background.push(tokio::spawn(async move { monitor.monthly_loop().await }));
        }
        Ok(started)
    }

    async fn reconcile_loop(&self) {
        let token = self.inner.cancellation_token.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.inner.config.reconcile_interval) => {}
            }
            match self.reconcile().await {
                Ok(report) if !report.is_empty() => info!(
                    started = ?report.started,
                    stopped = ?report.stopped,
                    restarted = ?report.restarted,
                    "Waiters reconciled"
                ),
                Ok(_) => {}
                Err(e) => warn!("Waiter reconciliation failed: {}", e),
            }
        }
        debug!("Reconcile loop exited");
    }

    async fn monthly_loop(&self) {
        let token = self.inner.cancellation_token.clone();
        let mut ticker = tokio::time::interval(MONTHLY_CHECK_PERIOD);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.maybe_enqueue_monthly_refresh(Utc::now().date_naive());
                }
            }
        }
    }

    /// Bring the running waiters in line with the stored schedules.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let schedules = self.inner.alliances.list_schedules().await?;
        let desired: HashMap<i64, i64> = schedules
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| (s.alliance_id, s.interval_minutes))
            .collect();

        let mut report = ReconcileReport::default();
        let mut waiters = self.inner.waiters.lock();

        let stale: Vec<i64> = waiters
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        for alliance_id in stale {
            if let Some(handle) = waiters.remove(&alliance_id) {
                handle.cancel();
                report.stopped.push(alliance_id);
            }
        }

        for (&alliance_id, &interval) in &desired {
            let replace = match waiters.get(&alliance_id) {
                None => {
                    report.started.push(alliance_id);
                    true
                }
                Some(handle) if handle.interval_minutes != interval || handle.is_finished() => {
                    handle.cancel();
                    report.restarted.push(alliance_id);
                    true
                }
                Some(_) => false,
            };
            if replace {
                let handle = spawn_waiter(&self.inner, alliance_id, interval, Duration::ZERO);
                waiters.insert(alliance_id, handle);
            }
        }

        report.started.sort_unstable();
        report.stopped.sort_unstable();
        report.restarted.sort_unstable();
        Ok(report)
    }

    /// Enqueue the full roster refresh if `today` is the refresh day.
    ///
    /// The configured day is clamped to the month's length; at most one
    /// refresh is enqueued per month.
    pub fn maybe_enqueue_monthly_refresh(&self, today: NaiveDate) -> bool {
        let day = self.inner.config.monthly_refresh_day;
        if day == 0 || today.day() != day.min(days_in_month(today)) {
            return false;
        }

        let month = (today.year(), today.month());
        let mut last = self.inner.last_monthly_refresh.lock();
        if *last == Some(month) {
            return false;
        }

        let operation = Operation::member_refresh(None)
            .with_origin("monthly")
            .with_description(format!("monthly member refresh {}-{:02}", month.0, month.1));
        match self.inner.queue.enqueue(operation) {
            Ok(_) => {
                *last = Some(month);
                info!(date = %today, "Monthly member refresh enqueued");
                true
            }
            Err(e) => {
                warn!("Failed to enqueue monthly refresh: {}", e);
                false
            }
        }
    }

    /// Enqueue a check for every stored alliance.
    pub async fn enqueue_all_checks(&self) -> Result<usize> {
        let schedules = self.inner.alliances.list_schedules().await?;
        let mut seen = HashSet::new();
        let mut count = 0;
        for schedule in schedules {
            if !seen.insert(schedule.alliance_id) {
                continue;
            }
            let operation = Operation::alliance_check(schedule.alliance_id)
                .with_origin("check-all")
                .with_description(format!("check alliance {} ({})", schedule.name, schedule.alliance_id));
            self.inner.queue.enqueue(operation)?;
            count += 1;
        }
        info!(count, "Enqueued checks for all alliances");
        Ok(count)
    }

    /// `(alliance_id, interval_minutes)` of every live waiter.
    pub fn running_waiters(&self) -> Vec<(i64, i64)> {
        let mut running: Vec<(i64, i64)> = self
            .inner
            .waiters
            .lock()
            .values()
            .filter(|h| !h.is_cancelled() && !h.is_finished())
            .map(|h| (h.alliance_id, h.interval_minutes))
            .collect();
        running.sort_unstable();
        running
    }

    /// Cancel every waiter and background loop.
    pub async fn shutdown(&self) {
        self.inner.cancellation_token.cancel();
        let waiters: Vec<WaiterHandle> = self.inner.waiters.lock().drain().map(|(_, h)| h).collect();
        for handle in &waiters {
            handle.cancel();
        }
        let background: Vec<JoinHandle<()>> = self.inner.background.lock().drain(..).collect();
        for handle in background {
            if let Err(e) = handle.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
        info!(waiters = waiters.len(), "Alliance monitor stopped");
    }
}
