//! Roster change detection.
//!
//! Fetches every member of a roster through the player API, diffs the
//! result against the stored snapshot and persists what changed. Members
//! the API reports as nonexistent are removed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use player_api::{PlayerDataClient, PlayerResult, PlayerSnapshot, ProviderMode};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::summary::{CheckSummary, DetectedChange};
use crate::Result;
use crate::database::models::{ChangeField, MemberDbModel, NewChangeRecord};
use crate::database::repositories::{AllianceRepository, ChangeRepository, MemberRepository};
use crate::notification::{StatusBroadcaster, StatusEvent};
use crate::queue::RateLimiter;

/// Source of player data.
///
/// Implementations only classify what happened; retry decisions are made
/// by the caller.
#[async_trait]
pub trait PlayerFetcher: Send + Sync {
    async fn fetch_player(&self, player_id: i64, proxy: Option<&str>) -> PlayerResult;

    /// Re-evaluate which provider route is used.
    async fn probe_providers(&mut self) -> ProviderMode;
}

#[async_trait]
impl PlayerFetcher for PlayerDataClient {
    async fn fetch_player(&self, player_id: i64, proxy: Option<&str>) -> PlayerResult {
        PlayerDataClient::fetch_player(self, player_id, proxy).await
    }

    async fn probe_providers(&mut self) -> ProviderMode {
        self.probe().await.clone()
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Members per progress batch.
    pub batch_size: usize,
    /// Pause between two member fetches.
    pub request_delay: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            request_delay: Duration::from_secs(1),
        }
    }
}

/// Nicknames are compared the way players see them.
fn same_nickname(stored: &str, fetched: &str) -> bool {
    stored.trim().to_lowercase() == fetched.trim().to_lowercase()
}

/// Fields that differ between the stored and the fetched snapshot.
pub fn diff_snapshot(stored: &MemberDbModel, fetched: &PlayerSnapshot) -> Vec<DetectedChange> {
    let mut changes = Vec::new();
    let mut push = |field, old_value: String, new_value: String| {
        changes.push(DetectedChange {
            player_id: stored.player_id,
            nickname: stored.nickname.clone(),
            field,
            old_value,
            new_value,
        })
    };

    if stored.furnace_level != fetched.furnace_level {
        push(
            ChangeField::FurnaceLevel,
            stored.furnace_level.to_string(),
            fetched.furnace_level.to_string(),
        );
    }
    if !same_nickname(&stored.nickname, &fetched.nickname) {
        push(
            ChangeField::Nickname,
            stored.nickname.clone(),
            fetched.nickname.trim().to_string(),
        );
    }
    if stored.state_id != fetched.state_id {
        push(
            ChangeField::StateId,
            stored.state_id.to_string(),
            fetched.state_id.to_string(),
        );
    }
    changes
}

pub struct ChangeDetector<A, M, C>
where
    A: AllianceRepository + 'static,
    M: MemberRepository + 'static,
    C: ChangeRepository + 'static,
{
    alliances: Arc<A>,
    members: Arc<M>,
    changes: Arc<C>,
    events: StatusBroadcaster,
    config: DetectorConfig,
}

impl<A, M, C> ChangeDetector<A, M, C>
where
    A: AllianceRepository + 'static,
    M: MemberRepository + 'static,
    C: ChangeRepository + 'static,
{
    pub fn new(
        alliances: Arc<A>,
        members: Arc<M>,
        changes: Arc<C>,
        events: StatusBroadcaster,
        config: DetectorConfig,
    ) -> Self {
        Self {
            alliances,
            members,
            changes,
            events,
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Check every stored member of one alliance.
    pub async fn check_alliance<F>(
        &self,
        alliance_id: i64,
        fetcher: &F,
        limiter: &mut RateLimiter,
    ) -> Result<CheckSummary>
    where
        F: PlayerFetcher + ?Sized,
    {
        let alliance = self.alliances.get_alliance(alliance_id).await?;
        let members = self.members.list_by_alliance(alliance_id).await?;

        let summary = self
            .run(Some(alliance_id), Some(alliance.name), members, fetcher, limiter)
            .await;
        self.events.publish(StatusEvent::CheckCompleted {
            summary: summary.clone(),
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    /// Refresh the stored members of one alliance, or of all of them.
    pub async fn refresh_members<F>(
        &self,
        alliance_id: Option<i64>,
        fetcher: &F,
        limiter: &mut RateLimiter,
    ) -> Result<CheckSummary>
    where
        F: PlayerFetcher + ?Sized,
    {
        let (name, members) = match alliance_id {
            Some(id) => {
                let alliance = self.alliances.get_alliance(id).await?;
                (Some(alliance.name), self.members.list_by_alliance(id).await?)
            }
            None => (None, self.members.list_all().await?),
        };

        let summary = self.run(alliance_id, name, members, fetcher, limiter).await;
        self.events.publish(StatusEvent::RefreshCompleted {
            summary: summary.clone(),
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    async fn run<F>(
        &self,
        alliance_id: Option<i64>,
        alliance_name: Option<String>,
        members: Vec<MemberDbModel>,
        fetcher: &F,
        limiter: &mut RateLimiter,
    ) -> CheckSummary
    where
        F: PlayerFetcher + ?Sized,
    {
        let started = Instant::now();
        let total = members.len();
        let mut summary = CheckSummary::new(alliance_id);

        info!(
            alliance_id = ?alliance_id,
            alliance = alliance_name.as_deref().unwrap_or("*"),
            members = total,
            "Starting member check"
        );
        self.events.publish(StatusEvent::CheckStarted {
            alliance_id,
            alliance_name,
            member_count: total,
            timestamp: Utc::now(),
        });

        let batch_size = self.config.batch_size.max(1);
        let mut processed = 0;
        for batch in members.chunks(batch_size) {
            for member in batch {
                if processed > 0 && !self.config.request_delay.is_zero() {
                    tokio::time::sleep(self.config.request_delay).await;
                }
                self.check_member(member, fetcher, limiter, &mut summary).await;
                processed += 1;
            }
            debug!(alliance_id = ?alliance_id, processed, total, "Batch done");
            self.events.publish(StatusEvent::CheckProgress {
                alliance_id,
                processed,
                total,
            });
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();
        info!(alliance_id = ?alliance_id, "Member check finished: {}", summary.description());
        summary
    }

    /// Fetch a member, waiting out and retrying a throttle once.
    async fn fetch_with_retry<F>(
        &self,
        member: &MemberDbModel,
        fetcher: &F,
        limiter: &mut RateLimiter,
    ) -> PlayerResult
    where
        F: PlayerFetcher + ?Sized,
    {
        let mut retried = false;
        loop {
            limiter.wait_until_ready().await;
            let result = fetcher.fetch_player(member.player_id, None).await;

            if let Some(wait) = limiter.on_response(&result) {
                let consecutive = limiter.state().consecutive_throttles;
                self.events.publish(StatusEvent::ThrottleWait {
                    player_id: Some(member.player_id),
                    wait_secs: wait.as_secs(),
                    consecutive_throttles: consecutive,
                    timestamp: Utc::now(),
                });
                if !retried {
                    warn!(
                        player_id = member.player_id,
                        wait_secs = wait.as_secs(),
                        "Rate limited, retrying after backoff"
                    );
                    retried = true;
                    continue;
                }
                warn!(
                    player_id = member.player_id,
                    "Still rate limited after retry, skipping member for this run"
                );
            }
            return result;
        }
    }

    async fn check_member<F>(
        &self,
        member: &MemberDbModel,
        fetcher: &F,
        limiter: &mut RateLimiter,
        summary: &mut CheckSummary,
    ) where
        F: PlayerFetcher + ?Sized,
    {
        let player_id = member.player_id;
        match self.fetch_with_retry(member, fetcher, limiter).await {
            PlayerResult::Success(snapshot) => {
                match self.apply_snapshot(member, &snapshot).await {
                    Ok(changes) => {
                        summary.checked += 1;
                        for change in changes {
                            info!(player_id, field = %change.field, "{}", change.describe());
                            summary.record_change(change);
                        }
                    }
                    Err(e) => {
                        error!(player_id, "Failed to store snapshot: {}", e);
                        summary.record_failure(player_id, e.to_string());
                    }
                }
            }
            PlayerResult::NotFound => match self.members.delete_member(player_id).await {
                Ok(removed) => {
                    if removed {
                        warn!(
                            tag = "auto-removed",
                            player_id,
                            alliance_id = member.alliance_id,
                            "Member {} ({}) auto-removed: the API reports the id as nonexistent, treat as permanently invalid",
                            member.nickname,
                            player_id
                        );
                        self.events.publish(StatusEvent::MemberAutoRemoved {
                            player_id,
                            nickname: member.nickname.clone(),
                            alliance_id: member.alliance_id,
                            timestamp: Utc::now(),
                        });
                        summary.record_removal(player_id, &member.nickname);
                    } else {
                        debug!(player_id, "Member already removed");
                        summary.checked += 1;
                    }
                }
                Err(e) => {
                    error!(player_id, "Failed to remove member: {}", e);
                    summary.record_failure(player_id, e.to_string());
                }
            },
            PlayerResult::RateLimited => {
                summary.record_failure(player_id, "rate limited");
            }
            PlayerResult::Error(e) => {
                warn!(player_id, kind = %e.kind, "Member check failed: {}", e.message);
                summary.record_failure(player_id, e.to_string());
            }
        }
    }

    /// Persist change records together with the new snapshot.
    async fn apply_snapshot(
        &self,
        stored: &MemberDbModel,
        fetched: &PlayerSnapshot,
    ) -> Result<Vec<DetectedChange>> {
        let changes = diff_snapshot(stored, fetched);
        let updated = MemberDbModel::from_snapshot(fetched, stored.alliance_id);
        if changes.is_empty() && updated == *stored {
            return Ok(changes);
        }

        let changed_at = Utc::now();
        let records: Vec<NewChangeRecord> = changes
            .iter()
            .map(|change| NewChangeRecord {
                player_id: change.player_id,
                field: change.field,
                old_value: change.old_value.clone(),
                new_value: change.new_value.clone(),
                changed_at,
            })
            .collect();
        self.changes.record_snapshot(&records, &updated).await?;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::database::models::{AllianceDbModel, AllianceScheduleDbModel, ChangeRecordDbModel};
    use crate::queue::BackoffPolicy;
    use parking_lot::Mutex;
    use player_api::FetchError;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct FakeAlliances;

    #[async_trait]
    impl AllianceRepository for FakeAlliances {
        async fn get_alliance(&self, alliance_id: i64) -> Result<AllianceDbModel> {
            Ok(AllianceDbModel {
                alliance_id,
                name: format!("A{alliance_id}"),
            })
        }
        async fn list_schedules(&self) -> Result<Vec<AllianceScheduleDbModel>> {
            Ok(Vec::new())
        }
        async fn get_interval(&self, _alliance_id: i64) -> Result<Option<i64>> {
            Ok(None)
        }
        async fn upsert_alliance(&self, _alliance_id: i64, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn set_interval(&self, _: i64, _: Option<i64>, _: i64) -> Result<()> {
            Ok(())
        }
        async fn delete_alliance(&self, _alliance_id: i64) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMembers {
        rows: Mutex<BTreeMap<i64, MemberDbModel>>,
        deletes: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl MemberRepository for FakeMembers {
        async fn get_member(&self, player_id: i64) -> Result<MemberDbModel> {
            self.rows
                .lock()
                .get(&player_id)
                .cloned()
                .ok_or_else(|| Error::not_found("Member", player_id.to_string()))
        }
        async fn list_by_alliance(&self, alliance_id: i64) -> Result<Vec<MemberDbModel>> {
            Ok(self
                .rows
                .lock()
                .values()
                .filter(|m| m.alliance_id == alliance_id)
                .cloned()
                .collect())
        }
        async fn list_all(&self) -> Result<Vec<MemberDbModel>> {
            Ok(self.rows.lock().values().cloned().collect())
        }
        async fn upsert_member(&self, member: &MemberDbModel) -> Result<()> {
            self.rows.lock().insert(member.player_id, member.clone());
            Ok(())
        }
        async fn update_snapshot(&self, member: &MemberDbModel) -> Result<()> {
            self.rows.lock().insert(member.player_id, member.clone());
            Ok(())
        }
        async fn delete_member(&self, player_id: i64) -> Result<bool> {
            self.deletes.lock().push(player_id);
            Ok(self.rows.lock().remove(&player_id).is_some())
        }
    }

    /// Change log that writes through to the member rows it was built for.
    #[derive(Default)]
    struct FakeChanges {
        members: Arc<FakeMembers>,
        records: Mutex<Vec<NewChangeRecord>>,
        fail_snapshots: AtomicBool,
    }

    impl FakeChanges {
        fn for_members(members: &Arc<FakeMembers>) -> Arc<Self> {
            Arc::new(Self {
                members: members.clone(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ChangeRepository for FakeChanges {
        async fn append_change(&self, record: &NewChangeRecord) -> Result<i64> {
            let mut records = self.records.lock();
            records.push(record.clone());
            Ok(records.len() as i64)
        }
        async fn list_for_player(&self, _player_id: i64) -> Result<Vec<ChangeRecordDbModel>> {
            Ok(Vec::new())
        }
        async fn record_snapshot(
            &self,
            records: &[NewChangeRecord],
            member: &MemberDbModel,
        ) -> Result<()> {
            if self.fail_snapshots.load(Ordering::SeqCst) {
                return Err(Error::Other("disk I/O error".to_string()));
            }
            let mut rows = self.members.rows.lock();
            if !rows.contains_key(&member.player_id) {
                return Err(Error::not_found("Member", member.player_id.to_string()));
            }
            self.records.lock().extend_from_slice(records);
            rows.insert(member.player_id, member.clone());
            Ok(())
        }
    }

    /// Scripted API: each id answers from its queue, then with its default.
    #[derive(Default)]
    struct ScriptedFetcher {
        scripted: Mutex<HashMap<i64, VecDeque<PlayerResult>>>,
        defaults: Mutex<HashMap<i64, PlayerResult>>,
        calls: Mutex<Vec<(i64, Instant)>>,
    }

    impl ScriptedFetcher {
        fn answer(&self, player_id: i64, result: PlayerResult) {
            self.defaults.lock().insert(player_id, result);
        }

        fn script(&self, player_id: i64, results: Vec<PlayerResult>) {
            self.scripted.lock().insert(player_id, results.into());
        }

        fn calls_for(&self, player_id: i64) -> Vec<Instant> {
            self.calls
                .lock()
                .iter()
                .filter(|(id, _)| *id == player_id)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl PlayerFetcher for ScriptedFetcher {
        async fn fetch_player(&self, player_id: i64, _proxy: Option<&str>) -> PlayerResult {
            self.calls.lock().push((player_id, Instant::now()));
            if let Some(result) = self
                .scripted
                .lock()
                .get_mut(&player_id)
                .and_then(|q| q.pop_front())
            {
                return result;
            }
            self.defaults
                .lock()
                .get(&player_id)
                .cloned()
                .unwrap_or_else(|| PlayerResult::Error(FetchError::network("unscripted")))
        }

        async fn probe_providers(&mut self) -> ProviderMode {
            ProviderMode::default()
        }
    }

    fn member(player_id: i64, furnace_level: i64) -> MemberDbModel {
        MemberDbModel {
            player_id,
            nickname: format!("player{player_id}"),
            furnace_level,
            furnace_content: None,
            state_id: 245,
            alliance_id: 1,
        }
    }

    fn snapshot_of(m: &MemberDbModel) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: m.player_id,
            nickname: m.nickname.clone(),
            furnace_level: m.furnace_level,
            state_id: m.state_id,
            furnace_content: m.furnace_content.clone(),
            avatar_url: None,
        }
    }

    fn detector(
        members: Arc<FakeMembers>,
        changes: Arc<FakeChanges>,
        events: StatusBroadcaster,
    ) -> ChangeDetector<FakeAlliances, FakeMembers, FakeChanges> {
        ChangeDetector::new(
            Arc::new(FakeAlliances),
            members,
            changes,
            events,
            DetectorConfig {
                batch_size: 10,
                request_delay: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_alliance_scenario_summary() {
        let members = Arc::new(FakeMembers::default());
        let changes = FakeChanges::for_members(&members);
        let fetcher = ScriptedFetcher::default();

        for id in 1..=25 {
            let m = member(id, 50);
            members.rows.lock().insert(id, m.clone());
            fetcher.answer(id, PlayerResult::Success(snapshot_of(&m)));
        }
        fetcher.answer(7, PlayerResult::NotFound);
        fetcher.answer(19, PlayerResult::NotFound);
        let mut upgraded = snapshot_of(&member(12, 50));
        upgraded.furnace_level = 51;
        fetcher.answer(12, PlayerResult::Success(upgraded));

        let events = StatusBroadcaster::new();
        let mut rx = events.subscribe();
        let detector = detector(members.clone(), changes.clone(), events);
        let mut limiter = RateLimiter::default();

        let summary = detector
            .check_alliance(1, &fetcher, &mut limiter)
            .await
            .unwrap();

        assert_eq!(summary.alliance_id, Some(1));
        assert_eq!(summary.checked, 25);
        assert_eq!(summary.furnace_changes, 1);
        assert_eq!(summary.nickname_changes, 0);
        assert_eq!(summary.state_changes, 0);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.auto_removed, 2);

        let records = changes.records.lock().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].player_id, 12);
        assert_eq!(records[0].field, ChangeField::FurnaceLevel);
        assert_eq!(records[0].old_value, "50");
        assert_eq!(records[0].new_value, "51");

        let rows = members.rows.lock();
        assert_eq!(rows.len(), 23);
        assert_eq!(rows[&12].furnace_level, 51);
        drop(rows);

        let mut progress = Vec::new();
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                StatusEvent::CheckProgress { processed, .. } => progress.push(processed),
                StatusEvent::CheckCompleted { .. } => completed = true,
                _ => {}
            }
        }
        assert_eq!(progress, vec![10, 20, 25]);
        assert!(completed);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_not_found_is_terminal() {
        let members = Arc::new(FakeMembers::default());
        members.rows.lock().insert(42, member(42, 30));
        let fetcher = ScriptedFetcher::default();
        fetcher.answer(42, PlayerResult::NotFound);

        let events = StatusBroadcaster::new();
        let mut rx = events.subscribe();
        let detector = detector(members.clone(), FakeChanges::for_members(&members), events);
        let mut limiter = RateLimiter::default();

        let summary = detector
            .check_alliance(1, &fetcher, &mut limiter)
            .await
            .unwrap();

        assert_eq!(summary.auto_removed, 1);
        assert_eq!(fetcher.calls_for(42).len(), 1);
        assert_eq!(*members.deletes.lock(), vec![42]);

        let mut removed_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, StatusEvent::MemberAutoRemoved { player_id: 42, .. }) {
                removed_events += 1;
            }
        }
        assert_eq!(removed_events, 1);

        logs_assert(|lines: &[&str]| {
            let warnings = lines
                .iter()
                .filter(|line| line.contains("WARN") && line.contains("auto-removed"))
                .count();
            match warnings {
                1 => Ok(()),
                n => Err(format!("expected one auto-removed warning, found {n}")),
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_snapshot_write_leaves_no_change_rows() {
        let members = Arc::new(FakeMembers::default());
        let changes = FakeChanges::for_members(&members);
        changes.fail_snapshots.store(true, Ordering::SeqCst);
        members.rows.lock().insert(12, member(12, 50));

        let fetcher = ScriptedFetcher::default();
        let mut upgraded = snapshot_of(&member(12, 50));
        upgraded.furnace_level = 51;
        fetcher.answer(12, PlayerResult::Success(upgraded));

        let detector = detector(members.clone(), changes.clone(), StatusBroadcaster::new());
        let mut limiter = RateLimiter::default();

        for _ in 0..2 {
            let summary = detector
                .check_alliance(1, &fetcher, &mut limiter)
                .await
                .unwrap();
            assert_eq!(summary.failures, 1);
            assert_eq!(summary.furnace_changes, 0);
        }
        assert!(changes.records.lock().is_empty());
        assert_eq!(members.rows.lock()[&12].furnace_level, 50);

        // Once the store recovers the change is logged exactly once.
        changes.fail_snapshots.store(false, Ordering::SeqCst);
        let summary = detector
            .check_alliance(1, &fetcher, &mut limiter)
            .await
            .unwrap();
        assert_eq!(summary.furnace_changes, 1);
        assert_eq!(changes.records.lock().len(), 1);
        assert_eq!(members.rows.lock()[&12].furnace_level, 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_member_retried_once_after_backoff() {
        let members = Arc::new(FakeMembers::default());
        let m = member(5, 40);
        members.rows.lock().insert(5, m.clone());
        let fetcher = ScriptedFetcher::default();
        fetcher.script(5, vec![PlayerResult::RateLimited]);
        fetcher.answer(5, PlayerResult::Success(snapshot_of(&m)));

        let detector = detector(members.clone(), FakeChanges::for_members(&members), StatusBroadcaster::new());
        let mut limiter = RateLimiter::default();

        let summary = detector
            .check_alliance(1, &fetcher, &mut limiter)
            .await
            .unwrap();

        let calls = fetcher.calls_for(5);
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(60));
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(limiter.state().consecutive_throttles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_counts_as_failure() {
        let members = Arc::new(FakeMembers::default());
        members.rows.lock().insert(5, member(5, 40));
        members.rows.lock().insert(6, member(6, 40));
        let fetcher = ScriptedFetcher::default();
        fetcher.answer(5, PlayerResult::RateLimited);
        fetcher.answer(6, PlayerResult::Success(snapshot_of(&member(6, 40))));

        let detector = detector(members.clone(), FakeChanges::for_members(&members), StatusBroadcaster::new());
        let mut limiter = RateLimiter::default();

        let summary = detector
            .check_alliance(1, &fetcher, &mut limiter)
            .await
            .unwrap();

        assert_eq!(fetcher.calls_for(5).len(), 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.failed[0].player_id, 5);
        assert_eq!(summary.checked, 1);

        // The next member still honours the escalated backoff.
        let second_throttle = fetcher.calls_for(5)[1];
        assert!(fetcher.calls_for(6)[0] - second_throttle >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_leave_record_untouched() {
        let members = Arc::new(FakeMembers::default());
        let m = member(8, 60);
        members.rows.lock().insert(8, m.clone());
        let fetcher = ScriptedFetcher::default();
        fetcher.answer(8, PlayerResult::Error(FetchError::captcha("unsolved")));

        let detector = detector(members.clone(), FakeChanges::for_members(&members), StatusBroadcaster::new());
        let summary = detector
            .check_alliance(1, &fetcher, &mut RateLimiter::default())
            .await
            .unwrap();

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.checked, 0);
        assert_eq!(members.rows.lock()[&8], m);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_records_every_field() {
        let members = Arc::new(FakeMembers::default());
        let changes = FakeChanges::for_members(&members);
        let mut other = member(3, 20);
        other.alliance_id = 2;
        members.rows.lock().insert(3, other.clone());

        let fetcher = ScriptedFetcher::default();
        let mut fetched = snapshot_of(&other);
        fetched.furnace_level = 21;
        fetched.nickname = "Renamed".to_string();
        fetched.state_id = 300;
        fetcher.answer(3, PlayerResult::Success(fetched));

        let detector = detector(members.clone(), changes.clone(), StatusBroadcaster::new());
        let policy = BackoffPolicy::default();
        let summary = detector
            .refresh_members(None, &fetcher, &mut RateLimiter::new(policy))
            .await
            .unwrap();

        assert_eq!(summary.alliance_id, None);
        assert_eq!(summary.total_changes(), 3);
        assert_eq!(changes.records.lock().len(), 3);
        let row = members.rows.lock()[&3].clone();
        assert_eq!(row.nickname, "Renamed");
        assert_eq!(row.alliance_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetched_nickname_is_stored_trimmed() {
        let members = Arc::new(FakeMembers::default());
        let changes = FakeChanges::for_members(&members);
        members.rows.lock().insert(4, member(4, 10));

        let fetcher = ScriptedFetcher::default();
        let mut fetched = snapshot_of(&member(4, 10));
        fetched.nickname = "  Blaze \n".to_string();
        fetcher.answer(4, PlayerResult::Success(fetched));

        let detector = detector(members.clone(), changes.clone(), StatusBroadcaster::new());
        let summary = detector
            .check_alliance(1, &fetcher, &mut RateLimiter::default())
            .await
            .unwrap();

        assert_eq!(summary.nickname_changes, 1);
        assert_eq!(members.rows.lock()[&4].nickname, "Blaze");
        assert_eq!(changes.records.lock()[0].new_value, "Blaze");
    }

    #[test]
    fn test_nickname_case_is_not_a_change() {
        let stored = member(1, 10);
        let mut fetched = snapshot_of(&stored);
        fetched.nickname = " PLAYER1 ".to_string();
        assert!(diff_snapshot(&stored, &fetched).is_empty());

        fetched.furnace_content = Some("v2".to_string());
        assert!(diff_snapshot(&stored, &fetched).is_empty());
    }
}
