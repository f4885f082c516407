//! User-facing engine operations.
//!
//! These are the calls the UI/domain layer makes: record a completion, read
//! a streak, spend a freeze, resync, sign out. Every mutation follows the
//! same shape: try the direct transactional write when online, and on any
//! failure fall back to an optimistic cache write plus a queued operation.

use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    CalendarMonth, Completion, EntityKind, HabitStreak, OpAction, SyncOperation,
};
use crate::remote::{QueryFilter, TransactionWrite};
use crate::resilience::retry::{retry, RetryConfig};

use super::{derived_dependencies, streak_key, StatusPatch, SyncEngine, SyncError, SyncGuard};

impl SyncEngine {
    /// Record a habit completion.
    ///
    /// Online: transactional write, then cache. Offline or failed: cache
    /// optimistically and queue the mutation for replay. Either way the
    /// caller gets the completion back and the UI can move on.
    pub async fn record_completion(&self, completion: Completion) -> Result<Completion, SyncError> {
        let payload = serde_json::to_value(&completion)?;
        let deps = derived_dependencies(&completion.habit_id);

        if self.status.current().is_online {
            let write = TransactionWrite::set(
                EntityKind::Completion.collection(),
                completion.id.as_str(),
                payload.clone(),
            );
            let result = retry("record_completion", &RetryConfig::transaction(), || {
                self.remote.run_transaction(write.clone())
            })
            .await;

            match result {
                Ok(()) => {
                    self.cache.put_completion(&completion.id, completion.clone(), &deps).await;
                    debug!(id = %completion.id, habit = %completion.habit_id, "Completion recorded");
                    return Ok(completion);
                }
                Err(e) => {
                    warn!(id = %completion.id, error = %e, "Direct write failed, queuing for replay");
                    self.note_remote_error(&e);
                }
            }
        }

        self.cache.put_completion(&completion.id, completion.clone(), &deps).await;
        let op = SyncOperation::new(
            EntityKind::Completion,
            OpAction::Create,
            payload,
            completion.user_id.as_str(),
            Some(completion.id.clone()),
        );
        self.enqueue_fallback(op).await;
        Ok(completion)
    }

    /// Current streak for a habit.
    ///
    /// Online, the streak is recomputed from the remote completion history
    /// and resolved against the cached mirror. Offline, the mirror is served
    /// as-is (or an empty streak if nothing is cached).
    pub async fn calculate_streak(&self, habit_id: &str, user_id: &str) -> HabitStreak {
        let key = streak_key(habit_id, user_id);

        if !self.status.current().is_online {
            return self.cached_or_empty(&key, habit_id, user_id).await;
        }

        let filter = QueryFilter::for_user(user_id).with_habit(habit_id);
        let docs = match self.remote.query(EntityKind::Completion.collection(), &filter).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(habit_id, error = %e, "Streak query failed, serving cached mirror");
                self.note_remote_error(&e);
                return self.cached_or_empty(&key, habit_id, user_id).await;
            }
        };

        let completions: Vec<Completion> = docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc.data) {
                Ok(completion) => Some(completion),
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "Undecodable completion, skipping");
                    None
                }
            })
            .collect();

        let mut computed =
            HabitStreak::from_completions(habit_id, user_id, &completions, Utc::now().date_naive());

        let resolved = match self.cache.streaks().get(&key).await {
            Some(cached) => {
                // Freeze counters and milestones live on the streak document,
                // not the completion history; carry them over before resolving.
                computed.freezes_available = cached.freezes_available;
                computed.freezes_used = cached.freezes_used;
                computed.milestones = cached.milestones.clone();
                super::resolve_streak(&cached, &computed)
            }
            None => computed,
        };

        self.cache.put_streak(&key, resolved.clone(), &derived_dependencies(habit_id)).await;
        resolved
    }

    /// Spend a streak freeze to cover `missed_date`.
    ///
    /// Returns `false` (without queuing anything) when no freezes are left.
    /// Otherwise the decrement is applied optimistically and confirmed
    /// against the remote store, or queued if that fails.
    pub async fn use_streak_freeze(
        &self,
        habit_id: &str,
        user_id: &str,
        missed_date: NaiveDate,
    ) -> Result<bool, SyncError> {
        let key = streak_key(habit_id, user_id);
        let current = match self.cache.streaks().get(&key).await {
            Some(streak) => streak,
            None => self.calculate_streak(habit_id, user_id).await,
        };

        if current.freezes_available == 0 {
            debug!(habit_id, "No freezes available");
            return Ok(false);
        }

        let mut updated = current;
        updated.freezes_available -= 1;
        updated.freezes_used += 1;
        // The freeze covers the missed day, keeping the chain unbroken
        if updated.last_completion_date.map_or(true, |d| missed_date > d) {
            updated.last_completion_date = Some(missed_date);
        }
        let payload = serde_json::to_value(&updated)?;

        self.cache.put_streak(&key, updated, &derived_dependencies(habit_id)).await;

        if self.status.current().is_online {
            let write =
                TransactionWrite::set(EntityKind::Streak.collection(), key.as_str(), payload.clone());
            let result = retry("use_streak_freeze", &RetryConfig::transaction(), || {
                self.remote.run_transaction(write.clone())
            })
            .await;
            match result {
                Ok(()) => {
                    info!(habit_id, %missed_date, "Streak freeze confirmed");
                    return Ok(true);
                }
                Err(e) => {
                    warn!(habit_id, error = %e, "Freeze write failed, queuing for replay");
                    self.note_remote_error(&e);
                }
            }
        }

        let op = SyncOperation::new(
            EntityKind::Streak,
            OpAction::Update,
            payload,
            user_id,
            Some(key),
        );
        self.enqueue_fallback(op).await;
        Ok(true)
    }

    /// Calendar view for one month, computed from cached completions and
    /// memoized under the calendar kind.
    pub async fn calendar_month(&self, habit_id: &str, year: i32, month: u32) -> CalendarMonth {
        let key = format!("{habit_id}::{year:04}-{month:02}");
        if let Some(cached) = self.cache.calendars().get(&key).await {
            return cached;
        }

        let filter = QueryFilter::for_user(self.user_id.as_str()).with_habit(habit_id);
        let completions: Vec<Completion> = if self.status.current().is_online {
            match self.remote.query(EntityKind::Completion.collection(), &filter).await {
                Ok(docs) => docs
                    .into_iter()
                    .filter_map(|doc| serde_json::from_value(doc.data).ok())
                    .collect(),
                Err(e) => {
                    self.note_remote_error(&e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let calendar = CalendarMonth::project(habit_id, year, month, &completions);
        self.cache.calendars().set(&key, calendar.clone()).await;
        calendar
    }

    /// Pull the user's streaks and recent completions from the remote store
    /// and overwrite the cache. Stamps `last_sync` on success. Overlapping
    /// calls no-op.
    ///
    /// This does not resurrect operations dropped at the queue's retry
    /// ceiling; those are gone by design.
    pub async fn full_resync(&self) {
        if self.syncing.swap(true, Ordering::AcqRel) {
            debug!("Full sync already in progress, skipping");
            return;
        }
        let _guard = SyncGuard(&self.syncing);
        let started = Instant::now();
        self.status.update(StatusPatch::syncing(true));
        info!(user_id = %self.user_id, "Full resync started");

        let mut clean = true;
        let filter = QueryFilter::for_user(self.user_id.as_str());

        match self.remote.query(EntityKind::Streak.collection(), &filter).await {
            Ok(docs) => {
                for doc in docs {
                    match serde_json::from_value::<HabitStreak>(doc.data) {
                        Ok(remote_streak) => {
                            let resolved = match self.cache.streaks().get(&doc.id).await {
                                Some(local) => super::resolve_streak(&local, &remote_streak),
                                None => remote_streak,
                            };
                            let deps = derived_dependencies(&resolved.habit_id);
                            self.cache.put_streak(&doc.id, resolved, &deps).await;
                        }
                        Err(e) => warn!(id = %doc.id, error = %e, "Undecodable streak, skipping"),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Streak resync query failed");
                self.note_remote_error(&e);
                clean = false;
            }
        }

        let since = Utc::now().date_naive()
            - chrono::Duration::days(i64::from(self.config.resync_window_days));
        let completion_filter = filter.with_since(since);
        match self.remote.query(EntityKind::Completion.collection(), &completion_filter).await {
            Ok(docs) => {
                for doc in docs {
                    match serde_json::from_value::<Completion>(doc.data) {
                        Ok(completion) => {
                            self.cache.completions().set(&doc.id, completion).await;
                        }
                        Err(e) => warn!(id = %doc.id, error = %e, "Undecodable completion, skipping"),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Completion resync query failed");
                self.note_remote_error(&e);
                clean = false;
            }
        }

        if clean {
            let now = Utc::now();
            if let Err(e) = self.local.put(super::LAST_SYNC_KEY, &now.to_rfc3339()).await {
                warn!(error = %e, "Failed to persist last-sync timestamp");
            }
            self.status.update(StatusPatch::synced_at(now));
            crate::metrics::record_resync_duration(started.elapsed());
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Full resync complete");
        }
        self.status.update(StatusPatch::syncing(false));
    }

    /// Wipe all persisted cache namespaces, the pending queue, and the
    /// last-sync timestamp. Used on sign-out so nothing leaks into the next
    /// session.
    pub async fn clear_cache(&self) {
        self.cache.clear_all().await;
        self.queue.clear().await;
        if let Err(e) = self.local.delete(super::LAST_SYNC_KEY).await {
            warn!(error = %e, "Failed to delete last-sync timestamp");
        }
        self.status.update(StatusPatch {
            pending_operations: Some(0),
            last_sync: Some(None),
            ..StatusPatch::default()
        });
        info!("Cache and pending queue cleared");
    }

    async fn cached_or_empty(&self, key: &str, habit_id: &str, user_id: &str) -> HabitStreak {
        match self.cache.streaks().get(key).await {
            Some(streak) => streak,
            None => HabitStreak::empty(habit_id, user_id),
        }
    }
}
