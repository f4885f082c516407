//! Domain data types that flow through the sync engine.
//!
//! The engine never owns the truth about any of these: the remote document
//! store does. Everything here is either a local mirror of a remote document
//! ([`HabitStreak`], [`Completion`]), a derived read model ([`CalendarMonth`],
//! [`HabitAnalytics`]), or sync bookkeeping ([`SyncOperation`], [`SyncStatus`]).

use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Cached data categories, each with its own TTL and size bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Completion,
    Streak,
    Calendar,
    Analytics,
}

impl DataKind {
    /// Time-to-live before a cached entry of this kind goes stale.
    ///
    /// Completions change on every user action, so they expire quickly.
    /// Streaks and calendars move daily. Analytics are expensive to rebuild
    /// and tolerate staleness, so they live the longest.
    #[must_use]
    pub fn ttl(self) -> Duration {
        match self {
            Self::Completion => Duration::from_secs(5 * 60),
            Self::Streak => Duration::from_secs(30 * 60),
            Self::Calendar => Duration::from_secs(30 * 60),
            Self::Analytics => Duration::from_secs(2 * 60 * 60),
        }
    }

    /// Max entries held in memory for this kind before LRU eviction.
    #[must_use]
    pub fn max_entries(self) -> usize {
        match self {
            Self::Completion => 500,
            Self::Streak => 200,
            Self::Calendar => 60,
            Self::Analytics => 50,
        }
    }

    /// Whether entries of this kind are mirrored to the persisted tier.
    ///
    /// Calendars and analytics are large derived payloads that are cheap to
    /// rebuild from the mirrored streaks/completions, so they stay memory-only.
    #[must_use]
    pub fn persist_worthy(self) -> bool {
        matches!(self, Self::Completion | Self::Streak)
    }

    /// Key prefix for this kind's persisted namespace.
    #[must_use]
    pub fn key_prefix(self) -> &'static str {
        match self {
            Self::Completion => "completion::",
            Self::Streak => "streak::",
            Self::Calendar => "calendar::",
            Self::Analytics => "analytics::",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completion => write!(f, "completion"),
            Self::Streak => write!(f, "streak"),
            Self::Calendar => write!(f, "calendar"),
            Self::Analytics => write!(f, "analytics"),
        }
    }
}

/// A single recorded habit completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub habit_id: String,
    pub user_id: String,
    /// Calendar day the habit was completed (user-local).
    pub completed_on: NaiveDate,
    /// Wall-clock moment the completion was recorded on this device.
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Completion {
    pub fn new(habit_id: impl Into<String>, user_id: impl Into<String>, completed_on: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            habit_id: habit_id.into(),
            user_id: user_id.into(),
            completed_on,
            recorded_at: Utc::now(),
            note: None,
        }
    }
}

/// A milestone reached within a streak (7 days, 30 days, ...).
///
/// Milestones are append-only and immutable once created, which is why they
/// merge with plain remote-wins semantics instead of the streak conflict rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakMilestone {
    pub days: u32,
    pub reached_on: NaiveDate,
}

/// Local mirror of the remote streak aggregate.
///
/// Never the source of truth; exists so reads succeed offline and optimistic
/// writes are visible before the remote store confirms them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitStreak {
    pub habit_id: String,
    pub user_id: String,
    pub current_streak: u32,
    pub best_streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completion_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak_start_date: Option<NaiveDate>,
    pub freezes_available: u32,
    pub freezes_used: u32,
    #[serde(default)]
    pub milestones: Vec<StreakMilestone>,
}

impl HabitStreak {
    /// Empty streak for a habit with no history.
    pub fn empty(habit_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            habit_id: habit_id.into(),
            user_id: user_id.into(),
            current_streak: 0,
            best_streak: 0,
            last_completion_date: None,
            streak_start_date: None,
            freezes_available: 0,
            freezes_used: 0,
            milestones: Vec::new(),
        }
    }

    /// Rebuild streak counters from a completion history.
    ///
    /// The current streak is anchored at `today` (or yesterday, which keeps
    /// the streak alive until the day is actually missed) and counts backward
    /// over consecutive calendar days. The best streak scans the whole
    /// history. Duplicate completions on the same day count once.
    pub fn from_completions(
        habit_id: impl Into<String>,
        user_id: impl Into<String>,
        completions: &[Completion],
        today: NaiveDate,
    ) -> Self {
        let mut days: Vec<NaiveDate> = completions.iter().map(|c| c.completed_on).collect();
        days.sort_unstable();
        days.dedup();

        let mut streak = Self::empty(habit_id, user_id);
        if days.is_empty() {
            return streak;
        }

        streak.last_completion_date = days.last().copied();

        // Best streak: longest run of consecutive days anywhere in history.
        let mut best: u32 = 1;
        let mut run: u32 = 1;
        for pair in days.windows(2) {
            if pair[1] - pair[0] == chrono::Duration::days(1) {
                run += 1;
                best = best.max(run);
            } else {
                run = 1;
            }
        }

        // Current streak: walk back from the most recent completion, but only
        // if that completion is today or yesterday. Older than that, the
        // streak is broken and current resets to zero.
        if let Some(&last) = days.last() {
            if today - last <= chrono::Duration::days(1) {
                let mut current: u32 = 1;
                let mut cursor = last;
                for &day in days.iter().rev().skip(1) {
                    if cursor - day == chrono::Duration::days(1) {
                        current += 1;
                        cursor = day;
                    } else {
                        break;
                    }
                }
                streak.current_streak = current;
                streak.streak_start_date = Some(cursor);
            }
        }

        streak.best_streak = best.max(streak.current_streak);
        streak
    }
}

/// One month of completion state, for calendar views. Derived, memory-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarMonth {
    pub habit_id: String,
    pub year: i32,
    pub month: u32,
    pub completed_days: Vec<u32>,
}

impl CalendarMonth {
    /// Project a completion history onto one month.
    pub fn project(habit_id: impl Into<String>, year: i32, month: u32, completions: &[Completion]) -> Self {
        let mut completed_days: Vec<u32> = completions
            .iter()
            .filter(|c| c.completed_on.year() == year && c.completed_on.month() == month)
            .map(|c| c.completed_on.day())
            .collect();
        completed_days.sort_unstable();
        completed_days.dedup();
        Self { habit_id: habit_id.into(), year, month, completed_days }
    }
}

/// Aggregate statistics for a habit. Derived, memory-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitAnalytics {
    pub habit_id: String,
    pub total_completions: u32,
    pub completion_rate_30d: f64,
    pub best_streak: u32,
}

/// Entity collection a queued operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Completion,
    Streak,
    Milestone,
}

impl EntityKind {
    /// Remote collection name for this entity.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Completion => "completions",
            Self::Streak => "streaks",
            Self::Milestone => "milestones",
        }
    }
}

/// Mutation verb of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

/// A pending mutation awaiting delivery to the remote store.
///
/// Created when a write cannot be confirmed against the remote store
/// immediately; destroyed on successful execution or when `retry_count`
/// exceeds the drop ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique, stable across process restarts (persisted with the queue).
    pub id: String,
    pub entity: EntityKind,
    pub action: OpAction,
    pub payload: Value,
    pub owner_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    pub fn new(
        entity: EntityKind,
        action: OpAction,
        payload: Value,
        owner_user_id: impl Into<String>,
        entity_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity,
            action,
            payload,
            owner_user_id: owner_user_id.into(),
            entity_id,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_attempt_at: None,
        }
    }
}

/// Process-wide observable sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_operations: usize,
    pub sync_in_progress: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: true, // Assume online until the first probe says otherwise
            last_sync: None,
            pending_operations: 0,
            sync_in_progress: false,
        }
    }
}
