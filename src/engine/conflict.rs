//! Deterministic conflict resolution between local and remote state.
//!
//! The streak rule favors "most progress is true" over last-write-wins: a
//! stale offline client must not silently erase a newer streak recorded on
//! another device just because its write landed later.
//!
//! Completions and milestones are append-only and immutable once created, so
//! they take the remote version wholesale.

use crate::domain::HabitStreak;

/// Which side a resolution picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// Total order over competing streak versions:
///
/// 1. the side with the later `last_completion_date` wins;
/// 2. equal dates: the higher `current_streak` wins;
/// 3. a side with any completion date beats a side with none.
///
/// Exact ties resolve to `Local`, which keeps resolution idempotent when the
/// two sides are equal.
#[must_use]
pub fn pick_streak_winner(local: &HabitStreak, remote: &HabitStreak) -> Winner {
    match (local.last_completion_date, remote.last_completion_date) {
        (Some(l), Some(r)) if l > r => Winner::Local,
        (Some(l), Some(r)) if r > l => Winner::Remote,
        (Some(_), None) => Winner::Local,
        (None, Some(_)) => Winner::Remote,
        // Dates equal (or both absent): more progress wins
        _ => {
            if remote.current_streak > local.current_streak {
                Winner::Remote
            } else {
                Winner::Local
            }
        }
    }
}

/// Resolve two streak versions to the value the cache should hold.
#[must_use]
pub fn resolve_streak(local: &HabitStreak, remote: &HabitStreak) -> HabitStreak {
    match pick_streak_winner(local, remote) {
        Winner::Local => local.clone(),
        Winner::Remote => remote.clone(),
    }
}
