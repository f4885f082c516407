//! Realtime change propagation.
//!
//! One subscription per watched collection, scoped to the session's user.
//! Each pushed change is decoded into its domain type, resolved against the
//! cached copy, and written back; removals delete the cache entry. Events
//! for one document are applied in the order the server sent them.
//!
//! A closed stream looks like a dead connection, so it forces offline mode
//! rather than silently missing updates; the connectivity monitor
//! re-subscribes when it sees the store again.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{Completion, EntityKind, HabitStreak};
use crate::remote::{ChangeEvent, ChangeType, QueryFilter};

use super::{derived_dependencies, StatusPatch, SyncEngine};

impl SyncEngine {
    /// (Re-)establish realtime subscriptions for the watched collections.
    pub(super) async fn spawn_realtime(self: &Arc<Self>) {
        for entity in [EntityKind::Streak, EntityKind::Completion] {
            let collection = entity.collection();
            let filter = QueryFilter::for_user(self.user_id.as_str());
            let mut receiver = match self.remote.subscribe(collection, filter).await {
                Ok(receiver) => receiver,
                Err(e) => {
                    warn!(collection, error = %e, "Realtime subscription failed");
                    self.note_remote_error(&e);
                    continue;
                }
            };

            let engine = Arc::clone(self);
            let task = tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    crate::metrics::record_realtime_event(collection, &event.change.to_string());
                    match entity {
                        EntityKind::Streak => engine.apply_streak_event(event).await,
                        EntityKind::Completion => engine.apply_completion_event(event).await,
                        EntityKind::Milestone => {}
                    }
                }
                // Stream closed underneath us: treat as a network failure
                warn!(collection, "Realtime stream closed, forcing offline mode");
                crate::metrics::set_online(false);
                engine.status.update(StatusPatch::online(false));
            });
            self.tasks.lock().push(task);
            debug!(collection, "Realtime subscription established");
        }
    }

    /// Apply one streak change: resolve against the cached mirror, keep the
    /// winner. Removals drop the mirror.
    pub(super) async fn apply_streak_event(&self, event: ChangeEvent) {
        if event.change == ChangeType::Removed {
            self.cache().streaks().invalidate(&event.doc_id);
            return;
        }

        let remote_streak: HabitStreak = match serde_json::from_value(event.data) {
            Ok(streak) => streak,
            Err(e) => {
                warn!(doc_id = %event.doc_id, error = %e, "Undecodable streak change, skipping");
                return;
            }
        };

        let resolved = match self.cache().streaks().get(&event.doc_id).await {
            Some(local) => super::resolve_streak(&local, &remote_streak),
            None => remote_streak,
        };
        let deps = derived_dependencies(&resolved.habit_id);
        self.cache().put_streak(&event.doc_id, resolved, &deps).await;
    }

    /// Apply one completion change. Completions are append-only, so the
    /// remote version overwrites whatever is cached.
    pub(super) async fn apply_completion_event(&self, event: ChangeEvent) {
        if event.change == ChangeType::Removed {
            self.cache().completions().invalidate(&event.doc_id);
            if let Some(habit_id) = event.data.get("habit_id").and_then(serde_json::Value::as_str) {
                for dep in derived_dependencies(habit_id) {
                    self.cache().invalidate_pattern(&dep);
                }
            }
            return;
        }

        let completion: Completion = match serde_json::from_value(event.data) {
            Ok(completion) => completion,
            Err(e) => {
                warn!(doc_id = %event.doc_id, error = %e, "Undecodable completion change, skipping");
                return;
            }
        };
        let deps = derived_dependencies(&completion.habit_id);
        self.cache().put_completion(&event.doc_id, completion, &deps).await;
    }
}
