use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::instance::{TaskInstance, TaskStatus};

/// Siblings created within this many seconds before the completion stamp are
/// still treated as products of that completion when it is undone.
pub const UNDO_SIBLING_GRACE_SECONDS: i64 = 5;

/// Which reversal procedure applies to an instance. Computed once per undo
/// call and matched exhaustively; first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoClass {
    Completed,
    NotDone,
    LegacyPostponed,
    HasPostponeHistory,
    LegacyChainChild,
    Unknown,
}

pub fn classify(task: &TaskInstance) -> UndoClass {
    match task.status {
        TaskStatus::Completed => UndoClass::Completed,
        TaskStatus::NotDone => UndoClass::NotDone,
        TaskStatus::Postponed => UndoClass::LegacyPostponed,
        TaskStatus::Pending => {
            if task.postpone_count > 0 || !task.postpone_history.is_empty() {
                UndoClass::HasPostponeHistory
            } else if task.parent_task_id.is_some() {
                UndoClass::LegacyChainChild
            } else {
                UndoClass::Unknown
            }
        }
    }
}

/// Reverts a completion on the instance itself. Pruning of auto-generated
/// siblings is the store's job; see `generated_by_completion`.
pub fn undo_complete(task: &TaskInstance) -> TaskInstance {
    let mut next = task.clone();
    next.status = TaskStatus::Pending;
    next.completed_at = None;
    next.points_earned = 0;
    next.not_done_reason = None;
    next.reflection = None;
    reset_subtasks(&mut next);
    if next.is_routine() {
        next.routine_status = None;
    }
    next
}

pub fn undo_skip(task: &TaskInstance) -> TaskInstance {
    let mut next = task.clone();
    next.status = TaskStatus::Pending;
    next.not_done_reason = None;
    next.points_earned = 0;
    if next.is_routine() {
        next.routine_status = None;
    }
    next
}

/// Restores an instance archived by the superseded postpone model.
pub fn undo_legacy_archive(task: &TaskInstance) -> TaskInstance {
    let mut next = task.clone();
    next.status = TaskStatus::Pending;
    next.postponed_to = None;
    next.legacy_postponed_at = None;
    next
}

/// Last-resort reset: pending status, cleared completion and postpone
/// bookkeeping, subtasks fresh, original due date restored if one survives.
pub fn generic_reset(task: &TaskInstance) -> TaskInstance {
    let mut next = task.clone();
    next.status = TaskStatus::Pending;
    next.completed_at = None;
    next.points_earned = 0;
    next.not_done_reason = None;
    next.reflection = None;
    reset_subtasks(&mut next);
    if next.is_routine() {
        next.routine_status = None;
    }
    if let Some(original) = next.original_due_date.take() {
        next.due_date = original;
    }
    next.postpone_history.clear();
    next.postpone_count = 0;
    next.cumulative_postpone_penalty = 0;
    next.postpone_reason = None;
    next.postponed_at = None;
    next
}

/// True when `sibling` was auto-generated by the completion being undone:
/// same group, a higher sequence index, and created at or after the
/// completion stamp (minus the grace buffer).
pub fn generated_by_completion(
    sibling: &TaskInstance,
    group_id: Uuid,
    undone_index: u32,
    completed_at: DateTime<Utc>,
) -> bool {
    let cutoff = completed_at - Duration::seconds(UNDO_SIBLING_GRACE_SECONDS);
    sibling.is_pending()
        && sibling.recurrence_group_id == Some(group_id)
        && sibling
            .recurrence_index
            .is_some_and(|index| index > undone_index)
        && sibling.created_at >= cutoff
}

fn reset_subtasks(task: &mut TaskInstance) {
    for subtask in &mut task.subtasks {
        subtask.is_completed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Subtask, TaskKind};
    use chrono::NaiveDate;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample(kind: TaskKind) -> TaskInstance {
        TaskInstance::new(
            Uuid::new_v4(),
            "Tidy desk",
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            kind,
            fixed_now(),
        )
    }

    #[test]
    fn classification_follows_priority_order() {
        let mut completed = sample(TaskKind::Standalone);
        completed.status = TaskStatus::Completed;
        completed.postpone_count = 2;
        assert_eq!(classify(&completed), UndoClass::Completed);

        let mut skipped = sample(TaskKind::Standalone);
        skipped.status = TaskStatus::NotDone;
        assert_eq!(classify(&skipped), UndoClass::NotDone);

        let mut archived = sample(TaskKind::Standalone);
        archived.status = TaskStatus::Postponed;
        assert_eq!(classify(&archived), UndoClass::LegacyPostponed);

        let mut postponed = sample(TaskKind::Standalone);
        postponed.postpone_count = 1;
        postponed.parent_task_id = Some(Uuid::new_v4());
        assert_eq!(classify(&postponed), UndoClass::HasPostponeHistory);

        let mut chained = sample(TaskKind::Standalone);
        chained.parent_task_id = Some(Uuid::new_v4());
        assert_eq!(classify(&chained), UndoClass::LegacyChainChild);

        assert_eq!(classify(&sample(TaskKind::Standalone)), UndoClass::Unknown);
    }

    #[test]
    fn undo_complete_resets_completion_and_subtasks() {
        let mut task = sample(TaskKind::RoutineOccurrence);
        task.subtasks = vec![Subtask {
            title: "part one".into(),
            is_completed: true,
        }];
        let completed = task.mark_completed(10, fixed_now());

        let reverted = undo_complete(&completed);
        assert_eq!(reverted.status, TaskStatus::Pending);
        assert!(reverted.completed_at.is_none());
        assert_eq!(reverted.points_earned, 0);
        assert!(!reverted.subtasks[0].is_completed);
        assert!(reverted.routine_status.is_none());
    }

    #[test]
    fn undo_skip_clears_reason_and_points() {
        let skipped = sample(TaskKind::Standalone).mark_not_done(Some("too busy"));
        let reverted = undo_skip(&skipped);
        assert_eq!(reverted.status, TaskStatus::Pending);
        assert!(reverted.not_done_reason.is_none());
        assert_eq!(reverted.points_earned, 0);
    }

    #[test]
    fn legacy_archive_restore_clears_pointer_fields() {
        let mut archived = sample(TaskKind::Standalone);
        archived.status = TaskStatus::Postponed;
        archived.postponed_to = Some(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());
        archived.legacy_postponed_at = Some(fixed_now());

        let restored = undo_legacy_archive(&archived);
        assert_eq!(restored.status, TaskStatus::Pending);
        assert!(restored.postponed_to.is_none());
        assert!(restored.legacy_postponed_at.is_none());
    }

    #[test]
    fn generic_reset_restores_original_due_date() {
        let mut task = sample(TaskKind::Standalone);
        task.original_due_date = Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let reset = generic_reset(&task);
        assert_eq!(
            reset.due_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(reset.original_due_date.is_none());
        assert!(reset.invariants_hold());
    }

    #[test]
    fn sibling_prune_predicate_checks_group_index_and_age() {
        let group = Uuid::new_v4();
        let completed_at = fixed_now();

        let mut fresh = sample(TaskKind::RecurringOccurrence);
        fresh.recurrence_group_id = Some(group);
        fresh.recurrence_index = Some(5);
        fresh.created_at = completed_at;
        assert!(generated_by_completion(&fresh, group, 2, completed_at));

        // Earlier history instances survive even in the same group.
        let mut old = fresh.clone();
        old.created_at = completed_at - Duration::hours(1);
        assert!(!generated_by_completion(&old, group, 2, completed_at));

        let mut lower_index = fresh.clone();
        lower_index.recurrence_index = Some(2);
        assert!(!generated_by_completion(&lower_index, group, 2, completed_at));

        let mut other_group = fresh.clone();
        other_group.recurrence_group_id = Some(Uuid::new_v4());
        assert!(!generated_by_completion(&other_group, group, 2, completed_at));

        // Inside the grace buffer still counts as generated by the completion.
        let mut just_before = fresh;
        just_before.created_at = completed_at - Duration::seconds(3);
        assert!(generated_by_completion(&just_before, group, 2, completed_at));
    }
}
