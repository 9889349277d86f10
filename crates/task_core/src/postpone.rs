use chrono::{DateTime, NaiveDate, Utc};

use crate::instance::{PostponeRecord, TaskInstance};

/// Moves a pending instance to a new date, recording the move in its history.
///
/// The penalty is stored non-positive regardless of the caller's sign. The
/// first postpone of an instance's life captures its original due date; the
/// status stays pending, postponing never archives or re-parents.
pub fn apply_postpone(
    task: &TaskInstance,
    new_date: NaiveDate,
    reason: Option<&str>,
    penalty: i64,
    now: DateTime<Utc>,
) -> TaskInstance {
    let penalty_applied = -penalty.abs();
    let record = PostponeRecord {
        from_date: task.due_date,
        from_time: task.due_time,
        to_date: new_date,
        reason: reason.map(str::to_string),
        penalty_applied,
        postponed_at: now,
        was_recurring: task.is_recurring(),
        recurrence_group_id: task.recurrence_group_id,
        recurrence_index: task.recurrence_index,
    };

    let mut next = task.clone();
    if next.postpone_history.is_empty() && next.original_due_date.is_none() {
        next.original_due_date = Some(task.due_date);
    }
    next.due_date = new_date;
    next.postpone_reason = record.reason.clone();
    next.postponed_at = Some(now);
    next.postpone_history.push(record);
    next.postpone_count += 1;
    next.cumulative_postpone_penalty += penalty_applied;

    debug_assert!(next.invariants_hold());
    next
}

/// Reverses the single most recent postpone. Returns `None` when there is
/// nothing to undo; that is a no-op, not an error.
pub fn undo_last_postpone(task: &TaskInstance) -> Option<TaskInstance> {
    let mut next = task.clone();
    let record = next.postpone_history.pop()?;

    next.due_date = record.from_date;
    next.due_time = record.from_time;
    next.postpone_count = next.postpone_count.saturating_sub(1);
    next.cumulative_postpone_penalty -= record.penalty_applied;

    match next.postpone_history.last() {
        Some(previous) => {
            next.postpone_reason = previous.reason.clone();
            next.postponed_at = Some(previous.postponed_at);
        }
        None => {
            next.original_due_date = None;
            next.postpone_reason = None;
            next.postponed_at = None;
            // The running sum is exact; an empty history means zero penalty.
            debug_assert_eq!(next.cumulative_postpone_penalty, 0);
        }
    }

    debug_assert!(next.invariants_hold());
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{TaskKind, TaskStatus};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> TaskInstance {
        TaskInstance::new(
            Uuid::new_v4(),
            "File expenses",
            date(2024, 3, 10),
            TaskKind::Standalone,
            fixed_now(),
        )
    }

    #[test]
    fn two_postpones_accumulate_history_and_penalty() {
        let task = sample();
        let once = apply_postpone(&task, date(2024, 3, 12), Some("travel"), -5, fixed_now());
        let twice = apply_postpone(&once, date(2024, 3, 15), None, -5, fixed_now());

        assert_eq!(twice.postpone_count, 2);
        assert_eq!(twice.cumulative_postpone_penalty, -10);
        assert_eq!(twice.original_due_date, Some(date(2024, 3, 10)));
        assert_eq!(twice.due_date, date(2024, 3, 15));
        assert_eq!(twice.status, TaskStatus::Pending);

        let undone = undo_last_postpone(&twice).expect("history present");
        assert_eq!(undone.due_date, date(2024, 3, 12));
        assert_eq!(undone.postpone_count, 1);
        assert_eq!(undone.cumulative_postpone_penalty, -5);
        assert_eq!(undone.original_due_date, Some(date(2024, 3, 10)));
    }

    #[test]
    fn positive_penalty_input_is_negated() {
        let moved = apply_postpone(&sample(), date(2024, 3, 12), None, 7, fixed_now());
        assert_eq!(moved.cumulative_postpone_penalty, -7);
        assert_eq!(moved.postpone_history[0].penalty_applied, -7);
    }

    #[test]
    fn postpone_then_undo_round_trips_exactly() {
        let task = sample();
        let moved = apply_postpone(&task, date(2024, 3, 20), Some("sick"), -3, fixed_now());
        let undone = undo_last_postpone(&moved).expect("history present");

        assert_eq!(undone.due_date, task.due_date);
        assert_eq!(undone.due_time, task.due_time);
        assert_eq!(undone.postpone_count, task.postpone_count);
        assert_eq!(
            undone.cumulative_postpone_penalty,
            task.cumulative_postpone_penalty
        );
        assert_eq!(undone.original_due_date, None);
        assert_eq!(undone.postpone_reason, None);
        assert_eq!(undone.postponed_at, None);
    }

    #[test]
    fn undo_with_empty_history_is_a_no_op() {
        assert!(undo_last_postpone(&sample()).is_none());
    }

    #[test]
    fn undo_restores_previous_reason_when_history_remains() {
        let task = sample();
        let once = apply_postpone(&task, date(2024, 3, 12), Some("first"), -1, fixed_now());
        let twice = apply_postpone(&once, date(2024, 3, 14), Some("second"), -1, fixed_now());
        let undone = undo_last_postpone(&twice).expect("history present");
        assert_eq!(undone.postpone_reason.as_deref(), Some("first"));
    }

    #[test]
    fn recurring_context_is_snapshotted_into_the_record() {
        let mut task = sample();
        task.kind = TaskKind::RecurringOccurrence;
        task.recurrence_group_id = Some(Uuid::new_v4());
        task.recurrence_index = Some(3);

        let moved = apply_postpone(&task, date(2024, 3, 12), None, -2, fixed_now());
        let record = &moved.postpone_history[0];
        assert!(record.was_recurring);
        assert_eq!(record.recurrence_group_id, task.recurrence_group_id);
        assert_eq!(record.recurrence_index, Some(3));
    }

    proptest! {
        // Count and penalty bookkeeping must agree with the history after any
        // interleaving of postpones and undos.
        #[test]
        fn bookkeeping_matches_history_under_any_sequence(
            steps in proptest::collection::vec((0u8..4, 1i64..60, 1i64..500), 1..40)
        ) {
            let mut task = sample();
            for (action, day_offset, penalty) in steps {
                if action == 0 {
                    task = undo_last_postpone(&task).unwrap_or(task);
                } else {
                    let new_date = task.due_date + chrono::Duration::days(day_offset);
                    task = apply_postpone(&task, new_date, None, penalty, fixed_now());
                }
                prop_assert!(task.invariants_hold());
                prop_assert_eq!(task.postpone_count as usize, task.postpone_history.len());
                let history_sum: i64 = task
                    .postpone_history
                    .iter()
                    .map(|entry| entry.penalty_applied)
                    .sum();
                prop_assert_eq!(task.cumulative_postpone_penalty, history_sum);
            }
        }

        #[test]
        fn undo_exactly_reverses_the_last_postpone(
            day_offset in 1i64..90,
            penalty in 0i64..100
        ) {
            let task = sample();
            let new_date = task.due_date + chrono::Duration::days(day_offset);
            let moved = apply_postpone(&task, new_date, Some("shift"), penalty, fixed_now());
            let undone = undo_last_postpone(&moved).expect("history present");
            prop_assert_eq!(undone.due_date, task.due_date);
            prop_assert_eq!(undone.postpone_count, task.postpone_count);
            prop_assert_eq!(
                undone.cumulative_postpone_penalty,
                task.cumulative_postpone_penalty
            );
        }
    }
}
