use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceRule;

pub type TaskId = Uuid;

/// How an instance came to exist. Fixed at creation; never inferred from
/// which optional fields happen to be set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Standalone,
    RecurringOccurrence,
    RoutineOccurrence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    NotDone,
    /// Archive state written by the superseded postpone model. New code never
    /// sets it; undo restores it to `Pending`.
    Postponed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subtask {
    pub title: String,
    pub is_completed: bool,
}

/// One date-move applied to an instance. The ordered list of these enables
/// exact single-step reversal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostponeRecord {
    pub from_date: NaiveDate,
    pub from_time: Option<NaiveTime>,
    pub to_date: NaiveDate,
    pub reason: Option<String>,
    /// Always stored non-positive.
    pub penalty_applied: i64,
    pub postponed_at: DateTime<Utc>,
    pub was_recurring: bool,
    pub recurrence_group_id: Option<Uuid>,
    pub recurrence_index: Option<u32>,
}

/// One concrete, datable unit of work. Instances are immutable values: every
/// mutation builds a new one and the service replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInstance {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: NaiveDate,
    pub due_time: Option<NaiveTime>,
    pub kind: TaskKind,
    pub status: TaskStatus,

    pub recurrence_group_id: Option<Uuid>,
    pub recurrence_index: Option<u32>,
    /// Rule active when this occurrence was generated. Held per instance so
    /// an edit regenerates only the affected tail.
    pub rule_snapshot: Option<RecurrenceRule>,
    pub routine_group_id: Option<Uuid>,
    pub routine_status: Option<String>,

    pub postpone_count: u32,
    pub postpone_history: Vec<PostponeRecord>,
    /// Set on the first postpone of this instance's life, cleared when the
    /// history empties again.
    pub original_due_date: Option<NaiveDate>,
    pub postpone_reason: Option<String>,
    pub postponed_at: Option<DateTime<Utc>>,
    pub cumulative_postpone_penalty: i64,

    pub completed_at: Option<DateTime<Utc>>,
    pub points_earned: i64,
    pub not_done_reason: Option<String>,
    pub reflection: Option<String>,

    pub subtasks: Vec<Subtask>,
    pub tags: Vec<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,

    // Superseded chain-postpone fields, kept representable for migration.
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    #[serde(default)]
    pub root_task_id: Option<TaskId>,
    #[serde(default)]
    pub postponed_to: Option<NaiveDate>,
    #[serde(default)]
    pub legacy_postponed_at: Option<DateTime<Utc>>,
}

impl TaskInstance {
    pub fn new(
        id: TaskId,
        title: impl Into<String>,
        due_date: NaiveDate,
        kind: TaskKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            due_date,
            due_time: None,
            kind,
            status: TaskStatus::Pending,
            recurrence_group_id: None,
            recurrence_index: None,
            rule_snapshot: None,
            routine_group_id: None,
            routine_status: None,
            postpone_count: 0,
            postpone_history: Vec::new(),
            original_due_date: None,
            postpone_reason: None,
            postponed_at: None,
            cumulative_postpone_penalty: 0,
            completed_at: None,
            points_earned: 0,
            not_done_reason: None,
            reflection: None,
            subtasks: Vec::new(),
            tags: Vec::new(),
            icon: None,
            color: None,
            notes: String::new(),
            created_at,
            parent_task_id: None,
            root_task_id: None,
            postponed_to: None,
            legacy_postponed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_recurring(&self) -> bool {
        self.kind == TaskKind::RecurringOccurrence
    }

    pub fn is_routine(&self) -> bool {
        self.kind == TaskKind::RoutineOccurrence
    }

    /// Completed copy with the completion stamp and earned points recorded.
    pub fn mark_completed(&self, points: i64, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = TaskStatus::Completed;
        next.completed_at = Some(now);
        next.points_earned = points;
        if next.is_routine() {
            next.routine_status = Some("done".to_string());
        }
        next
    }

    /// Skipped copy. Skipping earns nothing.
    pub fn mark_not_done(&self, reason: Option<&str>) -> Self {
        let mut next = self.clone();
        next.status = TaskStatus::NotDone;
        next.not_done_reason = reason.map(str::to_string);
        next.points_earned = 0;
        if next.is_routine() {
            next.routine_status = Some("skipped".to_string());
        }
        next
    }

    /// Checks the postpone bookkeeping invariants. Must hold after every
    /// mutation; exercised by debug assertions and tests.
    pub fn invariants_hold(&self) -> bool {
        let history_sum: i64 = self
            .postpone_history
            .iter()
            .map(|entry| entry.penalty_applied)
            .sum();
        self.postpone_count as usize == self.postpone_history.len()
            && self.cumulative_postpone_penalty == history_sum
            && (self.original_due_date.is_some() == !self.postpone_history.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample() -> TaskInstance {
        TaskInstance::new(
            Uuid::new_v4(),
            "Water the plants",
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            TaskKind::Standalone,
            fixed_now(),
        )
    }

    #[test]
    fn fresh_instance_satisfies_invariants() {
        let task = sample();
        assert!(task.invariants_hold());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.postpone_count, 0);
        assert!(task.original_due_date.is_none());
    }

    #[test]
    fn completing_stamps_time_and_points() {
        let done = sample().mark_completed(10, fixed_now());
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.completed_at, Some(fixed_now()));
        assert_eq!(done.points_earned, 10);
    }

    #[test]
    fn skipping_earns_nothing() {
        let skipped = sample().mark_not_done(Some("out of time"));
        assert_eq!(skipped.status, TaskStatus::NotDone);
        assert_eq!(skipped.points_earned, 0);
        assert_eq!(skipped.not_done_reason.as_deref(), Some("out of time"));
    }

    #[test]
    fn routine_completion_sets_routine_status() {
        let mut task = sample();
        task.kind = TaskKind::RoutineOccurrence;
        let done = task.mark_completed(5, fixed_now());
        assert_eq!(done.routine_status.as_deref(), Some("done"));
    }

    #[test]
    fn instance_serde_round_trip() {
        let task = sample();
        let json = serde_json::to_string(&task).expect("serialize");
        let back: TaskInstance = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, task);
    }
}
