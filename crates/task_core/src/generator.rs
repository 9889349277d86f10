use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::instance::{Subtask, TaskId, TaskInstance, TaskKind};
use crate::recurrence::{next_occurrences, EndCondition, InvalidRuleError, RecurrenceRule};

/// Forward horizon within which pending occurrences are kept materialized.
pub const PLANNING_WINDOW_DAYS: i64 = 30;
/// Instance cap for a series with no end condition.
pub const NEVER_ENDING_CAP: usize = 20;
/// Instance cap for a series bounded by count or end date.
pub const BOUNDED_CAP: usize = 30;
/// How many occurrences one window extension may add.
pub const REFILL_BATCH: usize = 10;

/// Payload for a new recurring or routine series. The seed id is reused for
/// occurrence 0 so starting a series feels like editing one task.
#[derive(Debug, Clone)]
pub struct SeriesDefinition {
    pub seed_id: TaskId,
    pub title: String,
    pub description: String,
    pub start: NaiveDate,
    pub due_time: Option<NaiveTime>,
    pub subtasks: Vec<Subtask>,
    pub tags: Vec<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub notes: String,
}

impl SeriesDefinition {
    pub fn new(seed_id: TaskId, title: impl Into<String>, start: NaiveDate) -> Self {
        Self {
            seed_id,
            title: title.into(),
            description: String::new(),
            start,
            due_time: None,
            subtasks: Vec::new(),
            tags: Vec::new(),
            icon: None,
            color: None,
            notes: String::new(),
        }
    }
}

/// Materializes the planning window for a new recurring series. All
/// occurrences share a freshly minted group id and carry the rule as their
/// per-instance snapshot; indices run 0..k-1 in generation order.
pub fn generate_series(
    definition: &SeriesDefinition,
    rule: &RecurrenceRule,
    now: DateTime<Utc>,
) -> Result<Vec<TaskInstance>, InvalidRuleError> {
    rule.validate_for_start(definition.start)?;

    let horizon = now.date_naive() + Duration::days(PLANNING_WINDOW_DAYS);
    let (cap, bounded_by_window) = match rule.end {
        EndCondition::AfterOccurrences(n) => ((n as usize).min(BOUNDED_CAP), false),
        EndCondition::OnDate(_) => (BOUNDED_CAP, true),
        EndCondition::Never => (NEVER_ENDING_CAP, true),
    };
    if cap == 0 {
        return Ok(Vec::new());
    }

    // Occurrence 0 is the start date itself.
    let mut dates = vec![definition.start];
    for candidate in next_occurrences(rule, definition.start, cap - 1)? {
        if bounded_by_window && candidate > horizon {
            break;
        }
        // One instance per calendar day, first wins.
        if !dates.contains(&candidate) {
            dates.push(candidate);
        }
    }
    dates.truncate(cap);

    let group_id = Uuid::new_v4();
    let instances = dates
        .into_iter()
        .enumerate()
        .map(|(index, due_date)| {
            let id = if index == 0 {
                definition.seed_id
            } else {
                Uuid::new_v4()
            };
            let mut task = occurrence_from_definition(
                definition,
                id,
                due_date,
                TaskKind::RecurringOccurrence,
                now,
            );
            task.recurrence_group_id = Some(group_id);
            task.recurrence_index = Some(index as u32);
            task.rule_snapshot = Some(rule.clone());
            task
        })
        .collect();
    Ok(instances)
}

/// Materializes a routine series: one occurrence per calendar day from the
/// start through the planning window, sharing a fresh routine group id.
pub fn generate_routine(definition: &SeriesDefinition, now: DateTime<Utc>) -> Vec<TaskInstance> {
    let horizon = now.date_naive() + Duration::days(PLANNING_WINDOW_DAYS);
    let group_id = Uuid::new_v4();

    let mut instances = Vec::new();
    let mut due_date = definition.start;
    while due_date <= horizon && instances.len() < BOUNDED_CAP {
        let id = if instances.is_empty() {
            definition.seed_id
        } else {
            Uuid::new_v4()
        };
        let mut task =
            occurrence_from_definition(definition, id, due_date, TaskKind::RoutineOccurrence, now);
        task.routine_group_id = Some(group_id);
        instances.push(task);
        due_date += Duration::days(1);
    }
    instances
}

/// Builds one additional occurrence for an existing group, copying the
/// template's payload and snapshots with fresh identity and bookkeeping.
pub fn extend_occurrence(
    template: &TaskInstance,
    due_date: NaiveDate,
    index: u32,
    now: DateTime<Utc>,
) -> TaskInstance {
    let mut task = TaskInstance::new(
        Uuid::new_v4(),
        template.title.clone(),
        due_date,
        template.kind,
        now,
    );
    task.description = template.description.clone();
    task.due_time = template.due_time;
    task.recurrence_group_id = template.recurrence_group_id;
    task.recurrence_index = Some(index);
    task.rule_snapshot = template.rule_snapshot.clone();
    task.routine_group_id = template.routine_group_id;
    task.subtasks = template
        .subtasks
        .iter()
        .map(|subtask| Subtask {
            title: subtask.title.clone(),
            is_completed: false,
        })
        .collect();
    task.tags = template.tags.clone();
    task.icon = template.icon.clone();
    task.color = template.color.clone();
    task.notes = template.notes.clone();
    task
}

fn occurrence_from_definition(
    definition: &SeriesDefinition,
    id: TaskId,
    due_date: NaiveDate,
    kind: TaskKind,
    now: DateTime<Utc>,
) -> TaskInstance {
    let mut task = TaskInstance::new(id, definition.title.clone(), due_date, kind, now);
    task.description = definition.description.clone();
    task.due_time = definition.due_time;
    task.subtasks = definition.subtasks.clone();
    task.tags = definition.tags.clone();
    task.icon = definition.icon.clone();
    task.color = definition.color.clone();
    task.notes = definition.notes.clone();
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use std::collections::HashSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn never_ending_daily_series_fills_window_up_to_cap() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Stretch", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1);
        let instances = generate_series(&definition, &rule, now()).unwrap();

        assert_eq!(instances.len(), NEVER_ENDING_CAP);
        let dates: HashSet<NaiveDate> = instances.iter().map(|task| task.due_date).collect();
        assert_eq!(dates.len(), instances.len(), "no duplicate calendar days");
    }

    #[test]
    fn never_ending_weekly_series_stays_inside_the_window() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Review", date(2024, 1, 1));
        let rule = RecurrenceRule::weekly(1, [Weekday::Mon]);
        let instances = generate_series(&definition, &rule, now()).unwrap();

        assert!(instances.len() <= NEVER_ENDING_CAP);
        let horizon = date(2024, 1, 31);
        assert!(instances.iter().all(|task| task.due_date <= horizon));
    }

    #[test]
    fn after_n_generates_exactly_n() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Report", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1).ending(EndCondition::AfterOccurrences(5));
        let instances = generate_series(&definition, &rule, now()).unwrap();
        assert_eq!(instances.len(), 5);
        assert_eq!(instances[4].due_date, date(2024, 1, 5));
    }

    #[test]
    fn after_n_is_capped_at_thirty() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Report", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1).ending(EndCondition::AfterOccurrences(90));
        let instances = generate_series(&definition, &rule, now()).unwrap();
        assert_eq!(instances.len(), BOUNDED_CAP);
    }

    #[test]
    fn on_date_stops_at_the_end_date() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Sprint", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1).ending(EndCondition::OnDate(date(2024, 1, 6)));
        let instances = generate_series(&definition, &rule, now()).unwrap();
        assert_eq!(instances.len(), 6);
        assert_eq!(instances.last().unwrap().due_date, date(2024, 1, 6));
    }

    #[test]
    fn seed_id_is_reused_for_occurrence_zero_only() {
        let seed = Uuid::new_v4();
        let definition = SeriesDefinition::new(seed, "Stretch", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1).ending(EndCondition::AfterOccurrences(3));
        let instances = generate_series(&definition, &rule, now()).unwrap();

        assert_eq!(instances[0].id, seed);
        assert!(instances[1..].iter().all(|task| task.id != seed));
    }

    #[test]
    fn series_shares_one_group_with_monotonic_indices() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Stretch", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1).ending(EndCondition::AfterOccurrences(4));
        let instances = generate_series(&definition, &rule, now()).unwrap();

        let group = instances[0].recurrence_group_id.expect("group id");
        for (position, task) in instances.iter().enumerate() {
            assert_eq!(task.recurrence_group_id, Some(group));
            assert_eq!(task.recurrence_index, Some(position as u32));
            assert_eq!(task.kind, TaskKind::RecurringOccurrence);
            assert!(task.rule_snapshot.is_some());
        }
    }

    #[test]
    fn routine_generates_one_per_day_in_window() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Morning pages", date(2024, 1, 1));
        let instances = generate_routine(&definition, now());

        assert_eq!(instances.len(), BOUNDED_CAP);
        assert_eq!(instances[0].due_date, date(2024, 1, 1));
        assert_eq!(instances[1].due_date, date(2024, 1, 2));
        let group = instances[0].routine_group_id.expect("routine group id");
        assert!(instances
            .iter()
            .all(|task| task.routine_group_id == Some(group)
                && task.kind == TaskKind::RoutineOccurrence));
    }

    #[test]
    fn extend_occurrence_resets_bookkeeping() {
        let definition = SeriesDefinition::new(Uuid::new_v4(), "Stretch", date(2024, 1, 1));
        let rule = RecurrenceRule::daily(1).ending(EndCondition::AfterOccurrences(2));
        let instances = generate_series(&definition, &rule, now()).unwrap();
        let template = instances[1].mark_completed(10, now());

        let extended = extend_occurrence(&template, date(2024, 2, 1), 7, now());
        assert_eq!(extended.recurrence_group_id, template.recurrence_group_id);
        assert_eq!(extended.recurrence_index, Some(7));
        assert_eq!(extended.points_earned, 0);
        assert!(extended.completed_at.is_none());
        assert!(extended.is_pending());
        assert_ne!(extended.id, template.id);
    }
}
