use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::generator::{
    extend_occurrence, generate_routine, generate_series, SeriesDefinition, BOUNDED_CAP,
    NEVER_ENDING_CAP, PLANNING_WINDOW_DAYS, REFILL_BATCH,
};
use crate::instance::{TaskId, TaskInstance, TaskStatus};
use crate::postpone::{apply_postpone, undo_last_postpone};
use crate::recurrence::{next_occurrences, EndCondition, InvalidRuleError, RecurrenceRule};
use crate::reminders::{ReminderEvent, ReminderSink};
use crate::storage::{DurableStore, StorageError};
use crate::undo::{
    classify, generated_by_completion, generic_reset, undo_complete, undo_legacy_archive,
    undo_skip, UndoClass,
};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error(transparent)]
    InvalidRule(#[from] InvalidRuleError),
    #[error(transparent)]
    Persistence(#[from] StorageError),
}

/// What `delete` actually did. Deleting an instance with postpone history and
/// no force flag reverts one postpone instead of destroying the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(TaskId),
    PostponeReverted(TaskInstance),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    CompletionReverted {
        task: TaskInstance,
        removed_siblings: Vec<TaskId>,
    },
    SkipReverted(TaskInstance),
    LegacyArchiveRestored(TaskInstance),
    PostponeReverted(TaskInstance),
    LegacyChainReverted {
        restored: TaskId,
        removed_child: TaskId,
    },
    Reset(TaskInstance),
    NothingToUndo,
}

/// The authoritative task collection. Every mutation goes through here: the
/// in-memory snapshot is updated first, then the durable layer, and reminder
/// events drain to the sink last. A persistence failure triggers a full
/// reload so the snapshot never diverges from storage.
pub struct TaskService {
    // Serializes read-modify-write sequences; plain reads go through `tasks`.
    mutation_lock: Mutex<()>,
    tasks: RwLock<HashMap<TaskId, TaskInstance>>,
    durable: Box<dyn DurableStore>,
    reminder_sink: Option<Box<dyn ReminderSink>>,
    outbox: Mutex<VecDeque<ReminderEvent>>,
    clock: Box<dyn Clock>,
}

pub struct TaskServiceBuilder {
    durable: Box<dyn DurableStore>,
    reminder_sink: Option<Box<dyn ReminderSink>>,
    clock: Box<dyn Clock>,
}

impl TaskServiceBuilder {
    pub fn new(durable: Box<dyn DurableStore>) -> Self {
        Self {
            durable,
            reminder_sink: None,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_reminder_sink(mut self, sink: Box<dyn ReminderSink>) -> Self {
        self.reminder_sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<TaskService, TaskError> {
        let service = TaskService {
            mutation_lock: Mutex::new(()),
            tasks: RwLock::new(HashMap::new()),
            durable: self.durable,
            reminder_sink: self.reminder_sink,
            outbox: Mutex::new(VecDeque::new()),
            clock: self.clock,
        };
        service.reload_all()?;
        Ok(service)
    }
}

impl TaskService {
    pub fn builder(durable: Box<dyn DurableStore>) -> TaskServiceBuilder {
        TaskServiceBuilder::new(durable)
    }

    /// Replaces the in-memory snapshot with the durable layer's contents.
    pub fn reload_all(&self) -> Result<(), TaskError> {
        let loaded = self.durable.get_all()?;
        let mut tasks = self.tasks.write();
        tasks.clear();
        for task in loaded {
            tasks.insert(task.id, task);
        }
        Ok(())
    }

    // ---- queries ----------------------------------------------------------

    pub fn get(&self, id: TaskId) -> Result<TaskInstance, TaskError> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(TaskError::NotFound(id))
    }

    pub fn tasks(&self) -> Vec<TaskInstance> {
        let mut all: Vec<TaskInstance> = self.tasks.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then_with(|| a.due_time.cmp(&b.due_time))
                .then_with(|| a.title.cmp(&b.title))
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Pending instances due on or before `days` from today, overdue ones
    /// included.
    pub fn pending_within_days(&self, days: i64) -> Vec<TaskInstance> {
        let horizon = self.clock.now().date_naive() + Duration::days(days);
        self.tasks()
            .into_iter()
            .filter(|task| task.is_pending() && task.due_date <= horizon)
            .collect()
    }

    /// Members of a recurrence or routine group, ordered by sequence index
    /// and then date.
    pub fn group_members(&self, group_id: Uuid) -> Vec<TaskInstance> {
        let mut members: Vec<TaskInstance> = self
            .tasks
            .read()
            .values()
            .filter(|task| {
                task.recurrence_group_id == Some(group_id)
                    || task.routine_group_id == Some(group_id)
            })
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            a.recurrence_index
                .cmp(&b.recurrence_index)
                .then_with(|| a.due_date.cmp(&b.due_date))
        });
        members
    }

    /// Net score: earned points plus the (non-positive) postpone penalties.
    pub fn net_score(&self) -> i64 {
        self.tasks
            .read()
            .values()
            .map(|task| task.points_earned + task.cumulative_postpone_penalty)
            .sum()
    }

    /// Reminder events that have not been handed to a sink. Only accumulates
    /// when the service was built without one.
    pub fn drain_pending_reminders(&self) -> Vec<ReminderEvent> {
        self.outbox.lock().drain(..).collect()
    }

    // ---- mutations --------------------------------------------------------

    pub fn add(&self, task: TaskInstance) -> Result<TaskInstance, TaskError> {
        let _guard = self.mutation_lock.lock();
        debug_assert!(task.invariants_hold());
        self.tasks.write().insert(task.id, task.clone());
        self.persist(|durable| durable.create(&task))?;
        self.enqueue(ReminderEvent::schedule(&task));
        self.flush_reminders();
        info!(task = %task.id, "added task");
        Ok(task)
    }

    /// Starts a recurring series. The definition's seed id becomes occurrence
    /// zero, so the caller can keep treating the task it created as "the"
    /// task.
    pub fn add_series(
        &self,
        definition: &SeriesDefinition,
        rule: &RecurrenceRule,
    ) -> Result<Vec<TaskInstance>, TaskError> {
        let _guard = self.mutation_lock.lock();
        let now = self.clock.now();
        let instances = generate_series(definition, rule, now)?;

        {
            let mut tasks = self.tasks.write();
            for task in &instances {
                tasks.insert(task.id, task.clone());
            }
        }
        self.persist(|durable| instances.iter().try_for_each(|task| durable.create(task)))?;
        for task in &instances {
            self.enqueue(ReminderEvent::schedule(task));
        }
        self.flush_reminders();
        info!(count = instances.len(), "added recurring series");
        Ok(instances)
    }

    pub fn add_routine(
        &self,
        definition: &SeriesDefinition,
    ) -> Result<Vec<TaskInstance>, TaskError> {
        let _guard = self.mutation_lock.lock();
        let now = self.clock.now();
        let instances = generate_routine(definition, now);

        {
            let mut tasks = self.tasks.write();
            for task in &instances {
                tasks.insert(task.id, task.clone());
            }
        }
        self.persist(|durable| instances.iter().try_for_each(|task| durable.create(task)))?;
        for task in &instances {
            self.enqueue(ReminderEvent::schedule(task));
        }
        self.flush_reminders();
        info!(count = instances.len(), "added routine series");
        Ok(instances)
    }

    /// Replaces an instance's payload. An instance's kind is fixed at
    /// creation and cannot be changed here. When a recurring occurrence
    /// arrives with a changed rule snapshot, the series tail after it is
    /// regenerated under the new rule; earlier siblings keep their snapshots.
    pub fn update(&self, updated: TaskInstance) -> Result<TaskInstance, TaskError> {
        let _guard = self.mutation_lock.lock();
        let now = self.clock.now();
        let current = self.get(updated.id)?;

        let mut next = updated;
        next.kind = current.kind;

        if current.is_recurring() {
            if let (Some(group_id), Some(new_rule)) =
                (current.recurrence_group_id, next.rule_snapshot.clone())
            {
                if current.rule_snapshot.as_ref() != Some(&new_rule) {
                    return self.regenerate_tail(&current, next, new_rule, group_id, now);
                }
            }
        }

        self.tasks.write().insert(next.id, next.clone());
        self.persist(|durable| durable.update(&next))?;
        if next.due_date != current.due_date || next.due_time != current.due_time {
            self.enqueue(ReminderEvent::reschedule(&next));
        }
        self.flush_reminders();
        Ok(next)
    }

    /// Marks an instance completed and, for recurring occurrences, tops the
    /// group's planning window back up: when the farthest pending sibling
    /// sits inside the horizon, up to ten further occurrences are generated
    /// after it, skipping calendar days already taken and never exceeding the
    /// group's configured end condition.
    pub fn complete(&self, id: TaskId, points: i64) -> Result<TaskInstance, TaskError> {
        let _guard = self.mutation_lock.lock();
        let now = self.clock.now();
        let current = self.get(id)?;
        let completed = current.mark_completed(points, now);

        let siblings = self.window_extension(&completed)?;

        {
            let mut tasks = self.tasks.write();
            tasks.insert(completed.id, completed.clone());
            for task in &siblings {
                tasks.insert(task.id, task.clone());
            }
        }
        self.persist(|durable| {
            durable.update(&completed)?;
            siblings.iter().try_for_each(|task| durable.create(task))
        })?;

        self.enqueue(ReminderEvent::cancel(completed.id));
        for task in &siblings {
            self.enqueue(ReminderEvent::schedule(task));
        }
        self.flush_reminders();
        info!(task = %id, new_occurrences = siblings.len(), "completed task");
        Ok(completed)
    }

    pub fn mark_not_done(
        &self,
        id: TaskId,
        reason: Option<&str>,
    ) -> Result<TaskInstance, TaskError> {
        let _guard = self.mutation_lock.lock();
        let current = self.get(id)?;
        let skipped = current.mark_not_done(reason);

        self.tasks.write().insert(skipped.id, skipped.clone());
        self.persist(|durable| durable.update(&skipped))?;
        self.enqueue(ReminderEvent::cancel(skipped.id));
        self.flush_reminders();
        Ok(skipped)
    }

    pub fn postpone(
        &self,
        id: TaskId,
        new_date: NaiveDate,
        reason: Option<&str>,
        penalty: i64,
    ) -> Result<TaskInstance, TaskError> {
        let _guard = self.mutation_lock.lock();
        let now = self.clock.now();
        let current = self.get(id)?;
        let moved = apply_postpone(&current, new_date, reason, penalty, now);

        self.tasks.write().insert(moved.id, moved.clone());
        self.persist(|durable| durable.update(&moved))?;
        self.enqueue(ReminderEvent::reschedule(&moved));
        self.flush_reminders();
        debug!(task = %id, %new_date, "postponed task");
        Ok(moved)
    }

    /// Removes an instance. Without `force`, an instance that has been
    /// postponed is not destroyed: its most recent postpone is undone
    /// instead.
    pub fn delete(&self, id: TaskId, force: bool) -> Result<DeleteOutcome, TaskError> {
        let _guard = self.mutation_lock.lock();
        let current = self.get(id)?;

        if !force && current.postpone_count > 0 {
            if let Some(undone) = undo_last_postpone(&current) {
                self.tasks.write().insert(undone.id, undone.clone());
                self.persist(|durable| durable.update(&undone))?;
                self.enqueue(ReminderEvent::reschedule(&undone));
                self.flush_reminders();
                info!(task = %id, "delete reverted a postpone instead of removing");
                return Ok(DeleteOutcome::PostponeReverted(undone));
            }
        }

        self.tasks.write().remove(&id);
        self.persist(|durable| durable.delete(id))?;
        self.enqueue(ReminderEvent::cancel(id));
        self.flush_reminders();
        info!(task = %id, "deleted task");
        Ok(DeleteOutcome::Deleted(id))
    }

    /// Removes every member of a recurrence or routine group. Returns how
    /// many instances were removed.
    pub fn delete_series(&self, group_id: Uuid) -> Result<usize, TaskError> {
        let _guard = self.mutation_lock.lock();
        let members: Vec<TaskId> = self
            .tasks
            .read()
            .values()
            .filter(|task| {
                task.recurrence_group_id == Some(group_id)
                    || task.routine_group_id == Some(group_id)
            })
            .map(|task| task.id)
            .collect();

        {
            let mut tasks = self.tasks.write();
            for id in &members {
                tasks.remove(id);
            }
        }
        self.persist(|durable| members.iter().try_for_each(|id| durable.delete(*id)))?;
        for id in &members {
            self.enqueue(ReminderEvent::cancel(*id));
        }
        self.flush_reminders();
        info!(group = %group_id, count = members.len(), "deleted series");
        Ok(members.len())
    }

    /// Reverses exactly the side effects of the instance's last state-changing
    /// action. The reversal procedure is picked from the instance's status and
    /// history shape; see `UndoClass` for the priority order.
    pub fn undo(&self, id: TaskId) -> Result<UndoOutcome, TaskError> {
        let _guard = self.mutation_lock.lock();
        let current = self.get(id)?;

        match classify(&current) {
            UndoClass::Completed => self.undo_completed(current),
            UndoClass::NotDone => {
                let reverted = undo_skip(&current);
                self.tasks.write().insert(reverted.id, reverted.clone());
                self.persist(|durable| durable.update(&reverted))?;
                self.enqueue(ReminderEvent::schedule(&reverted));
                self.flush_reminders();
                Ok(UndoOutcome::SkipReverted(reverted))
            }
            UndoClass::LegacyPostponed => {
                let restored = undo_legacy_archive(&current);
                self.tasks.write().insert(restored.id, restored.clone());
                self.persist(|durable| durable.update(&restored))?;
                self.enqueue(ReminderEvent::schedule(&restored));
                self.flush_reminders();
                Ok(UndoOutcome::LegacyArchiveRestored(restored))
            }
            UndoClass::HasPostponeHistory => match undo_last_postpone(&current) {
                Some(undone) => {
                    self.tasks.write().insert(undone.id, undone.clone());
                    self.persist(|durable| durable.update(&undone))?;
                    self.enqueue(ReminderEvent::reschedule(&undone));
                    self.flush_reminders();
                    Ok(UndoOutcome::PostponeReverted(undone))
                }
                None => Ok(UndoOutcome::NothingToUndo),
            },
            UndoClass::LegacyChainChild => self.undo_legacy_chain(current),
            UndoClass::Unknown => {
                let reset = generic_reset(&current);
                self.tasks.write().insert(reset.id, reset.clone());
                self.persist(|durable| durable.update(&reset))?;
                self.enqueue(ReminderEvent::reschedule(&reset));
                self.flush_reminders();
                Ok(UndoOutcome::Reset(reset))
            }
        }
    }

    // ---- internals --------------------------------------------------------

    fn undo_completed(&self, current: TaskInstance) -> Result<UndoOutcome, TaskError> {
        let reverted = undo_complete(&current);

        // Siblings materialized by this completion disappear with it.
        let mut pruned: Vec<TaskId> = Vec::new();
        if current.is_recurring() {
            if let (Some(group_id), Some(index), Some(completed_at)) = (
                current.recurrence_group_id,
                current.recurrence_index,
                current.completed_at,
            ) {
                pruned = self
                    .tasks
                    .read()
                    .values()
                    .filter(|sibling| {
                        generated_by_completion(sibling, group_id, index, completed_at)
                    })
                    .map(|sibling| sibling.id)
                    .collect();
            }
        }

        {
            let mut tasks = self.tasks.write();
            tasks.insert(reverted.id, reverted.clone());
            for id in &pruned {
                tasks.remove(id);
            }
        }
        self.persist(|durable| {
            durable.update(&reverted)?;
            pruned.iter().try_for_each(|id| durable.delete(*id))
        })?;

        self.enqueue(ReminderEvent::schedule(&reverted));
        for id in &pruned {
            self.enqueue(ReminderEvent::cancel(*id));
        }
        self.flush_reminders();
        info!(task = %reverted.id, pruned = pruned.len(), "reverted completion");
        Ok(UndoOutcome::CompletionReverted {
            task: reverted,
            removed_siblings: pruned,
        })
    }

    fn undo_legacy_chain(&self, current: TaskInstance) -> Result<UndoOutcome, TaskError> {
        let parent_id = match current.parent_task_id {
            Some(parent_id) => parent_id,
            None => return Ok(UndoOutcome::NothingToUndo),
        };
        let parent = self.tasks.read().get(&parent_id).cloned();

        match parent {
            Some(original) if original.status == TaskStatus::Postponed => {
                let restored = undo_legacy_archive(&original);
                {
                    let mut tasks = self.tasks.write();
                    tasks.insert(restored.id, restored.clone());
                    tasks.remove(&current.id);
                }
                self.persist(|durable| {
                    durable.update(&restored)?;
                    durable.delete(current.id)
                })?;
                self.enqueue(ReminderEvent::schedule(&restored));
                self.enqueue(ReminderEvent::cancel(current.id));
                self.flush_reminders();
                Ok(UndoOutcome::LegacyChainReverted {
                    restored: restored.id,
                    removed_child: current.id,
                })
            }
            _ => {
                // Orphaned pointer: clear it and fall back to the postpone
                // path, which no-ops here because a chain child carries no
                // in-place history.
                let mut cleared = current.clone();
                cleared.parent_task_id = None;
                cleared.root_task_id = None;
                self.tasks.write().insert(cleared.id, cleared.clone());
                self.persist(|durable| durable.update(&cleared))?;
                debug!(task = %cleared.id, "cleared orphaned legacy chain pointer");
                match undo_last_postpone(&cleared) {
                    Some(undone) => {
                        self.tasks.write().insert(undone.id, undone.clone());
                        self.persist(|durable| durable.update(&undone))?;
                        self.enqueue(ReminderEvent::reschedule(&undone));
                        self.flush_reminders();
                        Ok(UndoOutcome::PostponeReverted(undone))
                    }
                    None => Ok(UndoOutcome::NothingToUndo),
                }
            }
        }
    }

    /// Occurrences to append to a completed instance's group so its pending
    /// horizon reaches the planning window again. Empty for non-recurring
    /// instances and for groups whose end condition is already met.
    fn window_extension(&self, completed: &TaskInstance) -> Result<Vec<TaskInstance>, TaskError> {
        if !completed.is_recurring() {
            return Ok(Vec::new());
        }
        let (Some(group_id), Some(rule)) = (
            completed.recurrence_group_id,
            completed.rule_snapshot.as_ref(),
        ) else {
            return Ok(Vec::new());
        };

        let members = self.group_members(group_id);
        let pending: Vec<&TaskInstance> = members
            .iter()
            .filter(|task| task.is_pending() && task.id != completed.id)
            .collect();

        let baseline = pending
            .iter()
            .map(|task| task.due_date)
            .max()
            .unwrap_or(completed.due_date);
        let horizon = self.clock.now().date_naive() + Duration::days(PLANNING_WINDOW_DAYS);
        if baseline >= horizon {
            return Ok(Vec::new());
        }

        let mut eval_rule = rule.clone();
        if let EndCondition::AfterOccurrences(limit) = rule.end {
            let remaining = (limit as usize).saturating_sub(members.len());
            if remaining == 0 {
                return Ok(Vec::new());
            }
            eval_rule.end = EndCondition::AfterOccurrences(remaining as u32);
        }

        let taken_dates: HashSet<NaiveDate> = pending.iter().map(|task| task.due_date).collect();
        let candidates = next_occurrences(&eval_rule, baseline, REFILL_BATCH + taken_dates.len())?;

        let next_index = members
            .iter()
            .filter_map(|task| task.recurrence_index)
            .max()
            .map_or(0, |index| index + 1);
        let now = self.clock.now();
        let siblings: Vec<TaskInstance> = candidates
            .into_iter()
            .filter(|date| !taken_dates.contains(date))
            .take(REFILL_BATCH)
            .enumerate()
            .map(|(offset, date)| {
                extend_occurrence(completed, date, next_index + offset as u32, now)
            })
            .collect();
        Ok(siblings)
    }

    fn regenerate_tail(
        &self,
        current: &TaskInstance,
        mut next: TaskInstance,
        new_rule: RecurrenceRule,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TaskInstance, TaskError> {
        new_rule.validate_for_start(next.due_date)?;
        let current_index = current.recurrence_index.unwrap_or(0);

        let members = self.group_members(group_id);
        let pruned: Vec<TaskId> = members
            .iter()
            .filter(|task| {
                task.id != current.id
                    && task.is_pending()
                    && task
                        .recurrence_index
                        .is_some_and(|index| index > current_index)
                    && task.due_date > next.due_date
            })
            .map(|task| task.id)
            .collect();
        let pruned_set: HashSet<TaskId> = pruned.iter().copied().collect();

        let survivors: Vec<&TaskInstance> = members
            .iter()
            .filter(|task| task.id != current.id && !pruned_set.contains(&task.id))
            .collect();
        let group_total = survivors.len() + 1;
        let cap_total = match new_rule.end {
            EndCondition::AfterOccurrences(limit) => (limit as usize).min(BOUNDED_CAP),
            EndCondition::OnDate(_) => BOUNDED_CAP,
            EndCondition::Never => NEVER_ENDING_CAP,
        };
        let budget = cap_total.saturating_sub(group_total);

        let horizon = now.date_naive() + Duration::days(PLANNING_WINDOW_DAYS);
        let bounded_by_window = !matches!(new_rule.end, EndCondition::AfterOccurrences(_));
        let taken_dates: HashSet<NaiveDate> = survivors
            .iter()
            .filter(|task| task.is_pending())
            .map(|task| task.due_date)
            .chain(std::iter::once(next.due_date))
            .collect();

        let mut eval_rule = new_rule.clone();
        if matches!(new_rule.end, EndCondition::AfterOccurrences(_)) {
            eval_rule.end = EndCondition::AfterOccurrences(budget as u32);
        }
        let candidates = next_occurrences(&eval_rule, next.due_date, budget + taken_dates.len())?;

        let next_index = members
            .iter()
            .filter(|task| !pruned_set.contains(&task.id))
            .filter_map(|task| task.recurrence_index)
            .max()
            .map_or(0, |index| index + 1);
        next.rule_snapshot = Some(new_rule);
        let fresh_tail: Vec<TaskInstance> = candidates
            .into_iter()
            .filter(|date| !taken_dates.contains(date))
            .filter(|date| !bounded_by_window || *date <= horizon)
            .take(budget)
            .enumerate()
            .map(|(offset, date)| extend_occurrence(&next, date, next_index + offset as u32, now))
            .collect();

        {
            let mut tasks = self.tasks.write();
            tasks.insert(next.id, next.clone());
            for id in &pruned {
                tasks.remove(id);
            }
            for task in &fresh_tail {
                tasks.insert(task.id, task.clone());
            }
        }
        self.persist(|durable| {
            durable.update(&next)?;
            pruned.iter().try_for_each(|id| durable.delete(*id))?;
            fresh_tail.iter().try_for_each(|task| durable.create(task))
        })?;

        if next.due_date != current.due_date || next.due_time != current.due_time {
            self.enqueue(ReminderEvent::reschedule(&next));
        }
        for id in &pruned {
            self.enqueue(ReminderEvent::cancel(*id));
        }
        for task in &fresh_tail {
            self.enqueue(ReminderEvent::schedule(task));
        }
        self.flush_reminders();
        info!(
            task = %next.id,
            pruned = pruned.len(),
            regenerated = fresh_tail.len(),
            "regenerated series tail after rule edit"
        );
        Ok(next)
    }

    fn persist(
        &self,
        write: impl FnOnce(&dyn DurableStore) -> Result<(), StorageError>,
    ) -> Result<(), TaskError> {
        match write(self.durable.as_ref()) {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(%err, "persistence failed, reloading from durable store");
                if let Err(reload_err) = self.reload_all() {
                    error!(%reload_err, "reload after persistence failure failed too");
                }
                Err(TaskError::Persistence(err))
            }
        }
    }

    fn enqueue(&self, event: ReminderEvent) {
        self.outbox.lock().push_back(event);
    }

    fn flush_reminders(&self) {
        let Some(sink) = &self.reminder_sink else {
            return;
        };
        let drained: Vec<ReminderEvent> = self.outbox.lock().drain(..).collect();
        for event in drained {
            debug!(task = %event.task_id(), "dispatching reminder event");
            sink.deliver(&event);
        }
    }
}
