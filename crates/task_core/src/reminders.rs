use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::instance::{TaskId, TaskInstance};

/// Outbound reminder instruction emitted by the store as part of a mutation.
/// Events queue in an outbox and drain to the sink after the mutation has
/// committed, so scheduling failures never touch store consistency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum ReminderEvent {
    Schedule {
        task_id: TaskId,
        title: String,
        due_date: NaiveDate,
        due_time: Option<NaiveTime>,
    },
    Reschedule {
        task_id: TaskId,
        title: String,
        due_date: NaiveDate,
        due_time: Option<NaiveTime>,
    },
    Cancel {
        task_id: TaskId,
    },
}

impl ReminderEvent {
    pub fn schedule(task: &TaskInstance) -> Self {
        Self::Schedule {
            task_id: task.id,
            title: task.title.clone(),
            due_date: task.due_date,
            due_time: task.due_time,
        }
    }

    pub fn reschedule(task: &TaskInstance) -> Self {
        Self::Reschedule {
            task_id: task.id,
            title: task.title.clone(),
            due_date: task.due_date,
            due_time: task.due_time,
        }
    }

    pub fn cancel(task_id: TaskId) -> Self {
        Self::Cancel { task_id }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Schedule { task_id, .. }
            | Self::Reschedule { task_id, .. }
            | Self::Cancel { task_id } => *task_id,
        }
    }
}

/// Platform-specific reminder schedulers implement this trait. Delivery is
/// best effort; implementations handle their own failures.
pub trait ReminderSink: Send + Sync {
    fn deliver(&self, event: &ReminderEvent);
}

impl<T: ReminderSink + ?Sized> ReminderSink for std::sync::Arc<T> {
    fn deliver(&self, event: &ReminderEvent) {
        (**self).deliver(event);
    }
}
