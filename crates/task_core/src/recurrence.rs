use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// When a series stops producing occurrences.
///
/// `AfterOccurrences` counts from the instant the evaluator is called, not
/// from the series start. Callers extending an existing group pass the
/// remaining budget rather than the configured total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndCondition {
    Never,
    AfterOccurrences(u32),
    OnDate(NaiveDate),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    /// Honored by weekly rules, and by daily rules when non-empty.
    pub days_of_week: Vec<Weekday>,
    /// Honored by monthly rules; empty means the start date's day of month.
    pub days_of_month: Vec<u32>,
    pub skip_weekends: bool,
    pub end: EndCondition,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidRuleError {
    #[error("recurrence interval must be at least 1")]
    ZeroInterval,
    #[error("weekly rule requires at least one weekday")]
    EmptyWeekdaySet,
    #[error("skip-weekends contradicts a weekend-only weekday set")]
    WeekendOnlyDays,
    #[error("day of month {0} is out of range")]
    DayOfMonthOutOfRange(u32),
    #[error("series end date {end} is before its start {start}")]
    EndBeforeStart { end: NaiveDate, start: NaiveDate },
}

// Scan bounds keep degenerate rules (for example a daily rule whose every
// candidate lands on a skipped weekend) from looping forever.
const DAY_SCAN_LIMIT: i64 = 366 * 10;
const MONTH_SCAN_LIMIT: u32 = 12 * 10;
const YEAR_SCAN_LIMIT: i32 = 50;

impl RecurrenceRule {
    pub fn daily(interval: u32) -> Self {
        Self {
            frequency: Frequency::Daily,
            interval,
            days_of_week: Vec::new(),
            days_of_month: Vec::new(),
            skip_weekends: false,
            end: EndCondition::Never,
        }
    }

    pub fn weekly(interval: u32, days: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            frequency: Frequency::Weekly,
            interval,
            days_of_week: days.into_iter().collect(),
            days_of_month: Vec::new(),
            skip_weekends: false,
            end: EndCondition::Never,
        }
    }

    pub fn monthly(interval: u32, days: impl IntoIterator<Item = u32>) -> Self {
        Self {
            frequency: Frequency::Monthly,
            interval,
            days_of_week: Vec::new(),
            days_of_month: days.into_iter().collect(),
            skip_weekends: false,
            end: EndCondition::Never,
        }
    }

    pub fn yearly(interval: u32) -> Self {
        Self {
            frequency: Frequency::Yearly,
            interval,
            days_of_week: Vec::new(),
            days_of_month: Vec::new(),
            skip_weekends: false,
            end: EndCondition::Never,
        }
    }

    pub fn ending(mut self, end: EndCondition) -> Self {
        self.end = end;
        self
    }

    pub fn skipping_weekends(mut self) -> Self {
        self.skip_weekends = true;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidRuleError> {
        if self.interval == 0 {
            return Err(InvalidRuleError::ZeroInterval);
        }
        if self.frequency == Frequency::Weekly && self.days_of_week.is_empty() {
            return Err(InvalidRuleError::EmptyWeekdaySet);
        }
        if self.skip_weekends
            && !self.days_of_week.is_empty()
            && self.days_of_week.iter().all(|day| is_weekend_day(*day))
        {
            return Err(InvalidRuleError::WeekendOnlyDays);
        }
        if let Some(bad) = self
            .days_of_month
            .iter()
            .find(|day| **day == 0 || **day > 31)
        {
            return Err(InvalidRuleError::DayOfMonthOutOfRange(*bad));
        }
        Ok(())
    }

    /// `validate` plus the start-relative check a series creation needs.
    pub fn validate_for_start(&self, start: NaiveDate) -> Result<(), InvalidRuleError> {
        self.validate()?;
        if let EndCondition::OnDate(end) = self.end {
            if end < start {
                return Err(InvalidRuleError::EndBeforeStart { end, start });
            }
        }
        Ok(())
    }
}

fn is_weekend_day(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

fn is_weekend(date: NaiveDate) -> bool {
    is_weekend_day(date.weekday())
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

struct Collector {
    out: Vec<NaiveDate>,
    limit: usize,
    end: EndCondition,
    skip_weekends: bool,
}

impl Collector {
    /// Feeds one ascending candidate. Returns false once scanning can stop.
    fn push(&mut self, candidate: NaiveDate) -> bool {
        if self.limit == 0 {
            return false;
        }
        if let EndCondition::OnDate(end) = self.end {
            if candidate > end {
                return false;
            }
        }
        if self.skip_weekends && is_weekend(candidate) {
            return true;
        }
        self.out.push(candidate);
        self.out.len() < self.limit
    }
}

/// Evaluates `rule` into at most `max_count` occurrence dates strictly after
/// `from`, in strictly increasing order. Pure and deterministic.
pub fn next_occurrences(
    rule: &RecurrenceRule,
    from: NaiveDate,
    max_count: usize,
) -> Result<Vec<NaiveDate>, InvalidRuleError> {
    rule.validate()?;

    let limit = match rule.end {
        EndCondition::AfterOccurrences(n) => max_count.min(n as usize),
        _ => max_count,
    };
    let mut collector = Collector {
        out: Vec::new(),
        limit,
        end: rule.end,
        skip_weekends: rule.skip_weekends,
    };
    let interval = i64::from(rule.interval);

    match rule.frequency {
        Frequency::Daily => {
            let mut offset = interval;
            while offset <= DAY_SCAN_LIMIT {
                let candidate = from + Duration::days(offset);
                let allowed = rule.days_of_week.is_empty()
                    || rule.days_of_week.contains(&candidate.weekday());
                if allowed && !collector.push(candidate) {
                    break;
                }
                offset += interval;
            }
        }
        Frequency::Weekly => {
            let anchor = week_start(from);
            for offset in 1..=DAY_SCAN_LIMIT {
                let candidate = from + Duration::days(offset);
                if !rule.days_of_week.contains(&candidate.weekday()) {
                    continue;
                }
                let weeks = (week_start(candidate) - anchor).num_days() / 7;
                if weeks % interval != 0 {
                    continue;
                }
                if !collector.push(candidate) {
                    break;
                }
            }
        }
        Frequency::Monthly => {
            let mut days = if rule.days_of_month.is_empty() {
                vec![from.day()]
            } else {
                rule.days_of_month.clone()
            };
            days.sort_unstable();
            days.dedup();
            'months: for offset in 0..=MONTH_SCAN_LIMIT {
                if i64::from(offset) % interval != 0 {
                    continue;
                }
                let (year, month) = shift_month(from.year(), from.month(), offset);
                for &day in &days {
                    let Some(candidate) = NaiveDate::from_ymd_opt(year, month, day) else {
                        // Day does not exist in this month (for example Feb 30).
                        continue;
                    };
                    if candidate <= from {
                        continue;
                    }
                    if !collector.push(candidate) {
                        break 'months;
                    }
                }
            }
        }
        Frequency::Yearly => {
            for offset in 0..=YEAR_SCAN_LIMIT {
                if i64::from(offset) % interval != 0 {
                    continue;
                }
                let Some(candidate) =
                    NaiveDate::from_ymd_opt(from.year() + offset, from.month(), from.day())
                else {
                    // Feb 29 anchors skip non-leap years.
                    continue;
                };
                if candidate <= from {
                    continue;
                }
                if !collector.push(candidate) {
                    break;
                }
            }
        }
    }

    Ok(collector.out)
}

fn shift_month(year: i32, month: u32, offset: u32) -> (i32, u32) {
    let zero_based = i64::from(month) - 1 + i64::from(offset);
    let year = year + (zero_based / 12) as i32;
    let month = (zero_based % 12) as u32 + 1;
    (year, month)
}
