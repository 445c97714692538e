// src/engine/window.rs

//! Closed-open UTC time windows. Every time-bounded query in the engine
//! goes through `TimeWindow`, so both bounds are always applied.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};

use crate::error::EngineError;

/// `[start, end)` in UTC. `end` is strictly after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidWindow);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// A window is closed once nothing new can fall inside it.
    pub fn has_closed(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    Day,
    Week,
    Month,
}

impl PeriodKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Some(Self::Day),
            "week" | "weekly" => Some(Self::Week),
            "month" | "monthly" => Some(Self::Month),
            _ => None,
        }
    }
}

/// A calendar period in UTC, identified by a canonical key such as
/// `2026-01-10`, `2026-W02` or `2026-01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    kind: PeriodKind,
    first_day: NaiveDate,
}

impl Period {
    /// The period of the given kind that contains `date`.
    pub fn containing(kind: PeriodKind, date: NaiveDate) -> Result<Self, EngineError> {
        let first_day = match kind {
            PeriodKind::Day => Some(date),
            PeriodKind::Week => date.checked_sub_days(Days::new(u64::from(
                date.weekday().num_days_from_monday(),
            ))),
            PeriodKind::Month => date.with_day(1),
        }
        .ok_or(EngineError::InvalidWindow)?;
        Ok(Self { kind, first_day })
    }

    pub fn kind(&self) -> PeriodKind {
        self.kind
    }

    pub fn key(&self) -> String {
        match self.kind {
            PeriodKind::Day => self.first_day.format("%Y-%m-%d").to_string(),
            PeriodKind::Week => {
                let iso = self.first_day.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            PeriodKind::Month => self.first_day.format("%Y-%m").to_string(),
        }
    }

    /// Fails with `InvalidWindow` when the period runs past the last
    /// representable date.
    pub fn window(&self) -> Result<TimeWindow, EngineError> {
        let next = match self.kind {
            PeriodKind::Day => self.first_day.checked_add_days(Days::new(1)),
            PeriodKind::Week => self.first_day.checked_add_days(Days::new(7)),
            PeriodKind::Month => self.first_day.checked_add_months(Months::new(1)),
        }
        .ok_or(EngineError::InvalidWindow)?;
        TimeWindow::new(midnight(self.first_day), midnight(next))
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
