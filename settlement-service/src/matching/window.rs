//! FAC reporting windows.
//!
//! A window always covers whole business days: it opens at 06:00:00 on
//! `start_date` and closes at 05:59:59 on `end_date`, so `end_date` is the
//! calendar day *after* the last business day covered.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Serialize;
use std::fmt;

pub fn window_start_time() -> NaiveTime {
    NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn window_end_time() -> NaiveTime {
    NaiveTime::from_hms_opt(5, 59, 59).unwrap_or(NaiveTime::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ReconciliationWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ReconciliationWindow {
    /// `None` unless `end_date` is strictly after `start_date`.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Option<Self> {
        (end_date > start_date).then_some(Self {
            start_date,
            end_date,
        })
    }

    /// Initial window for a VisaNet report date.
    ///
    /// On the anchor weekday the window is the preceding weekend: Friday
    /// 06:00 through Monday 05:59. Any other day gets the single business
    /// day two days before the report: `(D-2) 06:00` to `(D-1) 05:59`.
    pub fn default_for(report_date: NaiveDate, anchor: Weekday) -> Self {
        if report_date.weekday() == anchor {
            let from_friday = (report_date.weekday().num_days_from_monday() + 7
                - Weekday::Fri.num_days_from_monday())
                % 7;
            let days_back = if from_friday == 0 { 7 } else { from_friday };
            let friday = report_date - Duration::days(i64::from(days_back));
            Self {
                start_date: friday,
                end_date: friday + Duration::days(3),
            }
        } else {
            Self {
                start_date: report_date - Duration::days(2),
                end_date: report_date - Duration::days(1),
            }
        }
    }

    pub fn start_time(&self) -> NaiveTime {
        window_start_time()
    }

    pub fn end_time(&self) -> NaiveTime {
        window_end_time()
    }

    pub fn start_at(&self) -> NaiveDateTime {
        self.start_date.and_time(window_start_time())
    }

    pub fn end_at(&self) -> NaiveDateTime {
        self.end_date.and_time(window_end_time())
    }

    /// Number of business days covered.
    pub fn span_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start_at() && timestamp <= self.end_at()
    }

    /// Distance from `timestamp` to the nearer of the two boundaries.
    pub fn boundary_distance(&self, timestamp: NaiveDateTime) -> Duration {
        let to_start = (timestamp - self.start_at()).abs();
        let to_end = (self.end_at() - timestamp).abs();
        to_start.min(to_end)
    }

    /// Adjacent day added on both sides.
    pub fn widened(&self) -> Self {
        Self {
            start_date: self.start_date - Duration::days(1),
            end_date: self.end_date + Duration::days(1),
        }
    }

    pub fn extend_start(&self) -> Self {
        Self {
            start_date: self.start_date - Duration::days(1),
            end_date: self.end_date,
        }
    }

    pub fn extend_end(&self) -> Self {
        Self {
            start_date: self.start_date,
            end_date: self.end_date + Duration::days(1),
        }
    }

    /// Drop the first business day; `None` for a single-day window.
    pub fn trim_start(&self) -> Option<Self> {
        Self::new(self.start_date + Duration::days(1), self.end_date)
    }

    /// Drop the last business day; `None` for a single-day window.
    pub fn trim_end(&self) -> Option<Self> {
        Self::new(self.start_date, self.end_date - Duration::days(1))
    }

    pub fn shifted(&self, days: i64) -> Self {
        Self {
            start_date: self.start_date + Duration::days(days),
            end_date: self.end_date + Duration::days(days),
        }
    }

    /// Logical report name, e.g. `fac_report_05_01_2025_05_02_2025`.
    pub fn report_file_name(&self) -> String {
        format!(
            "fac_report_{}_{}",
            self.start_date.format("%m_%d_%Y"),
            self.end_date.format("%m_%d_%Y")
        )
    }
}

impl fmt::Display for ReconciliationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 06:00 AM - {} 05:59 AM",
            self.start_date.format("%m/%d/%Y"),
            self.end_date.format("%m/%d/%Y")
        )
    }
}
