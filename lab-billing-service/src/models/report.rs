//! Financial metrics model for lab-billing-service.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reporting window, filtered on invoice issue date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingPeriod {
    Today,
    /// Sunday 00:00 of the current week up to now.
    Week,
    Month,
    Year,
    All,
    Range {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl ReportingPeriod {
    pub fn from_string(s: &str) -> Self {
        match s {
            "today" => ReportingPeriod::Today,
            "week" => ReportingPeriod::Week,
            "month" => ReportingPeriod::Month,
            "year" => ReportingPeriod::Year,
            _ => ReportingPeriod::All,
        }
    }

    /// Half-open `[start, end)` bounds at `now`; `None` means unbounded.
    pub fn bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let today = now.date_naive();
        match *self {
            ReportingPeriod::Today => (
                Some(midnight(today)),
                Some(midnight(today) + Duration::days(1)),
            ),
            ReportingPeriod::Week => {
                let back = today.weekday().num_days_from_sunday() as i64;
                (
                    Some(midnight(today - Duration::days(back))),
                    Some(midnight(today) + Duration::days(1)),
                )
            }
            ReportingPeriod::Month => {
                let start = first_of_month(today.year(), today.month());
                let end = if today.month() == 12 {
                    first_of_month(today.year() + 1, 1)
                } else {
                    first_of_month(today.year(), today.month() + 1)
                };
                (Some(midnight(start)), Some(midnight(end)))
            }
            ReportingPeriod::Year => (
                Some(midnight(first_of_month(today.year(), 1))),
                Some(midnight(first_of_month(today.year() + 1, 1))),
            ),
            ReportingPeriod::All => (None, None),
            ReportingPeriod::Range { start, end } => (start, end),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Read-side rollup over a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub total_revenue: Decimal,
    pub total_paid: Decimal,
    /// Balances of SENT, PARTIAL_PAID and OVERDUE invoices as of now,
    /// regardless of the window. Invoices flipped by the overdue sweep stay
    /// counted here.
    pub total_outstanding: Decimal,
    /// The past-due part of `total_outstanding`, OVERDUE status included.
    pub total_overdue: Decimal,
    pub invoice_count: u64,
    pub average_invoice_value: Decimal,
    /// Percentage with two decimals; zero for an empty window.
    pub collection_rate: Decimal,
    pub overpaid_invoice_count: u64,
    pub total_overpaid: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn week_starts_on_sunday() {
        // 2026-10-21 is a Wednesday.
        let now = at(2026, 10, 21, 15);
        let (start, end) = ReportingPeriod::Week.bounds(now);
        assert_eq!(start, Some(at(2026, 10, 18, 0)));
        assert_eq!(end, Some(at(2026, 10, 22, 0)));
    }

    #[test]
    fn december_month_rolls_into_next_year() {
        let (start, end) = ReportingPeriod::Month.bounds(at(2026, 12, 5, 9));
        assert_eq!(start, Some(at(2026, 12, 1, 0)));
        assert_eq!(end, Some(at(2027, 1, 1, 0)));
    }

    #[test]
    fn today_covers_one_day() {
        let (start, end) = ReportingPeriod::Today.bounds(at(2026, 3, 9, 23));
        assert_eq!(start, Some(at(2026, 3, 9, 0)));
        assert_eq!(end, Some(at(2026, 3, 10, 0)));
    }

    #[test]
    fn unknown_period_is_unbounded() {
        assert_eq!(ReportingPeriod::from_string("decade"), ReportingPeriod::All);
        assert_eq!(ReportingPeriod::All.bounds(Utc::now()), (None, None));
    }
}
