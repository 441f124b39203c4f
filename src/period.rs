// Period windows
// Maps a period kind and a reference instant onto the inclusive calendar
// window (day, week, month or year) that contains it.
//
// Calendar units are evaluated in the reference instant's own time zone;
// the resulting bounds are stored in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// PERIOD KIND
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized period '{0}'")]
pub struct UnknownPeriod(pub String);

impl PeriodKind {
    pub const ALL: [PeriodKind; 4] = [
        PeriodKind::Daily,
        PeriodKind::Weekly,
        PeriodKind::Monthly,
        PeriodKind::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Weekly => "weekly",
            PeriodKind::Monthly => "monthly",
            PeriodKind::Yearly => "yearly",
        }
    }

    /// Lenient parse used at the request boundary: a missing or unrecognized
    /// value is `Daily`, never an error.
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw {
            None => PeriodKind::Daily,
            Some(value) => value.parse().unwrap_or_else(|err: UnknownPeriod| {
                tracing::debug!(%err, "falling back to daily period");
                PeriodKind::Daily
            }),
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(PeriodKind::Daily),
            "weekly" => Ok(PeriodKind::Weekly),
            "monthly" => Ok(PeriodKind::Monthly),
            "yearly" => Ok(PeriodKind::Yearly),
            _ => Err(UnknownPeriod(s.to_string())),
        }
    }
}

// ============================================================================
// WEEK START
// ============================================================================

/// First day of a calendar week. Sunday unless configured otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Sunday,
    Monday,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized week start '{0}' (expected sunday or monday)")]
pub struct UnknownWeekStart(pub String);

impl FromStr for WeekStart {
    type Err = UnknownWeekStart;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunday" | "sun" => Ok(WeekStart::Sunday),
            "monday" | "mon" => Ok(WeekStart::Monday),
            _ => Err(UnknownWeekStart(s.to_string())),
        }
    }
}

impl WeekStart {
    fn days_into_week(&self, date: NaiveDate) -> u32 {
        match self {
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
            WeekStart::Monday => date.weekday().num_days_from_monday(),
        }
    }
}

// ============================================================================
// WINDOW
// ============================================================================

/// Inclusive `[start, end]` instant range. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Derives period windows. Stateless apart from the week-start convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowResolver {
    week_start: WeekStart,
}

impl WindowResolver {
    pub fn new(week_start: WeekStart) -> Self {
        Self { week_start }
    }

    pub fn week_start(&self) -> WeekStart {
        self.week_start
    }

    /// Window of the calendar unit of `kind` that contains `now`.
    pub fn resolve<Tz: TimeZone>(&self, kind: PeriodKind, now: &DateTime<Tz>) -> PeriodWindow {
        let (first, last) = self.unit_dates(kind, now.date_naive());
        let tz = now.timezone();

        let start = local_midnight_utc(&tz, first);
        let end = match last.succ_opt() {
            Some(next) => local_midnight_utc(&tz, next) - Duration::nanoseconds(1),
            None => DateTime::<Utc>::MAX_UTC,
        };

        tracing::debug!(period = %kind, %start, %end, "resolved period window");
        PeriodWindow { start, end }
    }

    /// First and last calendar date of the unit containing `date`.
    fn unit_dates(&self, kind: PeriodKind, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        match kind {
            PeriodKind::Daily => (date, date),
            PeriodKind::Weekly => {
                let offset = u64::from(self.week_start.days_into_week(date));
                let first = date.checked_sub_days(Days::new(offset)).unwrap_or(NaiveDate::MIN);
                let last = first.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX);
                (first, last)
            }
            PeriodKind::Monthly => {
                let first = date.with_day(1).unwrap_or(date);
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                let last = NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(NaiveDate::MAX);
                (first, last)
            }
            PeriodKind::Yearly => {
                let first = date.with_ordinal(1).unwrap_or(date);
                let last = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(NaiveDate::MAX);
                (first, last)
            }
        }
    }
}

/// UTC instant of local midnight on `date`. An ambiguous midnight maps to the
/// earlier instant; a skipped one is shifted by the offset in force at that
/// wall-clock time.
fn local_midnight_utc<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(instant) => instant.with_timezone(&Utc),
        None => {
            let offset = tz.offset_from_utc_datetime(&naive).fix();
            let shifted = naive
                .checked_sub_signed(Duration::seconds(i64::from(offset.local_minus_utc())))
                .unwrap_or(naive);
            Utc.from_utc_datetime(&shifted)
        }
    }
}

/// Convenience over [`WindowResolver::default`], which starts weeks on Sunday.
pub fn resolve_window<Tz: TimeZone>(kind: PeriodKind, now: &DateTime<Tz>) -> PeriodWindow {
    WindowResolver::default().resolve(kind, now)
}
