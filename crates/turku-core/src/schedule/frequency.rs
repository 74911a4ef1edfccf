//! The English frequency grammar: `<keyword>[, <window>]` or `cron <expr>`.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};

use super::cron::CronSchedule;
use super::{ScheduleError, hashed_int};

const DAY_SECS: i64 = 86_400;

/// Time-of-day restriction from the optional second clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockWindow {
    /// `HHMM`: always this many seconds after midnight.
    At(i64),
    /// `HHMM-HHMM`: somewhere in `[start, end)` seconds after midnight.
    /// `end` exceeds one day when the window wraps past midnight.
    Range { start: i64, end: i64 },
}

impl ClockWindow {
    fn parse(text: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidWindow(text.to_string());
        match text.split_once('-') {
            None => parse_hhmm(text).map(Self::At).ok_or_else(invalid),
            Some((a, b)) => {
                let start = parse_hhmm(a.trim()).ok_or_else(invalid)?;
                let mut end = parse_hhmm(b.trim()).ok_or_else(invalid)?;
                if end == start {
                    return Ok(Self::At(start));
                }
                if end < start {
                    end += DAY_SECS;
                }
                Ok(Self::Range { start, end })
            }
        }
    }

    fn offset(self, stable_id: &str) -> i64 {
        match self {
            Self::At(secs) => secs,
            Self::Range { start, end } => hashed_int(start, end - 1, stable_id),
        }
    }
}

fn parse_hhmm(text: &str) -> Option<i64> {
    if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i64 = text[0..2].parse().ok()?;
    let minutes: i64 = text[2..4].parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 3600 + minutes * 60)
}

/// A parsed frequency specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frequency {
    /// Once an hour at an id-derived minute and second.
    Hourly,
    /// Every day at an id-derived time (or within the window).
    Daily(Option<ClockWindow>),
    /// Once a week on an id-derived weekday.
    Weekly(Option<ClockWindow>),
    /// Once a week on the named weekday.
    On(Weekday, Option<ClockWindow>),
    /// Once a month on an id-derived day of the month.
    Monthly(Option<ClockWindow>),
    /// Cron expression with hash/random token support.
    Cron(CronSchedule),
}

impl Frequency {
    /// Parse a frequency specification.
    ///
    /// Unknown keywords fall back to [`Frequency::Daily`]; only a malformed
    /// window, a third clause, or a bad cron expression is an error.
    pub fn parse(spec: &str) -> Result<Self, ScheduleError> {
        let trimmed = spec.trim();
        let mut words = trimmed.split_whitespace();
        if words
            .next()
            .is_some_and(|w| w.eq_ignore_ascii_case("cron"))
        {
            let expr = words.collect::<Vec<_>>().join(" ");
            return CronSchedule::parse(&expr).map(Self::Cron);
        }

        let clauses: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if clauses.len() > 2 {
            return Err(ScheduleError::TooManyClauses(spec.to_string()));
        }
        let window = clauses.get(1).map(|w| ClockWindow::parse(w)).transpose()?;

        let keyword = clauses[0].to_ascii_lowercase();
        Ok(match keyword.as_str() {
            "hourly" => Self::Hourly,
            "daily" => Self::Daily(window),
            "weekly" => Self::Weekly(window),
            "monthly" => Self::Monthly(window),
            other => match parse_weekday(other) {
                Some(day) => Self::On(day, window),
                None => Self::Daily(window),
            },
        })
    }

    /// The first due instant strictly after `now` for the source identified
    /// by `stable_id`.
    pub fn next_after(
        &self,
        stable_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let today = now.date_naive();
        Ok(match self {
            Self::Hourly => next_hourly(stable_id, now),
            Self::Daily(window) => {
                let offset = day_offset(*window, stable_id);
                first_slot_after(now, prev_day(today), offset, 1)
            }
            Self::Weekly(window) => {
                let offset = day_offset(*window, stable_id);
                let pick = hashed_int(0, 6, format!("{stable_id}/weekday"));
                let day = weekday_from_sunday(pick);
                first_slot_after(now, last_weekday_before(today, day), offset, 7)
            }
            Self::On(day, window) => {
                let offset = day_offset(*window, stable_id);
                first_slot_after(now, last_weekday_before(today, *day), offset, 7)
            }
            Self::Monthly(window) => {
                let offset = day_offset(*window, stable_id);
                let first = first_of_next_month(today);
                let days = days_in_month(first);
                let day = hashed_int(1, days, format!("{stable_id}/monthday"));
                // `day` is in 1..=days, so this stays within the month.
                let date = first + Days::new(u64::try_from(day - 1).unwrap_or(0));
                midnight(date) + TimeDelta::seconds(offset)
            }
            Self::Cron(schedule) => schedule.next_after(stable_id, now)?,
        })
    }
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    Some(match word {
        "sunday" => Weekday::Sun,
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        _ => return None,
    })
}

fn weekday_from_sunday(n: i64) -> Weekday {
    match n.rem_euclid(7) {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}

fn day_offset(window: Option<ClockWindow>, stable_id: &str) -> i64 {
    window.map_or_else(
        || hashed_int(0, DAY_SECS - 1, stable_id),
        |w| w.offset(stable_id),
    )
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn prev_day(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

/// The latest `day` strictly before `date`.
fn last_weekday_before(date: NaiveDate, day: Weekday) -> NaiveDate {
    let yesterday = prev_day(date);
    let back = (i64::from(yesterday.weekday().num_days_from_sunday())
        - i64::from(day.num_days_from_sunday()))
    .rem_euclid(7);
    yesterday - TimeDelta::days(back)
}

/// Walk `start_day + offset` forward in `step_days` increments until it
/// passes `now`.
fn first_slot_after(
    now: DateTime<Utc>,
    start_day: NaiveDate,
    offset: i64,
    step_days: i64,
) -> DateTime<Utc> {
    let mut at = midnight(start_day) + TimeDelta::seconds(offset);
    while at <= now {
        at += TimeDelta::days(step_days);
    }
    at
}

fn next_hourly(stable_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let hour_start =
        DateTime::from_timestamp(now.timestamp() - now.timestamp().rem_euclid(3600), 0)
            .unwrap_or(now);
    let mut at = hour_start
        + TimeDelta::hours(1)
        + TimeDelta::seconds(hashed_int(0, 3599, stable_id));
    if at < now + TimeDelta::minutes(10) {
        at += TimeDelta::minutes(10);
    }
    at
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first.checked_add_months(Months::new(1)).unwrap_or(first)
}

fn days_in_month(first: NaiveDate) -> i64 {
    first
        .checked_add_months(Months::new(1))
        .map_or(31, |next| (next - first).num_days())
}
