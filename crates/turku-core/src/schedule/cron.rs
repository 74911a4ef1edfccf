//! Five-field cron expressions with Jenkins-style `H` and random `R` tokens.
//!
//! ```text
//! minute hour day-of-month month day-of-week
//! 42     8    *            *     *
//! H      H(8-16) *         *     1-5
//! ```
//!
//! `H` resolves to a value derived from the source id (stable across
//! evaluations); `R` draws a new value on every evaluation. Both accept an
//! optional `(a-b)` range and a `/step`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};
use rand::Rng;

use super::{ScheduleError, hashed_int};

/// How far ahead to search before declaring an expression unsatisfiable.
const SEARCH_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    const ALL: [Self; 5] = [
        Self::Minute,
        Self::Hour,
        Self::DayOfMonth,
        Self::Month,
        Self::DayOfWeek,
    ];

    /// Bounds accepted for explicit values.
    const fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 7),
        }
    }

    /// Bounds used for `*`, `H` and `R`; Sunday is only counted once.
    const fn natural_bounds(self) -> (u32, u32) {
        match self {
            Self::DayOfWeek => (0, 6),
            other => other.bounds(),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        }
    }

    fn parse_value(self, token: &str) -> Option<u32> {
        let names: &[&str] = match self {
            Self::Month => &MONTH_NAMES,
            Self::DayOfWeek => &DAY_NAMES,
            _ => &[],
        };
        let lower = token.to_ascii_lowercase();
        if let Some(pos) = names.iter().position(|n| *n == lower) {
            let base = if self == Self::Month { 1 } else { 0 };
            return u32::try_from(pos).ok().map(|p| p + base);
        }
        let value: u32 = token.parse().ok()?;
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&value).then_some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Atom {
    Star,
    Value(u32),
    Range(u32, u32),
    Hash(Option<(u32, u32)>),
    Random(Option<(u32, u32)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Term {
    atom: Atom,
    step: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    kind: FieldKind,
    terms: Vec<Term>,
}

impl Field {
    fn parse(kind: FieldKind, text: &str) -> Result<Self, ScheduleError> {
        let terms = text
            .split(',')
            .map(|t| parse_term(kind, t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { kind, terms })
    }

    /// Cron day semantics only treat a field as restricting when it does not
    /// start with `*`.
    fn is_restricted(&self) -> bool {
        self.terms.first().is_some_and(|t| t.atom != Atom::Star)
    }

    /// Expand to a bit set of allowed values.
    fn resolve(&self, seed: &[u8], rng: &mut impl Rng) -> u64 {
        let (nat_lo, nat_hi) = self.kind.natural_bounds();
        let (_, max) = self.kind.bounds();
        let mut mask = 0u64;
        for term in &self.terms {
            let (lo, hi, pinned) = match term.atom {
                Atom::Star => (nat_lo, nat_hi, None),
                Atom::Value(v) if term.step.is_some() => (v, max, None),
                Atom::Value(v) => (v, v, None),
                Atom::Range(a, b) => (a, b, None),
                Atom::Hash(range) => {
                    let (a, b) = range.unwrap_or((nat_lo, nat_hi));
                    let pick = match term.step {
                        Some(step) => hashed_u32(0, phase_span(a, b, step) - 1, seed),
                        None => hashed_u32(a, b, seed),
                    };
                    (a, b, Some(pick))
                }
                Atom::Random(range) => {
                    let (a, b) = range.unwrap_or((nat_lo, nat_hi));
                    let pick = match term.step {
                        Some(step) => rng.gen_range(0..phase_span(a, b, step)),
                        None => rng.gen_range(a..=b),
                    };
                    (a, b, Some(pick))
                }
            };
            match (pinned, term.step) {
                // `H/15`: hashed phase within the range.
                (Some(phase), Some(step)) => {
                    mask |= stepped(lo + phase, hi, step);
                }
                (Some(value), None) => mask |= 1 << value,
                (None, step) => mask |= stepped(lo, hi, step.unwrap_or(1)),
            }
        }
        if self.kind == FieldKind::DayOfWeek && mask & (1 << 7) != 0 {
            mask = (mask | 1) & !(1 << 7);
        }
        mask
    }
}

/// Number of phases for a stepped `H`/`R` term over `lo..=hi`.
///
/// A step wider than the range still leaves the phase inside it.
fn phase_span(lo: u32, hi: u32, step: u32) -> u32 {
    step.min(hi - lo + 1)
}

fn stepped(lo: u32, hi: u32, step: u32) -> u64 {
    (lo..=hi)
        .step_by(usize::try_from(step).unwrap_or(1))
        .fold(0u64, |m, v| m | (1 << v))
}

fn hashed_u32(lo: u32, hi: u32, seed: &[u8]) -> u32 {
    u32::try_from(hashed_int(i64::from(lo), i64::from(hi), seed)).unwrap_or(lo)
}

fn parse_term(kind: FieldKind, text: &str) -> Result<Term, ScheduleError> {
    let err = |why: &str| {
        ScheduleError::InvalidCron(format!("{} field {text:?}: {why}", kind.name()))
    };

    let (body, step) = match text.split_once('/') {
        Some((body, step)) => {
            let step: u32 = step.parse().map_err(|_| err("bad step"))?;
            if step == 0 {
                return Err(err("step must be positive"));
            }
            (body, Some(step))
        }
        None => (text, None),
    };

    let parse_range = |r: &str| -> Result<(u32, u32), ScheduleError> {
        let (a, b) = r.split_once('-').ok_or_else(|| err("expected a-b"))?;
        let a = kind.parse_value(a).ok_or_else(|| err("value out of range"))?;
        let b = kind.parse_value(b).ok_or_else(|| err("value out of range"))?;
        if a > b {
            return Err(err("range start after end"));
        }
        Ok((a, b))
    };

    let atom = if body == "*" {
        Atom::Star
    } else if let Some(rest) = body.strip_prefix('H').or_else(|| body.strip_prefix('R')) {
        let range = if rest.is_empty() {
            None
        } else {
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| err("expected H(a-b)"))?;
            Some(parse_range(inner)?)
        };
        if body.starts_with('H') {
            Atom::Hash(range)
        } else {
            Atom::Random(range)
        }
    } else if body.contains('-') {
        let (a, b) = parse_range(body)?;
        Atom::Range(a, b)
    } else {
        Atom::Value(kind.parse_value(body).ok_or_else(|| err("value out of range"))?)
    };

    Ok(Term { atom, step })
}

/// A parsed cron expression. Hash and random tokens are resolved per
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    fields: Vec<Field>,
}

/// Resolved bit sets for one evaluation.
struct Masks {
    minute: u64,
    hour: u64,
    dom: u64,
    month: u64,
    dow: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl Masks {
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_ok = self.dom & (1 << date.day()) != 0;
        let dow_ok = self.dow & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }
}

impl CronSchedule {
    /// Parse a five-field expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != FieldKind::ALL.len() {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 fields, got {} in {expr:?}",
                parts.len()
            )));
        }
        let fields = FieldKind::ALL
            .iter()
            .zip(parts)
            .map(|(kind, text)| Field::parse(*kind, text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expr: expr.to_string(),
            fields,
        })
    }

    fn resolve(&self, stable_id: &str, rng: &mut impl Rng) -> Masks {
        let mask = |i: usize| {
            let mut seed = stable_id.as_bytes().to_vec();
            seed.push(u8::try_from(i).unwrap_or(0));
            seed
        };
        let mut masks = [0u64; 5];
        for (i, field) in self.fields.iter().enumerate() {
            masks[i] = field.resolve(&mask(i), rng);
        }
        Masks {
            minute: masks[0],
            hour: masks[1],
            dom: masks[2],
            month: masks[3],
            dow: masks[4],
            dom_restricted: self.fields[2].is_restricted(),
            dow_restricted: self.fields[4].is_restricted(),
        }
    }

    /// First whole minute strictly after `now` matching the expression.
    pub fn next_after(
        &self,
        stable_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after_with_rng(stable_id, now, &mut rand::thread_rng())
    }

    fn next_after_with_rng(
        &self,
        stable_id: &str,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let masks = self.resolve(stable_id, rng);
        let never = || ScheduleError::NeverMatches(self.expr.clone());

        let naive = now.naive_utc();
        let mut t = naive
            .date()
            .and_hms_opt(naive.hour(), naive.minute(), 0)
            .ok_or_else(never)?
            + TimeDelta::minutes(1);
        let limit = naive.year() + SEARCH_YEARS;

        while t.year() <= limit {
            if masks.month & (1 << t.month()) == 0 {
                t = start_of_next_month(t).ok_or_else(never)?;
                continue;
            }
            if !masks.day_matches(t.date()) {
                t = start_of_day(t.date().succ_opt().ok_or_else(never)?);
                continue;
            }
            if masks.hour & (1 << t.hour()) == 0 {
                t = t.date().and_hms_opt(t.hour(), 0, 0).ok_or_else(never)? + TimeDelta::hours(1);
                continue;
            }
            if masks.minute & (1 << t.minute()) == 0 {
                t += TimeDelta::minutes(1);
                continue;
            }
            return Ok(t.and_utc());
        }
        Err(never())
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map(start_of_day)
}
