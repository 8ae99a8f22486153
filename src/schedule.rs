//! Time-of-day directives embedded in work-item titles.
//!
//! A title such as `PM7 Deploy release` asks for the item to be picked up at
//! 19:00. The directive is an `AM`/`PM` token followed by a 1-2 digit hour,
//! optionally separated by spaces, standing as its own word. Only the first
//! directive in a title counts.
//!
//! A target that passed less than an hour ago still counts as "today": the
//! wait comes out negative and the caller proceeds immediately. Anything later
//! than that rolls over to the same hour tomorrow.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDateTime, TimeDelta, TimeZone};
use regex::Regex;

const GRACE_WINDOW_SECS: i64 = 60 * 60;

// Offset transitions are multiples of 15 minutes and never longer than 2h.
const GAP_SEARCH_STEP_MINUTES: i64 = 15;
const GAP_SEARCH_STEPS: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Am,
    Pm,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Am => write!(f, "AM"),
            Period::Pm => write!(f, "PM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeDirective {
    /// 1..=12
    pub hour: u32,
    pub period: Period,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledWait<Tz: TimeZone> {
    pub wait: Duration,
    pub target: DateTime<Tz>,
}

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)(?:^|\s)(AM|PM)\s*([0-9]{1,2})(?:\s|$)").unwrap())
}

/// Find the first schedule directive in `title`.
///
/// Returns `None` when there is no directive or the first one carries an
/// hour outside 1..=12.
pub fn parse_directive(title: &str) -> Option<TimeDirective> {
    let caps = directive_pattern().captures(title)?;
    let period = if caps[1].eq_ignore_ascii_case("pm") {
        Period::Pm
    } else {
        Period::Am
    };
    let hour: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    Some(TimeDirective { hour, period })
}

impl TimeDirective {
    /// Hour on the 24-hour clock.
    pub fn hour_24(&self) -> u32 {
        match (self.period, self.hour) {
            (Period::Am, 12) => 0,
            (Period::Am, h) => h,
            (Period::Pm, 12) => 12,
            (Period::Pm, h) => h + 12,
        }
    }

    /// The wall-clock time this directive points at, relative to `now`.
    pub fn target_time<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        let at = |date: chrono::NaiveDate| {
            let naive = date.and_hms_opt(self.hour_24(), 0, 0).unwrap_or_default();
            resolve_local(&tz, naive)
        };

        let target = at(today);
        let late_by = now.clone().signed_duration_since(target.clone());
        if late_by.num_seconds() > GRACE_WINDOW_SECS {
            let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
            at(tomorrow)
        } else {
            target
        }
    }
}

/// Map a naive local time onto `tz`. A time skipped by a DST jump resolves
/// to the first wall-clock time after the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    first_valid_from(naive, |n| tz.from_local_datetime(&n).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

fn first_valid_from<T>(naive: NaiveDateTime, lookup: impl Fn(NaiveDateTime) -> Option<T>) -> Option<T> {
    (0..=GAP_SEARCH_STEPS).find_map(|step| {
        let candidate = naive.checked_add_signed(TimeDelta::minutes(GAP_SEARCH_STEP_MINUTES * step))?;
        lookup(candidate)
    })
}

/// How long to hold an item whose title carries a directive.
///
/// `None` means "proceed now": no directive, an invalid one, or a target
/// inside the grace window.
pub fn schedule_wait<Tz: TimeZone>(title: &str, now: &DateTime<Tz>) -> Option<ScheduledWait<Tz>> {
    let directive = parse_directive(title)?;
    let target = directive.target_time(now);
    let wait = target
        .clone()
        .signed_duration_since(now.clone())
        .to_std()
        .ok()?;
    Some(ScheduledWait { wait, target })
}
