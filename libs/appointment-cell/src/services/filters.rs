// libs/appointment-cell/src/services/filters.rs
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Inclusive instant range used as a listing predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Range in clinic wall-clock time, converted to UTC at the end.
#[derive(Debug, Clone, Copy)]
struct LocalRange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

/// Turns `date` / `week` / `time` query tokens into a concrete [`TimeRange`].
#[derive(Debug, Clone, Copy)]
pub struct TemporalFilterBuilder {
    offset: FixedOffset,
}

impl Default for TemporalFilterBuilder {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl TemporalFilterBuilder {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
            warn!("Clinic UTC offset of {} minutes is out of range, using UTC", minutes);
            Utc.fix()
        });
        Self::new(offset)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// `week` wins over `date` when both are given; `time` then rewrites the
    /// clock time of the range start and of the range end on their own days.
    /// Malformed tokens, and tokens whose range falls outside what can be
    /// represented, contribute nothing.
    pub fn resolve(
        &self,
        date: Option<&str>,
        week: Option<&str>,
        time: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<TimeRange> {
        let mut range = None;

        if let Some(raw) = non_blank(date) {
            match self.parse_local_date(raw) {
                Some(day) => range = Some(day_range(day)),
                None => warn!("Ignoring malformed date filter '{}'", raw),
            }
        }

        if let Some(raw) = non_blank(week) {
            match self.week_start(raw).and_then(week_range) {
                Some(week) => range = Some(week),
                None => warn!("Ignoring malformed week filter '{}'", raw),
            }
        }

        if let Some(raw) = non_blank(time) {
            match parse_clock(raw) {
                Some((hour, minute)) => {
                    let base = range.unwrap_or_else(|| {
                        day_range(now.with_timezone(&self.offset).date_naive())
                    });
                    range = Some(narrow_to_hour(base, hour, minute));
                }
                None => warn!("Ignoring malformed time filter '{}'", raw),
            }
        }

        let resolved = match range {
            Some(local) => match (self.to_utc(local.start), self.to_utc(local.end)) {
                (Some(start), Some(end)) => Some(TimeRange { start, end }),
                _ => {
                    warn!("Ignoring temporal filter outside the representable range: {:?}", local);
                    None
                }
            },
            None => None,
        };

        debug!("Resolved temporal filter {:?}", resolved);
        resolved
    }

    /// Parses a client-supplied instant. Strings without an offset are read
    /// as clinic wall-clock time.
    pub fn parse_instant(&self, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Some(instant.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .and_then(|local| self.to_utc(local))
    }

    /// ISO tokens go through [`parse_iso_week`]; a plain date selects the
    /// Monday..Sunday week that contains it.
    fn week_start(&self, raw: &str) -> Option<NaiveDate> {
        if raw.contains('W') {
            parse_iso_week(raw)
        } else {
            self.parse_local_date(raw).and_then(monday_of_week)
        }
    }

    fn parse_local_date(&self, raw: &str) -> Option<NaiveDate> {
        if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(day);
        }
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Some(instant.with_timezone(&self.offset).date_naive());
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
            .ok()
            .map(|local| local.date())
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        local
            .checked_sub_signed(Duration::seconds(self.offset.local_minus_utc() as i64))
            .map(|utc| utc.and_utc())
    }
}

/// Monday of ISO week token `YYYY-Www`.
///
/// Starts from January 1st plus `(week - 1) * 7` days, then moves back to the
/// Monday when that day falls Sunday..Thursday, otherwise forward to the next
/// Monday.
pub fn parse_iso_week(token: &str) -> Option<NaiveDate> {
    let (year, week) = token.trim().split_once("-W")?;
    let year: i32 = year.parse().ok()?;
    let week: i64 = week.parse().ok()?;
    if !(1..=53).contains(&week) {
        return None;
    }

    let january_first = NaiveDate::from_ymd_opt(year, 1, 1)?;
    align_to_monday(january_first.checked_add_signed(Duration::days((week - 1) * 7))?)
}

/// Sunday..Thursday resolve to the Monday of their ISO week (Sunday moves
/// forward one day), Friday and Saturday to the following Monday.
pub fn align_to_monday(day: NaiveDate) -> Option<NaiveDate> {
    let weekday = day.weekday().num_days_from_sunday() as i64;
    if weekday <= 4 {
        day.checked_sub_signed(Duration::days(weekday - 1))
    } else {
        day.checked_add_signed(Duration::days(8 - weekday))
    }
}

/// Monday of the Monday..Sunday week containing `day`.
pub fn monday_of_week(day: NaiveDate) -> Option<NaiveDate> {
    day.checked_sub_signed(Duration::days(day.weekday().num_days_from_monday() as i64))
}

fn non_blank(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

fn parse_clock(raw: &str) -> Option<(u32, u32)> {
    let (hour, minute) = match raw.split_once(':') {
        Some((hour, minute)) => (hour, minute),
        None => (raw, "0"),
    };
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn start_of_day() -> NaiveTime {
    NaiveTime::default()
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::default())
}

fn day_range(day: NaiveDate) -> LocalRange {
    LocalRange {
        start: day.and_time(start_of_day()),
        end: day.and_time(end_of_day()),
    }
}

fn week_range(monday: NaiveDate) -> Option<LocalRange> {
    let sunday = monday.checked_add_signed(Duration::days(6))?;
    Some(LocalRange {
        start: monday.and_time(start_of_day()),
        end: sunday.and_time(end_of_day()),
    })
}

fn narrow_to_hour(range: LocalRange, hour: u32, minute: u32) -> LocalRange {
    let start_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::default());
    let end_time = NaiveTime::from_hms_milli_opt(hour, 59, 59, 999).unwrap_or(NaiveTime::default());
    LocalRange {
        start: range.start.date().and_time(start_time),
        end: range.end.date().and_time(end_time),
    }
}
