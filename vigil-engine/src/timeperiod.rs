//! Time periods
//!
//! Legacy weekly range definitions (`"monday" => "09:00-17:00,21:00-23:00"`,
//! `"day 15" => "00:00-24:00"`) interpreted in local time. Used as the
//! check-period gate and as the calendar source for scheduled downtimes.

use crate::error::{EngineError, EngineResult};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Weekday};
use std::collections::BTreeMap;

/// One concrete time segment, UNIX-second bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub begin: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy)]
enum DayKey {
    Weekday(Weekday),
    DayOfMonth(u32),
}

impl DayKey {
    fn parse(key: &str) -> EngineResult<Self> {
        let key = key.trim().to_ascii_lowercase();

        let weekday = match key.as_str() {
            "monday" => Some(Weekday::Mon),
            "tuesday" => Some(Weekday::Tue),
            "wednesday" => Some(Weekday::Wed),
            "thursday" => Some(Weekday::Thu),
            "friday" => Some(Weekday::Fri),
            "saturday" => Some(Weekday::Sat),
            "sunday" => Some(Weekday::Sun),
            _ => None,
        };

        if let Some(wd) = weekday {
            return Ok(DayKey::Weekday(wd));
        }

        if let Some(day) = key.strip_prefix("day ") {
            let n: u32 = day.trim().parse().map_err(|_| EngineError::InvalidTimeRange {
                range: key.clone(),
                reason: "day of month must be a number".into(),
            })?;
            if !(1..=31).contains(&n) {
                return Err(EngineError::InvalidTimeRange {
                    range: key.clone(),
                    reason: "day of month must be in 1..=31".into(),
                });
            }
            return Ok(DayKey::DayOfMonth(n));
        }

        Err(EngineError::InvalidTimeRange {
            range: key,
            reason: "unknown day specification".into(),
        })
    }

    fn matches(&self, date: NaiveDate) -> bool {
        match self {
            DayKey::Weekday(wd) => date.weekday() == *wd,
            DayKey::DayOfMonth(n) => date.day() == *n,
        }
    }
}

fn parse_hhmm(s: &str) -> EngineResult<(u32, u32)> {
    let err = || EngineError::InvalidTimeRange {
        range: s.to_string(),
        reason: "expected HH:MM".into(),
    };

    let (h, m) = s.split_once(':').ok_or_else(err)?;
    let h: u32 = h.trim().parse().map_err(|_| err())?;
    let m: u32 = m.trim().parse().map_err(|_| err())?;

    if h > 24 || m > 59 || (h == 24 && m != 0) {
        return Err(EngineError::InvalidTimeRange {
            range: s.to_string(),
            reason: "time of day out of range".into(),
        });
    }

    Ok((h, m))
}

fn local_ts(date: NaiveDate, hour: u32, minute: u32) -> Option<f64> {
    let naive: NaiveDateTime = if hour == 24 {
        (date + Duration::days(1)).and_hms_opt(0, 0, 0)?
    } else {
        date.and_hms_opt(hour, minute, 0)?
    };

    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&naive).latest())?;

    Some(local.timestamp() as f64)
}

/// A named set of weekly/monthly time ranges
#[derive(Debug)]
pub struct TimePeriod {
    name: String,
    ranges: Vec<(DayKey, Vec<(u32, u32, u32, u32)>)>,
}

impl TimePeriod {
    /// Build a time period, validating every range definition
    pub fn new(
        name: impl Into<String>,
        ranges: &BTreeMap<String, String>,
    ) -> EngineResult<Self> {
        let mut parsed = Vec::new();

        for (key, spec) in ranges {
            let day = DayKey::parse(key)?;
            let mut windows = Vec::new();

            for part in spec.split(',') {
                let part = part.trim();
                let (begin, end) = part.split_once('-').ok_or_else(|| {
                    EngineError::InvalidTimeRange {
                        range: part.to_string(),
                        reason: "expected HH:MM-HH:MM".into(),
                    }
                })?;
                let (bh, bm) = parse_hhmm(begin)?;
                let (eh, em) = parse_hhmm(end)?;

                if (eh, em) <= (bh, bm) {
                    return Err(EngineError::InvalidTimeRange {
                        range: part.to_string(),
                        reason: "range end must be after its begin".into(),
                    });
                }

                windows.push((bh, bm, eh, em));
            }

            parsed.push((day, windows));
        }

        Ok(Self {
            name: name.into(),
            ranges: parsed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn segments_for(&self, date: NaiveDate) -> Vec<Segment> {
        let mut out = Vec::new();

        for (day, windows) in &self.ranges {
            if !day.matches(date) {
                continue;
            }

            for &(bh, bm, eh, em) in windows {
                if let (Some(begin), Some(end)) =
                    (local_ts(date, bh, bm), local_ts(date, eh, em))
                {
                    if end > begin {
                        out.push(Segment { begin, end });
                    }
                }
            }
        }

        out
    }

    fn date_of(t: f64) -> Option<NaiveDate> {
        Local
            .timestamp_opt(t as i64, 0)
            .earliest()
            .map(|dt| dt.date_naive())
    }

    /// Is `t` inside one of the period's segments?
    pub fn is_inside(&self, t: f64) -> bool {
        match Self::date_of(t) {
            Some(date) => self
                .segments_for(date)
                .iter()
                .any(|s| s.begin <= t && t < s.end),
            None => false,
        }
    }

    /// Longest segment already running at `now` whose end exceeds `min_end`
    pub fn find_running_segment(&self, now: f64, min_end: f64) -> Option<Segment> {
        let date = Self::date_of(now)?;
        self.segments_for(date)
            .into_iter()
            .filter(|s| s.begin <= now && now < s.end && s.end > min_end)
            .max_by(|a, b| a.end.total_cmp(&b.end))
    }

    /// Earliest segment beginning after `now` and not before `min_begin`
    pub fn find_next_segment(&self, now: f64, min_begin: f64) -> Option<Segment> {
        let start_date = Self::date_of(now)?;

        // bounded forward scan; weekly and monthly keys both recur well
        // within this horizon
        for offset in 0..=400 {
            let date = start_date + Duration::days(offset);
            let hit = self
                .segments_for(date)
                .into_iter()
                .filter(|s| s.begin >= now && s.begin >= min_begin)
                .min_by(|a, b| a.begin.total_cmp(&b.begin));

            if let Some(seg) = hit {
                return Some(seg);
            }
        }

        None
    }
}
