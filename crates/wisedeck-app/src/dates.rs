// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use time::{Date, Duration, Month, OffsetDateTime};

pub const YEAR_MIN: i32 = 1900;
pub const YEAR_MAX: i32 = 2100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFmt {
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM-DDThh:mm:00Z`
    Minute,
}

impl DateFmt {
    pub const fn part_count(self) -> usize {
        match self {
            Self::Day => 3,
            Self::Minute => 5,
        }
    }
}

/// Transient year/month/day[/hour/minute] editor state. Drafts only ever
/// hold "" or the canonical serialization; in-progress edits live here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParts {
    pub parts: Vec<i32>,
    pub cursor: usize,
    pub fmt: DateFmt,
}

impl DateParts {
    pub fn today(fmt: DateFmt) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut parts = vec![
            now.year(),
            i32::from(now.month() as u8),
            i32::from(now.day()),
        ];
        if fmt == DateFmt::Minute {
            parts.push(i32::from(now.hour()));
            parts.push(i32::from(now.minute()));
        }
        Self {
            parts,
            cursor: 0,
            fmt,
        }
    }

    /// Accepts the canonical draft form: `YYYY-MM-DD`, optionally followed by
    /// `Thh:mm` (seconds and zone suffix ignored). A missing time is 00:00.
    pub fn parse(raw: &str, fmt: DateFmt) -> Option<Self> {
        let raw = raw.trim();
        let year: i32 = digits(raw, 0, 4)?;
        if raw.as_bytes().get(4) != Some(&b'-') || raw.as_bytes().get(7) != Some(&b'-') {
            return None;
        }
        let month: i32 = digits(raw, 5, 2)?;
        let day: i32 = digits(raw, 8, 2)?;
        if !(1..=12).contains(&month) {
            return None;
        }
        if day < 1 || day > days_in_month(year, month) {
            return None;
        }

        let mut parts = vec![year, month, day];
        if fmt == DateFmt::Minute {
            let (hour, minute) = if raw.as_bytes().get(10) == Some(&b'T') {
                let hour = digits(raw, 11, 2)?;
                if raw.as_bytes().get(13) != Some(&b':') {
                    return None;
                }
                (hour, digits(raw, 14, 2)?)
            } else {
                (0, 0)
            };
            if !(0..=23).contains(&hour) || !(0..=59).contains(&minute) {
                return None;
            }
            parts.push(hour);
            parts.push(minute);
        }

        Some(Self {
            parts,
            cursor: 0,
            fmt,
        })
    }

    pub fn to_draft(&self) -> String {
        match self.fmt {
            DateFmt::Day => format!(
                "{:04}-{:02}-{:02}",
                self.parts[0], self.parts[1], self.parts[2]
            ),
            DateFmt::Minute => format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:00Z",
                self.parts[0], self.parts[1], self.parts[2], self.parts[3], self.parts[4]
            ),
        }
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = self.parts.len() as isize;
        self.cursor = (self.cursor as isize + delta).rem_euclid(len) as usize;
    }

    /// Year clamps, every other part wraps; the day is re-clamped after any
    /// change so month/year moves never produce 2026-02-31.
    pub fn adjust(&mut self, delta: i32) {
        match self.cursor {
            0 => self.parts[0] = (self.parts[0] + delta).clamp(YEAR_MIN, YEAR_MAX),
            1 => self.parts[1] = wrap(self.parts[1] + delta, 1, 12),
            2 => {
                let max = days_in_month(self.parts[0], self.parts[1]);
                self.parts[2] = wrap(self.parts[2] + delta, 1, max);
            }
            3 => self.parts[3] = wrap(self.parts[3] + delta, 0, 23),
            4 => self.parts[4] = wrap(self.parts[4] + delta, 0, 59),
            _ => {}
        }
        let max = days_in_month(self.parts[0], self.parts[1]);
        self.parts[2] = self.parts[2].min(max);
    }
}

fn digits(raw: &str, start: usize, len: usize) -> Option<i32> {
    let slice = raw.get(start..start + len)?;
    if !slice.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    slice.parse().ok()
}

fn wrap(value: i32, min: i32, max: i32) -> i32 {
    let span = max - min + 1;
    (value - min).rem_euclid(span) + min
}

pub fn days_in_month(year: i32, month: i32) -> i32 {
    let Ok(month) = Month::try_from(month as u8) else {
        return 31;
    };
    let (next_year, next_month) = if month == Month::December {
        (year + 1, Month::January)
    } else {
        (year, month.next())
    };
    Date::from_calendar_date(next_year, next_month, 1)
        .map(|first| i32::from((first - Duration::days(1)).day()))
        .unwrap_or(31)
}
