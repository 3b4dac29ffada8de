use chrono::{DateTime, Datelike, DurationRound, TimeDelta, Timelike, Utc};

use clockwork_types::models::CrontabSchedule;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("`{0}` is not a valid {1} field")]
    Invalid(String, &'static str),
    #[error("{value} is out of range for {field} ({min}-{max})")]
    OutOfRange {
        value: u32,
        field: &'static str,
        min: u32,
        max: u32,
    },
}

/// One cron field as a bitset of allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
}

impl Field {
    fn parse(spec: &str, name: &'static str, min: u32, max: u32) -> Result<Self, CronError> {
        let invalid = || CronError::Invalid(spec.to_string(), name);
        let mut bits = 0u64;

        for item in spec.split(',').map(str::trim) {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| invalid())?;
                    if step == 0 {
                        return Err(invalid());
                    }
                    (range, step)
                }
                None => (item, 1),
            };

            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (a.parse().map_err(|_| invalid())?, b.parse().map_err(|_| invalid())?)
            } else {
                let v: u32 = range.parse().map_err(|_| invalid())?;
                // `5/15` means "from 5 to the end, every 15"
                if item.contains('/') { (v, max) } else { (v, v) }
            };

            for v in [lo, hi] {
                if v < min || v > max {
                    return Err(CronError::OutOfRange { value: v, field: name, min, max });
                }
            }
            if lo > hi {
                return Err(invalid());
            }

            let mut v = lo;
            while v <= hi {
                bits |= 1u64 << v;
                v += step;
            }
        }

        Ok(Self { bits })
    }

    fn contains(self, v: u32) -> bool {
        v < 64 && self.bits & (1u64 << v) != 0
    }
}

/// A parsed crontab. All five fields must match (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crontab {
    minute: Field,
    hour: Field,
    day_of_week: Field,
    day_of_month: Field,
    month_of_year: Field,
}

impl Crontab {
    pub fn parse(
        minute: &str,
        hour: &str,
        day_of_week: &str,
        day_of_month: &str,
        month_of_year: &str,
    ) -> Result<Self, CronError> {
        let mut day_of_week = Field::parse(day_of_week, "day_of_week", 0, 7)?;
        // 7 is another name for Sunday
        if day_of_week.contains(7) {
            day_of_week.bits |= 1;
        }
        Ok(Self {
            minute: Field::parse(minute, "minute", 0, 59)?,
            hour: Field::parse(hour, "hour", 0, 23)?,
            day_of_week,
            day_of_month: Field::parse(day_of_month, "day_of_month", 1, 31)?,
            month_of_year: Field::parse(month_of_year, "month_of_year", 1, 12)?,
        })
    }

    pub fn from_schedule(s: &CrontabSchedule) -> Result<Self, CronError> {
        Self::parse(&s.minute, &s.hour, &s.day_of_week, &s.day_of_month, &s.month_of_year)
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.contains(at.minute())
            && self.hour.contains(at.hour())
            && self.day_of_week.contains(at.weekday().num_days_from_sunday())
            && self.day_of_month.contains(at.day())
            && self.month_of_year.contains(at.month())
    }

    /// Due when the current minute matches and the task has not run since
    /// that minute began.
    pub fn is_due(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let minute_start = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);
        self.matches(minute_start) && last_run_at.is_none_or(|last| last < minute_start)
    }
}
