use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

pub const MAX_INTERVAL_MINUTES: u32 = 60;

/// Daily trading window on business days, evaluated in one civil timezone,
/// together with the firing grid used while the window is open.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveWindow {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    closed_weekdays: Vec<Weekday>,
    interval_minutes: u32,
}

impl ActiveWindow {
    pub fn new(
        timezone: Tz,
        open: NaiveTime,
        close: NaiveTime,
        closed_weekdays: Vec<Weekday>,
        interval_minutes: u32,
    ) -> Result<Self, String> {
        if open >= close {
            return Err(format!(
                "window open ({open}) must be before close ({close})"
            ));
        }
        if interval_minutes == 0 || interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(format!(
                "interval_minutes must be within 1..={MAX_INTERVAL_MINUTES}, got {interval_minutes}"
            ));
        }
        let mut closed_weekdays = closed_weekdays;
        closed_weekdays.sort_by_key(|day| day.num_days_from_monday());
        closed_weekdays.dedup();
        if closed_weekdays.len() >= 7 {
            return Err("at least one business day is required".to_string());
        }

        Ok(Self {
            timezone,
            open,
            close,
            closed_weekdays,
            interval_minutes,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn open_time(&self) -> NaiveTime {
        self.open
    }

    pub fn close_time(&self) -> NaiveTime {
        self.close
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !self.closed_weekdays.contains(&date.weekday())
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        if !self.is_business_day(local.date_naive()) {
            return false;
        }
        let time = local.time();
        self.open <= time && time <= self.close
    }

    pub fn next_aligned_instant(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_aligned_instant(&now.with_timezone(&self.timezone), self.interval_minutes)
            .with_timezone(&Utc)
    }

    pub fn next_window_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.timezone);
        let today = local.date_naive();
        if self.is_business_day(today) && local.time() < self.open {
            return self.at_local(today, self.open);
        }

        let next_day = (1..=7)
            .map(|offset| today + Duration::days(offset))
            .find(|day| self.is_business_day(*day))
            .unwrap_or(today + Duration::days(1));
        self.at_local(next_day, self.open)
    }

    fn at_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        self.timezone
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }
}

/// Rounds `now` up to the next multiple of `interval_minutes` counted from
/// the top of the hour, with seconds cleared. A minute already on the grid
/// moves one full interval ahead, so the result is always later than `now`.
pub fn next_aligned_instant<Z: TimeZone>(now: &DateTime<Z>, interval_minutes: u32) -> DateTime<Z> {
    let interval = interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
    let minute = now.minute();
    let next_slot = (minute / interval + 1) * interval;
    let minutes_to_add = if next_slot >= 60 {
        60 - minute
    } else {
        next_slot - minute
    };

    let truncated = now.clone()
        - Duration::seconds(i64::from(now.second()))
        - Duration::nanoseconds(i64::from(now.nanosecond()));
    truncated + Duration::minutes(i64::from(minutes_to_add))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    pub window_open: bool,
    pub last_fired: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<Utc>>,
}
