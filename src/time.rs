use chrono::{
    DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone,
    Utc,
};
use chrono_tz::Tz;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Calendar arithmetic in the device's local zone.
///
/// Every "day" here is a calendar day in `tz`, never a fixed 24h span, so a
/// DST switch between two dates does not shift the day count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    tz: Tz,
}

impl LocalCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Calendar date of `instant` in the local zone.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// Signed number of calendar days from `from` to `to`.
    pub fn days_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        self.date_of(to)
            .signed_duration_since(self.date_of(from))
            .num_days()
    }

    /// Moves `instant` by `days` calendar days, keeping the local wall-clock time.
    ///
    /// A target reading inside a DST gap or fold goes through `resolve_local`;
    /// `None` only when the date leaves chrono's range.
    pub fn add_days(&self, instant: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
        let local = instant.with_timezone(&self.tz).naive_local();
        let magnitude = Days::new(days.unsigned_abs());
        let date = if days >= 0 {
            local.date().checked_add_days(magnitude)?
        } else {
            local.date().checked_sub_days(magnitude)?
        };
        Some(self.resolve_local(date.and_time(local.time())))
    }

    /// The instant at which the local clock reads `time` on `date`.
    pub fn at_local_time(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        self.resolve_local(date.and_time(time))
    }

    /// Interpret a wall-clock reading in the local zone. Ambiguous times during
    /// a DST fall-back choose the earlier occurrence; times inside a spring-forward
    /// gap are read with the offset in force just before the gap.
    pub fn resolve_local(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let before_gap = self
                    .tz
                    .offset_from_utc_datetime(&(naive - TimeDelta::days(1)))
                    .fix();
                let shifted = naive - TimeDelta::seconds(i64::from(before_gap.local_minus_utc()));
                Utc.from_utc_datetime(&shifted)
            }
        }
    }
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self::utc()
    }
}
