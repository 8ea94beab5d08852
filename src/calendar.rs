use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

use crate::model::{DAY_MS, HOUR_MS, Ms, Span};

/// Wall-clock view of the site's operating time zone.
///
/// Every "same day" decision goes through here so slot generation, the
/// interval index and the selection guard agree on where midnight is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// `None` if the offset is a day or more away from UTC.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn day_of(&self, t: Ms) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(t)
            .unwrap_or_default()
            .with_timezone(&self.offset)
            .date_naive()
    }

    pub fn same_day(&self, a: Ms, b: Ms) -> bool {
        self.day_of(a) == self.day_of(b)
    }

    /// Local midnight of `day`.
    pub fn day_start(&self, day: NaiveDate) -> Ms {
        let local_midnight = day.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        local_midnight - i64::from(self.offset.local_minus_utc()) * 1000
    }

    /// `day` at `hour:00` local time. Hours past 23 roll into the next day.
    pub fn at_hour(&self, day: NaiveDate, hour: u32) -> Ms {
        self.day_start(day) + i64::from(hour) * HOUR_MS
    }

    pub fn day_bounds(&self, day: NaiveDate) -> Span {
        let start = self.day_start(day);
        Span::new(start, start + DAY_MS)
    }

    /// Day `n` days after `day`, saturating at the end of the calendar.
    pub fn add_days(day: NaiveDate, n: u32) -> NaiveDate {
        day.checked_add_days(Days::new(u64::from(n))).unwrap_or(NaiveDate::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-05-01T00:00:00Z
    const MAY_1_UTC: Ms = 1_714_521_600_000;

    #[test]
    fn utc_day_boundaries() {
        let cal = Calendar::utc();
        let day = cal.day_of(MAY_1_UTC);
        assert_eq!(day, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(cal.day_start(day), MAY_1_UTC);
        assert_eq!(cal.day_of(MAY_1_UTC - 1), NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
        assert_eq!(cal.day_bounds(day), Span::new(MAY_1_UTC, MAY_1_UTC + 24 * HOUR_MS));
    }

    #[test]
    fn offset_moves_midnight() {
        // UTC+3: local midnight is 21:00 UTC of the previous day.
        let cal = Calendar::with_offset_minutes(180).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(cal.day_start(day), MAY_1_UTC - 3 * HOUR_MS);
        assert_eq!(cal.day_of(MAY_1_UTC - 3 * HOUR_MS), day);
        assert_eq!(cal.day_of(MAY_1_UTC - 3 * HOUR_MS - 1), day.pred_opt().unwrap());
        assert_eq!(cal.at_hour(day, 10), MAY_1_UTC + 7 * HOUR_MS);
    }

    #[test]
    fn same_day_respects_offset() {
        let utc = Calendar::utc();
        let plus3 = Calendar::with_offset_minutes(180).unwrap();
        let late = MAY_1_UTC - HOUR_MS; // 23:00 UTC on Apr 30, 02:00 local May 1
        assert!(!utc.same_day(late, MAY_1_UTC));
        assert!(plus3.same_day(late, MAY_1_UTC));
    }

    #[test]
    fn rejects_offsets_of_a_day_or_more() {
        assert!(Calendar::with_offset_minutes(24 * 60).is_none());
        assert!(Calendar::with_offset_minutes(-24 * 60).is_none());
        assert!(Calendar::with_offset_minutes(-300).is_some());
    }
}
