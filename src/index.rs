use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::calendar::Calendar;
use crate::model::{Ms, Span};

/// Read-only snapshot of one place's approved intervals, bucketed by day.
///
/// Built once per load and thrown away when the approved set changes; it is
/// never updated in place. A span that runs past midnight is filed under
/// every day it touches.
#[derive(Debug, Clone, Default)]
pub struct IntervalIndex {
    calendar: Calendar,
    days: BTreeMap<NaiveDate, Vec<Span>>,
}

impl IntervalIndex {
    pub fn build(calendar: Calendar, spans: impl IntoIterator<Item = Span>) -> Self {
        let mut days: BTreeMap<NaiveDate, Vec<Span>> = BTreeMap::new();
        for span in spans {
            let last = calendar.day_of(span.end - 1);
            let mut day = calendar.day_of(span.start);
            loop {
                days.entry(day).or_default().push(span);
                match day.succ_opt() {
                    Some(next) if day < last => day = next,
                    _ => break,
                }
            }
        }
        for spans in days.values_mut() {
            spans.sort_by_key(|s| (s.start, s.end));
            spans.dedup();
        }
        Self { calendar, days }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Approved intervals touching `day`, ascending by start.
    pub fn intervals_for_day(&self, day: NaiveDate) -> &[Span] {
        self.days.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True if `t` lies strictly inside an approved interval.
    pub fn is_blocked(&self, t: Ms) -> bool {
        self.intervals_for_day(self.calendar.day_of(t))
            .iter()
            .any(|s| s.strictly_contains(t))
    }

    /// True if some approved interval ends strictly between `a` and `b`.
    /// Argument order does not matter.
    pub fn conflicts_between(&self, a: Ms, b: Ms) -> bool {
        let (lo, hi) = (a.min(b), a.max(b));
        self.spans_near(lo, hi).any(|s| lo < s.end && s.end < hi)
    }

    /// True if some approved interval shares time with the open range
    /// between `a` and `b`.
    pub fn covers_any(&self, a: Ms, b: Ms) -> bool {
        let (lo, hi) = (a.min(b), a.max(b));
        lo < hi && self.spans_near(lo, hi).any(|s| s.start < hi && s.end > lo)
    }

    fn spans_near(&self, lo: Ms, hi: Ms) -> impl Iterator<Item = &Span> {
        let first = self.calendar.day_of(lo);
        let last = self.calendar.day_of(hi);
        self.days
            .range(first..=last)
            .flat_map(|(_, spans)| spans.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, MINUTE_MS};

    // 2024-05-01T00:00:00Z
    const DAY0: Ms = 1_714_521_600_000;

    fn at(day: i64, hour: i64) -> Ms {
        DAY0 + day * 24 * HOUR_MS + hour * HOUR_MS
    }

    fn index(spans: &[(Ms, Ms)]) -> IntervalIndex {
        IntervalIndex::build(
            Calendar::utc(),
            spans.iter().map(|&(s, e)| Span::new(s, e)),
        )
    }

    #[test]
    fn boundaries_are_not_blocked() {
        let idx = index(&[(at(0, 11), at(0, 13))]);
        assert!(!idx.is_blocked(at(0, 11)));
        assert!(!idx.is_blocked(at(0, 13)));
        assert!(idx.is_blocked(at(0, 11) + MINUTE_MS));
        assert!(idx.is_blocked(at(0, 12)));
        assert!(!idx.is_blocked(at(0, 14)));
    }

    #[test]
    fn intervals_grouped_by_day_and_sorted() {
        let idx = index(&[
            (at(1, 15), at(1, 16)),
            (at(0, 10), at(0, 12)),
            (at(1, 10), at(1, 11)),
        ]);
        let d0 = Calendar::utc().day_of(at(0, 0));
        let d1 = Calendar::utc().day_of(at(1, 0));
        let d2 = Calendar::utc().day_of(at(2, 0));
        assert_eq!(idx.intervals_for_day(d0), &[Span::new(at(0, 10), at(0, 12))]);
        assert_eq!(
            idx.intervals_for_day(d1),
            &[Span::new(at(1, 10), at(1, 11)), Span::new(at(1, 15), at(1, 16))]
        );
        assert!(idx.intervals_for_day(d2).is_empty());
    }

    #[test]
    fn overnight_span_blocks_both_days() {
        let idx = index(&[(at(0, 22), at(1, 2))]);
        assert!(idx.is_blocked(at(0, 23)));
        assert!(idx.is_blocked(at(1, 1)));
        assert!(!idx.is_blocked(at(1, 2)));
        let d1 = Calendar::utc().day_of(at(1, 0));
        assert_eq!(idx.intervals_for_day(d1).len(), 1);
    }

    #[test]
    fn span_ending_at_midnight_stays_on_its_day() {
        let idx = index(&[(at(0, 20), at(1, 0))]);
        let d1 = Calendar::utc().day_of(at(1, 0));
        assert!(idx.intervals_for_day(d1).is_empty());
    }

    #[test]
    fn conflicts_between_is_symmetric_and_open() {
        let idx = index(&[(at(0, 11), at(0, 13))]);
        assert!(idx.conflicts_between(at(0, 10), at(0, 14)));
        assert!(idx.conflicts_between(at(0, 14), at(0, 10)));
        // end exactly on an endpoint is not "between"
        assert!(!idx.conflicts_between(at(0, 10), at(0, 13)));
        assert!(!idx.conflicts_between(at(0, 13), at(0, 15)));
        assert!(!idx.conflicts_between(at(0, 12), at(0, 12)));
    }

    #[test]
    fn covers_any_catches_range_ending_on_booking_end() {
        let idx = index(&[(at(0, 11), at(0, 13))]);
        assert!(idx.covers_any(at(0, 10), at(0, 13)));
        assert!(!idx.covers_any(at(0, 13), at(0, 16)));
        assert!(!idx.covers_any(at(0, 9), at(0, 11)));
    }

    #[test]
    fn empty_index_blocks_nothing() {
        let idx = IntervalIndex::default();
        assert!(idx.is_empty());
        assert!(!idx.is_blocked(at(0, 12)));
        assert!(!idx.conflicts_between(at(0, 0), at(5, 0)));
    }
}
