//! A visitor's in-progress choice of a time range at one place.
//!
//! The selection is a plain value driven by [`Selection::apply`]: every click
//! produces a new state, and a click that would create a cross-day or
//! conflicting range restarts the selection at the clicked slot instead of
//! being rejected.

use crate::index::IntervalIndex;
use crate::model::{Ms, Span};

/// Which endpoint the last click set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    StartSet,
    RangeSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    Click(Ms),
    Reset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    start: Option<Ms>,
    end: Option<Ms>,
    last_set: Option<Anchor>,
}

impl Selection {
    pub fn start(&self) -> Option<Ms> {
        self.start
    }

    pub fn end(&self) -> Option<Ms> {
        self.end
    }

    pub fn last_set(&self) -> Option<Anchor> {
        self.last_set
    }

    pub fn phase(&self) -> Phase {
        match (self.start, self.end) {
            (Some(_), Some(_)) => Phase::RangeSet,
            (Some(_), None) | (None, Some(_)) => Phase::StartSet,
            (None, None) => Phase::Empty,
        }
    }

    /// The range ready for submission. Only a complete range with
    /// `start < end` qualifies.
    pub fn span(&self) -> Option<Span> {
        Span::try_new(self.start?, self.end?)
    }

    /// Slot `t` is highlighted: an endpoint or strictly between them.
    pub fn is_selected(&self, t: Ms) -> bool {
        if self.start == Some(t) || self.end == Some(t) {
            return true;
        }
        matches!((self.start, self.end), (Some(s), Some(e)) if s < t && t < e)
    }

    pub fn apply(self, event: SelectionEvent, index: &IntervalIndex) -> Selection {
        match event {
            SelectionEvent::Click(t) => self.click(t, index),
            SelectionEvent::Reset => Selection::default(),
        }
    }

    fn anchored_at(t: Ms) -> Selection {
        Selection {
            start: Some(t),
            end: None,
            last_set: Some(Anchor::Start),
        }
    }

    fn click(self, t: Ms, index: &IntervalIndex) -> Selection {
        // Disabled slots are informational only.
        if index.is_blocked(t) {
            return self;
        }

        let calendar = index.calendar();
        let mut state = self;
        let leaves_day = |anchor: Option<Ms>| anchor.is_some_and(|a| !calendar.same_day(a, t));
        if leaves_day(state.start) || leaves_day(state.end) {
            state = Selection::default();
        }

        let crosses_booking = |anchor: Option<Ms>| {
            anchor.is_some_and(|a| index.conflicts_between(a, t) || index.covers_any(a, t))
        };
        if crosses_booking(state.end) || crosses_booking(state.start) {
            return Selection::anchored_at(t);
        }

        match (state.start, state.end, state.last_set) {
            (None, _, _) => Selection::anchored_at(t),
            (Some(s), None, _) if t > s => Selection {
                start: Some(s),
                end: Some(t),
                last_set: Some(Anchor::End),
            },
            // Second click before the first: the pair is stored in order.
            (Some(s), None, _) if t < s => Selection {
                start: Some(t),
                end: Some(s),
                last_set: Some(Anchor::Start),
            },
            (Some(_), None, _) => state,
            (Some(s), Some(_), Some(Anchor::Start)) if t > s => Selection {
                end: Some(t),
                last_set: Some(Anchor::End),
                ..state
            },
            (Some(_), Some(e), Some(Anchor::End)) => Selection {
                start: Some(t),
                end: (t < e).then_some(e),
                last_set: Some(Anchor::Start),
            },
            _ => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::model::HOUR_MS;

    // 2024-05-01T00:00:00Z
    const DAY0: Ms = 1_714_521_600_000;

    fn at(day: i64, hour: i64) -> Ms {
        DAY0 + day * 24 * HOUR_MS + hour * HOUR_MS
    }

    fn no_bookings() -> IntervalIndex {
        IntervalIndex::build(Calendar::utc(), [])
    }

    fn clicks(index: &IntervalIndex, ts: &[Ms]) -> Selection {
        ts.iter().fold(Selection::default(), |sel, &t| {
            sel.apply(SelectionEvent::Click(t), index)
        })
    }

    #[test]
    fn two_clicks_make_a_range() {
        let idx = no_bookings();
        let sel = clicks(&idx, &[at(0, 10), at(0, 12)]);
        assert_eq!(sel.start(), Some(at(0, 10)));
        assert_eq!(sel.end(), Some(at(0, 12)));
        assert_eq!(sel.last_set(), Some(Anchor::End));
        assert_eq!(sel.phase(), Phase::RangeSet);
        for h in [10, 11, 12] {
            assert!(sel.is_selected(at(0, h)), "{h}:00 should be selected");
        }
        assert!(!sel.is_selected(at(0, 13)));
        assert!(!sel.is_selected(at(0, 9)));
    }

    #[test]
    fn clicking_past_a_booking_reanchors() {
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(0, 11), at(0, 13))]);
        let sel = clicks(&idx, &[at(0, 10), at(0, 14)]);
        assert_eq!(sel.start(), Some(at(0, 14)));
        assert_eq!(sel.end(), None);
        assert_eq!(sel.last_set(), Some(Anchor::Start));
        assert_eq!(sel.phase(), Phase::StartSet);
    }

    #[test]
    fn range_ending_on_booking_end_reanchors() {
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(0, 11), at(0, 13))]);
        let sel = clicks(&idx, &[at(0, 10), at(0, 13)]);
        assert_eq!(sel.start(), Some(at(0, 13)));
        assert_eq!(sel.end(), None);
    }

    #[test]
    fn range_may_touch_a_booking() {
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(0, 11), at(0, 13))]);
        let sel = clicks(&idx, &[at(0, 13), at(0, 16)]);
        assert_eq!(sel.span(), Some(Span::new(at(0, 13), at(0, 16))));
        let sel = clicks(&idx, &[at(0, 9), at(0, 11)]);
        assert_eq!(sel.span(), Some(Span::new(at(0, 9), at(0, 11))));
    }

    #[test]
    fn moving_start_past_a_booking_reanchors() {
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(0, 14), at(0, 16))]);
        // range 16..18, last set end; clicking 12 would span the booking
        let sel = clicks(&idx, &[at(0, 16), at(0, 18), at(0, 12)]);
        assert_eq!(sel.start(), Some(at(0, 12)));
        assert_eq!(sel.end(), None);
        assert_eq!(sel.last_set(), Some(Anchor::Start));
    }

    #[test]
    fn day_change_restarts_selection() {
        let idx = no_bookings();
        let sel = clicks(&idx, &[at(1, 10), at(2, 11)]);
        assert_eq!(sel.start(), Some(at(2, 11)));
        assert_eq!(sel.end(), None);
        assert_eq!(sel.last_set(), Some(Anchor::Start));

        let sel = clicks(&idx, &[at(1, 10), at(1, 12), at(2, 11)]);
        assert_eq!(sel.start(), Some(at(2, 11)));
        assert_eq!(sel.end(), None);
    }

    #[test]
    fn day_change_wins_over_conflict() {
        // Booking on day 2 whose end lies between the old anchor and the click.
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(2, 8), at(2, 9))]);
        let sel = clicks(&idx, &[at(1, 10), at(2, 11)]);
        assert_eq!(sel.start(), Some(at(2, 11)));
        assert_eq!(sel.end(), None);
        assert_eq!(sel.last_set(), Some(Anchor::Start));
    }

    #[test]
    fn reset_clears_everything() {
        let idx = no_bookings();
        let sel = clicks(&idx, &[at(0, 10), at(0, 12)]).apply(SelectionEvent::Reset, &idx);
        assert_eq!(sel, Selection::default());
        assert_eq!(sel.start(), None);
        assert_eq!(sel.end(), None);
        assert_eq!(sel.last_set(), None);
        assert_eq!(sel.phase(), Phase::Empty);
    }

    #[test]
    fn third_click_after_start_extends_end() {
        let idx = no_bookings();
        // 10 -> 12 (end), then 11 moves start; lastSet start; then 15 moves end
        let sel = clicks(&idx, &[at(0, 10), at(0, 12), at(0, 11), at(0, 15)]);
        assert_eq!(sel.span(), Some(Span::new(at(0, 11), at(0, 15))));
        assert_eq!(sel.last_set(), Some(Anchor::End));
    }

    #[test]
    fn moving_start_beyond_end_drops_end() {
        let idx = no_bookings();
        let sel = clicks(&idx, &[at(0, 10), at(0, 12), at(0, 14)]);
        // last set was end, so 14 becomes the start and 12 is dropped
        assert_eq!(sel.start(), Some(at(0, 14)));
        assert_eq!(sel.end(), None);
        assert_eq!(sel.last_set(), Some(Anchor::Start));
    }

    #[test]
    fn click_before_start_with_start_anchor_is_ignored() {
        let idx = no_bookings();
        let before = clicks(&idx, &[at(0, 10), at(0, 12), at(0, 11)]);
        assert_eq!(before.last_set(), Some(Anchor::Start));
        let after = before.apply(SelectionEvent::Click(at(0, 9)), &idx);
        assert_eq!(after, before);
    }

    #[test]
    fn second_click_before_first_orders_the_pair() {
        let idx = no_bookings();
        let sel = clicks(&idx, &[at(0, 14), at(0, 11)]);
        assert_eq!(sel.span(), Some(Span::new(at(0, 11), at(0, 14))));
    }

    #[test]
    fn same_slot_twice_stays_a_single_anchor() {
        let idx = no_bookings();
        let sel = clicks(&idx, &[at(0, 14), at(0, 14)]);
        assert_eq!(sel.phase(), Phase::StartSet);
        assert_eq!(sel.span(), None);
    }

    #[test]
    fn blocked_slot_click_is_ignored() {
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(0, 11), at(0, 14))]);
        let sel = clicks(&idx, &[at(0, 10), at(0, 12)]);
        assert_eq!(sel.start(), Some(at(0, 10)));
        assert_eq!(sel.end(), None);
    }

    #[test]
    fn confirmed_span_is_always_ordered() {
        let idx = IntervalIndex::build(Calendar::utc(), [Span::new(at(0, 13), at(0, 15))]);
        let mut sel = Selection::default();
        for h in [12, 10, 17, 16, 11, 19, 18, 10, 20, 15, 12] {
            sel = sel.apply(SelectionEvent::Click(at(0, h)), &idx);
            if let Some(span) = sel.span() {
                assert!(span.start < span.end);
                assert!(!idx.covers_any(span.start, span.end));
            }
        }
    }
}
