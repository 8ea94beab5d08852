use chrono::NaiveDate;

use crate::calendar::Calendar;
use crate::index::IntervalIndex;
use crate::limits::{MAX_HORIZON_DAYS, MAX_PLAN_HOURS_PER_DAY};
use crate::model::{HOUR_MS, Ms};
use crate::selection::Selection;

/// Shape of the bookable grid: which hours of which days can be clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    horizon_days: u32,
    start_hour: u32,
    slots_per_day: u32,
    granularity_hours: u32,
}

impl Default for SlotPlan {
    /// Two weeks ahead, 10:00 through 20:00, hourly.
    fn default() -> Self {
        Self {
            horizon_days: 14,
            start_hour: 10,
            slots_per_day: 11,
            granularity_hours: 1,
        }
    }
}

impl SlotPlan {
    /// `None` for a start hour past 23, a zero granularity, an unreasonably
    /// long horizon or a day of slots longer than 24 hours.
    pub fn new(
        horizon_days: u32,
        start_hour: u32,
        slots_per_day: u32,
        granularity_hours: u32,
    ) -> Option<Self> {
        if start_hour > 23
            || granularity_hours == 0
            || granularity_hours > MAX_PLAN_HOURS_PER_DAY
            || horizon_days > MAX_HORIZON_DAYS
        {
            return None;
        }
        let day_hours = u64::from(slots_per_day) * u64::from(granularity_hours);
        if day_hours > u64::from(MAX_PLAN_HOURS_PER_DAY) {
            return None;
        }
        Some(Self {
            horizon_days,
            start_hour,
            slots_per_day,
            granularity_hours,
        })
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn slots_per_day(&self) -> u32 {
        self.slots_per_day
    }

    pub fn granularity_ms(&self) -> Ms {
        i64::from(self.granularity_hours) * HOUR_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub day: NaiveDate,
    pub slots: Vec<Ms>,
}

/// Candidate slots for `plan.horizon_days` days starting with the day of `now`.
///
/// Recomputed on every call; nothing is cached or persisted. An empty plan
/// (no days or no slots per day) produces an empty grid.
pub fn generate_slots(plan: &SlotPlan, calendar: &Calendar, now: Ms) -> Vec<DaySlots> {
    if plan.horizon_days == 0 || plan.slots_per_day == 0 {
        return Vec::new();
    }
    let first_day = calendar.day_of(now);
    let step = plan.granularity_ms();

    (0..plan.horizon_days)
        .map(|offset| {
            let day = Calendar::add_days(first_day, offset);
            let base = calendar.at_hour(day, plan.start_hour);
            let slots = (0..plan.slots_per_day)
                .map(|j| base + i64::from(j) * step)
                .collect();
            DaySlots { day, slots }
        })
        .collect()
}

/// One clickable cell as a front end would render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCell {
    pub at: Ms,
    pub selected: bool,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBoard {
    pub day: NaiveDate,
    pub cells: Vec<SlotCell>,
}

/// The slot grid with selection and blocking applied.
pub fn slot_board(
    plan: &SlotPlan,
    calendar: &Calendar,
    now: Ms,
    index: &IntervalIndex,
    selection: &Selection,
) -> Vec<DayBoard> {
    generate_slots(plan, calendar, now)
        .into_iter()
        .map(|DaySlots { day, slots }| DayBoard {
            day,
            cells: slots
                .into_iter()
                .map(|at| SlotCell {
                    at,
                    selected: selection.is_selected(at),
                    disabled: index.is_blocked(at),
                })
                .collect(),
        })
        .collect()
}
