use chrono::NaiveDate;
use ulid::Ulid;

use crate::index::IntervalIndex;
use crate::model::*;
use crate::slots::{generate_slots, DaySlots};

use super::{Engine, EngineError};

/// One row of the public booking grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRow {
    pub day: NaiveDate,
    pub span: Span,
    pub disabled: bool,
}

impl Engine {
    /// Approved spans of a place, ascending by start.
    pub async fn list_approved_intervals(&self, place_id: Ulid) -> Result<Vec<Span>, EngineError> {
        let ps = self
            .get_place_state(&place_id)
            .ok_or(EngineError::NotFound(place_id))?;
        let guard = ps.read().await;
        Ok(guard.approved_spans())
    }

    /// Fresh index of the approved intervals that have not ended by `now`.
    pub async fn interval_index(&self, place_id: Ulid, now: Ms) -> Result<IntervalIndex, EngineError> {
        let spans = self.list_approved_intervals(place_id).await?;
        Ok(IntervalIndex::build(
            self.calendar,
            spans.into_iter().filter(|s| s.end > now),
        ))
    }

    pub async fn slots(&self, place_id: Ulid, now: Ms) -> Result<Vec<SlotRow>, EngineError> {
        let index = self.interval_index(place_id, now).await?;
        let step = self.plan.granularity_ms();
        let index = &index;
        Ok(generate_slots(&self.plan, &self.calendar, now)
            .into_iter()
            .flat_map(|DaySlots { day, slots }| {
                slots.into_iter().map(move |at| SlotRow {
                    day,
                    span: Span::new(at, at + step),
                    disabled: index.is_blocked(at),
                })
            })
            .collect())
    }

    pub async fn list_places(&self) -> Vec<Place> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut places = Vec::with_capacity(shared.len());
        for ps in shared {
            places.push(ps.read().await.place.clone());
        }
        places.sort_by_key(|p| p.id);
        places
    }

    pub async fn get_place(&self, id: Ulid) -> Option<Place> {
        let ps = self.get_place_state(&id)?;
        let guard = ps.read().await;
        Some(guard.place.clone())
    }

    /// Photos of a place in the order they were added.
    pub async fn list_photos(&self, place_id: Ulid) -> Result<Vec<Photo>, EngineError> {
        let ps = self
            .get_place_state(&place_id)
            .ok_or(EngineError::NotFound(place_id))?;
        let guard = ps.read().await;
        Ok(guard.photos.clone())
    }

    pub fn list_admins(&self) -> Vec<Admin> {
        let mut admins: Vec<Admin> = self.admins.iter().map(|e| e.value().clone()).collect();
        admins.sort_by_key(|a| a.id);
        admins
    }

    pub fn has_admins(&self) -> bool {
        !self.admins.is_empty()
    }

    pub fn find_admin_by_name(&self, name: &str) -> Option<Admin> {
        self.admins
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    /// Requests joined with their user, approval and deciding admin, newest
    /// start first. `None` lists every place.
    pub async fn list_requests(&self, place_id: Option<Ulid>) -> Result<Vec<RequestView>, EngineError> {
        let shared = match place_id {
            Some(id) => vec![self.get_place_state(&id).ok_or(EngineError::NotFound(id))?],
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let mut views = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            views.extend(guard.requests.iter().map(|r| self.view_of(&guard, r)));
        }
        views.sort_by(|a, b| {
            b.request
                .span
                .start
                .cmp(&a.request.span.start)
                .then(b.request.id.cmp(&a.request.id))
        });
        Ok(views)
    }

    pub async fn get_request(&self, id: Ulid) -> Option<RequestView> {
        let place_id = self.place_of_request(&id)?;
        let ps = self.get_place_state(&place_id)?;
        let guard = ps.read().await;
        let request = guard.request(&id)?;
        Some(self.view_of(&guard, request))
    }

    fn view_of(&self, ps: &PlaceState, request: &Request) -> RequestView {
        let approval = ps.approval_of(request).cloned();
        let admin = approval
            .as_ref()
            .and_then(|a| a.admin_id)
            .and_then(|id| self.admins.get(&id).map(|e| e.value().clone()));
        RequestView {
            request: request.clone(),
            user: self.users.get(&request.user_id).map(|e| e.value().clone()),
            status: ps.status_of(request),
            approval,
            admin,
        }
    }
}
