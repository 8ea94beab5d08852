use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_overlap, now_ms};
use super::validation::{
    validate_admin_name, validate_photo_url, validate_place, validate_submission, Applicant,
};
use super::{Engine, EngineError, SharedPlaceState, WalCommand};

impl Engine {
    pub async fn create_place(
        &self,
        id: Ulid,
        name: String,
        map_link: String,
        frame_link: Option<String>,
        description: Option<String>,
    ) -> Result<Place, EngineError> {
        let _writing = self.compaction.read().await;
        if self.state.len() >= MAX_PLACES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many places"));
        }
        validate_place(&name, &map_link, frame_link.as_deref(), description.as_deref())?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let place = Place {
            id,
            name,
            map_link,
            frame_link,
            description,
            created_at: now_ms(),
        };
        let event = Event::PlaceCreated {
            id,
            name: place.name.clone(),
            map_link: place.map_link.clone(),
            frame_link: place.frame_link.clone(),
            description: place.description.clone(),
            created_at: place.created_at,
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(PlaceState::new(place.clone()))));
        self.notify.send(id, &event);
        info!(place = %id, name = %place.name, "place created");
        Ok(place)
    }

    pub async fn add_photo(&self, id: Ulid, place_id: Ulid, url: String) -> Result<Photo, EngineError> {
        let _writing = self.compaction.read().await;
        validate_photo_url(&url)?;
        let ps = self
            .get_place_state(&place_id)
            .ok_or(EngineError::NotFound(place_id))?;

        let mut guard = ps.write().await;
        if guard.photos.len() >= MAX_PHOTOS_PER_PLACE {
            return Err(EngineError::LimitExceeded("too many photos for place"));
        }
        if guard.photos.iter().any(|p| p.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::PhotoAdded {
            id,
            place_id,
            url: url.trim().to_string(),
            created_at: now_ms(),
        };
        self.persist_and_apply(place_id, &mut guard, &event).await?;
        info!(photo = %id, place = %place_id, "photo added");

        guard
            .photos
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Admin names are unique within a tenant; they double as login names.
    pub async fn create_admin(&self, id: Ulid, name: String) -> Result<Admin, EngineError> {
        let _writing = self.compaction.read().await;
        if self.admins.len() >= MAX_ADMINS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many admins"));
        }
        validate_admin_name(&name)?;
        if self.admins.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = self.find_admin_by_name(&name) {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let admin = Admin {
            id,
            name,
            created_at: now_ms(),
        };
        let event = Event::AdminCreated {
            id,
            name: admin.name.clone(),
            created_at: admin.created_at,
        };
        self.wal_append(&event).await?;
        self.admins.insert(id, admin.clone());
        info!(admin = %id, name = %admin.name, "admin created");
        Ok(admin)
    }

    /// Record a visitor's booking request: one durable write creates both the
    /// user and the pending request.
    pub async fn submit_request(
        &self,
        id: Ulid,
        place_id: Ulid,
        applicant: Applicant,
        start: Ms,
        end: Ms,
        message: String,
    ) -> Result<Request, EngineError> {
        let _writing = self.compaction.read().await;
        let span = validate_submission(&applicant, start, end, &message, &self.calendar)?;
        let ps = self
            .get_place_state(&place_id)
            .ok_or(EngineError::NotFound(place_id))?;
        if self.request_to_place.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut guard = ps.write().await;
        if guard.requests.len() >= MAX_REQUESTS_PER_PLACE {
            return Err(EngineError::LimitExceeded("too many requests for place"));
        }
        check_no_overlap(&guard, &span, None)?;

        let Applicant {
            full_name,
            phone,
            contact_link,
        } = applicant;
        let event = Event::RequestSubmitted {
            id,
            place_id,
            user_id: Ulid::new(),
            full_name: full_name.trim().to_string(),
            phone: phone.trim().to_string(),
            contact_link: contact_link.trim().to_string(),
            span,
            message,
            created_at: now_ms(),
        };
        self.persist_and_apply(place_id, &mut guard, &event).await?;
        metrics::counter!(observability::REQUESTS_SUBMITTED_TOTAL).increment(1);
        info!(request = %id, place = %place_id, start = span.start, end = span.end, "request submitted");

        guard
            .request(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Approve or reject a request. The first decision creates the approval,
    /// later ones overwrite it, so a request never has more than one.
    pub async fn decide(
        &self,
        request_id: Ulid,
        approved: bool,
        message: String,
        admin_id: Option<Ulid>,
    ) -> Result<Approval, EngineError> {
        let _writing = self.compaction.read().await;
        if message.len() > MAX_MESSAGE_LEN {
            return Err(EngineError::LimitExceeded("decision message too long"));
        }
        if let Some(aid) = admin_id
            && !self.admins.contains_key(&aid)
        {
            return Err(EngineError::NotFound(aid));
        }

        let (place_id, mut guard) = self.resolve_request_write(&request_id).await?;
        let Some(request) = guard.request(&request_id) else {
            return Err(EngineError::NotFound(request_id));
        };
        let span = request.span;
        let approval_id = request.approval_id.unwrap_or_else(Ulid::new);
        if approved {
            check_no_overlap(&guard, &span, Some(request_id))?;
        }

        let event = Event::ApprovalRecorded {
            id: approval_id,
            request_id,
            place_id,
            approved,
            message,
            admin_id,
            at: now_ms(),
        };
        self.persist_and_apply(place_id, &mut guard, &event).await?;

        let outcome = if approved { "approved" } else { "rejected" };
        metrics::counter!(observability::DECISIONS_TOTAL, "outcome" => outcome).increment(1);
        info!(request = %request_id, place = %place_id, outcome, "decision recorded");

        guard
            .approvals
            .get(&approval_id)
            .cloned()
            .ok_or(EngineError::NotFound(approval_id))
    }

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    /// No write can land between the snapshot and the file swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction.write().await;
        let mut events = Vec::new();

        let mut admins: Vec<Admin> = self.admins.iter().map(|e| e.value().clone()).collect();
        admins.sort_by_key(|a| a.id);
        events.extend(admins.into_iter().map(|a| Event::AdminCreated {
            id: a.id,
            name: a.name,
            created_at: a.created_at,
        }));

        let mut places: Vec<(Ulid, SharedPlaceState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        places.sort_by_key(|(id, _)| *id);

        for (_, ps) in places {
            let guard = ps.read().await;
            let place = &guard.place;
            events.push(Event::PlaceCreated {
                id: place.id,
                name: place.name.clone(),
                map_link: place.map_link.clone(),
                frame_link: place.frame_link.clone(),
                description: place.description.clone(),
                created_at: place.created_at,
            });
            events.extend(guard.photos.iter().map(|p| Event::PhotoAdded {
                id: p.id,
                place_id: p.place_id,
                url: p.url.clone(),
                created_at: p.created_at,
            }));

            for request in &guard.requests {
                let Some(user) = self.users.get(&request.user_id).map(|u| u.value().clone()) else {
                    continue;
                };
                events.push(Event::RequestSubmitted {
                    id: request.id,
                    place_id: request.place_id,
                    user_id: user.id,
                    full_name: user.full_name,
                    phone: user.phone,
                    contact_link: user.contact_link,
                    span: request.span,
                    message: request.message.clone(),
                    created_at: request.created_at,
                });
                let Some(approval) = guard.approval_of(request) else {
                    continue;
                };
                let recorded = |at| Event::ApprovalRecorded {
                    id: approval.id,
                    request_id: request.id,
                    place_id: request.place_id,
                    approved: approval.approved,
                    message: approval.message.clone(),
                    admin_id: approval.admin_id,
                    at,
                };
                events.push(recorded(approval.created_at));
                // A second record restores updated_at.
                if let Some(updated_at) = approval.updated_at {
                    events.push(recorded(updated_at));
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
