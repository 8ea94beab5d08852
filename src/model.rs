use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Interval `(start, end)` with `start < end`.
///
/// Two spans overlap when they share more than an endpoint, so a booking
/// ending at 12:00 and one starting at 12:00 can both be approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// `start < t < end`. Endpoints of a booking stay selectable.
    pub fn strictly_contains(&self, t: Ms) -> bool {
        self.start < t && t < self.end
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: Ulid,
    pub name: String,
    pub map_link: String,
    pub frame_link: Option<String>,
    pub description: Option<String>,
    pub created_at: Ms,
}

/// A picture shown on the place's card and detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Ulid,
    pub place_id: Ulid,
    pub url: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub id: Ulid,
    pub name: String,
    pub created_at: Ms,
}

/// The person behind a request. One is created per submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub full_name: String,
    pub phone: String,
    pub contact_link: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Ulid,
    pub place_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub message: String,
    /// Set once, by the first admin decision.
    pub approval_id: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: Ulid,
    pub approved: bool,
    pub message: String,
    pub admin_id: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

// ── Per-place state ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PlaceState {
    pub place: Place,
    /// In the order they were added; the first one is the cover.
    pub photos: Vec<Photo>,
    /// All requests of the place, sorted by `span.start`.
    pub requests: Vec<Request>,
    /// Approvals of this place's requests, keyed by approval id.
    pub approvals: HashMap<Ulid, Approval>,
}

impl PlaceState {
    pub fn new(place: Place) -> Self {
        Self {
            place,
            photos: Vec::new(),
            requests: Vec::new(),
            approvals: HashMap::new(),
        }
    }

    /// Insert request maintaining sort order by span.start.
    pub fn insert_request(&mut self, request: Request) {
        let pos = self
            .requests
            .partition_point(|r| r.span.start <= request.span.start);
        self.requests.insert(pos, request);
    }

    pub fn request(&self, id: &Ulid) -> Option<&Request> {
        self.requests.iter().find(|r| r.id == *id)
    }

    pub fn request_mut(&mut self, id: &Ulid) -> Option<&mut Request> {
        self.requests.iter_mut().find(|r| r.id == *id)
    }

    pub fn approval_of(&self, request: &Request) -> Option<&Approval> {
        request.approval_id.and_then(|aid| self.approvals.get(&aid))
    }

    pub fn status_of(&self, request: &Request) -> RequestStatus {
        match self.approval_of(request) {
            None => RequestStatus::Pending,
            Some(a) if a.approved => RequestStatus::Approved,
            Some(_) => RequestStatus::Rejected,
        }
    }

    /// Return only requests whose span overlaps the query window.
    /// Uses binary search to skip requests starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Request> {
        let right_bound = self
            .requests
            .partition_point(|r| r.span.start < query.end);
        self.requests[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// First approved request overlapping `query`, ignoring `exclude`.
    pub fn approved_conflict(&self, query: &Span, exclude: Option<Ulid>) -> Option<&Request> {
        self.overlapping(query)
            .filter(|r| Some(r.id) != exclude)
            .find(|r| self.status_of(r) == RequestStatus::Approved)
    }

    /// Spans of approved requests, ascending by start.
    pub fn approved_spans(&self) -> Vec<Span> {
        self.requests
            .iter()
            .filter(|r| self.status_of(r) == RequestStatus::Approved)
            .map(|r| r.span)
            .collect()
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
///
/// Each variant is one durable write. `RequestSubmitted` carries the user
/// and the request together and `ApprovalRecorded` carries the approval and
/// its link, so neither can be half-applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PlaceCreated {
        id: Ulid,
        name: String,
        map_link: String,
        frame_link: Option<String>,
        description: Option<String>,
        created_at: Ms,
    },
    AdminCreated {
        id: Ulid,
        name: String,
        created_at: Ms,
    },
    PhotoAdded {
        id: Ulid,
        place_id: Ulid,
        url: String,
        created_at: Ms,
    },
    RequestSubmitted {
        id: Ulid,
        place_id: Ulid,
        user_id: Ulid,
        full_name: String,
        phone: String,
        contact_link: String,
        span: Span,
        message: String,
        created_at: Ms,
    },
    /// Creates the approval (and links it) if the request has none,
    /// otherwise updates the linked one in place.
    ApprovalRecorded {
        id: Ulid,
        request_id: Ulid,
        place_id: Ulid,
        approved: bool,
        message: String,
        admin_id: Option<Ulid>,
        at: Ms,
    },
}

impl Event {
    pub fn place_id(&self) -> Option<Ulid> {
        match self {
            Event::PlaceCreated { id, .. } => Some(*id),
            Event::PhotoAdded { place_id, .. }
            | Event::RequestSubmitted { place_id, .. }
            | Event::ApprovalRecorded { place_id, .. } => Some(*place_id),
            Event::AdminCreated { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::PlaceCreated { .. } => "place_created",
            Event::AdminCreated { .. } => "admin_created",
            Event::PhotoAdded { .. } => "photo_added",
            Event::RequestSubmitted { .. } => "request_submitted",
            Event::ApprovalRecorded { .. } => "approval_recorded",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A request joined with everything the admin dashboard shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    pub request: Request,
    pub user: Option<User>,
    pub approval: Option<Approval>,
    pub admin: Option<Admin>,
    pub status: RequestStatus,
}
