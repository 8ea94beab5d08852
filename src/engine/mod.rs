mod conflict;
mod error;
mod mutations;
mod queries;
mod validation;

pub use error::EngineError;
pub use queries::SlotRow;
pub use validation::{Applicant, FieldError, ValidationErrors};

pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::slots::SlotPlan;
use crate::wal::Wal;

pub type SharedPlaceState = Arc<RwLock<PlaceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't
    // leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// All booking state of one tenant.
pub struct Engine {
    pub state: DashMap<Ulid, SharedPlaceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: request id → place id
    pub(super) request_to_place: DashMap<Ulid, Ulid>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) admins: DashMap<Ulid, Admin>,
    /// Writers hold it shared from validation to apply; compaction holds it
    /// exclusively from snapshot to file swap.
    pub(super) compaction: RwLock<()>,
    calendar: Calendar,
    plan: SlotPlan,
}

/// Apply a place-scoped event to its PlaceState (caller holds the lock).
fn apply_to_place(
    ps: &mut PlaceState,
    event: &Event,
    request_map: &DashMap<Ulid, Ulid>,
    users: &DashMap<Ulid, User>,
) {
    match event {
        Event::RequestSubmitted {
            id,
            place_id,
            user_id,
            full_name,
            phone,
            contact_link,
            span,
            message,
            created_at,
        } => {
            users.insert(
                *user_id,
                User {
                    id: *user_id,
                    full_name: full_name.clone(),
                    phone: phone.clone(),
                    contact_link: contact_link.clone(),
                    created_at: *created_at,
                },
            );
            ps.insert_request(Request {
                id: *id,
                place_id: *place_id,
                user_id: *user_id,
                span: *span,
                message: message.clone(),
                approval_id: None,
                created_at: *created_at,
                updated_at: None,
            });
            request_map.insert(*id, *place_id);
        }
        Event::ApprovalRecorded {
            id,
            request_id,
            approved,
            message,
            admin_id,
            at,
            ..
        } => {
            let Some(pos) = ps.requests.iter().position(|r| r.id == *request_id) else {
                return;
            };
            let linked = ps.requests[pos].approval_id;
            match linked.and_then(|aid| ps.approvals.get_mut(&aid)) {
                Some(existing) => {
                    existing.approved = *approved;
                    existing.message = message.clone();
                    existing.admin_id = *admin_id;
                    existing.updated_at = Some(*at);
                }
                None => {
                    let request = &mut ps.requests[pos];
                    request.approval_id = Some(*id);
                    request.updated_at = Some(*at);
                    ps.approvals.insert(
                        *id,
                        Approval {
                            id: *id,
                            approved: *approved,
                            message: message.clone(),
                            admin_id: *admin_id,
                            created_at: *at,
                            updated_at: None,
                        },
                    );
                }
            }
        }
        Event::PhotoAdded {
            id,
            place_id,
            url,
            created_at,
        } => ps.photos.push(Photo {
            id: *id,
            place_id: *place_id,
            url: url.clone(),
            created_at: *created_at,
        }),
        // Places and admins live at the DashMap level
        Event::PlaceCreated { .. } | Event::AdminCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        calendar: Calendar,
        plan: SlotPlan,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            request_to_place: DashMap::new(),
            users: DashMap::new(),
            admins: DashMap::new(),
            compaction: RwLock::new(()),
            calendar,
            plan,
        };

        // Sole owner of every Arc here, so try_write never contends. Never
        // block: this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::PlaceCreated { .. } => {
                    if let Some(place) = place_from_event(event) {
                        engine
                            .state
                            .insert(place.id, Arc::new(RwLock::new(PlaceState::new(place))));
                    }
                }
                Event::AdminCreated { id, name, created_at } => {
                    engine.admins.insert(
                        *id,
                        Admin {
                            id: *id,
                            name: name.clone(),
                            created_at: *created_at,
                        },
                    );
                }
                other => {
                    if let Some(place_id) = other.place_id()
                        && let Some(entry) = engine.state.get(&place_id)
                    {
                        let ps = entry.clone();
                        let mut guard = ps.try_write().expect("replay: uncontended write");
                        apply_to_place(&mut guard, other, &engine.request_to_place, &engine.users);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn plan(&self) -> &SlotPlan {
        &self.plan
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_place_state(&self, id: &Ulid) -> Option<SharedPlaceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn place_of_request(&self, request_id: &Ulid) -> Option<Ulid> {
        self.request_to_place.get(request_id).map(|e| *e.value())
    }

    /// WAL-append, apply and notify in one call. Nothing is applied if the
    /// append fails.
    pub(super) async fn persist_and_apply(
        &self,
        place_id: Ulid,
        ps: &mut PlaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_place(ps, event, &self.request_to_place, &self.users);
        self.notify.send(place_id, event);
        Ok(())
    }

    /// Lookup request → place, acquire the place write lock.
    pub(super) async fn resolve_request_write(
        &self,
        request_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<PlaceState>), EngineError> {
        let place_id = self
            .place_of_request(request_id)
            .ok_or(EngineError::NotFound(*request_id))?;
        let ps = self
            .get_place_state(&place_id)
            .ok_or(EngineError::NotFound(place_id))?;
        let guard = ps.write_owned().await;
        Ok((place_id, guard))
    }
}

fn place_from_event(event: &Event) -> Option<Place> {
    match event {
        Event::PlaceCreated {
            id,
            name,
            map_link,
            frame_link,
            description,
            created_at,
        } => Some(Place {
            id: *id,
            name: name.clone(),
            map_link: map_link.clone(),
            frame_link: frame_link.clone(),
            description: description.clone(),
            created_at: *created_at,
        }),
        _ => None,
    }
}
