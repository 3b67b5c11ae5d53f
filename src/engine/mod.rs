mod availability;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod statistics;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use statistics::{RoomCount, StatisticsReport, build_report};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::cache::{Cache, InProcessCache};
use crate::directory::{InMemoryDirectory, RoomDirectory, UserDirectory};
use crate::model::*;
use crate::notify::{NotificationSink, NotifyHub};
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<RoomLedger>>;

// ── Group-commit journal writer ──────────────────────────

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Each wake-up takes one append, drains whatever else is
/// already queued, and commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            control => {
                handle_control(&mut wal, control);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![first];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes do not ride
    // along with the next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Engine ───────────────────────────────────────────────

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub rooms: Arc<dyn RoomDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub sink: Arc<dyn NotificationSink>,
    pub cache: Arc<dyn Cache>,
}

impl Collaborators {
    /// Everything in-process: one directory for rooms and users, the hub as sink.
    pub fn in_memory(directory: Arc<InMemoryDirectory>, hub: Arc<NotifyHub>) -> Self {
        Self {
            rooms: directory.clone(),
            users: directory,
            sink: hub,
            cache: Arc::new(InProcessCache::new()),
        }
    }
}

/// Secondary indexes kept alongside the ledgers.
#[derive(Default)]
pub(super) struct Indexes {
    /// booking id → room id
    pub(super) booking_room: DashMap<Ulid, Ulid>,
    /// user id → booking ids, creation order
    pub(super) user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// booking id → rejection record (at most one per booking)
    pub(super) rejections: DashMap<Ulid, RejectionRecord>,
}

pub struct Engine {
    /// One ledger per room; its lock serializes every check-then-act on that room.
    pub(super) ledgers: DashMap<Ulid, SharedLedger>,
    pub(super) index: Indexes,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) deps: Collaborators,
    pub(super) stats_cache_ttl: Duration,
    /// Distinguishes this process's cache keys from a previous run's.
    pub(super) instance: Ulid,
    /// Bumped after every committed event; part of the statistics cache key.
    pub(super) generation: AtomicU64,
    /// Mutations hold it shared for their whole check-then-act, taken before
    /// any ledger lock; compaction holds it exclusively so no append can land
    /// in the journal file being replaced.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event to a ledger. The caller holds the ledger's write lock.
fn apply_to_ledger(ledger: &mut RoomLedger, event: &Event, index: &Indexes) {
    match event {
        Event::BookingCreated { booking } => {
            index.booking_room.insert(booking.id, booking.room_id);
            index
                .user_bookings
                .entry(booking.user_id)
                .or_default()
                .push(booking.id);
            ledger.insert_booking(booking.clone());
        }
        Event::BookingApproved { id, at, .. } => {
            set_status(ledger, *id, BookingStatus::Approved, *at);
        }
        Event::BookingRejected { id, at, record, .. } => {
            set_status(ledger, *id, BookingStatus::Rejected, *at);
            if let Some(record) = record {
                index.rejections.insert(*id, record.clone());
            }
        }
        Event::BookingCancelled { id, at, .. } => {
            set_status(ledger, *id, BookingStatus::Cancelled, *at);
        }
        Event::BookingRescheduled {
            id,
            span,
            reason,
            at,
            ..
        } => {
            // Remove and reinsert so the ledger stays sorted by start.
            if let Some(mut booking) = ledger.remove_booking(*id) {
                booking.start = span.start;
                booking.end = span.end;
                if let Some(reason) = reason {
                    booking.reason = reason.clone();
                }
                booking.updated_at = *at;
                ledger.insert_booking(booking);
            }
        }
        // Purges drop the whole ledger and are handled at the map level.
        Event::RoomPurged { .. } => {}
    }
}

fn set_status(ledger: &mut RoomLedger, id: Ulid, status: BookingStatus, at: Timestamp) {
    if let Some(booking) = ledger.get_mut(id) {
        booking.status = status;
        booking.updated_at = at;
    }
}

/// Remove a ledger's bookings from every index.
fn unindex_ledger(ledger: &RoomLedger, index: &Indexes) {
    for booking in &ledger.bookings {
        index.booking_room.remove(&booking.id);
        index.rejections.remove(&booking.id);
        if let Some(mut ids) = index.user_bookings.get_mut(&booking.user_id) {
            ids.retain(|id| *id != booking.id);
        }
    }
}

impl Engine {
    /// Replay the journal at `wal_path` and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        deps: Collaborators,
        stats_cache_ttl: Duration,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledgers: DashMap::new(),
            index: Indexes::default(),
            wal_tx,
            deps,
            stats_cache_ttl,
            instance: Ulid::new(),
            generation: AtomicU64::new(0),
            commit_gate: RwLock::new(()),
        };

        // Nobody else can see these ledgers yet, so try_write never contends.
        // Blocking lock calls are off-limits here: we may be inside async code.
        for event in &events {
            match event {
                Event::RoomPurged { room_id } => {
                    if let Some((_, ledger)) = engine.ledgers.remove(room_id) {
                        let guard = ledger.try_read().expect("replay: uncontended read");
                        unindex_ledger(&guard, &engine.index);
                    }
                }
                other => {
                    let ledger = engine.ledger_for(other.room_id());
                    let mut guard = ledger.try_write().expect("replay: uncontended write");
                    apply_to_ledger(&mut guard, other, &engine.index);
                }
            }
        }
        metrics::gauge!(crate::observability::BOOKINGS_LOADED)
            .set(engine.index.booking_room.len() as f64);
        tracing::info!(
            events = events.len(),
            bookings = engine.index.booking_room.len(),
            rooms = engine.ledgers.len(),
            "journal replayed"
        );

        Ok(engine)
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Ledger for a room, created empty on first use.
    pub(super) fn ledger_for(&self, room_id: Ulid) -> SharedLedger {
        self.ledgers
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomLedger::new(room_id))))
            .clone()
    }

    pub(super) fn existing_ledger(&self, room_id: Ulid) -> Option<SharedLedger> {
        self.ledgers.get(&room_id).map(|e| e.value().clone())
    }

    /// Journal the event, then apply it. The caller holds the commit gate
    /// (shared) and the ledger's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut RoomLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.wal_append(event).await {
            tracing::error!(room_id = %ledger.room_id, ?event, "journal append failed: {e}");
            return Err(e);
        }
        apply_to_ledger(ledger, event, &self.index);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Booking id → room, then that room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomLedger>, EngineError> {
        let room_id = self
            .index
            .booking_room
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let ledger = self
            .ledgers
            .get(&room_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let guard = ledger.write_owned().await;
        // A purge may have won the race for the lock.
        if guard.get(booking_id).is_none() || !self.index.booking_room.contains_key(&booking_id) {
            return Err(EngineError::BookingNotFound(booking_id));
        }
        Ok(guard)
    }

    /// Drop every booking of a room along with its rejection records.
    /// Remove the room from the directory first so no new booking can slip in.
    pub async fn purge_room(&self, room_id: Ulid) -> Result<usize, EngineError> {
        let _commit = self.commit_gate.read().await;
        let Some(ledger) = self.existing_ledger(room_id) else {
            return Ok(0);
        };
        let mut guard = ledger.write().await;
        let event = Event::RoomPurged { room_id };
        if let Err(e) = self.wal_append(&event).await {
            tracing::error!(%room_id, "journal append failed during purge: {e}");
            return Err(e);
        }
        unindex_ledger(&guard, &self.index);
        let purged = guard.bookings.len();
        // Writers already queued on this lock must find nothing left to change.
        guard.bookings.clear();
        self.ledgers.remove(&room_id);
        self.generation.fetch_add(1, Ordering::Release);
        metrics::gauge!(crate::observability::BOOKINGS_LOADED)
            .set(self.index.booking_room.len() as f64);
        tracing::info!(%room_id, purged, "room purged");
        Ok(purged)
    }

    /// Rewrite the journal with just enough events to rebuild current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let mut room_ids: Vec<Ulid> = self.ledgers.iter().map(|e| *e.key()).collect();
        room_ids.sort();

        let mut events = Vec::new();
        for room_id in room_ids {
            let Some(ledger) = self.existing_ledger(room_id) else {
                continue;
            };
            let guard = ledger.read().await;
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
                if let Some(record) = self.index.rejections.get(&booking.id) {
                    events.push(Event::BookingRejected {
                        id: booking.id,
                        room_id,
                        at: booking.updated_at,
                        record: Some(record.value().clone()),
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()));
        metrics::counter!(
            crate::observability::WAL_COMPACTIONS_TOTAL,
            "outcome" => crate::observability::outcome_label(&result)
        )
        .increment(1);
        result
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
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
