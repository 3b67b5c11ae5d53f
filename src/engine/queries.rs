use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedLedger};

impl Engine {
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .index
            .booking_room
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let ledger = self
            .existing_ledger(room_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let guard = ledger.read().await;
        guard
            .get(booking_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    /// Bookings matching `filter`, ordered by start.
    pub async fn list_bookings(&self, filter: BookingFilter) -> Vec<Booking> {
        let mut found = match filter.room_id {
            Some(room_id) => match self.existing_ledger(room_id) {
                Some(ledger) => {
                    let guard = ledger.read().await;
                    guard
                        .bookings
                        .iter()
                        .filter(|b| filter.matches(b))
                        .cloned()
                        .collect()
                }
                None => Vec::new(),
            },
            None => self.snapshot(|b| filter.matches(b)).await,
        };
        found.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        found
    }

    /// A user's bookings, most recently created first.
    pub async fn bookings_for_user(&self, user_id: Ulid) -> Vec<Booking> {
        let ids: Vec<Ulid> = self
            .index
            .user_bookings
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            // Purged between the index read and now: skip.
            if let Ok(booking) = self.get_booking(id).await {
                found.push(booking);
            }
        }
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found
    }

    pub fn rejection_record(&self, booking_id: Ulid) -> Option<RejectionRecord> {
        self.index
            .rejections
            .get(&booking_id)
            .map(|e| e.value().clone())
    }

    /// Every rejection record, newest first.
    pub fn rejection_records(&self) -> Vec<RejectionRecord> {
        let mut records: Vec<RejectionRecord> = self
            .index
            .rejections
            .iter()
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| {
            b.rejected_at
                .cmp(&a.rejected_at)
                .then(b.booking_id.cmp(&a.booking_id))
        });
        records
    }

    /// Copy out every booking passing `keep`, as of a single instant.
    ///
    /// All room read locks are taken in room-id order and held together, so no
    /// mutation lands halfway through the copy.
    pub(super) async fn snapshot(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut room_ids: Vec<Ulid> = self.ledgers.iter().map(|e| *e.key()).collect();
        room_ids.sort();
        let ledgers: Vec<SharedLedger> = room_ids
            .into_iter()
            .filter_map(|id| self.existing_ledger(id))
            .collect();

        let mut guards = Vec::with_capacity(ledgers.len());
        for ledger in &ledgers {
            guards.push(ledger.read().await);
        }
        guards
            .iter()
            .flat_map(|guard| guard.bookings.iter())
            .filter(|&b| keep(b))
            .cloned()
            .collect()
    }
}
