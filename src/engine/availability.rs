use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_no_conflict, find_conflict, now, reject_past, validate_span};
use super::{Engine, EngineError};

/// Whether `span` can hold an APPROVED booking on `room` right now.
/// Run under the room's write lock so the answer still holds when acted on.
pub(super) fn ensure_bookable(
    room: &Room,
    ledger: &RoomLedger,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if !room.available {
        return Err(EngineError::RoomUnavailable(room.id));
    }
    check_no_conflict(ledger, span, exclude)
}

impl Engine {
    /// Can `[start, end]` be booked on the room?
    ///
    /// Errors on an unknown room, an empty or inverted interval, or a start in
    /// the past. A room switched off by an administrator is simply not available.
    /// Only APPROVED bookings block; `exclude` lets an edit ignore itself.
    pub async fn is_available(
        &self,
        room_id: Ulid,
        start: Timestamp,
        end: Timestamp,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let room = self
            .deps
            .rooms
            .room(room_id)
            .await
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let span = validate_span(start, end)?;
        reject_past(start, now())?;
        if !room.available {
            return Ok(false);
        }
        let Some(ledger) = self.existing_ledger(room_id) else {
            return Ok(true);
        };
        let guard = ledger.read().await;
        Ok(find_conflict(&guard, &span, exclude).is_none())
    }

    /// Rooms that are switched on and have no APPROVED booking conflicting
    /// with `[start, end]`.
    pub async fn available_rooms(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Room>, EngineError> {
        let span = validate_span(start, end)?;
        let mut free = Vec::new();
        for room in self.deps.rooms.list_rooms().await {
            if !room.available {
                continue;
            }
            let clear = match self.existing_ledger(room.id) {
                Some(ledger) => {
                    let guard = ledger.read().await;
                    find_conflict(&guard, &span, None).is_none()
                }
                None => true,
            };
            if clear {
                free.push(room);
            }
        }
        Ok(free)
    }
}
