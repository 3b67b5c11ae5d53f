//! Booking lifecycle: creation and the status transitions.
//!
//! ```text
//! create ──▶ PENDING ──approve──▶ APPROVED
//!               │                    │
//!               ├──reject──▶ REJECTED ◀──reject──┤
//!               └──cancel──▶ CANCELLED ◀──cancel──┘
//! ```
//!
//! Every mutation takes the commit gate (shared), then the room's write lock,
//! and only then validates, so the availability answer it acts on cannot go
//! stale underneath it.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{TRANSITIONS_TOTAL, outcome_label};

use super::availability::ensure_bookable;
use super::conflict::{now, reject_past, validate_reason, validate_span};
use super::{Engine, EngineError};

const NOTIFICATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn record_transition(transition: &'static str, result: &Result<Booking, EngineError>) {
    metrics::counter!(
        TRANSITIONS_TOTAL,
        "transition" => transition,
        "outcome" => outcome_label(result)
    )
    .increment(1);
}

fn current(ledger: &RoomLedger, booking_id: Ulid) -> Result<Booking, EngineError> {
    ledger
        .get(booking_id)
        .cloned()
        .ok_or(EngineError::BookingNotFound(booking_id))
}

impl Engine {
    /// Create a booking whose initial status comes from `policy`.
    ///
    /// Availability is checked whichever status the booking starts in, so a
    /// moderated request for an already-taken slot fails up front.
    pub async fn create_booking(
        &self,
        room_id: Ulid,
        user_id: Ulid,
        start: Timestamp,
        end: Timestamp,
        reason: impl Into<String>,
        policy: CreationPolicy,
    ) -> Result<Booking, EngineError> {
        let reason = reason.into();
        if !self.deps.rooms.room_exists(room_id).await {
            return Err(EngineError::RoomNotFound(room_id));
        }
        if !self.deps.users.user_exists(user_id).await {
            return Err(EngineError::UserNotFound(user_id));
        }
        let span = validate_span(start, end)?;
        let now = now();
        reject_past(start, now)?;
        validate_reason(&reason)?;

        let _commit = self.commit_gate.read().await;
        let ledger = self.ledger_for(room_id);
        let mut guard = ledger.write().await;
        // Re-read under the lock: the kill-switch may have flipped meanwhile.
        let room = self
            .deps
            .rooms
            .room(room_id)
            .await
            .ok_or(EngineError::RoomNotFound(room_id))?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        ensure_bookable(&room, &guard, &span, None)?;

        let booking = Booking {
            id: Ulid::new(),
            room_id,
            user_id,
            start,
            end,
            status: policy.initial_status(),
            reason,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(
            &mut guard,
            &Event::BookingCreated {
                booking: booking.clone(),
            },
        )
        .await?;

        tracing::info!(
            booking_id = %booking.id,
            %room_id,
            %user_id,
            %start,
            %end,
            status = %booking.status,
            "booking created"
        );
        metrics::counter!(
            crate::observability::BOOKINGS_CREATED_TOTAL,
            "status" => booking.status.as_str()
        )
        .increment(1);
        metrics::gauge!(crate::observability::BOOKINGS_LOADED).increment(1.0);
        Ok(booking)
    }

    /// Move a booking to `new_status`. `reason` only matters for rejections.
    pub async fn change_status(
        &self,
        booking_id: Ulid,
        new_status: BookingStatus,
        reason: Option<String>,
        actor_id: Ulid,
    ) -> Result<Booking, EngineError> {
        match new_status {
            BookingStatus::Approved => self.approve(booking_id, actor_id).await,
            BookingStatus::Rejected => self.reject(booking_id, actor_id, reason).await,
            BookingStatus::Cancelled => self.cancel(booking_id, actor_id).await,
            BookingStatus::Pending => {
                let from = self.get_booking(booking_id).await?.status;
                Err(EngineError::InvalidStatusTransition {
                    from,
                    to: BookingStatus::Pending,
                })
            }
        }
    }

    /// PENDING → APPROVED, after re-checking the slot against every other
    /// APPROVED booking on the room.
    pub async fn approve(&self, booking_id: Ulid, actor_id: Ulid) -> Result<Booking, EngineError> {
        let result = self.approve_inner(booking_id, actor_id).await;
        record_transition("approve", &result);
        result
    }

    async fn approve_inner(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = current(&guard, booking_id)?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidStatusTransition {
                from: booking.status,
                to: BookingStatus::Approved,
            });
        }
        let room = self
            .deps
            .rooms
            .room(booking.room_id)
            .await
            .ok_or(EngineError::RoomNotFound(booking.room_id))?;
        ensure_bookable(&room, &guard, &booking.span(), Some(booking_id))?;

        let event = Event::BookingApproved {
            id: booking_id,
            room_id: booking.room_id,
            at: now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(%booking_id, room_id = %booking.room_id, %actor_id, "booking approved");
        current(&guard, booking_id)
    }

    /// PENDING/APPROVED → REJECTED.
    ///
    /// A non-blank reason produces a rejection record attributed to `actor_id`
    /// and a notification to the requester. Without one the status still
    /// changes, silently.
    pub async fn reject(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let result = self.reject_inner(booking_id, actor_id, reason).await;
        record_transition("reject", &result);
        result
    }

    async fn reject_inner(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if let Some(reason) = &reason {
            validate_reason(reason)?;
            if !self.deps.users.user_exists(actor_id).await {
                return Err(EngineError::UserNotFound(actor_id));
            }
        }

        let rejected = {
            let _commit = self.commit_gate.read().await;
            let mut guard = self.resolve_booking_write(booking_id).await?;
            let booking = current(&guard, booking_id)?;
            if booking.status.is_terminal() {
                return Err(EngineError::InvalidStatusTransition {
                    from: booking.status,
                    to: BookingStatus::Rejected,
                });
            }
            let at = now();
            let record = reason.as_ref().map(|reason| RejectionRecord {
                booking_id,
                admin_id: actor_id,
                reason: reason.clone(),
                rejected_at: at,
            });
            let event = Event::BookingRejected {
                id: booking_id,
                room_id: booking.room_id,
                at,
                record,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            current(&guard, booking_id)?
        };
        tracing::info!(
            %booking_id,
            room_id = %rejected.room_id,
            %actor_id,
            reason = reason.as_deref().unwrap_or(""),
            "booking rejected"
        );

        // Locks are released; delivery problems never undo the rejection.
        if let Some(reason) = reason {
            self.notify_rejection(&rejected, &reason).await;
        }
        Ok(rejected)
    }

    async fn notify_rejection(&self, booking: &Booking, reason: &str) {
        let room_name = match self.deps.rooms.room(booking.room_id).await {
            Some(room) => room.name,
            None => booking.room_id.to_string(),
        };
        let message = format!(
            "Your booking for {room_name} from {} to {} has been rejected. Reason: {reason}",
            booking.start.format(NOTIFICATION_TIME_FORMAT),
            booking.end.format(NOTIFICATION_TIME_FORMAT),
        );
        let notification = Notification::new(booking.user_id, message, now());
        if let Err(e) = self.deps.sink.emit(notification).await {
            tracing::warn!(
                booking_id = %booking.id,
                user_id = %booking.user_id,
                "rejection notification not delivered: {e}"
            );
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
        }
    }

    /// PENDING/APPROVED → CANCELLED, by the requester or an administrator.
    pub async fn cancel(&self, booking_id: Ulid, actor_id: Ulid) -> Result<Booking, EngineError> {
        let result = self.cancel_inner(booking_id, actor_id).await;
        record_transition("cancel", &result);
        result
    }

    async fn cancel_inner(&self, booking_id: Ulid, actor_id: Ulid) -> Result<Booking, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = current(&guard, booking_id)?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidStatusTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }
        let event = Event::BookingCancelled {
            id: booking_id,
            room_id: booking.room_id,
            at: now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(%booking_id, room_id = %booking.room_id, %actor_id, "booking cancelled");
        current(&guard, booking_id)
    }

    /// Move a live booking to a new interval, keeping its status.
    ///
    /// The new interval is checked against the room's other APPROVED bookings.
    /// A start in the past is refused only when the start actually moves.
    pub async fn reschedule_booking(
        &self,
        booking_id: Ulid,
        new_start: Timestamp,
        new_end: Timestamp,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let result = self
            .reschedule_inner(booking_id, new_start, new_end, reason)
            .await;
        record_transition("reschedule", &result);
        result
    }

    async fn reschedule_inner(
        &self,
        booking_id: Ulid,
        new_start: Timestamp,
        new_end: Timestamp,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let span = validate_span(new_start, new_end)?;
        if let Some(reason) = &reason {
            validate_reason(reason)?;
        }

        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = current(&guard, booking_id)?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidStatusTransition {
                from: booking.status,
                to: booking.status,
            });
        }
        let now = now();
        if new_start != booking.start {
            reject_past(new_start, now)?;
        }
        let room = self
            .deps
            .rooms
            .room(booking.room_id)
            .await
            .ok_or(EngineError::RoomNotFound(booking.room_id))?;
        ensure_bookable(&room, &guard, &span, Some(booking_id))?;

        let event = Event::BookingRescheduled {
            id: booking_id,
            room_id: booking.room_id,
            span,
            reason,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(
            %booking_id,
            room_id = %booking.room_id,
            start = %new_start,
            end = %new_end,
            "booking rescheduled"
        );
        current(&guard, booking_id)
    }
}
