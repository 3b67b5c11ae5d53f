use chrono::Local;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> Timestamp {
    Local::now().naive_local()
}

pub(crate) fn validate_span(start: Timestamp, end: Timestamp) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if (end - start).num_days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn reject_past(start: Timestamp, now: Timestamp) -> Result<(), EngineError> {
    if start < now {
        return Err(EngineError::PastBooking(start));
    }
    Ok(())
}

pub(crate) fn validate_reason(reason: &str) -> Result<(), EngineError> {
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

/// First APPROVED booking that would conflict with `span`, ignoring `exclude`.
pub(crate) fn find_conflict(
    ledger: &RoomLedger,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    ledger.approved_conflicts(span, exclude).next().map(|b| b.id)
}

/// Err(SlotUnavailable) when an APPROVED booking conflicts with `span`.
pub(crate) fn check_no_conflict(
    ledger: &RoomLedger,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(ledger, span, exclude) {
        Some(conflicting) => {
            tracing::debug!(room_id = %ledger.room_id, %conflicting, ?span, "slot conflict");
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            Err(EngineError::SlotUnavailable(conflicting))
        }
        None => Ok(()),
    }
}
