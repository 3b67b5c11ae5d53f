use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, Timestamp};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("room not found: {0}")]
    RoomNotFound(Ulid),
    #[error("user not found: {0}")]
    UserNotFound(Ulid),
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("invalid interval: start {start} must be before end {end}")]
    InvalidInterval { start: Timestamp, end: Timestamp },
    #[error("cannot book in the past: {0}")]
    PastBooking(Timestamp),
    #[error("time slot is not available: conflicts with booking {0}")]
    SlotUnavailable(Ulid),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("room is not available for booking: {0}")]
    RoomUnavailable(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Failures of the store itself, as opposed to rejected requests.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    /// Message safe to show an end user. Infrastructure detail stays in the logs.
    pub fn public_message(&self) -> String {
        if self.is_infrastructure() {
            "internal error, please retry later".to_string()
        } else {
            self.to_string()
        }
    }
}
