use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Local wall-clock instant. The engine serves a single site, so no zone.
pub type Timestamp = NaiveDateTime;

/// Booking interval. Overlap checks treat both endpoints as inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// `start₁ ≤ end₂ ∧ start₂ ≤ end₁`. Back-to-back spans sharing an
    /// endpoint conflict.
    pub fn conflicts_with(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Intersection with `window`, or `None` when nothing of positive length remains.
    pub fn clip(&self, window: &Span) -> Option<Span> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then(|| Span::new(start, end))
    }
}

/// Closed date-time range `[from, to]` used by filters and reports.
/// Unlike [`Span`] it may be empty or inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl DateRange {
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.from <= t && t <= self.to
    }

    pub fn minutes(&self) -> i64 {
        (self.to - self.from).num_minutes()
    }

    /// Calendar days touched by the range, counting both ends. Zero when inverted.
    pub fn days(&self) -> i64 {
        if self.to < self.from {
            return 0;
        }
        (self.to.date() - self.from.date()).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let first = self.from.date();
        (0..self.days())
            .filter_map(move |offset| first.checked_add_days(chrono::Days::new(offset as u64)))
    }

    pub fn as_span(&self) -> Option<Span> {
        (self.from < self.to).then(|| Span::new(self.from, self.to))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a new booking enters the lifecycle. Self-service flows auto-approve,
/// moderated flows wait for an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreationPolicy {
    AutoApprove,
    Moderated,
}

impl CreationPolicy {
    pub fn initial_status(self) -> BookingStatus {
        match self {
            CreationPolicy::AutoApprove => BookingStatus::Approved,
            CreationPolicy::Moderated => BookingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub start: Timestamp,
    pub end: Timestamp,
    pub status: BookingStatus,
    pub reason: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    ComputerLab,
    LargeClassroom,
    SmallClassroom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub projector: bool,
    pub screen: bool,
    pub speaker: bool,
    pub computer: bool,
    pub whiteboard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub room_type: RoomType,
    pub capacity: u32,
    pub location: String,
    pub floor: Option<i32>,
    #[serde(default)]
    pub equipment: Equipment,
    /// Administrative kill-switch, independent of any booking status.
    pub available: bool,
}

impl Room {
    pub fn new(name: impl Into<String>, capacity: u32, location: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            name: name.into(),
            room_type: RoomType::LargeClassroom,
            capacity,
            location: location.into(),
            floor: None,
            equipment: Equipment::default(),
            available: true,
        }
    }

    /// Display label used in reports: `"<name> - <location>"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.name, self.location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub booking_id: Ulid,
    pub admin_id: Ulid,
    pub reason: String,
    pub rejected_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub message: String,
    pub read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(user_id: Ulid, message: String, created_at: Timestamp) -> Self {
        Self {
            id: Ulid::new(),
            user_id,
            message,
            read: false,
            created_at,
        }
    }
}

/// Typed listing predicate. Every field left `None` matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub room_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    /// Booking must lie entirely inside the range.
    pub range: Option<DateRange>,
    pub user_id: Option<Ulid>,
}

impl BookingFilter {
    pub fn room(mut self, room_id: Ulid) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn range(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.range = Some(DateRange::new(from, to));
        self
    }

    pub fn user(mut self, user_id: Ulid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.room_id.is_none_or(|r| booking.room_id == r)
            && self.status.is_none_or(|s| booking.status == s)
            && self.user_id.is_none_or(|u| booking.user_id == u)
            && self
                .range
                .is_none_or(|r| booking.start >= r.from && booking.end <= r.to)
    }
}

/// All bookings of one room, sorted by `start`. The room owns its bookings
/// by value here; everything else refers to them by id.
#[derive(Debug, Clone)]
pub struct RoomLedger {
    pub room_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl RoomLedger {
    pub fn new(room_id: Ulid) -> Self {
        Self {
            room_id,
            bookings: Vec::new(),
        }
    }

    /// Insert keeping sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self.bookings.partition_point(|b| b.start <= booking.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// APPROVED bookings conflicting with `span`, skipping `exclude`.
    /// Bookings starting after `span.end` are cut off by binary search.
    pub fn approved_conflicts<'a>(
        &'a self,
        span: &'a Span,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a Booking> + 'a {
        let right_bound = self.bookings.partition_point(|b| b.start <= span.end);
        self.bookings[..right_bound].iter().filter(move |b| {
            b.status == BookingStatus::Approved
                && Some(b.id) != exclude
                && b.span().conflicts_with(span)
        })
    }
}

/// Journal record. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingApproved {
        id: Ulid,
        room_id: Ulid,
        at: Timestamp,
    },
    BookingRejected {
        id: Ulid,
        room_id: Ulid,
        at: Timestamp,
        record: Option<RejectionRecord>,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
        at: Timestamp,
    },
    BookingRescheduled {
        id: Ulid,
        room_id: Ulid,
        span: Span,
        reason: Option<String>,
        at: Timestamp,
    },
    RoomPurged {
        room_id: Ulid,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking } => booking.room_id,
            Event::BookingApproved { room_id, .. }
            | Event::BookingRejected { room_id, .. }
            | Event::BookingCancelled { room_id, .. }
            | Event::BookingRescheduled { room_id, .. }
            | Event::RoomPurged { room_id } => *room_id,
        }
    }
}
