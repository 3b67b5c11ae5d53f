/// Upper bound on a booking's free-text reason, in bytes.
pub const MAX_REASON_LEN: usize = 1024;

/// Bookings kept per room ledger (all statuses).
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

/// Widest window a single statistics report may cover.
pub const MAX_STATS_WINDOW_DAYS: i64 = 3 * 366;

/// Longest single booking.
pub const MAX_BOOKING_DAYS: i64 = 31;

/// Working window used by occupancy rates, `[start, end)` hours of each day.
pub const WORKDAY_START_HOUR: u32 = 9;
pub const WORKDAY_END_HOUR: u32 = 17;

/// Rooms listed under "most used" in a statistics report.
pub const MOST_USED_ROOMS_LIMIT: usize = 5;
