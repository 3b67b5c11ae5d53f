//! Booking analytics over a closed date-time window.
//!
//! A report covers the bookings whose start falls inside `[from, to]`. The
//! engine copies that set out once under read locks and every figure below
//! is derived from the copy, so the numbers always agree with each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{STATISTICS_CACHE_HITS_TOTAL, STATISTICS_DURATION_SECONDS};

use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCount {
    pub room_id: Ulid,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub from: Timestamp,
    pub to: Timestamp,
    pub total_bookings: u64,
    pub pending_bookings: u64,
    pub approved_bookings: u64,
    pub rejected_bookings: u64,
    pub cancelled_bookings: u64,
    /// Every status is present, zero included.
    pub booking_count_by_status: BTreeMap<BookingStatus, u64>,
    /// Every directory room is present, zero included.
    pub booking_count_by_room: BTreeMap<Ulid, u64>,
    pub room_labels: BTreeMap<Ulid, String>,
    /// Percent of the window covered by APPROVED bookings, capped at 100.
    pub room_utilization_rates: BTreeMap<Ulid, f64>,
    /// Percent of the 09:00–17:00 working hours covered by APPROVED bookings,
    /// capped at 100.
    pub room_occupancy_rates: BTreeMap<Ulid, f64>,
    pub booking_count_by_date: BTreeMap<NaiveDate, u64>,
    /// Keyed by start hour bucket, `"HH:00-HH:00"`.
    pub booking_count_by_hour: BTreeMap<String, u64>,
    /// Minutes, truncated.
    pub average_booking_duration: i64,
    pub average_booking_duration_by_room: BTreeMap<Ulid, i64>,
    pub most_used_rooms: Vec<RoomCount>,
    pub most_active_day: Option<NaiveDate>,
    pub most_active_day_count: u64,
    pub average_bookings_per_day: u64,
}

fn hour_bucket(hour: u32) -> String {
    format!("{hour:02}:00-{:02}:00", (hour + 1) % 24)
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).min(100.0)
}

fn working_hours(date: NaiveDate) -> Option<Span> {
    let open = NaiveTime::from_hms_opt(WORKDAY_START_HOUR, 0, 0)?;
    let close = NaiveTime::from_hms_opt(WORKDAY_END_HOUR, 0, 0)?;
    Some(Span::new(date.and_time(open), date.and_time(close)))
}

/// Build a report from a room list and a booking set.
///
/// Bookings starting outside `range` are ignored, so callers may pass a
/// superset.
pub fn build_report(range: DateRange, rooms: &[Room], bookings: &[Booking]) -> StatisticsReport {
    let in_range: Vec<&Booking> = bookings.iter().filter(|b| range.contains(b.start)).collect();
    let total = in_range.len() as u64;

    let mut by_status: BTreeMap<BookingStatus, u64> =
        BookingStatus::ALL.iter().map(|s| (*s, 0)).collect();
    let mut by_room: BTreeMap<Ulid, u64> = rooms.iter().map(|r| (r.id, 0)).collect();
    let mut labels: BTreeMap<Ulid, String> = rooms.iter().map(|r| (r.id, r.label())).collect();
    let mut by_date: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    let mut by_hour: BTreeMap<String, u64> = BTreeMap::new();
    let mut minutes_by_room: HashMap<Ulid, i64> = HashMap::new();
    let mut total_minutes = 0i64;
    let mut first_seen: Vec<Ulid> = Vec::new();

    for booking in &in_range {
        *by_status.entry(booking.status).or_default() += 1;
        let count = by_room.entry(booking.room_id).or_default();
        if *count == 0 {
            first_seen.push(booking.room_id);
        }
        *count += 1;
        *by_date.entry(booking.start.date()).or_default() += 1;
        *by_hour.entry(hour_bucket(booking.start.hour())).or_default() += 1;
        let minutes = booking.duration_minutes();
        total_minutes += minutes;
        *minutes_by_room.entry(booking.room_id).or_default() += minutes;
    }
    // Rooms gone from the directory still get a label.
    for room_id in by_room.keys() {
        labels
            .entry(*room_id)
            .or_insert_with(|| room_id.to_string());
    }

    let average_booking_duration = if total == 0 {
        0
    } else {
        total_minutes / total as i64
    };
    let average_booking_duration_by_room = minutes_by_room
        .iter()
        .map(|(room_id, minutes)| (*room_id, minutes / by_room[room_id] as i64))
        .collect();

    let window = range.as_span();
    let workdays: Vec<Span> = range.dates().filter_map(working_hours).collect();
    let mut utilization = BTreeMap::new();
    let mut occupancy = BTreeMap::new();
    for room_id in by_room.keys() {
        let approved = in_range
            .iter()
            .filter(|b| b.room_id == *room_id && b.status == BookingStatus::Approved);
        let mut reserved = 0i64;
        let mut worked = 0i64;
        for booking in approved {
            let span = booking.span();
            if let Some(window) = &window {
                reserved += span.clip(window).map_or(0, |s| s.duration_minutes());
            }
            worked += workdays
                .iter()
                .filter_map(|day| span.clip(day))
                .map(|s| s.duration_minutes())
                .sum::<i64>();
        }
        utilization.insert(*room_id, percent(reserved, range.minutes()));
        let work_minutes = workdays.iter().map(Span::duration_minutes).sum();
        occupancy.insert(*room_id, percent(worked, work_minutes));
    }

    let mut ranked: Vec<RoomCount> = first_seen
        .iter()
        .map(|room_id| RoomCount {
            room_id: *room_id,
            label: labels[room_id].clone(),
            count: by_room[room_id],
        })
        .collect();
    // Stable: equal counts keep first-seen order.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(MOST_USED_ROOMS_LIMIT);

    let mut most_active_day = None;
    let mut most_active_day_count = 0;
    for (date, count) in &by_date {
        if *count > most_active_day_count {
            most_active_day = Some(*date);
            most_active_day_count = *count;
        }
    }

    let days = range.days() as u64;
    let average_bookings_per_day = if days == 0 || range.minutes() <= 0 {
        0
    } else {
        total.div_ceil(days)
    };

    StatisticsReport {
        from: range.from,
        to: range.to,
        total_bookings: total,
        pending_bookings: by_status[&BookingStatus::Pending],
        approved_bookings: by_status[&BookingStatus::Approved],
        rejected_bookings: by_status[&BookingStatus::Rejected],
        cancelled_bookings: by_status[&BookingStatus::Cancelled],
        booking_count_by_status: by_status,
        booking_count_by_room: by_room,
        room_labels: labels,
        room_utilization_rates: utilization,
        room_occupancy_rates: occupancy,
        booking_count_by_date: by_date,
        booking_count_by_hour: by_hour,
        average_booking_duration,
        average_booking_duration_by_room,
        most_used_rooms: ranked,
        most_active_day,
        most_active_day_count,
        average_bookings_per_day,
    }
}

impl Engine {
    /// Analytics for bookings starting inside `[from, to]`.
    ///
    /// Reports are cached under the engine's commit generation, so any
    /// committed change makes older entries unreachable.
    pub async fn get_statistics(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<StatisticsReport, EngineError> {
        let range = DateRange::new(from, to);
        if range.days() > MAX_STATS_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("statistics window too wide"));
        }

        // Read before the snapshot: a racing commit can only make the cached
        // report newer than its key, never older.
        let generation = self.generation.load(Ordering::Acquire);
        let key = format!("stats:{}:{generation}:{from}:{to}", self.instance);
        match self.deps.cache.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<StatisticsReport>(&json) {
                Ok(report) => {
                    metrics::counter!(STATISTICS_CACHE_HITS_TOTAL).increment(1);
                    return Ok(report);
                }
                Err(e) => tracing::warn!(%key, "discarding undecodable cached report: {e}"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(%key, "statistics cache read failed: {e}"),
        }

        let started = Instant::now();
        let rooms = self.deps.rooms.list_rooms().await;
        let bookings = self.snapshot(|b| range.contains(b.start)).await;
        let report = build_report(range, &rooms, &bookings);
        metrics::histogram!(STATISTICS_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        tracing::debug!(
            %from,
            %to,
            bookings = report.total_bookings,
            rooms = rooms.len(),
            "statistics computed"
        );

        match serde_json::to_string(&report) {
            Ok(json) => {
                if let Err(e) = self.deps.cache.set(&key, json, self.stats_cache_ttl).await {
                    tracing::warn!(%key, "statistics cache write failed: {e}");
                }
            }
            Err(e) => tracing::warn!("statistics report not cacheable: {e}"),
        }
        Ok(report)
    }
}
