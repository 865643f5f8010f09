use crate::config::ReservationEntry;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// A scheduled time window that pins the ceiling to `cpu_quota_pct`
/// (`spec.md` §3/§4.4). Read-only to the control loop.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: String,
    pub start_wall: DateTime<Utc>,
    pub end_wall: DateTime<Utc>,
    pub cpu_quota_pct: f64,
    pub priority: i32,
    pub enabled: bool,
}

impl From<&ReservationEntry> for Reservation {
    fn from(entry: &ReservationEntry) -> Self {
        Self {
            id: entry.id.clone(),
            start_wall: entry.start,
            end_wall: entry.end,
            cpu_quota_pct: entry.cpu_quota_pct,
            priority: entry.priority,
            enabled: entry.enabled,
        }
    }
}

/// Read-only lookup of the currently active reservation.
///
/// The core never mutates reservations; an external collaborator would own
/// CRUD and conflict detection (`spec.md` §9) and update the snapshot
/// atomically. Here the snapshot is loaded once from [`crate::config::GovernorConfig`]
/// and exposed through the same swap mechanism a live store would use.
#[derive(Clone)]
pub struct Reservations {
    snapshot: Arc<RwLock<Arc<Vec<Reservation>>>>,
}

impl Reservations {
    pub fn new(entries: &[ReservationEntry]) -> Self {
        let reservations = entries.iter().map(Reservation::from).collect::<Vec<_>>();
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(reservations))),
        }
    }

    /// Atomically replaces the set of known reservations. Exposed for
    /// completeness — a live store is the out-of-scope external
    /// collaborator, but tests and embedders can drive this directly.
    pub fn replace(&self, entries: &[ReservationEntry]) {
        let reservations = entries.iter().map(Reservation::from).collect::<Vec<_>>();
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(reservations);
    }

    /// The enabled reservation covering `now_wall` with the highest
    /// priority, ties broken by earliest start.
    pub fn active(&self, now_wall: DateTime<Utc>) -> Option<Reservation> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        guard
            .iter()
            .filter(|r| r.enabled && r.start_wall <= now_wall && now_wall <= r.end_wall)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.start_wall.cmp(&a.start_wall))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry(
        id: &str,
        start_offset_min: i64,
        end_offset_min: i64,
        quota: f64,
        priority: i32,
    ) -> ReservationEntry {
        let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ReservationEntry {
            id: id.to_owned(),
            start: base + ChronoDuration::minutes(start_offset_min),
            end: base + ChronoDuration::minutes(end_offset_min),
            cpu_quota_pct: quota,
            priority,
            enabled: true,
        }
    }

    #[test]
    fn no_reservation_active_outside_any_window() {
        let reservations = Reservations::new(&[entry("a", 0, 10, 10.0, 5)]);
        let now = DateTime::parse_from_rfc3339("2026-01-01T01:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(reservations.active(now).is_none());
    }

    #[test]
    fn highest_priority_wins_on_overlap() {
        let reservations =
            Reservations::new(&[entry("low", 0, 60, 10.0, 1), entry("high", 0, 60, 50.0, 9)]);
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let active = reservations.active(now).unwrap();
        assert_eq!(active.id, "high");
    }

    #[test]
    fn earliest_start_breaks_priority_tie() {
        let reservations = Reservations::new(&[
            entry("later", -5, 60, 10.0, 5),
            entry("earlier", -10, 60, 20.0, 5),
        ]);
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let active = reservations.active(now).unwrap();
        assert_eq!(active.id, "earlier");
    }

    #[test]
    fn disabled_reservations_are_ignored() {
        let mut e = entry("a", 0, 60, 10.0, 5);
        e.enabled = false;
        let reservations = Reservations::new(&[e]);
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(reservations.active(now).is_none());
    }

    #[test]
    fn replace_swaps_snapshot_atomically() {
        let reservations = Reservations::new(&[entry("a", 0, 60, 10.0, 5)]);
        reservations.replace(&[entry("b", 0, 60, 20.0, 5)]);
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(reservations.active(now).unwrap().id, "b");
    }
}
