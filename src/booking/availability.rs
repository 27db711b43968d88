use std::collections::HashSet;

use crate::model::*;

// ── Room availability ────────────────────────────────────────────

/// First reservation that keeps `room_id` occupied during `stay`.
///
/// Only CONFIRMED and CHECKED_IN reservations occupy a room. Stays are
/// half-open, so a check-out and a check-in on the same instant don't clash.
pub fn find_conflict<'a, I>(reservations: I, room_id: RoomId, stay: &Span) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    reservations.into_iter().find(|r| {
        r.room_id == room_id && r.status.holds_room() && r.stay().is_some_and(|s| s.overlaps(stay))
    })
}

pub fn is_room_free<'a, I>(reservations: I, room_id: RoomId, stay: &Span) -> bool
where
    I: IntoIterator<Item = &'a Reservation>,
{
    find_conflict(reservations, room_id, stay).is_none()
}

/// Rooms with no occupying reservation overlapping `stay`, in input order.
pub fn free_rooms(rooms: &[Room], reservations: &[Reservation], stay: &Span) -> Vec<Room> {
    let busy: HashSet<RoomId> = reservations
        .iter()
        .filter(|r| r.status.holds_room() && r.stay().is_some_and(|s| s.overlaps(stay)))
        .map(|r| r.room_id)
        .collect();
    rooms
        .iter()
        .filter(|room| !busy.contains(&room.id))
        .cloned()
        .collect()
}
