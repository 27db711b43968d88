use std::collections::HashSet;

use crate::model::*;

use super::BookingError;

/// Check a candidate reservation against the room it targets.
///
/// Rules run in a fixed order and stop at the first violation:
/// room exists, guests fit the capacity, one guest entry per guest,
/// check-out after check-in, no CPF repeated.
pub fn validate(candidate: &ReservationCandidate, room: Option<&Room>) -> Result<(), BookingError> {
    let room = room.ok_or(BookingError::RoomNotFound(candidate.room_id))?;
    check_capacity(room, candidate.num_guests)?;
    check_guest_count(candidate.num_guests, &candidate.guests)?;
    check_date_range(candidate.check_in, candidate.check_out)?;
    check_unique_cpfs(&candidate.guests)
}

/// Partial-update variant: each rule only runs when the fields it needs are present.
///
/// `room` is the room named by `patch.room_id`, looked up by the caller.
pub fn validate_patch(patch: &ReservationPatch, room: Option<&Room>) -> Result<(), BookingError> {
    if let Some(room_id) = patch.room_id {
        let room = room.ok_or(BookingError::RoomNotFound(room_id))?;
        if let Some(n) = patch.num_guests {
            check_capacity(room, n)?;
        }
    }
    if let (Some(check_in), Some(check_out)) = (patch.check_in, patch.check_out) {
        check_date_range(check_in, check_out)?;
    }
    if let Some(guests) = &patch.guests {
        check_unique_cpfs(guests)?;
    }
    Ok(())
}

pub fn check_capacity(room: &Room, num_guests: u32) -> Result<(), BookingError> {
    if num_guests > room.capacity {
        return Err(BookingError::CapacityExceeded {
            capacity: room.capacity,
            requested: num_guests,
        });
    }
    Ok(())
}

pub fn check_guest_count(num_guests: u32, guests: &[GuestEntry]) -> Result<(), BookingError> {
    if guests.len() != num_guests as usize {
        return Err(BookingError::GuestCountMismatch {
            expected: num_guests,
            provided: guests.len(),
        });
    }
    Ok(())
}

pub fn check_date_range(check_in: Ms, check_out: Ms) -> Result<(), BookingError> {
    if check_out <= check_in {
        return Err(BookingError::InvalidDateRange { check_in, check_out });
    }
    Ok(())
}

/// Absent or empty CPFs never collide with each other.
pub fn check_unique_cpfs(guests: &[GuestEntry]) -> Result<(), BookingError> {
    let mut seen = HashSet::with_capacity(guests.len());
    for cpf in guests.iter().filter_map(GuestEntry::cpf_key) {
        if !seen.insert(cpf) {
            return Err(BookingError::DuplicateGuestId(cpf.to_string()));
        }
    }
    Ok(())
}
