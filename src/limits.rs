use crate::model::Ms;

pub const DAY_MS: Ms = 86_400_000;

/// Cancellations are accepted up to this long before check-in.
pub const CANCELLATION_CUTOFF_MS: Ms = 2 * DAY_MS;

pub const MIN_ROOM_CAPACITY: u32 = 1;
