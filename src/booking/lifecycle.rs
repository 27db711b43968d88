use crate::limits::CANCELLATION_CUTOFF_MS;
use crate::model::*;

use super::BookingError;

// ── Reservation state machine ────────────────────────────────────
//
//   CONFIRMED ──check-in──▶ CHECKED_IN ──check-out──▶ CHECKED_OUT
//       │
//       └──cancel (until check-in − 2 days)──▶ CANCELLED

/// Last instant at which a reservation checking in at `check_in` may be cancelled.
pub fn cancellation_deadline(check_in: Ms) -> Ms {
    check_in.saturating_sub(CANCELLATION_CUTOFF_MS)
}

/// The status an action leads to when it succeeds.
pub fn target_status(action: Action) -> ReservationStatus {
    match action {
        Action::CheckIn => ReservationStatus::CheckedIn,
        Action::CheckOut => ReservationStatus::CheckedOut,
        Action::Cancel => ReservationStatus::Cancelled,
    }
}

pub fn next_status(
    from: ReservationStatus,
    action: Action,
    check_in: Ms,
    now: Ms,
) -> Result<ReservationStatus, BookingError> {
    match (from, action) {
        (ReservationStatus::Confirmed, Action::CheckIn) => Ok(ReservationStatus::CheckedIn),
        (ReservationStatus::CheckedIn, Action::CheckOut) => Ok(ReservationStatus::CheckedOut),
        (ReservationStatus::Confirmed, Action::Cancel) => {
            let deadline = cancellation_deadline(check_in);
            if now > deadline {
                return Err(BookingError::CancellationWindowExpired { check_in, deadline });
            }
            Ok(ReservationStatus::Cancelled)
        }
        _ => Err(BookingError::IllegalTransition { from, action }),
    }
}

/// Apply `action` to a copy of `reservation`.
pub fn apply(reservation: &Reservation, action: Action, now: Ms) -> Result<Reservation, BookingError> {
    let status = next_status(reservation.status, action, reservation.check_in, now)?;
    Ok(Reservation {
        status,
        ..reservation.clone()
    })
}

pub fn permits(reservation: &Reservation, action: Action, now: Ms) -> bool {
    next_status(reservation.status, action, reservation.check_in, now).is_ok()
}

/// Actions an operator can be offered right now, in display order.
pub fn available_actions(reservation: &Reservation, now: Ms) -> Vec<Action> {
    Action::ALL
        .into_iter()
        .filter(|a| permits(reservation, *a, now))
        .collect()
}
