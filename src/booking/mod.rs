pub mod availability;
mod error;
pub mod lifecycle;
pub mod validate;

pub use error::BookingError;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::api::{ApiError, BookingBackend};
use crate::model::*;
use crate::observability::{RESERVATIONS_CREATED_TOTAL, RULE_REJECTIONS_TOTAL, TRANSITIONS_TOTAL};
use crate::session::Session;

/// Front desk: runs the booking rules locally, then hands accepted requests
/// to the collaborator. The collaborator re-checks everything; the local pass
/// only catches mistakes before a round trip.
pub struct Desk<B> {
    backend: Arc<B>,
}

impl<B> Clone for Desk<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

fn reject<T>(session: &Session, err: BookingError) -> Result<T, BookingError> {
    warn!("rule rejected request from {}: {err}", session.operator());
    metrics::counter!(RULE_REJECTIONS_TOTAL, "reason" => err.label()).increment(1);
    Err(err)
}

fn room_lookup_error(id: RoomId, e: ApiError) -> BookingError {
    match e {
        ApiError::NotFound(_) => BookingError::RoomNotFound(id),
        other => other.into(),
    }
}

fn reservation_lookup_error(id: ReservationId, e: ApiError) -> BookingError {
    match e {
        ApiError::NotFound(_) => BookingError::ReservationNotFound(id),
        other => other.into(),
    }
}

/// Map a transition failure reported by the collaborator, keeping the
/// status we sent it from and the deadline we computed.
fn transition_error(reservation: &Reservation, action: Action, e: ApiError) -> BookingError {
    match e {
        ApiError::IllegalTransition(_) => BookingError::IllegalTransition {
            from: reservation.status,
            action,
        },
        ApiError::CancellationWindowExpired(_) => BookingError::CancellationWindowExpired {
            check_in: reservation.check_in,
            deadline: lifecycle::cancellation_deadline(reservation.check_in),
        },
        other => reservation_lookup_error(reservation.id, other),
    }
}

impl<B: BookingBackend> Desk<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Rooms free for `[check_in, check_out)`. Until both bounds are chosen
    /// nothing is being filtered, so the answer is empty and no request is made.
    pub async fn find_available_rooms(
        &self,
        session: &Session,
        check_in: Option<Ms>,
        check_out: Option<Ms>,
    ) -> Result<Vec<Room>, BookingError> {
        let (Some(check_in), Some(check_out)) = (check_in, check_out) else {
            return Ok(Vec::new());
        };
        if let Err(e) = validate::check_date_range(check_in, check_out) {
            return reject(session, e);
        }
        debug!("availability query [{check_in}, {check_out}) by {}", session.operator());
        Ok(self.backend.list_available_rooms(check_in, check_out).await?)
    }

    /// Run the full rule-set against a fresh read of the target room.
    /// Returns the room the candidate was checked against.
    pub async fn validate(&self, session: &Session, candidate: &ReservationCandidate) -> Result<Room, BookingError> {
        let room = match self.backend.get_room(candidate.room_id).await {
            Ok(room) => Some(room),
            Err(ApiError::NotFound(_)) => None,
            Err(e) => return Err(room_lookup_error(candidate.room_id, e)),
        };
        match validate::validate(candidate, room.as_ref()) {
            Ok(()) => Ok(room.ok_or(BookingError::RoomNotFound(candidate.room_id))?),
            Err(e) => reject(session, e),
        }
    }

    pub async fn create_reservation(
        &self,
        session: &Session,
        candidate: &ReservationCandidate,
    ) -> Result<Reservation, BookingError> {
        self.validate(session, candidate).await?;
        let reservation = self
            .backend
            .create_reservation(candidate)
            .await
            .map_err(|e| room_lookup_error(candidate.room_id, e))?;
        info!(
            "reservation {} created for room {} by {}",
            reservation.id,
            reservation.room_id,
            session.operator()
        );
        metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    pub async fn update_reservation(
        &self,
        session: &Session,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> Result<Reservation, BookingError> {
        let room = match patch.room_id {
            Some(room_id) => match self.backend.get_room(room_id).await {
                Ok(room) => Some(room),
                Err(ApiError::NotFound(_)) => None,
                Err(e) => return Err(room_lookup_error(room_id, e)),
            },
            None => None,
        };
        if let Err(e) = validate::validate_patch(patch, room.as_ref()) {
            return reject(session, e);
        }
        let reservation = self
            .backend
            .update_reservation(id, patch)
            .await
            .map_err(|e| reservation_lookup_error(id, e))?;
        info!("reservation {id} updated by {}", session.operator());
        Ok(reservation)
    }

    /// Check `action` against the reservation as the operator last saw it,
    /// then send it. The collaborator's answer is the new state.
    pub async fn apply_action(
        &self,
        session: &Session,
        reservation: &Reservation,
        action: Action,
    ) -> Result<Reservation, BookingError> {
        if let Err(e) = lifecycle::apply(reservation, action, session.now()) {
            metrics::counter!(TRANSITIONS_TOTAL, "action" => action.as_str(), "outcome" => "refused").increment(1);
            return reject(session, e);
        }
        match self.backend.transition_reservation(reservation.id, action).await {
            Ok(updated) => {
                info!(
                    "reservation {} {action}: {} -> {} by {}",
                    reservation.id,
                    reservation.status,
                    updated.status,
                    session.operator()
                );
                metrics::counter!(TRANSITIONS_TOTAL, "action" => action.as_str(), "outcome" => "applied").increment(1);
                Ok(updated)
            }
            Err(e) => {
                error!("reservation {} {action} failed: {e}", reservation.id);
                metrics::counter!(TRANSITIONS_TOTAL, "action" => action.as_str(), "outcome" => "failed").increment(1);
                Err(transition_error(reservation, action, e))
            }
        }
    }

    /// Retry an action whose outcome is unknown. Re-reads the reservation
    /// first; if the earlier attempt already landed, returns the current
    /// state instead of transitioning twice.
    pub async fn retry_action(
        &self,
        session: &Session,
        id: ReservationId,
        action: Action,
    ) -> Result<Reservation, BookingError> {
        let current = self.get_reservation(session, id).await?;
        if current.status == lifecycle::target_status(action) {
            info!("reservation {id} already {}, not resending {action}", current.status);
            return Ok(current);
        }
        self.apply_action(session, &current, action).await
    }

    pub async fn get_reservation(&self, session: &Session, id: ReservationId) -> Result<Reservation, BookingError> {
        debug!("reservation {id} read by {}", session.operator());
        self.backend
            .get_reservation(id)
            .await
            .map_err(|e| reservation_lookup_error(id, e))
    }

    pub async fn list_reservations(
        &self,
        session: &Session,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, BookingError> {
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date)
            && let Err(e) = validate::check_date_range(start, end)
        {
            return reject(session, e);
        }
        debug!("reservation listing {filter:?} by {}", session.operator());
        Ok(self.backend.list_reservations(filter).await?)
    }
}

/// Case-insensitive match on the room name or any guest's name.
/// An empty term matches everything.
pub fn matches_search(reservation: &Reservation, term: &str) -> bool {
    let needle = term.to_lowercase();
    reservation.room.name.to_lowercase().contains(&needle)
        || reservation
            .guests
            .iter()
            .filter_map(ReservationGuest::display_name)
            .any(|name| name.to_lowercase().contains(&needle))
}
