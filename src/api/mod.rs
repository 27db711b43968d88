//! The remote API the console talks to, expressed as traits so the booking
//! rules can run against the real HTTP service or an in-process store.

mod error;
mod http;
mod memory;

pub use error::{ApiError, ErrorBody};
pub use http::HttpBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;

use crate::model::*;

/// Booking operations the persistence collaborator exposes.
#[async_trait]
pub trait BookingBackend: Send + Sync {
    async fn get_room(&self, id: RoomId) -> Result<Room, ApiError>;

    /// Rooms with no CONFIRMED/CHECKED_IN reservation overlapping `[check_in, check_out)`.
    async fn list_available_rooms(&self, check_in: Ms, check_out: Ms) -> Result<Vec<Room>, ApiError>;

    async fn create_reservation(&self, candidate: &ReservationCandidate) -> Result<Reservation, ApiError>;

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> Result<Reservation, ApiError>;

    async fn transition_reservation(&self, id: ReservationId, action: Action) -> Result<Reservation, ApiError>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, ApiError>;

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, ApiError>;
}

/// Room, user and guest maintenance.
#[async_trait]
pub trait AdminBackend: Send + Sync {
    async fn list_rooms(&self, status: Option<RoomStatus>) -> Result<Vec<Room>, ApiError>;
    async fn create_room(&self, draft: &RoomDraft) -> Result<Room, ApiError>;
    async fn update_room(&self, id: RoomId, patch: &RoomPatch) -> Result<Room, ApiError>;
    async fn delete_room(&self, id: RoomId) -> Result<(), ApiError>;

    async fn list_users(&self) -> Result<Vec<User>, ApiError>;
    async fn create_user(&self, user: &NewUser) -> Result<User, ApiError>;
    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, ApiError>;
    async fn delete_user(&self, id: UserId) -> Result<(), ApiError>;

    async fn list_guests(&self) -> Result<Vec<Guest>, ApiError>;
    async fn create_guest(&self, guest: &NewGuest) -> Result<Guest, ApiError>;
}

/// Staff authentication.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<User, ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;
    async fn auth_status(&self) -> Result<AuthStatus, ApiError>;
}
