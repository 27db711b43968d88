use crate::api::ApiError;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    RoomNotFound(RoomId),
    ReservationNotFound(ReservationId),
    NotFound(String),
    CapacityExceeded {
        capacity: u32,
        requested: u32,
    },
    GuestCountMismatch {
        expected: u32,
        provided: usize,
    },
    InvalidDateRange {
        check_in: Ms,
        check_out: Ms,
    },
    DuplicateGuestId(String),
    IllegalTransition {
        from: ReservationStatus,
        action: Action,
    },
    CancellationWindowExpired {
        check_in: Ms,
        deadline: Ms,
    },
    /// Another operator changed the same reservation or room. Re-read and retry.
    Conflict(String),
    /// The collaborator refused the request for a reason of its own.
    Rejected(String),
    Unauthorized,
    Transport(String),
}

impl BookingError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::RoomNotFound(_) => "room_not_found",
            BookingError::ReservationNotFound(_) => "reservation_not_found",
            BookingError::NotFound(_) => "not_found",
            BookingError::CapacityExceeded { .. } => "capacity_exceeded",
            BookingError::GuestCountMismatch { .. } => "guest_count_mismatch",
            BookingError::InvalidDateRange { .. } => "invalid_date_range",
            BookingError::DuplicateGuestId(_) => "duplicate_guest_id",
            BookingError::IllegalTransition { .. } => "illegal_transition",
            BookingError::CancellationWindowExpired { .. } => "cancellation_window_expired",
            BookingError::Conflict(_) => "conflict",
            BookingError::Rejected(_) => "rejected",
            BookingError::Unauthorized => "unauthorized",
            BookingError::Transport(_) => "transport",
        }
    }

    /// Conflicts and transport failures may succeed on a later attempt;
    /// everything else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Conflict(_) | BookingError::Transport(_))
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            BookingError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            BookingError::NotFound(what) => write!(f, "not found: {what}"),
            BookingError::CapacityExceeded {
                capacity,
                requested,
            } => write!(f, "{requested} guests exceed room capacity {capacity}"),
            BookingError::GuestCountMismatch { expected, provided } => {
                write!(f, "expected {expected} guest entries, got {provided}")
            }
            BookingError::InvalidDateRange { check_in, check_out } => {
                write!(f, "check-out ({check_out}) must be after check-in ({check_in})")
            }
            BookingError::DuplicateGuestId(cpf) => write!(f, "duplicate CPF: {cpf}"),
            BookingError::IllegalTransition { from, action } => {
                write!(f, "cannot {action} a reservation in status {from}")
            }
            BookingError::CancellationWindowExpired { check_in, deadline } => write!(
                f,
                "cancellation closed at {deadline}, 2 days before check-in at {check_in}"
            ),
            BookingError::Conflict(m) => write!(f, "concurrent modification: {m}"),
            BookingError::Rejected(m) => write!(f, "rejected by server: {m}"),
            BookingError::Unauthorized => write!(f, "session expired, log in again"),
            BookingError::Transport(m) => write!(f, "server unavailable: {m}"),
        }
    }
}

impl std::error::Error for BookingError {}

/// Context-free mapping. Call sites that know which entity was looked up
/// or which action was attempted refine `NotFound` and transition errors.
impl From<ApiError> for BookingError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotFound(m) => BookingError::NotFound(m),
            ApiError::Rejected(m) => BookingError::Rejected(m),
            ApiError::Conflict(m) => BookingError::Conflict(m),
            ApiError::IllegalTransition(m) | ApiError::CancellationWindowExpired(m) => BookingError::Rejected(m),
            ApiError::Unauthorized => BookingError::Unauthorized,
            ApiError::Transport(m) => BookingError::Transport(m),
        }
    }
}
