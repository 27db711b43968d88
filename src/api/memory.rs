use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use crate::booking::{availability, lifecycle, validate, BookingError};
use crate::limits::MIN_ROOM_CAPACITY;
use crate::model::*;

use super::{AdminBackend, ApiError, AuthBackend, BookingBackend};

/// A room and every reservation ever made for it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `check_in`.
    pub reservations: Vec<Reservation>,
    /// Set under the write lock when the room is deleted. Holders of a
    /// stale `Arc` must not write through it.
    pub deleted: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
            deleted: false,
        }
    }

    fn live(&self) -> Result<(), ApiError> {
        if self.deleted {
            return Err(ApiError::NotFound(format!("room {}", self.room.id)));
        }
        Ok(())
    }

    /// Insert maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.check_in, |r| r.check_in)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation_mut(&mut self, id: ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose stay overlaps `stay`. Binary search skips
    /// everything checking in at or after `stay.end`.
    pub fn overlapping(&self, stay: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self.reservations.partition_point(|r| r.check_in < stay.end);
        let start = stay.start;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.check_out > start)
    }
}

pub type SharedRoomState = Arc<RwLock<RoomState>>;

struct StoredUser {
    user: User,
    password: String,
}

/// In-process stand-in for the remote API. Enforces the same booking rules
/// the desk runs client-side, plus what only the server can know: overlaps
/// with other reservations and username uniqueness.
pub struct MemoryBackend {
    rooms: DashMap<RoomId, SharedRoomState>,
    /// Reverse lookup: reservation id → room id.
    reservation_to_room: DashMap<ReservationId, RoomId>,
    users: DashMap<UserId, StoredUser>,
    /// Username → user id. Claimed through `entry` so check and insert are one step.
    usernames: DashMap<String, UserId>,
    guests: DashMap<GuestId, Guest>,
    logged_in: RwLock<Option<UserId>>,
    next_id: AtomicI64,
    clock: Arc<dyn Fn() -> Ms + Send + Sync>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_error(e: BookingError) -> ApiError {
    match e {
        BookingError::IllegalTransition { .. } => ApiError::IllegalTransition(e.to_string()),
        BookingError::CancellationWindowExpired { .. } => ApiError::CancellationWindowExpired(e.to_string()),
        BookingError::RoomNotFound(_) | BookingError::ReservationNotFound(_) => ApiError::NotFound(e.to_string()),
        other => ApiError::Rejected(other.to_string()),
    }
}

fn sorted<T>(mut items: Vec<T>, key: impl Fn(&T) -> (Ms, i64)) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            users: DashMap::new(),
            usernames: DashMap::new(),
            guests: DashMap::new(),
            logged_in: RwLock::new(None),
            next_id: AtomicI64::new(1),
            clock: Arc::new(now_ms),
        }
    }

    /// Clock used for the cancellation cutoff.
    pub fn with_clock(mut self, clock: impl Fn() -> Ms + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Seed a room directly.
    pub fn add_room(&self, name: &str, number: &str, capacity: u32) -> Room {
        let room = Room {
            id: self.next_id(),
            name: name.to_string(),
            number: number.to_string(),
            description: String::new(),
            capacity,
            status: RoomStatus::Available,
            notes: None,
        };
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        room
    }

    /// Seed a staff account directly. Seeding a taken username returns the
    /// existing account unchanged.
    pub fn add_user(&self, name: &str, username: &str, password: &str) -> User {
        match self.claim_username(name, username, password) {
            Ok(user) => user,
            Err(existing) => existing,
        }
    }

    /// Reserve `username` and store the account in one step.
    /// `Err` carries the account that already owns the name.
    fn claim_username(&self, name: &str, username: &str, password: &str) -> Result<User, User> {
        match self.usernames.entry(username.to_string()) {
            Entry::Occupied(taken) => {
                let owner = *taken.get();
                drop(taken);
                let existing = self.users.get(&owner).map(|e| e.value().user.clone());
                Err(existing.unwrap_or_else(|| User {
                    id: owner,
                    name: name.to_string(),
                    username: username.to_string(),
                }))
            }
            Entry::Vacant(slot) => {
                let user = User {
                    id: self.next_id(),
                    name: name.to_string(),
                    username: username.to_string(),
                };
                self.users.insert(
                    user.id,
                    StoredUser {
                        user: user.clone(),
                        password: password.to_string(),
                    },
                );
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    pub fn get_room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    fn room_state(&self, id: RoomId) -> Result<SharedRoomState, ApiError> {
        self.get_room_state(&id)
            .ok_or_else(|| ApiError::NotFound(format!("room {id}")))
    }

    fn reservation_room(&self, id: ReservationId) -> Result<RoomId, ApiError> {
        self.reservation_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or_else(|| ApiError::NotFound(format!("reservation {id}")))
    }

    /// After locking the room the index pointed at, confirm the reservation
    /// is still there. A reservation moved to another room in between is a
    /// conflict; one that is gone is not found.
    fn locate(&self, state: &RoomState, id: ReservationId) -> Result<(), ApiError> {
        if !state.deleted && state.reservations.iter().any(|r| r.id == id) {
            return Ok(());
        }
        match self.reservation_to_room.get(&id).map(|e| *e.value()) {
            Some(now) if now != state.room.id => {
                Err(ApiError::Conflict(format!("reservation {id} moved concurrently")))
            }
            _ => Err(ApiError::NotFound(format!("reservation {id}"))),
        }
    }

    /// Lookup reservation → room, acquire that room's write lock.
    async fn resolve_reservation_write(&self, id: ReservationId) -> Result<OwnedRwLockWriteGuard<RoomState>, ApiError> {
        let room_id = self.reservation_room(id)?;
        let guard = self.room_state(room_id)?.write_owned().await;
        self.locate(&guard, id)?;
        Ok(guard)
    }

    fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    fn build_guests(&self, reservation_id: ReservationId, entries: &[GuestEntry]) -> Vec<ReservationGuest> {
        entries
            .iter()
            .map(|entry| ReservationGuest {
                id: self.next_id(),
                reservation_id,
                entry: entry.clone(),
                guest: entry
                    .guest_id
                    .and_then(|gid| self.guests.get(&gid).map(|g| g.value().clone())),
            })
            .collect()
    }

    fn check_free(state: &RoomState, stay: &Span, ignore: Option<ReservationId>) -> Result<(), ApiError> {
        let others = state.overlapping(stay).filter(|r| Some(r.id) != ignore);
        if let Some(existing) = availability::find_conflict(others, state.room.id, stay) {
            return Err(ApiError::Conflict(format!(
                "room {} is already booked by reservation {}",
                state.room.id, existing.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BookingBackend for MemoryBackend {
    async fn get_room(&self, id: RoomId) -> Result<Room, ApiError> {
        let rs = self.room_state(id)?;
        let guard = rs.read().await;
        guard.live()?;
        Ok(guard.room.clone())
    }

    async fn list_available_rooms(&self, check_in: Ms, check_out: Ms) -> Result<Vec<Room>, ApiError> {
        let stay = Span::checked(check_in, check_out)
            .ok_or_else(|| ApiError::Rejected("check-out must be after check-in".into()))?;
        let mut free = Vec::new();
        for id in self.room_ids() {
            let Some(rs) = self.get_room_state(&id) else { continue };
            let guard = rs.read().await;
            if !guard.deleted && availability::is_room_free(guard.overlapping(&stay), id, &stay) {
                free.push(guard.room.clone());
            }
        }
        Ok(free)
    }

    async fn create_reservation(&self, candidate: &ReservationCandidate) -> Result<Reservation, ApiError> {
        let rs = self.room_state(candidate.room_id)?;
        let mut guard = rs.write().await;
        guard.live()?;
        validate::validate(candidate, Some(&guard.room)).map_err(rule_error)?;

        let stay = Span::new(candidate.check_in, candidate.check_out);
        Self::check_free(&guard, &stay, None)?;

        let id = self.next_id();
        let reservation = Reservation {
            id,
            room_id: candidate.room_id,
            room: guard.room.clone(),
            num_guests: candidate.num_guests,
            check_in: candidate.check_in,
            check_out: candidate.check_out,
            status: ReservationStatus::Confirmed,
            guests: self.build_guests(id, &candidate.guests),
        };
        guard.insert_reservation(reservation.clone());
        self.reservation_to_room.insert(id, candidate.room_id);
        debug!("stored reservation {id} on room {}", candidate.room_id);
        Ok(reservation)
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> Result<Reservation, ApiError> {
        let current_room = self.reservation_room(id)?;
        let target_room = patch.room_id.unwrap_or(current_room);

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut ids = vec![current_room, target_room];
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for rid in &ids {
            let guard = self.room_state(*rid)?.write_owned().await;
            guard.live()?;
            guards.push(guard);
        }
        let idx = |rid: RoomId| ids.iter().position(|x| *x == rid).unwrap_or(0);

        self.locate(&guards[idx(current_room)], id)?;
        let current = guards[idx(current_room)]
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("reservation {id}")))?;
        if current.status.is_terminal() {
            return Err(ApiError::Rejected(format!(
                "reservation {id} is {} and can no longer be edited",
                current.status
            )));
        }

        let target_state = &guards[idx(target_room)];
        validate::validate_patch(patch, Some(&target_state.room)).map_err(rule_error)?;

        let guests = patch
            .guests
            .clone()
            .unwrap_or_else(|| current.guests.iter().map(|g| g.entry.clone()).collect());
        let merged = ReservationCandidate {
            room_id: target_room,
            num_guests: patch.num_guests.unwrap_or(current.num_guests),
            check_in: patch.check_in.unwrap_or(current.check_in),
            check_out: patch.check_out.unwrap_or(current.check_out),
            guests,
        };
        validate::validate(&merged, Some(&target_state.room)).map_err(rule_error)?;
        let stay = Span::new(merged.check_in, merged.check_out);
        Self::check_free(target_state, &stay, Some(id))?;

        let updated = Reservation {
            id,
            room_id: target_room,
            room: target_state.room.clone(),
            num_guests: merged.num_guests,
            check_in: merged.check_in,
            check_out: merged.check_out,
            status: current.status,
            guests: match &patch.guests {
                Some(entries) => self.build_guests(id, entries),
                None => current.guests.clone(),
            },
        };
        guards[idx(current_room)].remove_reservation(id);
        guards[idx(target_room)].insert_reservation(updated.clone());
        self.reservation_to_room.insert(id, target_room);
        Ok(updated)
    }

    async fn transition_reservation(&self, id: ReservationId, action: Action) -> Result<Reservation, ApiError> {
        let mut guard = self.resolve_reservation_write(id).await?;
        let now = (self.clock)();
        let reservation = guard
            .reservation_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("reservation {id}")))?;
        let updated = lifecycle::apply(reservation, action, now).map_err(rule_error)?;
        *reservation = updated.clone();
        Ok(updated)
    }

    /// A read that loses a race with a move follows the index once more.
    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, ApiError> {
        let mut attempts = 0;
        loop {
            let rs = self.room_state(self.reservation_room(id)?)?;
            let guard = rs.read().await;
            match self.locate(&guard, id) {
                Ok(()) => {
                    return guard
                        .reservations
                        .iter()
                        .find(|r| r.id == id)
                        .cloned()
                        .ok_or_else(|| ApiError::NotFound(format!("reservation {id}")));
                }
                Err(ApiError::Conflict(_)) if attempts == 0 => attempts += 1,
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, ApiError> {
        let ids = match filter.room_id {
            Some(id) => vec![id],
            None => self.room_ids(),
        };
        let mut out = Vec::new();
        for id in ids {
            let Some(rs) = self.get_room_state(&id) else { continue };
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            out.extend(guard.reservations.iter().filter(|r| filter.matches(r)).cloned());
        }
        Ok(sorted(out, |r: &Reservation| (r.check_in, r.id)))
    }
}

#[async_trait]
impl AdminBackend for MemoryBackend {
    async fn list_rooms(&self, status: Option<RoomStatus>) -> Result<Vec<Room>, ApiError> {
        let mut rooms = Vec::new();
        for id in self.room_ids() {
            let Some(rs) = self.get_room_state(&id) else { continue };
            let guard = rs.read().await;
            if !guard.deleted && status.is_none_or(|s| s == guard.room.status) {
                rooms.push(guard.room.clone());
            }
        }
        Ok(rooms)
    }

    async fn create_room(&self, draft: &RoomDraft) -> Result<Room, ApiError> {
        if draft.capacity < MIN_ROOM_CAPACITY {
            return Err(ApiError::Rejected("room capacity must be at least 1".into()));
        }
        let room = Room {
            id: self.next_id(),
            name: draft.name.clone(),
            number: draft.number.clone(),
            description: draft.description.clone(),
            capacity: draft.capacity,
            status: draft.status,
            notes: draft.notes.clone(),
        };
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        Ok(room)
    }

    async fn update_room(&self, id: RoomId, patch: &RoomPatch) -> Result<Room, ApiError> {
        if patch.capacity.is_some_and(|c| c < MIN_ROOM_CAPACITY) {
            return Err(ApiError::Rejected("room capacity must be at least 1".into()));
        }
        let rs = self.room_state(id)?;
        let mut guard = rs.write().await;
        guard.live()?;
        let room = &mut guard.room;
        if let Some(name) = &patch.name {
            room.name = name.clone();
        }
        if let Some(number) = &patch.number {
            room.number = number.clone();
        }
        if let Some(description) = &patch.description {
            room.description = description.clone();
        }
        if let Some(capacity) = patch.capacity {
            room.capacity = capacity;
        }
        if let Some(status) = patch.status {
            room.status = status;
        }
        if let Some(notes) = &patch.notes {
            room.notes = Some(notes.clone());
        }
        Ok(guard.room.clone())
    }

    async fn delete_room(&self, id: RoomId) -> Result<(), ApiError> {
        let rs = self.room_state(id)?;
        let mut guard = rs.write().await;
        guard.live()?;
        if let Some(active) = guard.reservations.iter().find(|r| r.status.holds_room()) {
            return Err(ApiError::Conflict(format!(
                "room {id} still has active reservation {}",
                active.id
            )));
        }
        // Unlink while still holding the lock; writers queued on it see `deleted`.
        guard.deleted = true;
        for r in &guard.reservations {
            self.reservation_to_room.remove(&r.id);
        }
        self.rooms.remove(&id);
        debug!("deleted room {id}");
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        let users = self.users.iter().map(|e| e.value().user.clone()).collect();
        Ok(sorted(users, |u: &User| (0, u.id)))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        self.claim_username(&user.name, &user.username, &user.password)
            .map_err(|_| ApiError::Conflict(format!("username {} already taken", user.username)))
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, ApiError> {
        let old_username = self
            .users
            .get(&id)
            .map(|e| e.value().user.username.clone())
            .ok_or_else(|| ApiError::NotFound(format!("user {id}")))?;
        let rename = patch.username.as_ref().filter(|u| **u != old_username);
        if let Some(username) = rename {
            match self.usernames.entry(username.clone()) {
                Entry::Occupied(_) => return Err(ApiError::Conflict(format!("username {username} already taken"))),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }
        let Some(mut stored) = self.users.get_mut(&id) else {
            if let Some(username) = rename {
                self.usernames.remove(username);
            }
            return Err(ApiError::NotFound(format!("user {id}")));
        };
        if let Some(name) = &patch.name {
            stored.user.name = name.clone();
        }
        if let Some(username) = rename {
            stored.user.username = username.clone();
        }
        if let Some(password) = &patch.password {
            stored.password = password.clone();
        }
        let user = stored.user.clone();
        // Never hold a `users` guard while touching `usernames`.
        drop(stored);
        if rename.is_some() {
            self.usernames.remove(&old_username);
        }
        Ok(user)
    }

    async fn delete_user(&self, id: UserId) -> Result<(), ApiError> {
        let (_, stored) = self
            .users
            .remove(&id)
            .ok_or_else(|| ApiError::NotFound(format!("user {id}")))?;
        self.usernames.remove(&stored.user.username);
        Ok(())
    }

    async fn list_guests(&self) -> Result<Vec<Guest>, ApiError> {
        let guests = self.guests.iter().map(|e| e.value().clone()).collect();
        Ok(sorted(guests, |g: &Guest| (0, g.id)))
    }

    async fn create_guest(&self, guest: &NewGuest) -> Result<Guest, ApiError> {
        let guest = Guest {
            id: self.next_id(),
            name: guest.name.clone(),
            cpf: guest.cpf.clone(),
            contact_phone: guest.contact_phone.clone(),
            support_contact: guest.support_contact.clone(),
        };
        self.guests.insert(guest.id, guest.clone());
        Ok(guest)
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        let user = self
            .users
            .iter()
            .find(|e| e.value().user.username == credentials.username && e.value().password == credentials.password)
            .map(|e| e.value().user.clone())
            .ok_or(ApiError::Unauthorized)?;
        *self.logged_in.write().await = Some(user.id);
        Ok(user)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        *self.logged_in.write().await = None;
        Ok(())
    }

    async fn auth_status(&self) -> Result<AuthStatus, ApiError> {
        let id = *self.logged_in.read().await;
        let user = id.and_then(|id| self.users.get(&id).map(|e| e.value().user.clone()));
        Ok(AuthStatus {
            is_authenticated: user.is_some(),
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Ms = 86_400_000;

    fn booking(id: ReservationId, check_in: Ms, check_out: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id,
            room_id: 1,
            room: Room {
                id: 1,
                name: "Sol".into(),
                number: "1".into(),
                description: String::new(),
                capacity: 2,
                status: RoomStatus::Available,
                notes: None,
            },
            num_guests: 0,
            check_in,
            check_out,
            status,
            guests: vec![],
        }
    }

    #[test]
    fn reservations_stay_sorted_by_check_in() {
        let mut rs = RoomState::new(booking(0, 0, 1, ReservationStatus::Confirmed).room);
        rs.insert_reservation(booking(1, 30 * DAY, 31 * DAY, ReservationStatus::Confirmed));
        rs.insert_reservation(booking(2, 10 * DAY, 11 * DAY, ReservationStatus::Confirmed));
        rs.insert_reservation(booking(3, 20 * DAY, 21 * DAY, ReservationStatus::Confirmed));
        let order: Vec<_> = rs.reservations.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![2, 3, 1]);

        assert!(rs.remove_reservation(3).is_some());
        assert!(rs.remove_reservation(3).is_none());
        let order: Vec<_> = rs.reservations.iter().map(|r| r.id).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(booking(0, 0, 1, ReservationStatus::Confirmed).room);
        rs.insert_reservation(booking(1, DAY, 2 * DAY, ReservationStatus::Confirmed));
        rs.insert_reservation(booking(2, 4 * DAY, 6 * DAY, ReservationStatus::Confirmed));
        rs.insert_reservation(booking(3, 10 * DAY, 11 * DAY, ReservationStatus::Confirmed));

        let hits: Vec<_> = rs.overlapping(&Span::new(5 * DAY, 8 * DAY)).map(|r| r.id).collect();
        assert_eq!(hits, vec![2]);

        // Checking in on another stay's checkout day is not an overlap.
        let hits: Vec<_> = rs.overlapping(&Span::new(2 * DAY, 4 * DAY)).collect();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn overlapping_booking_is_a_conflict() {
        let backend = MemoryBackend::new();
        let room = backend.add_room("Sol", "1", 2);
        let candidate = ReservationCandidate {
            room_id: room.id,
            num_guests: 1,
            check_in: 10 * DAY,
            check_out: 12 * DAY,
            guests: vec![GuestEntry::named("Ana", None, "555")],
        };
        let first = backend.create_reservation(&candidate).await.unwrap();
        let again = backend.create_reservation(&candidate).await;
        assert!(matches!(again, Err(ApiError::Conflict(m)) if m.contains(&first.id.to_string())));

        // Once cancelled the room is free again.
        let backend = backend.with_clock(|| 0);
        backend.transition_reservation(first.id, Action::Cancel).await.unwrap();
        backend.create_reservation(&candidate).await.unwrap();
    }

    #[tokio::test]
    async fn server_rejects_rule_violations() {
        let backend = MemoryBackend::new();
        let room = backend.add_room("Sol", "1", 1);
        let candidate = ReservationCandidate {
            room_id: room.id,
            num_guests: 2,
            check_in: 10 * DAY,
            check_out: 12 * DAY,
            guests: vec![GuestEntry::default(), GuestEntry::default()],
        };
        let err = backend.create_reservation(&candidate).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected(m) if m.contains("capacity")));

        let missing = ReservationCandidate {
            room_id: 999,
            ..candidate
        };
        assert!(matches!(
            backend.create_reservation(&missing).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn late_cancel_and_illegal_transition_carry_codes() {
        let backend = MemoryBackend::new().with_clock(|| 9 * DAY);
        let room = backend.add_room("Sol", "1", 2);
        let r = backend
            .create_reservation(&ReservationCandidate {
                room_id: room.id,
                num_guests: 1,
                check_in: 10 * DAY,
                check_out: 12 * DAY,
                guests: vec![GuestEntry::named("Ana", None, "555")],
            })
            .await
            .unwrap();

        assert!(matches!(
            backend.transition_reservation(r.id, Action::Cancel).await,
            Err(ApiError::CancellationWindowExpired(_))
        ));
        assert!(matches!(
            backend.transition_reservation(r.id, Action::CheckOut).await,
            Err(ApiError::IllegalTransition(_))
        ));
        assert!(matches!(
            backend.transition_reservation(424242, Action::CheckIn).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_moves_reservation_between_rooms() {
        let backend = MemoryBackend::new();
        let a = backend.add_room("Sol", "1", 2);
        let b = backend.add_room("Lua", "2", 1);
        let r = backend
            .create_reservation(&ReservationCandidate {
                room_id: a.id,
                num_guests: 1,
                check_in: 10 * DAY,
                check_out: 12 * DAY,
                guests: vec![GuestEntry::named("Ana", None, "555")],
            })
            .await
            .unwrap();

        let moved = backend
            .update_reservation(
                r.id,
                &ReservationPatch {
                    room_id: Some(b.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.room_id, b.id);
        assert_eq!(moved.room.name, "Lua");
        assert_eq!(backend.get_reservation(r.id).await.unwrap().room_id, b.id);

        let free = backend.list_available_rooms(10 * DAY, 12 * DAY).await.unwrap();
        assert_eq!(free.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id]);
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let backend = MemoryBackend::new();
        backend.add_user("Rita", "rita", "pw");
        let dup = backend
            .create_user(&NewUser {
                name: "Other Rita".into(),
                username: "rita".into(),
                password: "pw2".into(),
            })
            .await;
        assert!(matches!(dup, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn user_and_guest_maintenance() {
        let backend = MemoryBackend::new();
        let rita = backend.add_user("Rita", "rita", "pw");
        let joao = backend.add_user("Joao", "joao", "pw");

        let taken = backend
            .update_user(
                joao.id,
                &UserPatch {
                    username: Some("rita".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(ApiError::Conflict(_))));

        backend
            .update_user(
                rita.id,
                &UserPatch {
                    password: Some("new".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let creds = |password: &str| Credentials {
            username: "rita".into(),
            password: password.into(),
        };
        assert_eq!(backend.login(&creds("pw")).await, Err(ApiError::Unauthorized));
        assert_eq!(backend.login(&creds("new")).await.unwrap(), rita);

        backend.delete_user(joao.id).await.unwrap();
        assert!(matches!(backend.delete_user(joao.id).await, Err(ApiError::NotFound(_))));
        assert_eq!(backend.list_users().await.unwrap(), vec![rita]);

        let guest = backend
            .create_guest(&NewGuest {
                name: "Ana".into(),
                cpf: "12345678901".into(),
                contact_phone: "555".into(),
                support_contact: None,
            })
            .await
            .unwrap();
        assert_eq!(backend.list_guests().await.unwrap(), vec![guest.clone()]);

        // Linked guests are embedded in the reservation.
        let room = backend.add_room("Sol", "1", 2);
        let r = backend
            .create_reservation(&ReservationCandidate {
                room_id: room.id,
                num_guests: 1,
                check_in: 10 * DAY,
                check_out: 12 * DAY,
                guests: vec![GuestEntry {
                    guest_id: Some(guest.id),
                    ..Default::default()
                }],
            })
            .await
            .unwrap();
        assert_eq!(r.guests[0].display_name(), Some("Ana"));
    }

    fn one_guest(room_id: RoomId, check_in: Ms) -> ReservationCandidate {
        ReservationCandidate {
            room_id,
            num_guests: 1,
            check_in,
            check_out: check_in + 2 * DAY,
            guests: vec![GuestEntry::named("Ana", None, "555")],
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn booking_queued_behind_a_room_delete_is_refused() {
        let backend = Arc::new(MemoryBackend::new());
        let room_id = backend.add_room("Sol", "1", 2).id;
        let rs = backend.get_room_state(&room_id).unwrap();
        let held = rs.write().await;

        let b = backend.clone();
        let delete = tokio::spawn(async move { b.delete_room(room_id).await });
        settle().await;
        let b = backend.clone();
        let create = tokio::spawn(async move { b.create_reservation(&one_guest(room_id, 10 * DAY)).await });
        settle().await;
        drop(held);

        assert_eq!(delete.await.unwrap(), Ok(()));
        assert!(matches!(create.await.unwrap(), Err(ApiError::NotFound(_))));
        assert!(backend.get_room_state(&room_id).is_none());
        assert!(backend.list_reservations(&ReservationFilter::default()).await.unwrap().is_empty());
        assert!(matches!(backend.delete_room(room_id).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn transition_racing_a_move_is_a_conflict() {
        let backend = Arc::new(MemoryBackend::new().with_clock(|| 0));
        let a = backend.add_room("Sol", "1", 2).id;
        let b = backend.add_room("Lua", "2", 2).id;
        let id = backend.create_reservation(&one_guest(a, 10 * DAY)).await.unwrap().id;

        let rs = backend.get_room_state(&a).unwrap();
        let held = rs.write().await;

        let mover = backend.clone();
        let update = tokio::spawn(async move {
            let patch = ReservationPatch {
                room_id: Some(b),
                ..Default::default()
            };
            mover.update_reservation(id, &patch).await
        });
        settle().await;
        let actor = backend.clone();
        let transition = tokio::spawn(async move { actor.transition_reservation(id, Action::CheckIn).await });
        settle().await;
        drop(held);

        assert_eq!(update.await.unwrap().unwrap().room_id, b);
        let err = transition.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)), "{err:?}");
        assert!(BookingError::from(err).is_retryable());

        // The operator's retry lands on the new room.
        let retried = backend.transition_reservation(id, Action::CheckIn).await.unwrap();
        assert_eq!(retried.status, ReservationStatus::CheckedIn);
        assert_eq!(retried.room_id, b);
    }

    #[tokio::test]
    async fn read_racing_a_move_follows_the_reservation() {
        let backend = Arc::new(MemoryBackend::new());
        let a = backend.add_room("Sol", "1", 2).id;
        let b = backend.add_room("Lua", "2", 2).id;
        let id = backend.create_reservation(&one_guest(a, 10 * DAY)).await.unwrap().id;

        let rs = backend.get_room_state(&a).unwrap();
        let held = rs.write().await;

        let mover = backend.clone();
        let update = tokio::spawn(async move {
            let patch = ReservationPatch {
                room_id: Some(b),
                ..Default::default()
            };
            mover.update_reservation(id, &patch).await
        });
        settle().await;
        let reader = backend.clone();
        let read = tokio::spawn(async move { reader.get_reservation(id).await });
        settle().await;
        drop(held);

        update.await.unwrap().unwrap();
        assert_eq!(read.await.unwrap().unwrap().room_id, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_signups_claim_a_username_once() {
        for _ in 0..50 {
            let backend = Arc::new(MemoryBackend::new());
            let mut handles = Vec::new();
            for i in 0..8 {
                let backend = backend.clone();
                handles.push(tokio::spawn(async move {
                    backend
                        .create_user(&NewUser {
                            name: format!("Rita {i}"),
                            username: "rita".into(),
                            password: "pw".into(),
                        })
                        .await
                }));
            }
            let mut created = 0;
            for h in handles {
                match h.await.unwrap() {
                    Ok(_) => created += 1,
                    Err(e) => assert!(matches!(e, ApiError::Conflict(_))),
                }
            }
            assert_eq!(created, 1);
            assert_eq!(backend.list_users().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn renaming_frees_the_old_username() {
        let backend = MemoryBackend::new();
        let rita = backend.add_user("Rita", "rita", "pw");
        let renamed = backend
            .update_user(
                rita.id,
                &UserPatch {
                    username: Some("rita.s".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.username, "rita.s");

        // Keeping the same name is not a clash with oneself.
        backend
            .update_user(
                rita.id,
                &UserPatch {
                    username: Some("rita.s".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let again = backend
            .create_user(&NewUser {
                name: "Other Rita".into(),
                username: "rita".into(),
                password: "pw".into(),
            })
            .await;
        assert!(again.is_ok());

        backend.delete_user(rita.id).await.unwrap();
        assert!(
            backend
                .create_user(&NewUser {
                    name: "Rita".into(),
                    username: "rita.s".into(),
                    password: "pw".into(),
                })
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn rooms_need_capacity_and_cannot_vanish_under_bookings() {
        let backend = MemoryBackend::new();
        let zero = backend
            .create_room(&RoomDraft {
                name: "Closet".into(),
                number: "0".into(),
                description: String::new(),
                capacity: 0,
                status: RoomStatus::Available,
                notes: None,
            })
            .await;
        assert!(matches!(zero, Err(ApiError::Rejected(_))));

        let room = backend.add_room("Sol", "1", 2);
        backend
            .create_reservation(&ReservationCandidate {
                room_id: room.id,
                num_guests: 1,
                check_in: 10 * DAY,
                check_out: 12 * DAY,
                guests: vec![GuestEntry::named("Ana", None, "555")],
            })
            .await
            .unwrap();
        assert!(matches!(backend.delete_room(room.id).await, Err(ApiError::Conflict(_))));

        let cleaning = backend
            .update_room(
                room.id,
                &RoomPatch {
                    status: Some(RoomStatus::Cleaning),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleaning.status, RoomStatus::Cleaning);
        let listed = backend.list_rooms(Some(RoomStatus::Cleaning)).await.unwrap();
        assert_eq!(listed, vec![cleaning]);
    }
}
