use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type RoomId = i64;
pub type ReservationId = i64;
pub type UserId = i64;
pub type GuestId = i64;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Render an instant the way the API expects it: ISO-8601, UTC, millisecond precision.
pub fn format_instant(t: Ms) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(t).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_instant(s: &str) -> Option<Ms> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Serde adapter: `Ms` on our side, ISO-8601 string on the wire.
pub mod iso {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_instant, parse_instant, Ms};

    pub fn serialize<S: Serializer>(t: &Ms, s: S) -> Result<S::Ok, S::Error> {
        let text = format_instant(*t)
            .ok_or_else(|| serde::ser::Error::custom(format!("instant out of range: {t}")))?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Ms, D::Error> {
        let text = String::deserialize(d)?;
        parse_instant(&text).ok_or_else(|| de::Error::custom(format!("invalid instant: {text}")))
    }

    pub mod option {
        use serde::{de, Deserialize, Deserializer, Serializer};

        use super::super::{parse_instant, Ms};

        pub fn serialize<S: Serializer>(t: &Option<Ms>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => super::serialize(t, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Ms>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(text) if text.is_empty() => Ok(None),
                Some(text) => parse_instant(&text)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid instant: {text}"))),
            }
        }
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    #[default]
    Available,
    Cleaning,
    RepairsNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
    pub status: RoomStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDraft {
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ── Guests ───────────────────────────────────────────────────────

/// One guest line of a reservation form. Either links an existing guest
/// (`guest_id`) or carries the guest's details inline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<GuestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_contact: Option<String>,
}

impl GuestEntry {
    pub fn named(name: &str, cpf: Option<&str>, contact_phone: &str) -> Self {
        Self {
            guest_id: None,
            name: Some(name.to_string()),
            cpf: cpf.map(str::to_string),
            contact_phone: Some(contact_phone.to_string()),
            support_contact: None,
        }
    }

    /// The CPF as a uniqueness key. An empty CPF counts as absent.
    pub fn cpf_key(&self) -> Option<&str> {
        self.cpf.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: GuestId,
    pub name: String,
    pub cpf: String,
    pub contact_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGuest {
    pub name: String,
    pub cpf: String,
    pub contact_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationGuest {
    pub id: i64,
    #[serde(default)]
    pub reservation_id: ReservationId,
    #[serde(flatten)]
    pub entry: GuestEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<Guest>,
}

impl ReservationGuest {
    /// Display name, falling back to the linked guest record.
    pub fn display_name(&self) -> Option<&str> {
        self.entry
            .name
            .as_deref()
            .or_else(|| self.guest.as_ref().map(|g| g.name.as_str()))
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
    CheckedIn,
    CheckedOut,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::CheckedIn => "CHECKED_IN",
            ReservationStatus::CheckedOut => "CHECKED_OUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::CheckedOut)
    }

    /// Whether a reservation in this status keeps its room occupied.
    pub fn holds_room(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::CheckedIn)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-initiated lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    CheckIn,
    CheckOut,
    Cancel,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::CheckIn, Action::CheckOut, Action::Cancel];

    /// Path segment on `/reservations/{id}/...`; also the metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CheckIn => "check-in",
            Action::CheckOut => "check-out",
            Action::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub room: Room,
    pub num_guests: u32,
    #[serde(with = "iso")]
    pub check_in: Ms,
    #[serde(with = "iso")]
    pub check_out: Ms,
    pub status: ReservationStatus,
    #[serde(default)]
    pub guests: Vec<ReservationGuest>,
}

impl Reservation {
    /// The stay as a half-open interval, if the stored dates are ordered.
    pub fn stay(&self) -> Option<Span> {
        Span::checked(self.check_in, self.check_out)
    }
}

/// A reservation as submitted by the operator, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCandidate {
    pub room_id: RoomId,
    pub num_guests: u32,
    #[serde(with = "iso")]
    pub check_in: Ms,
    #[serde(with = "iso")]
    pub check_out: Ms,
    pub guests: Vec<GuestEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_guests: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "iso::option")]
    pub check_in: Option<Ms>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "iso::option")]
    pub check_out: Option<Ms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guests: Option<Vec<GuestEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFilter {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "iso::option")]
    pub start_date: Option<Ms>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "iso::option")]
    pub end_date: Option<Ms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReservationStatus>,
}

impl ReservationFilter {
    /// Date bounds select reservations whose stay overlaps the window.
    pub fn matches(&self, r: &Reservation) -> bool {
        if self.room_id.is_some_and(|id| id != r.room_id) {
            return false;
        }
        if self.status.is_some_and(|s| s != r.status) {
            return false;
        }
        if self.start_date.is_some_and(|start| r.check_out <= start) {
            return false;
        }
        if self.end_date.is_some_and(|end| r.check_in >= end) {
            return false;
        }
        true
    }
}

// ── Users & auth ─────────────────────────────────────────────────

/// Staff account. The password is write-only and never comes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(default)]
    pub user: Option<User>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Ms = 86_400_000;

    fn room() -> Room {
        Room {
            id: 7,
            name: "Suite Mar".into(),
            number: "101".into(),
            description: String::new(),
            capacity: 2,
            status: RoomStatus::Available,
            notes: None,
        }
    }

    fn reservation(check_in: Ms, check_out: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: 1,
            room_id: 7,
            room: room(),
            num_guests: 1,
            check_in,
            check_out,
            status,
            guests: vec![],
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert_eq!(a.duration_ms(), 100);
    }

    #[test]
    fn span_duration_saturates() {
        let widest = Span::new(Ms::MIN, Ms::MAX);
        assert_eq!(widest.duration_ms(), Ms::MAX);
    }

    #[test]
    fn span_checked_rejects_empty_and_reversed() {
        assert!(Span::checked(100, 100).is_none());
        assert!(Span::checked(200, 100).is_none());
        assert_eq!(Span::checked(100, 200), Some(Span::new(100, 200)));
    }

    #[test]
    fn instant_formatting_matches_iso_with_millis() {
        let t = parse_instant("2024-06-01").unwrap();
        assert_eq!(format_instant(t).unwrap(), "2024-06-01T00:00:00.000Z");
        assert_eq!(parse_instant("2024-06-01T00:00:00.000Z"), Some(t));
        assert_eq!(parse_instant("2024-06-01T03:00:00+03:00"), Some(t));
        assert_eq!(parse_instant("June 1st"), None);
    }

    #[test]
    fn empty_cpf_is_not_a_key() {
        let mut g = GuestEntry::named("Ana", Some(""), "555");
        assert_eq!(g.cpf_key(), None);
        g.cpf = Some("12345678901".into());
        assert_eq!(g.cpf_key(), Some("12345678901"));
        g.cpf = None;
        assert_eq!(g.cpf_key(), None);
    }

    #[test]
    fn reservation_decodes_api_payload() {
        let body = r#"{
            "id": 3,
            "roomId": 7,
            "room": {"id": 7, "name": "Suite Mar", "number": "101", "description": "",
                     "capacity": 2, "status": "AVAILABLE"},
            "numGuests": 1,
            "checkIn": "2024-06-01T00:00:00.000Z",
            "checkOut": "2024-06-03T00:00:00.000Z",
            "status": "CHECKED_IN",
            "guests": [{"id": 9, "reservationId": 3, "name": "Ana", "cpf": "12345678901",
                        "contactPhone": "555"}]
        }"#;
        let r: Reservation = serde_json::from_str(body).unwrap();
        assert_eq!(r.status, ReservationStatus::CheckedIn);
        assert_eq!(r.stay().unwrap().duration_ms(), 2 * DAY);
        assert_eq!(r.guests[0].entry.cpf_key(), Some("12345678901"));
        assert_eq!(r.guests[0].display_name(), Some("Ana"));
    }

    #[test]
    fn candidate_encodes_camel_case_iso() {
        let c = ReservationCandidate {
            room_id: 7,
            num_guests: 1,
            check_in: parse_instant("2024-06-01").unwrap(),
            check_out: parse_instant("2024-06-03").unwrap(),
            guests: vec![GuestEntry::named("Ana", None, "555")],
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["roomId"], 7);
        assert_eq!(v["checkIn"], "2024-06-01T00:00:00.000Z");
        assert!(v["guests"][0].get("cpf").is_none());
    }

    #[test]
    fn user_never_carries_password() {
        let u: User =
            serde_json::from_str(r#"{"id":1,"name":"Rita","username":"rita","password":"x"}"#).unwrap();
        let v = serde_json::to_value(&u).unwrap();
        assert!(v.get("password").is_none());
    }

    #[test]
    fn filter_selects_overlapping_stays() {
        let r = reservation(10 * DAY, 12 * DAY, ReservationStatus::Confirmed);
        let window = |start, end| ReservationFilter {
            start_date: Some(start),
            end_date: Some(end),
            ..Default::default()
        };
        assert!(window(11 * DAY, 20 * DAY).matches(&r));
        assert!(!window(12 * DAY, 20 * DAY).matches(&r)); // checkout day is free
        assert!(!window(0, 10 * DAY).matches(&r));
        assert!(ReservationFilter::default().matches(&r));

        let by_status = ReservationFilter {
            status: Some(ReservationStatus::Cancelled),
            ..Default::default()
        };
        assert!(!by_status.matches(&r));
        let by_room = ReservationFilter {
            room_id: Some(8),
            ..Default::default()
        };
        assert!(!by_room.matches(&r));
    }

    #[test]
    fn status_helpers() {
        assert!(ReservationStatus::Confirmed.holds_room());
        assert!(ReservationStatus::CheckedIn.holds_room());
        assert!(!ReservationStatus::Cancelled.holds_room());
        assert!(ReservationStatus::CheckedOut.is_terminal());
        assert!(!ReservationStatus::CheckedIn.is_terminal());
        assert_eq!(Action::CheckOut.to_string(), "check-out");
    }
}
