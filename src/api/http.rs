use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::*;
use crate::observability::{status_label, API_REQUESTS_TOTAL, API_REQUEST_DURATION_SECONDS, SESSION_REFRESH_TOTAL};

use super::{AdminBackend, ApiError, AuthBackend, BookingBackend};

/// REST client for the console API. Authentication rides on cookies set by
/// `/auth/login`; an expired session is refreshed once per request.
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

fn instant_param(t: Ms) -> Result<String, ApiError> {
    format_instant(t).ok_or_else(|| ApiError::Rejected(format!("instant out of range: {t}")))
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(&config.api_url, config.timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send once, recording latency and status.
    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = request.build()?;
        let method = request.method().to_string();
        debug!("{method} {}", request.url());

        let start = Instant::now();
        let result = self.http.execute(request).await;
        metrics::histogram!(API_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            warn!("{method} failed: {e}");
            ApiError::Transport(e.to_string())
        })?;
        metrics::counter!(API_REQUESTS_TOTAL, "method" => method, "status" => status_label(response.status().as_u16()))
            .increment(1);
        Ok(response)
    }

    /// Send, and on a 401 refresh the session and replay the request once.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let replay = request.try_clone();
        let response = self.dispatch(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(replay) = replay else {
            return Ok(response);
        };
        self.refresh().await?;
        self.dispatch(replay).await
    }

    async fn refresh(&self) -> Result<(), ApiError> {
        let response = self.dispatch(self.http.post(self.url("/auth/refresh"))).await?;
        if response.status().is_success() {
            debug!("session refreshed");
            metrics::counter!(SESSION_REFRESH_TOTAL, "outcome" => "ok").increment(1);
            Ok(())
        } else {
            warn!("session refresh failed: HTTP {}", response.status());
            metrics::counter!(SESSION_REFRESH_TOTAL, "outcome" => "failed").increment(1);
            Err(ApiError::Unauthorized)
        }
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Transport(format!("unexpected payload: {e}")))
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), &body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        Self::read(self.execute(self.http.get(self.url(path))).await?).await
    }
}

#[async_trait]
impl BookingBackend for HttpBackend {
    async fn get_room(&self, id: RoomId) -> Result<Room, ApiError> {
        self.get(&format!("/rooms/{id}")).await
    }

    async fn list_available_rooms(&self, check_in: Ms, check_out: Ms) -> Result<Vec<Room>, ApiError> {
        let query = [("checkIn", instant_param(check_in)?), ("checkOut", instant_param(check_out)?)];
        let request = self.http.get(self.url("/rooms/available")).query(&query);
        Self::read(self.execute(request).await?).await
    }

    async fn create_reservation(&self, candidate: &ReservationCandidate) -> Result<Reservation, ApiError> {
        let request = self.http.post(self.url("/reservations")).json(candidate);
        Self::read(self.execute(request).await?).await
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> Result<Reservation, ApiError> {
        let request = self.http.put(self.url(&format!("/reservations/{id}"))).json(patch);
        Self::read(self.execute(request).await?).await
    }

    async fn transition_reservation(&self, id: ReservationId, action: Action) -> Result<Reservation, ApiError> {
        let request = self
            .http
            .patch(self.url(&format!("/reservations/{id}/{}", action.as_str())));
        Self::read(self.execute(request).await?).await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, ApiError> {
        self.get(&format!("/reservations/{id}")).await
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, ApiError> {
        let request = self.http.get(self.url("/reservations")).query(filter);
        Self::read(self.execute(request).await?).await
    }
}

#[async_trait]
impl AdminBackend for HttpBackend {
    async fn list_rooms(&self, status: Option<RoomStatus>) -> Result<Vec<Room>, ApiError> {
        let mut request = self.http.get(self.url("/rooms"));
        if let Some(status) = status {
            request = request.query(&[("status", status)]);
        }
        Self::read(self.execute(request).await?).await
    }

    async fn create_room(&self, draft: &RoomDraft) -> Result<Room, ApiError> {
        let request = self.http.post(self.url("/rooms")).json(draft);
        Self::read(self.execute(request).await?).await
    }

    async fn update_room(&self, id: RoomId, patch: &RoomPatch) -> Result<Room, ApiError> {
        let request = self.http.put(self.url(&format!("/rooms/{id}"))).json(patch);
        Self::read(self.execute(request).await?).await
    }

    async fn delete_room(&self, id: RoomId) -> Result<(), ApiError> {
        let request = self.http.delete(self.url(&format!("/rooms/{id}")));
        Self::check(self.execute(request).await?).await.map(|_| ())
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/users").await
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        let request = self.http.post(self.url("/users")).json(user);
        Self::read(self.execute(request).await?).await
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, ApiError> {
        let request = self.http.put(self.url(&format!("/users/{id}"))).json(patch);
        Self::read(self.execute(request).await?).await
    }

    async fn delete_user(&self, id: UserId) -> Result<(), ApiError> {
        let request = self.http.delete(self.url(&format!("/users/{id}")));
        Self::check(self.execute(request).await?).await.map(|_| ())
    }

    async fn list_guests(&self) -> Result<Vec<Guest>, ApiError> {
        self.get("/guests").await
    }

    async fn create_guest(&self, guest: &NewGuest) -> Result<Guest, ApiError> {
        let request = self.http.post(self.url("/guests")).json(guest);
        Self::read(self.execute(request).await?).await
    }
}

/// Auth endpoints bypass the refresh-and-replay path: a 401 here means bad
/// credentials, not an expired session.
#[async_trait]
impl AuthBackend for HttpBackend {
    async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        let request = self.http.post(self.url("/auth/login")).json(credentials);
        Self::read(self.dispatch(request).await?).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let request = self.http.post(self.url("/auth/logout"));
        Self::check(self.dispatch(request).await?).await.map(|_| ())
    }

    async fn auth_status(&self) -> Result<AuthStatus, ApiError> {
        Self::read(self.dispatch(self.http.get(self.url("/auth/status"))).await?).await
    }
}
