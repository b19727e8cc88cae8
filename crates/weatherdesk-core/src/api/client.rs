//! Authorized API client for the weather service.
//!
//! Every request goes through `ApiClient::send`, which attaches the session's
//! bearer token at dispatch time and tears the session down when the server
//! answers 401/403.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SessionStore;
use crate::models::{City, NewCity, NewWeather, Weather};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL of a locally running weather service
pub const DEFAULT_BASE_URL: &str = "http://localhost:8081/api";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Date-time format the service expects in query parameters
const QUERY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Build the shared HTTP client. Clone is cheap: reqwest::Client uses Arc
/// internally for connection pooling.
pub fn http_client(timeout_secs: u64) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Join the base address and an endpoint path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Percent-encode a caller-supplied value for use as one path segment.
fn path_segment(segment: &str) -> String {
    let Ok(mut url) = reqwest::Url::parse("http://localhost") else {
        return segment.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(segment);
    }
    url.path().trim_start_matches('/').to_string()
}

// ============================================================================
// Request / response
// ============================================================================

/// An outbound call, described independently of the credential it will
/// carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful response. The body is passed through untouched; `None` when
/// the server sent nothing (e.g. on DELETE).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl ApiResponse {
    /// Deserialize the body into a typed value
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let status = self.status.as_u16();
        let body = self.body.ok_or_else(|| ApiError::RequestFailed {
            status: Some(status),
            message: "Invalid response: empty body".to_string(),
        })?;
        serde_json::from_value(body).map_err(|e| ApiError::RequestFailed {
            status: Some(status),
            message: format!("Invalid response: {}", e),
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// API client for the weather service.
/// Clone is cheap: the HTTP pool and the session store are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(client: Client, base_url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request with whatever credential is current right now.
    ///
    /// Requests without a credential are still sent; the server decides.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = endpoint(&self.base_url, &request.path);
        let credential = self.session.credential();

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref token) = credential {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            url = %url,
            authenticated = credential.is_some(),
            "Sending request"
        );

        let response = builder.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed to send");
            ApiError::network(&e)
        })?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(url = %url, status = %status, "Authorization failure");
            if let Some(ref token) = credential {
                self.session.force_logout_for(token).await;
            }
            return Err(ApiError::Unauthorized);
        }

        let text = response.text().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to read response body");
            ApiError::RequestFailed {
                status: Some(status.as_u16()),
                message: format!("Failed to read response: {}", e),
            }
        })?;

        if !status.is_success() {
            let err = ApiError::from_status(status, &text);
            warn!(url = %url, status = %status, error = %err, "Request rejected");
            return Err(err);
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            let value = serde_json::from_str(&text).map_err(|e| {
                warn!(url = %url, error = %e, "Malformed response body");
                ApiError::RequestFailed {
                    status: Some(status.as_u16()),
                    message: format!("Invalid response: {}", e),
                }
            })?;
            Some(value)
        };

        Ok(ApiResponse { status, body })
    }

    async fn get<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: String,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::RequestFailed {
            status: None,
            message: format!("Failed to encode request: {}", e),
        })?;
        self.send(ApiRequest::new(method, path).with_body(body))
            .await?
            .json()
    }

    async fn delete(&self, path: String) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }

    // ===== Cities =====

    pub async fn list_cities(&self) -> Result<Vec<City>, ApiError> {
        self.get(ApiRequest::get("/cities")).await
    }

    pub async fn get_city(&self, id: i64) -> Result<City, ApiError> {
        self.get(ApiRequest::get(format!("/cities/{}", id))).await
    }

    pub async fn create_city(&self, city: &NewCity) -> Result<City, ApiError> {
        self.send_json(Method::POST, "/cities".to_string(), city).await
    }

    pub async fn update_city(&self, id: i64, city: &NewCity) -> Result<City, ApiError> {
        self.send_json(Method::PUT, format!("/cities/{}", id), city).await
    }

    pub async fn delete_city(&self, id: i64) -> Result<(), ApiError> {
        self.delete(format!("/cities/{}", id)).await
    }

    // ===== Weather =====

    pub async fn list_weather(&self) -> Result<Vec<Weather>, ApiError> {
        self.get(ApiRequest::get("/weather")).await
    }

    pub async fn weather_by_city(&self, city_id: i64) -> Result<Vec<Weather>, ApiError> {
        self.get(ApiRequest::get(format!("/weather/city/{}", city_id))).await
    }

    /// Observations for a city recorded between `start` and `end`
    pub async fn weather_by_date_range(
        &self,
        city_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Weather>, ApiError> {
        let request = ApiRequest::get("/weather/range")
            .with_query("cityId", city_id.to_string())
            .with_query("startDate", start.format(QUERY_DATE_FORMAT).to_string())
            .with_query("endDate", end.format(QUERY_DATE_FORMAT).to_string());
        self.get(request).await
    }

    pub async fn weather_by_status(&self, status: &str) -> Result<Vec<Weather>, ApiError> {
        self.get(ApiRequest::get(format!("/weather/status/{}", path_segment(status))))
            .await
    }

    pub async fn create_weather(&self, weather: &NewWeather) -> Result<Weather, ApiError> {
        self.send_json(Method::POST, "/weather".to_string(), weather).await
    }

    pub async fn update_weather(&self, id: i64, weather: &NewWeather) -> Result<Weather, ApiError> {
        self.send_json(Method::PUT, format!("/weather/{}", id), weather).await
    }

    pub async fn delete_weather(&self, id: i64) -> Result<(), ApiError> {
        self.delete(format!("/weather/{}", id)).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStorage, SessionEvent};
    use chrono::NaiveDate;
    use futures::future::join_all;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_with(server: &MockServer, storage: MemoryStorage) -> ApiClient {
        let http = Client::new();
        let store = Arc::new(SessionStore::new(http.clone(), server.uri(), Box::new(storage)));
        store.restore().await.unwrap();
        ApiClient::new(http, server.uri(), store)
    }

    fn city_json(id: i64, name: &str) -> Value {
        json!({"id": id, "name": name, "country": "Norway"})
    }

    #[test]
    fn test_endpoint_joins_slashes() {
        assert_eq!(endpoint("http://h/api", "/cities"), "http://h/api/cities");
        assert_eq!(endpoint("http://h/api/", "/cities"), "http://h/api/cities");
        assert_eq!(endpoint("http://h/api", "cities/1"), "http://h/api/cities/1");
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cities"))
            .and(header("Authorization", "Bearer tok1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([city_json(1, "Oslo")])))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        let cities = api.list_cities().await.unwrap();
        assert_eq!(cities.len(), 1);
        assert_eq!(cities[0].name, "Oslo");
    }

    #[tokio::test]
    async fn test_sends_without_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::new()).await;
        assert!(api.list_weather().await.unwrap().is_empty());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_credential_read_at_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cities/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(city_json(1, "Oslo")))
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        api.get_city(1).await.unwrap();
        api.session().logout().await;
        api.get_city(1).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            requests[0].headers.get("authorization").unwrap(),
            "Bearer tok1"
        );
        assert!(requests[1].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_forbidden_forces_logout() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/weather/4"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let storage = MemoryStorage::with_session("expired", "alice");
        let api = client_with(&server, storage.clone()).await;
        let mut events = api.session().subscribe();

        let err = api
            .send(ApiRequest::put("/weather/4", json!({"status": "Rain"})))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
        assert!(!api.session().is_authenticated());
        assert!(storage.snapshot().is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ForcedLogout { show_login: true }
        );
    }

    #[tokio::test]
    async fn test_concurrent_forbidden_tears_down_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cities"))
            .respond_with(ResponseTemplate::new(403))
            .expect(5)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("expired", "alice")).await;
        let mut events = api.session().subscribe();

        let results = join_all((0..5).map(|_| api.list_cities())).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ApiError::Unauthorized))));

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ForcedLogout { show_login: true }
        );
        assert!(events.try_recv().is_err());
        assert!(!api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_unauthorized_without_session_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cities"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::new()).await;
        let mut events = api.session().subscribe();

        assert_eq!(api.list_cities().await.unwrap_err(), ApiError::Unauthorized);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_error_keeps_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"message": "database unavailable"})),
            )
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        let err = api.list_weather().await.unwrap_err();
        assert_eq!(
            err,
            ApiError::RequestFailed {
                status: Some(500),
                message: "database unavailable".to_string()
            }
        );
        assert!(api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_not_found_keeps_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cities/99"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        let err = api.get_city(99).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_malformed_body_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cities"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::new()).await;
        match api.list_cities().await.unwrap_err() {
            ApiError::RequestFailed { status, message } => {
                assert_eq!(status, Some(200));
                assert!(message.starts_with("Invalid response"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let http = Client::new();
        let store = Arc::new(SessionStore::new(
            http.clone(),
            "http://127.0.0.1:9",
            Box::new(MemoryStorage::with_session("tok1", "alice")),
        ));
        store.restore().await.unwrap();
        let api = ApiClient::new(http, "http://127.0.0.1:9", store);

        match api.list_cities().await.unwrap_err() {
            ApiError::RequestFailed { status, .. } => assert_eq!(status, None),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(api.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_delete_with_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/cities/3"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        api.delete_city(3).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_city_sends_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cities"))
            .and(wiremock::matchers::body_json(json!({"name": "Oslo", "country": "Norway"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(city_json(5, "Oslo")))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        let city = api.create_city(&NewCity::new("Oslo", "Norway")).await.unwrap();
        assert_eq!(city.id, 5);
    }

    #[tokio::test]
    async fn test_weather_status_is_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/status/rain%2Fsnow%3F"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        let records = api.weather_by_status("rain/snow?").await.unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_path_segment_encoding() {
        assert_eq!(path_segment("SUNNY"), "SUNNY");
        assert_eq!(path_segment("light rain"), "light%20rain");
        assert_eq!(path_segment("a/b#c"), "a%2Fb%23c");
    }

    #[tokio::test]
    async fn test_weather_range_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/range"))
            .and(query_param("cityId", "2"))
            .and(query_param("startDate", "2024-05-01T00:00:00"))
            .and(query_param("endDate", "2024-05-31T23:59:59"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let api = client_with(&server, MemoryStorage::with_session("tok1", "alice")).await;
        let day = |d, h, m, s| {
            NaiveDate::from_ymd_opt(2024, 5, d)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap()
        };
        let records = api
            .weather_by_date_range(2, day(1, 0, 0, 0), day(31, 23, 59, 59))
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
