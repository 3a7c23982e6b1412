//! Typed client for the aviation REST API.
//!
//! Mirrors the functions the map front end calls. Session cookies are kept in
//! the client's cookie store, and a bearer token is attached when one is set
//! (explicitly or by a successful login).

use parking_lot::RwLock;
use reqwest::{multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::api::airports::ImportResult;
use crate::api::error::ErrorResponse;
use crate::db::{
    Airport, AirportQuery, DataResponse, LoginRequest, LoginResponse, PagedResponse,
    RegisterRequest, UpdateAirport, UserResponse,
};
use crate::weather::{normalize_icaos, Metar};

pub type Page<T> = PagedResponse<T>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with an error envelope
    #[error("server returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            ClientError::Decode(_) => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Raw profile picture with the server's content type
#[derive(Debug, Clone)]
pub struct Picture {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub struct ApiClient {
    base_url: String,
    http: Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("aviation/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(None),
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match self.token.read().as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and turn non-success statuses into `ClientError::Api`.
    async fn send(&self, builder: RequestBuilder) -> ClientResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(envelope) => ClientError::Api {
                status: status.as_u16(),
                code: envelope.error.code,
                message: envelope.error.message,
            },
            Err(_) => ClientError::Api {
                status: status.as_u16(),
                code: status
                    .canonical_reason()
                    .unwrap_or("error")
                    .to_lowercase()
                    .replace(' ', "_"),
                message: body,
            },
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Ok(Self::decode::<DataResponse<T>>(response).await?.data)
    }

    async fn send_data<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<T> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.send(builder).await?;
        Ok(Self::decode::<DataResponse<T>>(response).await?.data)
    }

    async fn send_empty(&self, method: Method, path: &str) -> ClientResult<()> {
        self.send(self.request(method, path)).await?;
        Ok(())
    }

    /// GET /health
    pub async fn health(&self) -> ClientResult<String> {
        let response = self.send(self.http.get(format!("{}/health", self.base_url))).await?;
        Ok(response.text().await?)
    }

    // Airports

    pub async fn airports(&self, query: &AirportQuery) -> ClientResult<Page<Airport>> {
        let response = self
            .send(self.request(Method::GET, "/airports").query(query))
            .await?;
        Self::decode(response).await
    }

    pub async fn airport(&self, icao: &str, metars: bool) -> ClientResult<Airport> {
        let mut path = format!("/airports/{}", icao.trim().to_uppercase());
        if metars {
            path.push_str("?metars=true");
        }
        self.get_data(&path).await
    }

    pub async fn create_airport(&self, airport: &Airport) -> ClientResult<Airport> {
        self.send_data(Method::POST, "/airports", Some(airport)).await
    }

    pub async fn update_airport(&self, icao: &str, changes: &UpdateAirport) -> ClientResult<Airport> {
        let path = format!("/airports/{}", icao.trim().to_uppercase());
        self.send_data(Method::PUT, &path, Some(changes)).await
    }

    pub async fn delete_airport(&self, icao: &str) -> ClientResult<()> {
        let path = format!("/airports/{}", icao.trim().to_uppercase());
        self.send_empty(Method::DELETE, &path).await
    }

    pub async fn delete_airports(&self) -> ClientResult<()> {
        self.send_empty(Method::DELETE, "/airports").await
    }

    /// Returns how many airports were stored.
    pub async fn import_airports(&self, airports: &[Airport]) -> ClientResult<u64> {
        let result: ImportResult = self
            .send_data(Method::POST, "/airports/import", Some(airports))
            .await?;
        Ok(result.imported)
    }

    /// Upload a JSON file of airports as multipart form data.
    pub async fn import_airports_file(&self, file_name: &str, contents: Vec<u8>) -> ClientResult<u64> {
        let part = multipart::Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/json")?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .send(self.request(Method::POST, "/airports/import").multipart(form))
            .await?;
        let result: DataResponse<ImportResult> = Self::decode(response).await?;
        Ok(result.data.imported)
    }

    // Observations

    /// Latest METARs for the given stations. An empty list makes no request.
    pub async fn metars<S: AsRef<str>>(&self, icaos: &[S]) -> ClientResult<Vec<Metar>> {
        let icaos = normalize_icaos(icaos);
        if icaos.is_empty() {
            return Ok(Vec::new());
        }
        self.get_data(&format!("/metars/{}", icaos.join(","))).await
    }

    // Session

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .send(self.request(Method::POST, "/auth/login").json(&request))
            .await?;
        let login: LoginResponse = Self::decode(response).await?;
        *self.token.write() = Some(login.token.clone());
        Ok(login)
    }

    pub async fn register(&self, request: &RegisterRequest) -> ClientResult<UserResponse> {
        self.send_data(Method::POST, "/auth/register", Some(request))
            .await
    }

    pub async fn logout(&self) -> ClientResult<()> {
        self.send_empty(Method::POST, "/auth/logout").await?;
        *self.token.write() = None;
        Ok(())
    }

    pub async fn refresh(&self) -> ClientResult<LoginResponse> {
        let response = self.send(self.request(Method::GET, "/auth/refresh")).await?;
        Self::decode(response).await
    }

    pub async fn me(&self) -> ClientResult<UserResponse> {
        self.get_data("/auth/me").await
    }

    // User data

    pub async fn favorites(&self) -> ClientResult<Vec<String>> {
        self.get_data("/users/favorites").await
    }

    pub async fn add_favorite(&self, icao: &str) -> ClientResult<Vec<String>> {
        let path = format!("/users/favorites/{}", icao.trim().to_uppercase());
        self.send_data::<(), _>(Method::POST, &path, None).await
    }

    pub async fn remove_favorite(&self, icao: &str) -> ClientResult<Vec<String>> {
        let path = format!("/users/favorites/{}", icao.trim().to_uppercase());
        self.send_data::<(), _>(Method::DELETE, &path, None).await
    }

    pub async fn set_picture(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<UserResponse> {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.as_ref())?;
        let form = multipart::Form::new().part("picture", part);

        let response = self
            .send(self.request(Method::POST, "/users/picture").multipart(form))
            .await?;
        let user: DataResponse<UserResponse> = Self::decode(response).await?;
        Ok(user.data)
    }

    /// The current user's picture, or `None` when they have not set one.
    pub async fn picture(&self) -> ClientResult<Option<Picture>> {
        let response = match self.send(self.request(Method::GET, "/users/picture")).await {
            Ok(response) => response,
            Err(ClientError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        Ok(Some(Picture {
            content_type,
            bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::hash_password;
    use crate::config::Config;
    use crate::db::{sample_airport, test_pool, User, ROLE_ADMIN};
    use crate::weather::service::tests::{report, FakeSource};
    use crate::AppState;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct TestServer {
        url: String,
        state: Arc<AppState>,
        _dir: TempDir,
    }

    async fn spawn_server(source: FakeSource) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        let state = Arc::new(AppState::new(config, test_pool().await, Arc::new(source)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::api::create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        TestServer {
            url: format!("http://{}", addr),
            state,
            _dir: dir,
        }
    }

    async fn create_admin(state: &AppState) {
        let hash = hash_password("admin-password").unwrap();
        User::create(&state.db, "admin@example.com", &hash, "Admin", "", ROLE_ADMIN)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_and_favorites() {
        let server = spawn_server(FakeSource::default()).await;
        Airport::create(&server.state.db, &sample_airport("KIAD", 38.94, -77.46))
            .await
            .unwrap();
        let client = ApiClient::new(&server.url).unwrap();

        assert_eq!(client.health().await.unwrap(), "OK");

        let user = client
            .register(&RegisterRequest {
                email: "pilot@example.com".to_string(),
                password: "long-enough".to_string(),
                first_name: "Amelia".to_string(),
                last_name: "Earhart".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(user.email, "pilot@example.com");

        let err = client.me().await.unwrap_err();
        assert_eq!(err.status(), Some(401));

        let login = client.login("pilot@example.com", "long-enough").await.unwrap();
        assert_eq!(client.token().as_deref(), Some(login.token.as_str()));
        assert_eq!(client.me().await.unwrap().first_name, "Amelia");

        assert_eq!(client.add_favorite("kiad").await.unwrap(), vec!["KIAD"]);
        match client.add_favorite("KIAD").await.unwrap_err() {
            ClientError::Api { status, code, .. } => {
                assert_eq!(status, 409);
                assert_eq!(code, "conflict");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(client.favorites().await.unwrap(), vec!["KIAD"]);
        assert!(client.remove_favorite("KIAD").await.unwrap().is_empty());

        assert!(client.picture().await.unwrap().is_none());
        let user = client
            .set_picture("avatar.png", b"\x89PNG\r\n\x1a\n".to_vec())
            .await
            .unwrap();
        assert_eq!(user.profile_picture.as_deref(), Some("picture.png"));
        let picture = client.picture().await.unwrap().unwrap();
        assert_eq!(picture.content_type.as_deref(), Some("image/png"));

        let refreshed = client.refresh().await.unwrap();
        assert_eq!(refreshed.token, login.token);

        client.logout().await.unwrap();
        assert!(client.token().is_none());
        assert_eq!(client.me().await.unwrap_err().status(), Some(401));
    }

    #[tokio::test]
    async fn test_airport_management() {
        let server = spawn_server(FakeSource::with_reports(&[(
            "KIAD",
            report("KIAD", 5, "21016KT 10SM FEW250 18/06 A3002"),
        )]))
        .await;
        create_admin(&server.state).await;
        let client = ApiClient::new(&server.url).unwrap();
        client.login("admin@example.com", "admin-password").await.unwrap();

        let created = client
            .create_airport(&sample_airport("KIAD", 38.94, -77.46))
            .await
            .unwrap();
        assert_eq!(created.icao, "KIAD");

        let imported = client
            .import_airports(&[
                sample_airport("KDCA", 38.85, -77.04),
                sample_airport("KBWI", 39.18, -76.67),
            ])
            .await
            .unwrap();
        assert_eq!(imported, 2);

        let file = serde_json::to_vec(&[sample_airport("KJYO", 39.08, -77.56)]).unwrap();
        assert_eq!(
            client.import_airports_file("more.json", file).await.unwrap(),
            1
        );

        let page = client
            .airports(&AirportQuery {
                bounds: Some("40,-76,38,-78".to_string()),
                limit: Some(2),
                ..AirportQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.meta.total, 4);
        assert_eq!(page.data.len(), 2);

        let kiad = client.airport("kiad", true).await.unwrap();
        assert_eq!(kiad.latest_metar.unwrap().station_id, "KIAD");

        let updated = client
            .update_airport(
                "KIAD",
                &UpdateAirport {
                    name: Some("Washington Dulles".to_string()),
                    ..UpdateAirport::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Washington Dulles");

        client.delete_airport("KIAD").await.unwrap();
        assert_eq!(
            client.airport("KIAD", false).await.unwrap_err().status(),
            Some(404)
        );

        client.delete_airports().await.unwrap();
        let page = client.airports(&AirportQuery::default()).await.unwrap();
        assert_eq!(page.meta.total, 0);
    }

    #[tokio::test]
    async fn test_metars() {
        let source = FakeSource::with_reports(&[(
            "KIAD",
            report("KIAD", 5, "21016KT 10SM FEW250 18/06 A3002"),
        )]);
        let server = spawn_server(source).await;
        let client = ApiClient::new(format!("{}/", server.url)).unwrap();

        let metars = client.metars(&["kiad", "KJYO"]).await.unwrap();
        assert_eq!(metars.len(), 1);
        assert_eq!(metars[0].station_id, "KIAD");

        let none: Vec<&str> = Vec::new();
        assert!(client.metars(&none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_metar_request_skips_network() {
        // Nothing listens here, so any request would fail
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.metars(&["", "  "]).await.unwrap().is_empty());
        assert!(matches!(
            client.health().await.unwrap_err(),
            ClientError::Transport(_)
        ));
    }
}
