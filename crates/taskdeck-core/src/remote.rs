use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendResult};
use crate::config::Config;
use crate::datastore::{SessionFile, normalize_email};
use crate::error::BackendError;
use crate::task::{Category, Profile, Session, Task, TaskDraft, TaskPatch};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub anon_key: String,
    pub timeout: Duration,
}

impl RemoteSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = cfg
            .get("remote.url")
            .ok_or_else(|| anyhow!("backend=remote requires remote.url"))?;
        let anon_key = cfg
            .get("remote.anon_key")
            .ok_or_else(|| anyhow!("backend=remote requires remote.anon_key"))?;
        let timeout_secs = match cfg.get("remote.timeout_secs") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid remote.timeout_secs: {raw}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Hosted backend: PostgREST tables under `/rest/v1`, auth under `/auth/v1`.
#[derive(Debug)]
pub struct RemoteBackend {
    client: reqwest::Client,
    settings: RemoteSettings,
    session: SessionFile,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    user: Option<AuthUser>,
}

#[derive(Debug, Serialize)]
struct ProfileRow<'a> {
    id: Uuid,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
}

impl RemoteBackend {
    pub fn new(settings: RemoteSettings, data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed building HTTP client for remote backend")?;

        Ok(Self {
            client,
            settings,
            session: SessionFile::new(data_dir.join("session.data")),
            token: RwLock::new(None),
        })
    }

    fn rest_url(&self, table: &str, query: &str) -> String {
        rest_url(&self.settings.base_url, table, query)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self
            .token
            .read()
            .clone()
            .unwrap_or_else(|| self.settings.anon_key.clone());
        self.client
            .request(method, url)
            .header("apikey", &self.settings.anon_key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {bearer}"))
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "remote request failed");
        Err(error_for_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BackendResult<T> {
        let response = self.send(request).await?;
        Ok(response.json::<T>().await?)
    }

    /// PATCH/DELETE with `return=representation`; zero affected rows means
    /// the target is gone.
    async fn mutate_rows(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        what: String,
    ) -> BackendResult<()> {
        let mut request = self
            .request(method, url)
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let rows: Vec<serde_json::Value> = self.send_json(request).await?;
        if rows.is_empty() {
            return Err(BackendError::NotFound(what));
        }
        Ok(())
    }

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Profile> {
        let url = self.rest_url(
            "profiles",
            &format!("select=first_name,last_name&id=eq.{user_id}"),
        );
        let rows: Vec<Profile> = self.send_json(self.request(Method::GET, &url)).await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    fn remember(&self, session: &Session) -> BackendResult<()> {
        *self.token.write() = session.access_token.clone();
        self.session.save(session)?;
        Ok(())
    }
}

impl Backend for RemoteBackend {
    #[tracing::instrument(skip(self))]
    async fn fetch_tasks(&self, owner: Uuid) -> BackendResult<Vec<Task>> {
        let url = self.rest_url(
            "tasks",
            &format!("select=*&user_id=eq.{owner}&order=position.asc,created_at.asc"),
        );
        let tasks: Vec<Task> = self.send_json(self.request(Method::GET, &url)).await?;
        debug!(count = tasks.len(), "fetched tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, draft), fields(owner = %draft.user_id))]
    async fn create_task(&self, draft: TaskDraft) -> BackendResult<Task> {
        let url = self.rest_url("tasks", "");
        let request = self
            .request(Method::POST, &url)
            .header("Prefer", "return=representation")
            .json(&draft);
        let rows: Vec<Task> = self.send_json(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Remote("insert returned no row".to_string()))
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> BackendResult<()> {
        let url = self.rest_url("tasks", &format!("id=eq.{id}"));
        let body = serde_json::to_value(patch)?;
        self.mutate_rows(Method::PATCH, &url, Some(body), format!("task {id}"))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_task(&self, id: Uuid) -> BackendResult<()> {
        let url = self.rest_url("tasks", &format!("id=eq.{id}"));
        self.mutate_rows(Method::DELETE, &url, None, format!("task {id}"))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn set_task_position(
        &self,
        id: Uuid,
        owner: Uuid,
        position: i64,
    ) -> BackendResult<()> {
        let url = self.rest_url("tasks", &format!("id=eq.{id}&user_id=eq.{owner}"));
        self.mutate_rows(
            Method::PATCH,
            &url,
            Some(json!({ "position": position })),
            format!("task {id} for owner {owner}"),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_categories(&self, owner: Uuid) -> BackendResult<Vec<Category>> {
        let url = self.rest_url(
            "categories",
            &format!("select=*&user_id=eq.{owner}&order=created_at.asc"),
        );
        self.send_json(self.request(Method::GET, &url)).await
    }

    #[tracing::instrument(skip(self))]
    async fn create_category(&self, owner: Uuid, name: &str) -> BackendResult<Category> {
        let url = self.rest_url("categories", "");
        let request = self
            .request(Method::POST, &url)
            .header("Prefer", "return=representation")
            .json(&json!({ "name": name, "user_id": owner }));
        let rows: Vec<Category> = self.send_json(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Remote("insert returned no row".to_string()))
    }

    #[tracing::instrument(skip(self, password))]
    async fn authenticate(&self, email: &str, password: &str) -> BackendResult<Session> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.settings.base_url);
        let email = normalize_email(email);
        let request = self
            .request(Method::POST, &url)
            .json(&json!({ "email": email, "password": password }));
        let auth: AuthResponse = self.send_json(request).await?;
        let mut session = session_from_auth(auth, &email)?;

        *self.token.write() = session.access_token.clone();
        session.profile = self.fetch_profile(session.user_id).await?;
        self.remember(&session)?;
        info!(user = %session.user_id, "signed in");
        Ok(session)
    }

    #[tracing::instrument(skip(self, password, profile))]
    async fn register(
        &self,
        email: &str,
        password: &str,
        profile: &Profile,
    ) -> BackendResult<Session> {
        let url = format!("{}/auth/v1/signup", self.settings.base_url);
        let email = normalize_email(email);
        let request = self
            .request(Method::POST, &url)
            .json(&json!({ "email": email, "password": password }));
        let auth: AuthResponse = self.send_json(request).await?;
        let mut session = session_from_auth(auth, &email)?;
        *self.token.write() = session.access_token.clone();

        let row = ProfileRow {
            id: session.user_id,
            first_name: profile.first_name.as_deref(),
            last_name: profile.last_name.as_deref(),
        };
        let url = self.rest_url("profiles", "");
        self.send(self.request(Method::POST, &url).json(&row)).await?;

        session.profile = profile.clone();
        self.remember(&session)?;
        info!(user = %session.user_id, "registered account");
        Ok(session)
    }

    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    async fn sign_out(&self, session: &Session) -> BackendResult<()> {
        if session.access_token.is_some() {
            let url = format!("{}/auth/v1/logout", self.settings.base_url);
            if let Err(err) = self.send(self.request(Method::POST, &url)).await {
                warn!(error = %err, "remote logout failed; clearing local session anyway");
            }
        }
        *self.token.write() = None;
        self.session.clear()?;
        Ok(())
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        let session = self.session.load()?;
        if let Some(session) = &session {
            *self.token.write() = session.access_token.clone();
        }
        Ok(session)
    }
}

fn rest_url(base: &str, table: &str, query: &str) -> String {
    if query.is_empty() {
        format!("{base}/rest/v1/{table}")
    } else {
        format!("{base}/rest/v1/{table}?{query}")
    }
}

fn session_from_auth(auth: AuthResponse, email: &str) -> BackendResult<Session> {
    let user = auth
        .user
        .ok_or_else(|| BackendError::Auth("auth response carried no user".to_string()))?;
    let access_token = auth.access_token.ok_or_else(|| {
        BackendError::Auth("no session issued; confirm the email address first".to_string())
    })?;
    Ok(Session {
        user_id: user.id,
        email: user.email.unwrap_or_else(|| email.to_string()),
        access_token: Some(access_token),
        profile: Profile::default(),
    })
}

fn error_for_status(status: StatusCode, body: &str) -> BackendError {
    let detail = extract_message(body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth(detail),
        StatusCode::BAD_REQUEST if body.contains("invalid_grant") => BackendError::Auth(detail),
        StatusCode::NOT_FOUND => BackendError::NotFound(detail),
        _ => BackendError::Remote(format!("HTTP {}: {detail}", status.as_u16())),
    }
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use uuid::Uuid;

    use super::{AuthResponse, error_for_status, rest_url, session_from_auth};
    use crate::error::BackendError;

    #[test]
    fn builds_postgrest_urls() {
        assert_eq!(
            rest_url("https://db.example", "tasks", ""),
            "https://db.example/rest/v1/tasks"
        );
        assert_eq!(
            rest_url("https://db.example", "tasks", "id=eq.1"),
            "https://db.example/rest/v1/tasks?id=eq.1"
        );
    }

    #[test]
    fn maps_http_status_to_taxonomy() {
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, r#"{"message":"JWT expired"}"#),
            BackendError::Auth(msg) if msg == "JWT expired"
        ));
        assert!(matches!(
            error_for_status(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
            ),
            BackendError::Auth(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, ""),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            BackendError::Remote(msg) if msg.starts_with("HTTP 500")
        ));
    }

    #[test]
    fn signup_without_token_asks_for_confirmation() {
        let auth: AuthResponse = serde_json::from_value(serde_json::json!({
            "user": { "id": Uuid::nil(), "email": "a@b.c" }
        }))
        .unwrap();
        assert!(matches!(
            session_from_auth(auth, "a@b.c"),
            Err(BackendError::Auth(_))
        ));

        let auth: AuthResponse = serde_json::from_value(serde_json::json!({
            "access_token": "tok",
            "user": { "id": Uuid::nil() }
        }))
        .unwrap();
        let session = session_from_auth(auth, "a@b.c").unwrap();
        assert_eq!(session.email, "a@b.c");
        assert_eq!(session.access_token.as_deref(), Some("tok"));
    }
}
