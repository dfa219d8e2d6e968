//! REST client for the chat backend.
//!
//! All calls go through [`BackendApi`] so the console can run against a mock
//! or a recorded backend in tests.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConsoleError, Result};
use crate::services::chat_types::{ConversationSummary, Group, User, WireMessage};
use crate::services::config::BackendSettings;
use crate::services::roster::{BulkAction, GroupPayload, PageRequest};
use crate::services::session::{AdminProfile, SessionContext};

// ── Wire DTOs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: AdminProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProfileResponse {
    Wrapped { user: AdminProfile },
    Bare(AdminProfile),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupMessageRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageResponse {
    #[serde(default)]
    message: Option<WireMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    #[serde(default)]
    conversation: Vec<WireMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ConversationsResponse {
    Wrapped { conversations: Vec<ConversationSummary> },
    Bare(Vec<ConversationSummary>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest<'a> {
    action: BulkAction,
    user_ids: &'a [String],
}

/// One page of users.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default = "one")]
    pub total_pages: u32,
    #[serde(default)]
    pub total: Option<u64>,
}

/// One page of groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupPage {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default = "one")]
    pub total_pages: u32,
}

/// Aggregate counts from `/users/stats/overview`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub admin_users: u64,
    #[serde(default)]
    pub active_users: u64,
}

/// Partial user update.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    #[serde(default)]
    pub affected: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GroupEnvelope {
    #[serde(default)]
    group: Option<Group>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UserEnvelope {
    #[serde(default)]
    user: Option<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn one() -> u32 {
    1
}

// ── Backend trait ──────────────────────────────────────────────

/// Calls the console makes against the chat backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Send a direct message. Returns the stored message if the backend echoes it.
    async fn send_message(&self, to: &str, text: &str) -> Result<Option<WireMessage>>;
    async fn send_group_message(&self, group_id: &str, text: &str) -> Result<Option<WireMessage>>;
    async fn get_conversation(&self, user_id: &str) -> Result<Vec<WireMessage>>;
    async fn get_group_conversation(&self, group_id: &str) -> Result<Vec<WireMessage>>;
    async fn get_conversations(&self) -> Result<Vec<ConversationSummary>>;

    async fn list_users(&self, page: &PageRequest) -> Result<UserPage>;
    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<Option<User>>;
    async fn delete_user(&self, user_id: &str) -> Result<()>;
    async fn user_stats(&self) -> Result<UserStats>;
    async fn bulk_users(&self, action: BulkAction, user_ids: &[String]) -> Result<BulkResult>;

    async fn list_groups(&self, page: &PageRequest) -> Result<GroupPage>;
    async fn create_group(&self, payload: &GroupPayload) -> Result<Option<Group>>;
    async fn update_group(&self, group_id: &str, payload: &GroupPayload) -> Result<Option<Group>>;
    async fn delete_group(&self, group_id: &str) -> Result<()>;
}

// ── HTTP implementation ────────────────────────────────────────

/// reqwest-backed [`BackendApi`]. Cheap to clone.
#[derive(Clone)]
pub struct BackendApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendApiClient {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        Self::with_timeout(&settings.base_url, settings.timeout())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsoleError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// A copy of this client that authenticates as `session`.
    pub fn with_session(&self, session: &SessionContext) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(session.bearer_token().to_string()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for an administrator session.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionContext> {
        if username.trim().is_empty() {
            return Err(ConsoleError::Validation("Username is required".to_string()));
        }
        if password.trim().is_empty() {
            return Err(ConsoleError::Validation("Password is required".to_string()));
        }

        let resp = self
            .client
            .post(self.url("auth/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(transport_error)?;
        let login: LoginResponse = read_json(resp).await?;
        let session = SessionContext::from_login(login)?;
        log::info!("Admin {} logged in", session.admin().username);
        Ok(session)
    }

    pub async fn profile(&self) -> Result<AdminProfile> {
        let resp: ProfileResponse = self.get_json("auth/profile").await?;
        Ok(match resp {
            ProfileResponse::Wrapped { user } => user,
            ProfileResponse::Bare(user) => user,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn url_with_query(&self, path: &str, page: &PageRequest) -> Result<String> {
        let mut url = url::Url::parse(&self.url(path))
            .map_err(|e| ConsoleError::ConfigError(format!("Invalid backend URL: {}", e)))?;
        url.query_pairs_mut().extend_pairs(page.query_pairs());
        Ok(url.to_string())
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .authorize(self.client.request(method, self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .authorize(self.client.delete(self.url(path)))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await.map(|_| ())
    }
}

#[async_trait]
impl BackendApi for BackendApiClient {
    async fn send_message(&self, to: &str, text: &str) -> Result<Option<WireMessage>> {
        let resp: SendMessageResponse = self
            .send_json(reqwest::Method::POST, "chat/send", &SendMessageRequest { to, text })
            .await?;
        Ok(resp.message)
    }

    async fn send_group_message(&self, group_id: &str, text: &str) -> Result<Option<WireMessage>> {
        let path = format!("groups/{}/messages", urlencoding::encode(group_id));
        let resp: SendMessageResponse = self
            .send_json(reqwest::Method::POST, &path, &GroupMessageRequest { text })
            .await?;
        Ok(resp.message)
    }

    async fn get_conversation(&self, user_id: &str) -> Result<Vec<WireMessage>> {
        let path = format!("chat/messages/{}", urlencoding::encode(user_id));
        let resp: ConversationResponse = self.get_json(&path).await?;
        Ok(resp.conversation)
    }

    async fn get_group_conversation(&self, group_id: &str) -> Result<Vec<WireMessage>> {
        let path = format!("groups/{}/messages", urlencoding::encode(group_id));
        let resp: ConversationResponse = self.get_json(&path).await?;
        Ok(resp.conversation)
    }

    async fn get_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let resp: ConversationsResponse = self.get_json("chat/conversations").await?;
        Ok(match resp {
            ConversationsResponse::Wrapped { conversations } => conversations,
            ConversationsResponse::Bare(list) => list,
        })
    }

    async fn list_users(&self, page: &PageRequest) -> Result<UserPage> {
        let url = self.url_with_query("users", page)?;
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<Option<User>> {
        let path = format!("users/{}", urlencoding::encode(user_id));
        let resp: UserEnvelope = self
            .send_json(reqwest::Method::PUT, &path, update)
            .await?;
        Ok(resp.user)
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.delete(&format!("users/{}", urlencoding::encode(user_id)))
            .await
    }

    async fn user_stats(&self) -> Result<UserStats> {
        self.get_json("users/stats/overview").await
    }

    async fn bulk_users(&self, action: BulkAction, user_ids: &[String]) -> Result<BulkResult> {
        self.send_json(
            reqwest::Method::POST,
            "users/bulk",
            &BulkRequest { action, user_ids },
        )
        .await
    }

    async fn list_groups(&self, page: &PageRequest) -> Result<GroupPage> {
        let url = self.url_with_query("groups", page)?;
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;
        read_json(resp).await
    }

    async fn create_group(&self, payload: &GroupPayload) -> Result<Option<Group>> {
        let resp: GroupEnvelope = self
            .send_json(reqwest::Method::POST, "groups", payload)
            .await?;
        Ok(resp.group)
    }

    async fn update_group(&self, group_id: &str, payload: &GroupPayload) -> Result<Option<Group>> {
        let path = format!("groups/{}", urlencoding::encode(group_id));
        let resp: GroupEnvelope = self
            .send_json(reqwest::Method::PUT, &path, payload)
            .await?;
        Ok(resp.group)
    }

    async fn delete_group(&self, group_id: &str) -> Result<()> {
        self.delete(&format!("groups/{}", urlencoding::encode(group_id)))
            .await
    }
}

// ── Response handling ──────────────────────────────────────────

/// Classify a reqwest failure that happened before a response arrived.
fn transport_error(e: reqwest::Error) -> ConsoleError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        ConsoleError::NetworkUnavailable(e.to_string())
    } else {
        ConsoleError::ChatError(format!("Request failed: {}", e))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .unwrap_or(body);

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        log::warn!("Backend rejected credentials: HTTP {}", status);
        return Err(ConsoleError::Unauthorized(format!("HTTP {}: {}", status, detail)));
    }
    Err(ConsoleError::Backend {
        status: status.as_u16(),
        message: detail,
    })
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let resp = check_status(resp).await?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ConsoleError::NetworkUnavailable(format!("Read response: {}", e)))?;
    // Some endpoints answer 200 with an empty body.
    if bytes.is_empty() {
        return Ok(serde_json::from_str("{}")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
