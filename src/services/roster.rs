//! User and group administration.
//!
//! Group admission rules are checked here, before anything reaches the
//! backend.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::chat_types::{Group, User};
use crate::backend_api::{BackendApi, BulkResult, GroupPage, UserPage, UserStats, UserUpdate};
use crate::error::{ConsoleError, Result};

/// Minimum distinct members of a group, at creation and on every edit.
pub const MIN_GROUP_MEMBERS: usize = 3;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Page size used when listing candidate group members.
const CANDIDATE_PAGE_SIZE: u32 = 200;

/// Validated group create/update body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub name: String,
    pub members: Vec<String>,
}

/// Check a group definition. Members are deduplicated keeping first-seen order.
pub fn validate_group(name: &str, members: &[String]) -> Result<GroupPayload> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConsoleError::InvalidGroup("group name is required".to_string()));
    }

    let mut seen = HashSet::new();
    let members: Vec<String> = members
        .iter()
        .filter(|m| seen.insert(m.as_str()))
        .cloned()
        .collect();
    if members.len() < MIN_GROUP_MEMBERS {
        return Err(ConsoleError::InvalidGroup(format!(
            "at least {} distinct members required, got {}",
            MIN_GROUP_MEMBERS,
            members.len()
        )));
    }

    Ok(GroupPayload {
        name: name.to_string(),
        members,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    pub filters: BTreeMap<String, String>,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit,
            filters: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, key: &str, value: impl Into<String>) -> Self {
        self.filters.insert(key.to_string(), value.into());
        self
    }

    /// `page`, `limit`, then filters in key order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserFilter {
    #[default]
    All,
    Admin,
    Regular,
}

impl UserFilter {
    fn is_admin_param(self) -> Option<&'static str> {
        match self {
            UserFilter::All => None,
            UserFilter::Admin => Some("true"),
            UserFilter::Regular => Some("false"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Delete,
    Activate,
    Deactivate,
}

/// Users whose name contains `term`, case-insensitively. Blank term keeps all.
pub fn filter_by_username<'a>(users: &'a [User], term: &str) -> Vec<&'a User> {
    let term = term.trim().to_lowercase();
    users
        .iter()
        .filter(|u| term.is_empty() || u.username.to_lowercase().contains(&term))
        .collect()
}

/// Roster operations for one session.
#[derive(Clone)]
pub struct RosterService {
    backend: Arc<dyn BackendApi>,
}

impl RosterService {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }

    // ── Groups ──

    pub async fn create_group(&self, name: &str, members: &[String]) -> Result<Option<Group>> {
        let payload = validate_group(name, members)?;
        let group = self.backend.create_group(&payload).await?;
        log::info!("Created group {} with {} members", payload.name, payload.members.len());
        Ok(group)
    }

    pub async fn update_group(
        &self,
        group_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<Option<Group>> {
        let payload = validate_group(name, members)?;
        let group = self.backend.update_group(group_id, &payload).await?;
        log::info!("Updated group {}", group_id);
        Ok(group)
    }

    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        self.backend.delete_group(group_id).await?;
        log::info!("Deleted group {}", group_id);
        Ok(())
    }

    pub async fn list_groups(&self, page: u32, search: Option<&str>) -> Result<GroupPage> {
        let mut request = PageRequest::new(page, DEFAULT_PAGE_SIZE);
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            request = request.with_filter("search", term);
        }
        self.backend.list_groups(&request).await
    }

    // ── Users ──

    pub async fn list_users(
        &self,
        page: u32,
        filter: UserFilter,
        search: Option<&str>,
    ) -> Result<UserPage> {
        let mut request = PageRequest::new(page, DEFAULT_PAGE_SIZE);
        if let Some(is_admin) = filter.is_admin_param() {
            request = request.with_filter("isAdmin", is_admin);
        }
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            request = request.with_filter("search", term);
        }
        self.backend.list_users(&request).await
    }

    /// Non-admin users eligible as group members.
    pub async fn candidate_members(&self) -> Result<Vec<User>> {
        let request = PageRequest::new(1, CANDIDATE_PAGE_SIZE).with_filter("isAdmin", "false");
        Ok(self.backend.list_users(&request).await?.users)
    }

    pub async fn set_admin(&self, user_id: &str, is_admin: bool) -> Result<Option<User>> {
        let update = UserUpdate {
            is_admin: Some(is_admin),
            ..Default::default()
        };
        let user = self.backend.update_user(user_id, &update).await?;
        log::info!("User {} admin={}", user_id, is_admin);
        Ok(user)
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.backend.delete_user(user_id).await
    }

    pub async fn stats(&self) -> Result<UserStats> {
        self.backend.user_stats().await
    }

    /// Apply `action` to `user_ids`. An empty selection makes no request.
    pub async fn bulk(
        &self,
        action: BulkAction,
        user_ids: &[String],
    ) -> Result<Option<BulkResult>> {
        if user_ids.is_empty() {
            return Ok(None);
        }
        let result = self.backend.bulk_users(action, user_ids).await?;
        log::info!("Bulk {:?} on {} user(s)", action, user_ids.len());
        Ok(Some(result))
    }
}
