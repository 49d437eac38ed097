//! Tag Catalog
//!
//! Client for the reader API's tag and status endpoints, plus the local
//! operations a surface performs on the fetched catalog (grouping, popular
//! tags, search) and the user's tag selection.
//!
//! # API
//!
//! - `GET {base}/tags`: `{ success, data: { tags: [...], total, totalTags, fallback?, error? } }`
//! - `GET {base}/status`: `{ status, taggedSnippets, totalTags, capabilities, fallback?, error? }`

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Category assigned to tags that carry none
pub const UNCATEGORIZED: &str = "Other";

/// Number of tags returned by [`TagCatalog::popular`] by default
pub const DEFAULT_POPULAR_LIMIT: usize = 8;

/// A tag offered for generation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Catalog identifier
    pub id: u64,
    /// Display name, sent in requests
    pub name: String,
    /// How often the tag appears in tagged snippets
    #[serde(default, alias = "usage_count")]
    pub usage_count: u64,
    /// Grouping category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// `data` object of the tags response
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagList {
    /// Tags in catalog order
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Number of tags returned
    #[serde(default)]
    pub total: usize,
    /// Number of tags the catalog holds
    #[serde(default)]
    pub total_tags: usize,
    /// Set when the API served built-in fallback data
    #[serde(default)]
    pub fallback: bool,
    /// Why the fallback was served
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<TagList>,
    error: Option<String>,
}

/// Generator availability
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Accepting requests
    Active,
    /// Not available
    #[default]
    Inactive,
}

/// Response of the status endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Availability
    pub status: WorkerState,
    /// Snippets indexed for retrieval
    #[serde(default)]
    pub tagged_snippets: u64,
    /// Tags known to the generator
    #[serde(default)]
    pub total_tags: u64,
    /// Advertised capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Set when the API served built-in fallback data
    #[serde(default)]
    pub fallback: bool,
    /// Error reported alongside the status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerStatus {
    /// Whether the generator accepts requests
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WorkerState::Active
    }
}

/// HTTP client for the tag and status endpoints
#[derive(Clone)]
pub struct TagClient {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl TagClient {
    /// Create a client for the API rooted at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
        }
    }

    /// API base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tags_url(&self) -> String {
        format!("{}/tags", self.base_url)
    }

    fn status_url(&self) -> String {
        format!("{}/status", self.base_url)
    }

    /// Fetch the tag catalog
    pub async fn fetch_tags(&self) -> anyhow::Result<TagCatalog> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Failed to fetch tags: {}", status.as_u16());
        }

        let envelope: TagsEnvelope = response.json().await?;
        let list = match envelope {
            TagsEnvelope {
                success: true,
                data: Some(list),
                ..
            } => list,
            TagsEnvelope { error, .. } => {
                anyhow::bail!(error.unwrap_or_else(|| "Invalid response format".to_string()))
            }
        };

        if list.fallback {
            tracing::warn!(
                error = list.error.as_deref().unwrap_or("unknown"),
                "Tag API served fallback tags"
            );
        }
        tracing::debug!(count = list.tags.len(), total = list.total_tags, "Fetched tags");

        Ok(TagCatalog::from(list))
    }

    /// Fetch generator status
    pub async fn generator_status(&self) -> anyhow::Result<WorkerStatus> {
        let response = self
            .http_client
            .get(self.status_url())
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Status endpoint returned {status}: {body}");
        }

        Ok(response.json().await?)
    }

    /// Whether the status endpoint answers at all
    pub async fn health_check(&self) -> bool {
        self.http_client
            .get(self.status_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}

/// A fetched tag catalog
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagCatalog {
    tags: Vec<Tag>,
    total_tags: usize,
    fallback: bool,
}

impl From<TagList> for TagCatalog {
    fn from(list: TagList) -> Self {
        let total_tags = list.total_tags.max(list.tags.len());
        Self {
            tags: list.tags,
            total_tags,
            fallback: list.fallback,
        }
    }
}

impl TagCatalog {
    /// Build a catalog from tags in catalog order
    #[must_use]
    pub fn new(tags: Vec<Tag>) -> Self {
        Self {
            total_tags: tags.len(),
            tags,
            fallback: false,
        }
    }

    /// Tags in catalog order
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Number of tags the server reports
    #[must_use]
    pub fn total_tags(&self) -> usize {
        self.total_tags
    }

    /// Whether the API served fallback data
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Look up a tag by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.name == name)
    }

    /// Tags grouped by category, each group ordered by usage (highest first)
    ///
    /// Tags without a category land in [`UNCATEGORIZED`].
    #[must_use]
    pub fn grouped(&self) -> BTreeMap<String, Vec<&Tag>> {
        let mut groups: BTreeMap<String, Vec<&Tag>> = BTreeMap::new();
        for tag in &self.tags {
            let category = tag.category.as_deref().unwrap_or(UNCATEGORIZED);
            groups.entry(category.to_string()).or_default().push(tag);
        }
        for tags in groups.values_mut() {
            // Stable: equal counts keep catalog order
            tags.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        }
        groups
    }

    /// The `limit` most used tags
    #[must_use]
    pub fn popular(&self, limit: usize) -> Vec<&Tag> {
        let mut tags: Vec<&Tag> = self.tags.iter().collect();
        tags.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        tags.truncate(limit);
        tags
    }

    /// Tags whose name contains `query`, ignoring case
    ///
    /// A blank query matches everything.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&Tag> {
        let query = query.trim();
        if query.is_empty() {
            return self.tags.iter().collect();
        }
        let query = query.to_lowercase();
        self.tags
            .iter()
            .filter(|tag| tag.name.to_lowercase().contains(&query))
            .collect()
    }
}

/// Tags the user picked, in the order they were picked
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSelection {
    selected: Vec<String>,
}

impl TagSelection {
    /// Empty selection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name` if absent, remove it if present
    ///
    /// Returns whether the tag is selected afterwards.
    pub fn toggle(&mut self, name: &str) -> bool {
        if let Some(pos) = self.selected.iter().position(|t| t == name) {
            self.selected.remove(pos);
            false
        } else {
            self.selected.push(name.to_string());
            true
        }
    }

    /// Replace the selection
    pub fn select<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = names.into_iter().map(Into::into).collect();
    }

    /// Deselect everything
    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Whether `name` is selected
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.selected.iter().any(|t| t == name)
    }

    /// Selected tag names
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.selected
    }

    /// Whether nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
