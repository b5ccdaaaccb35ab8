use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint;

/// Aggregate sync condition of a card. Variant order is the severity order,
/// so `max()` over entity conditions yields the card-level status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    Pending,
    Conflict,
    Error,
    Orphaned,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
            SyncStatus::Orphaned => "orphaned",
        };
        f.write_str(s)
    }
}

/// Completion state of a checklist item, as the remote service spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Complete,
    Incomplete,
}

impl ItemState {
    pub fn from_checked(checked: bool) -> Self {
        if checked {
            ItemState::Complete
        } else {
            ItemState::Incomplete
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, ItemState::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemState::Complete => "complete",
            ItemState::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckItem {
    pub text: String,
    /// Remote identifier, once known. Authoritative over the text key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub state: ItemState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub items: Vec<CheckItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub body: String,
    /// Absent means the comment has not been pushed yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl Comment {
    /// Content fingerprint used to match comments across sync directions.
    pub fn fingerprint(&self) -> String {
        fingerprint::comment_fingerprint(&self.author, &self.body)
    }
}

/// A card as read from (or about to be written to) its local markdown file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub remote_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub local_path: PathBuf,
    pub checklists: Vec<Checklist>,
    pub comments: Vec<Comment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Frontmatter fields carried opaquely (labels, members, due dates…).
    /// They take no part in reconciliation but survive round trips.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Card {
    /// Look up a checklist item by its composite name key.
    pub fn find_item(&self, checklist: &str, item: &str) -> Option<&CheckItem> {
        self.checklists
            .iter()
            .find(|c| c.name == checklist)
            .and_then(|c| c.items.iter().find(|i| i.text == item))
    }
}

/// Stable key for a reconcilable entity within one card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
    Item { checklist: String, item: String },
    Comment { fingerprint: String },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Item { checklist, item } => write!(f, "item '{}' / '{}'", checklist, item),
            EntityKey::Comment { fingerprint } => write!(f, "comment {}", fingerprint),
        }
    }
}

// --- Remote snapshot types (what the board client returns) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCheckItem {
    pub id: String,
    pub name: String,
    pub state: ItemState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChecklist {
    pub id: String,
    pub name: String,
    pub items: Vec<RemoteCheckItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteComment {
    pub id: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub body: String,
}

impl RemoteComment {
    pub fn fingerprint(&self) -> String {
        fingerprint::comment_fingerprint(&self.author, &self.body)
    }
}

/// One freshly fetched remote view of a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub card_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub checklists: Vec<RemoteChecklist>,
    pub comments: Vec<RemoteComment>,
}

impl RemoteSnapshot {
    pub fn find_item(&self, checklist: &str, item: &str) -> Option<&RemoteCheckItem> {
        self.checklists
            .iter()
            .find(|c| c.name == checklist)
            .and_then(|c| c.items.iter().find(|i| i.name == item))
    }
}

/// Summary info for a board in list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}
