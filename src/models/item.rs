//! Remote item models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of remote items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file" => Some(ItemKind::File),
            "folder" => Some(ItemKind::Folder),
            _ => None,
        }
    }
}

/// A file or folder held by the remote object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemModel {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    /// None only for the root folder.
    pub parent_id: Option<String>,
    /// Content length in bytes (always 0 for folders).
    pub size: u64,
    pub etag: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl ItemModel {
    pub fn new(name: impl Into<String>, kind: ItemKind, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            kind,
            parent_id,
            size: 0,
            etag: new_etag(),
            created: now,
            last_modified: now,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Refreshes the ETag and last-modified time after a content change.
    pub fn touch(&mut self) {
        self.etag = new_etag();
        self.last_modified = Utc::now();
    }
}

fn new_etag() -> String {
    format!("\"0x{}\"", uuid::Uuid::new_v4().simple())
}

/// Request body for creating a child item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    pub kind: ItemKind,
    /// Replace an existing item of the same name instead of failing.
    #[serde(default)]
    pub overwrite: bool,
}

/// Request body for copying or moving an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyItemRequest {
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
}
