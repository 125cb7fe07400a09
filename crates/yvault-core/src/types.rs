use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::{GrantId, NodeId, SendId, UserId};

/// Allowance value meaning "no limit configured"
pub const UNLIMITED: i64 = -1;

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A user's counters. Only the quota meter mutates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name stamped onto shadow rows as `shared_by`
    #[serde(default)]
    pub public_name: Option<String>,
    pub storage_used: i64,
    pub storage_available: i64,
    pub send_used: i64,
    pub send_available: i64,
}

impl User {
    pub fn new(id: impl Into<UserId>, storage_available: i64, send_available: i64) -> Self {
        Self {
            id: id.into(),
            public_name: None,
            storage_used: 0,
            storage_available,
            send_used: 0,
            send_available,
        }
    }

    pub fn usage(&self, meter: Meter) -> Usage {
        match meter {
            Meter::Storage => Usage {
                used: self.storage_used,
                available: self.storage_available,
            },
            Meter::Send => Usage {
                used: self.send_used,
                available: self.send_available,
            },
        }
    }
}

/// Which pair of counters a charge applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Meter {
    Storage,
    Send,
}

/// Snapshot of one counter pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: i64,
    pub available: i64,
}

impl Usage {
    pub fn is_unlimited(&self) -> bool {
        self.available < 0
    }

    /// Free space as exposed to clients: `available - used`, clamped at 0.
    pub fn remaining(&self) -> i64 {
        if self.is_unlimited() {
            i64::MAX
        } else {
            (self.available - self.used).max(0)
        }
    }

    pub fn exceeded(&self) -> bool {
        !self.is_unlimited() && self.used > self.available
    }
}

/// Where a node hangs in the forest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Parent {
    /// Directly under a user's root; the key is wrapped under that user's master key
    Root(UserId),
    Folder(NodeId),
}

impl Parent {
    pub fn folder_id(&self) -> Option<&NodeId> {
        match self {
            Parent::Folder(id) => Some(id),
            Parent::Root(_) => None,
        }
    }
}

/// Canonical record or a recipient's share projection of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    /// The true owner's row; its id is the item's ref id
    Canonical,
    /// A recipient's copy, carrying its own wrapped key and permission
    Shadow {
        ref_id: NodeId,
        can_modify: bool,
        shared_by: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    /// Metadata admitted, chunks still arriving
    Pending,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Declared plaintext size
    pub size: u64,
    pub chunk_count: u32,
    /// Total stored ciphertext bytes, known once the upload completes
    pub ciphertext_len: u64,
    pub backend_object_id: Option<String>,
    pub state: UploadState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeContent {
    Folder,
    File(FileContent),
}

/// Folder or file row in a user's forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultNode {
    pub id: NodeId,
    pub owner_id: UserId,
    pub parent: Parent,
    /// Always ciphertext
    pub name: String,
    /// Wrapped under the key one level up (or the owner's master key at root)
    pub protected_key: Vec<u8>,
    #[serde(default)]
    pub link_tag: Option<String>,
    pub modified_at: u64,
    pub projection: Projection,
    pub content: NodeContent,
}

impl VaultNode {
    pub fn ref_id(&self) -> &NodeId {
        match &self.projection {
            Projection::Canonical => &self.id,
            Projection::Shadow { ref_id, .. } => ref_id,
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self.projection, Projection::Canonical)
    }

    /// Canonical rows are always writable by their owner.
    pub fn can_modify(&self) -> bool {
        match &self.projection {
            Projection::Canonical => true,
            Projection::Shadow { can_modify, .. } => *can_modify,
        }
    }

    pub fn shared_by(&self) -> Option<&str> {
        match &self.projection {
            Projection::Canonical => None,
            Projection::Shadow { shared_by, .. } => Some(shared_by),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.content, NodeContent::Folder)
    }

    pub fn file(&self) -> Option<&FileContent> {
        match &self.content {
            NodeContent::File(f) => Some(f),
            NodeContent::Folder => None,
        }
    }
}

/// Record of one owner → recipient share. Holds no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub id: GrantId,
    pub owner_id: UserId,
    pub recipient_id: UserId,
    pub item_ref: NodeId,
    pub is_folder: bool,
    pub can_modify: bool,
}

/// Ephemeral, flat transfer object with a download budget and an expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendObject {
    pub id: SendId,
    pub owner_id: UserId,
    pub name: String,
    /// Opaque client material (e.g. password salt), returned verbatim
    #[serde(default)]
    pub salt: Vec<u8>,
    pub size: u64,
    pub chunk_count: u32,
    pub ciphertext_len: u64,
    pub backend_object_id: Option<String>,
    pub state: UploadState,
    /// Remaining full downloads; negative means unlimited
    pub downloads_remaining: i32,
    pub expires_at: u64,
    pub created_at: u64,
}

impl SendObject {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow(can_modify: bool) -> VaultNode {
        VaultNode {
            id: NodeId::new("shadow"),
            owner_id: UserId::new("bob"),
            parent: Parent::Root(UserId::new("bob")),
            name: "enc-name".into(),
            protected_key: vec![1, 2, 3],
            link_tag: None,
            modified_at: 0,
            projection: Projection::Shadow {
                ref_id: NodeId::new("canon"),
                can_modify,
                shared_by: "alice".into(),
            },
            content: NodeContent::Folder,
        }
    }

    #[test]
    fn shadow_reports_its_ref_and_flag() {
        let node = shadow(false);
        assert_eq!(node.ref_id().as_str(), "canon");
        assert!(!node.is_canonical());
        assert!(!node.can_modify());
        assert_eq!(node.shared_by(), Some("alice"));
    }

    #[test]
    fn canonical_ref_is_own_id() {
        let mut node = shadow(false);
        node.projection = Projection::Canonical;
        assert_eq!(node.ref_id(), &node.id);
        assert!(node.can_modify());
    }

    #[test]
    fn remaining_is_clamped() {
        let over = Usage {
            used: 150,
            available: 100,
        };
        assert_eq!(over.remaining(), 0);
        assert!(over.exceeded());

        let unlimited = Usage {
            used: 1 << 40,
            available: UNLIMITED,
        };
        assert_eq!(unlimited.remaining(), i64::MAX);
        assert!(!unlimited.exceeded());
    }
}
