//! In-memory metadata store, persisted to a JSON file
//!
//! All tables live behind one `RwLock`, so each trait method is atomic with
//! respect to every other. Secondary indices (by ref id, by parent) are
//! rebuilt on open and never written to disk. `flush` writes the snapshot
//! atomically via temp+rename; a dirty store also flushes on drop.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use yvault_core::{
    GrantId, Meter, NodeId, Parent, SendId, SendObject, ShareGrant, Usage, User, UserId,
    VaultError, VaultNode, VaultResult,
};

use crate::store::{Consumed, MetaStore, ShareInsert};

/// On-disk shape of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    nodes: Vec<VaultNode>,
    #[serde(default)]
    grants: Vec<ShareGrant>,
    #[serde(default)]
    sends: Vec<SendObject>,
    #[serde(default)]
    deletions: Vec<String>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    nodes: HashMap<NodeId, VaultNode>,
    by_ref: HashMap<NodeId, BTreeSet<NodeId>>,
    by_parent: HashMap<Parent, BTreeSet<NodeId>>,
    grants: HashMap<GrantId, ShareGrant>,
    sends: HashMap<SendId, SendObject>,
    deletions: Vec<String>,
    dirty: bool,
}

impl Tables {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Tables {
            users: snapshot.users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            grants: snapshot.grants.into_iter().map(|g| (g.id.clone(), g)).collect(),
            sends: snapshot.sends.into_iter().map(|s| (s.id.clone(), s)).collect(),
            deletions: snapshot.deletions,
            ..Default::default()
        };
        for node in snapshot.nodes {
            tables.put_node(node);
        }
        tables
    }

    fn snapshot(&self) -> Snapshot {
        let mut nodes: Vec<VaultNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        let mut grants: Vec<ShareGrant> = self.grants.values().cloned().collect();
        grants.sort_by(|a, b| a.id.cmp(&b.id));
        let mut sends: Vec<SendObject> = self.sends.values().cloned().collect();
        sends.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot {
            users,
            nodes,
            grants,
            sends,
            deletions: self.deletions.clone(),
        }
    }

    fn index(&mut self, node: &VaultNode) {
        self.by_ref
            .entry(node.ref_id().clone())
            .or_default()
            .insert(node.id.clone());
        self.by_parent
            .entry(node.parent.clone())
            .or_default()
            .insert(node.id.clone());
    }

    fn unindex(&mut self, node: &VaultNode) {
        if let Some(set) = self.by_ref.get_mut(node.ref_id()) {
            set.remove(&node.id);
            if set.is_empty() {
                self.by_ref.remove(node.ref_id());
            }
        }
        if let Some(set) = self.by_parent.get_mut(&node.parent) {
            set.remove(&node.id);
            if set.is_empty() {
                self.by_parent.remove(&node.parent);
            }
        }
    }

    fn put_node(&mut self, node: VaultNode) {
        self.index(&node);
        self.nodes.insert(node.id.clone(), node);
    }

    fn take_node(&mut self, id: &NodeId) -> Option<VaultNode> {
        let node = self.nodes.remove(id)?;
        self.unindex(&node);
        Some(node)
    }

    fn collect(&self, ids: Option<&BTreeSet<NodeId>>) -> Vec<VaultNode> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.nodes.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    fn modify_node(&mut self, id: &NodeId, f: &mut dyn FnMut(&mut VaultNode)) -> bool {
        let Some(mut node) = self.take_node(id) else {
            return false;
        };
        f(&mut node);
        self.put_node(node);
        self.dirty = true;
        true
    }
}

/// JSON-backed metadata store
pub struct MemoryStore {
    /// `None` for a purely in-memory store
    db_path: Option<PathBuf>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// A store that never touches disk.
    pub fn new() -> Self {
        Self {
            db_path: None,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Load or create a store at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let snapshot = if db_path.exists() {
            let content = std::fs::read_to_string(db_path)
                .with_context(|| format!("reading state file: {}", db_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing state file: {}", db_path.display()))?
        } else {
            Snapshot::default()
        };

        let tables = Tables::from_snapshot(snapshot);
        tracing::info!(
            path = %db_path.display(),
            users = tables.users.len(),
            nodes = tables.nodes.len(),
            sends = tables.sends.len(),
            "state store opened"
        );

        Ok(Self {
            db_path: Some(db_path.to_path_buf()),
            tables: RwLock::new(tables),
        })
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_to(&self, db_path: &Path) -> anyhow::Result<()> {
        let mut tables = self.write();
        if !tables.dirty {
            return Ok(());
        }

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir: {}", parent.display()))?;
        }

        let json =
            serde_json::to_string_pretty(&tables.snapshot()).context("serializing state")?;

        let tmp_path = db_path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing state temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, db_path)
            .with_context(|| format!("renaming state file: {}", db_path.display()))?;

        tables.dirty = false;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Err(e) = MetaStore::flush(self) {
            tracing::warn!("failed to flush state store on drop: {e}");
        }
    }
}

impl MetaStore for MemoryStore {
    fn user(&self, id: &UserId) -> VaultResult<Option<User>> {
        Ok(self.read().users.get(id).cloned())
    }

    fn insert_user(&self, user: User) -> VaultResult<()> {
        let mut tables = self.write();
        tables.users.insert(user.id.clone(), user);
        tables.dirty = true;
        Ok(())
    }

    fn apply_charge(&self, id: &UserId, meter: Meter, amount: i64) -> VaultResult<Usage> {
        let mut tables = self.write();
        let user = tables
            .users
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(format!("user {id}")))?;
        let used = match meter {
            Meter::Storage => &mut user.storage_used,
            Meter::Send => &mut user.send_used,
        };
        *used = used.saturating_add(amount).max(0);
        let usage = user.usage(meter);
        tables.dirty = true;
        Ok(usage)
    }

    fn node(&self, id: &NodeId) -> VaultResult<Option<VaultNode>> {
        Ok(self.read().nodes.get(id).cloned())
    }

    fn nodes_by_ref(&self, ref_id: &NodeId) -> VaultResult<Vec<VaultNode>> {
        let tables = self.read();
        Ok(tables.collect(tables.by_ref.get(ref_id)))
    }

    fn children(&self, parent: &Parent) -> VaultResult<Vec<VaultNode>> {
        let tables = self.read();
        Ok(tables.collect(tables.by_parent.get(parent)))
    }

    fn insert_node(&self, node: VaultNode) -> VaultResult<bool> {
        let mut tables = self.write();
        if tables.nodes.contains_key(&node.id) {
            return Ok(false);
        }
        tables.put_node(node);
        tables.dirty = true;
        Ok(true)
    }

    fn update_ref(
        &self,
        ref_id: &NodeId,
        f: &mut dyn FnMut(&mut VaultNode),
    ) -> VaultResult<usize> {
        let mut tables = self.write();
        let ids: Vec<NodeId> = tables
            .by_ref
            .get(ref_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let mut changed = 0;
        for id in &ids {
            if tables.modify_node(id, f) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn update_node(&self, id: &NodeId, f: &mut dyn FnMut(&mut VaultNode)) -> VaultResult<()> {
        if self.write().modify_node(id, f) {
            Ok(())
        } else {
            Err(VaultError::NotFound(format!("node {id}")))
        }
    }

    fn remove_node(&self, id: &NodeId) -> VaultResult<Option<VaultNode>> {
        let mut tables = self.write();
        let removed = tables.take_node(id);
        if removed.is_some() {
            tables.dirty = true;
        }
        Ok(removed)
    }

    fn insert_share(&self, shadow: VaultNode, grant: ShareGrant) -> VaultResult<ShareInsert> {
        let mut tables = self.write();
        let duplicate = tables.grants.values().any(|g| {
            g.owner_id == grant.owner_id
                && g.item_ref == grant.item_ref
                && g.recipient_id == grant.recipient_id
        });
        if duplicate {
            return Err(VaultError::AlreadyShared);
        }
        if tables.nodes.contains_key(&shadow.id) || tables.grants.contains_key(&grant.id) {
            return Ok(ShareInsert::IdTaken);
        }
        tables.put_node(shadow);
        tables.grants.insert(grant.id.clone(), grant);
        tables.dirty = true;
        Ok(ShareInsert::Inserted)
    }

    fn grant(
        &self,
        owner: &UserId,
        item_ref: &NodeId,
        recipient: &UserId,
    ) -> VaultResult<Option<ShareGrant>> {
        Ok(self
            .read()
            .grants
            .values()
            .find(|g| &g.owner_id == owner && &g.item_ref == item_ref && &g.recipient_id == recipient)
            .cloned())
    }

    fn grants_for_item(&self, item_ref: &NodeId) -> VaultResult<Vec<ShareGrant>> {
        let mut grants: Vec<ShareGrant> = self
            .read()
            .grants
            .values()
            .filter(|g| &g.item_ref == item_ref)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.recipient_id.cmp(&b.recipient_id));
        Ok(grants)
    }

    fn grants_by_owner(&self, owner: &UserId) -> VaultResult<Vec<ShareGrant>> {
        let mut grants: Vec<ShareGrant> = self
            .read()
            .grants
            .values()
            .filter(|g| &g.owner_id == owner)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(grants)
    }

    fn set_grant_permission(&self, id: &GrantId, can_modify: bool) -> VaultResult<()> {
        let mut tables = self.write();
        let grant = tables
            .grants
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(format!("grant {id}")))?;
        grant.can_modify = can_modify;
        tables.dirty = true;
        Ok(())
    }

    fn remove_grant(&self, id: &GrantId) -> VaultResult<Option<ShareGrant>> {
        let mut tables = self.write();
        let removed = tables.grants.remove(id);
        if removed.is_some() {
            tables.dirty = true;
        }
        Ok(removed)
    }

    fn send(&self, id: &SendId) -> VaultResult<Option<SendObject>> {
        Ok(self.read().sends.get(id).cloned())
    }

    fn insert_send(&self, send: SendObject) -> VaultResult<bool> {
        let mut tables = self.write();
        if tables.sends.contains_key(&send.id) {
            return Ok(false);
        }
        tables.sends.insert(send.id.clone(), send);
        tables.dirty = true;
        Ok(true)
    }

    fn update_send(&self, id: &SendId, f: &mut dyn FnMut(&mut SendObject)) -> VaultResult<()> {
        let mut tables = self.write();
        let send = tables
            .sends
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(format!("send {id}")))?;
        f(send);
        tables.dirty = true;
        Ok(())
    }

    fn remove_send(&self, id: &SendId) -> VaultResult<Option<SendObject>> {
        let mut tables = self.write();
        let removed = tables.sends.remove(id);
        if removed.is_some() {
            tables.dirty = true;
        }
        Ok(removed)
    }

    fn consume_download(&self, id: &SendId) -> VaultResult<Consumed> {
        let mut tables = self.write();
        let send = tables
            .sends
            .get_mut(id)
            .ok_or_else(|| VaultError::NotFound(format!("send {id}")))?;
        if send.downloads_remaining < 0 {
            return Ok(Consumed::Unlimited);
        }
        send.downloads_remaining = (send.downloads_remaining - 1).max(0);
        let remaining = send.downloads_remaining;
        tables.dirty = true;
        if remaining > 0 {
            return Ok(Consumed::Remaining(remaining));
        }
        match tables.sends.remove(id) {
            Some(send) => Ok(Consumed::Exhausted(send)),
            None => Err(VaultError::NotFound(format!("send {id}"))),
        }
    }

    fn expired_sends(&self, now: u64) -> VaultResult<Vec<SendObject>> {
        Ok(self
            .read()
            .sends
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect())
    }

    fn queue_deletion(&self, object_id: String) -> VaultResult<()> {
        let mut tables = self.write();
        if !tables.deletions.contains(&object_id) {
            tables.deletions.push(object_id);
            tables.dirty = true;
        }
        Ok(())
    }

    fn take_deletions(&self) -> VaultResult<Vec<String>> {
        let mut tables = self.write();
        let drained = std::mem::take(&mut tables.deletions);
        if !drained.is_empty() {
            tables.dirty = true;
        }
        Ok(drained)
    }

    fn flush(&self) -> anyhow::Result<()> {
        match &self.db_path {
            Some(path) => self.flush_to(path),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yvault_core::{NodeContent, Projection, UNLIMITED};

    fn folder(id: &str, owner: &str, parent: Parent) -> VaultNode {
        VaultNode {
            id: NodeId::new(id),
            owner_id: UserId::new(owner),
            parent,
            name: format!("enc-{id}"),
            protected_key: vec![0u8; 72],
            link_tag: None,
            modified_at: 0,
            projection: Projection::Canonical,
            content: NodeContent::Folder,
        }
    }

    fn shadow_of(id: &str, ref_id: &str, owner: &str) -> VaultNode {
        let mut node = folder(id, owner, Parent::Root(UserId::new(owner)));
        node.projection = Projection::Shadow {
            ref_id: NodeId::new(ref_id),
            can_modify: false,
            shared_by: "alice".into(),
        };
        node
    }

    fn grant(id: &str, item: &str, recipient: &str) -> ShareGrant {
        ShareGrant {
            id: GrantId::new(id),
            owner_id: UserId::new("alice"),
            recipient_id: UserId::new(recipient),
            item_ref: NodeId::new(item),
            is_folder: true,
            can_modify: false,
        }
    }

    #[test]
    fn test_charge_clamps_at_zero() {
        let store = MemoryStore::new();
        store.insert_user(User::new("alice", 100, UNLIMITED)).unwrap();

        let usage = store.apply_charge(&"alice".into(), Meter::Storage, 40).unwrap();
        assert_eq!(usage.used, 40);
        let usage = store.apply_charge(&"alice".into(), Meter::Storage, -100).unwrap();
        assert_eq!(usage.used, 0);

        let usage = store.apply_charge(&"alice".into(), Meter::Send, 7).unwrap();
        assert_eq!(usage.used, 7);
        assert_eq!(store.user(&"alice".into()).unwrap().unwrap().storage_used, 0);
    }

    #[test]
    fn test_charge_unknown_user() {
        let store = MemoryStore::new();
        let err = store.apply_charge(&"ghost".into(), Meter::Storage, 1).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ref_and_parent_indices() {
        let store = MemoryStore::new();
        let root = Parent::Root(UserId::new("alice"));
        store.insert_node(folder("f1", "alice", root.clone())).unwrap();
        store
            .insert_node(folder("f2", "alice", Parent::Folder(NodeId::new("f1"))))
            .unwrap();
        store.insert_node(shadow_of("s1", "f2", "bob")).unwrap();

        assert_eq!(store.children(&root).unwrap().len(), 1);
        assert_eq!(store.nodes_by_ref(&NodeId::new("f2")).unwrap().len(), 2);
        assert!(store
            .node_for_owner(&NodeId::new("f2"), &UserId::new("bob"))
            .unwrap()
            .is_some());
        assert!(store.canonical(&NodeId::new("s1")).unwrap().is_none());

        store.remove_node(&NodeId::new("s1")).unwrap();
        assert_eq!(store.nodes_by_ref(&NodeId::new("f2")).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_node_rejects_taken_id() {
        let store = MemoryStore::new();
        let root = Parent::Root(UserId::new("alice"));
        assert!(store.insert_node(folder("f1", "alice", root.clone())).unwrap());
        assert!(!store.insert_node(folder("f1", "alice", root)).unwrap());
    }

    #[test]
    fn test_update_ref_touches_every_row() {
        let store = MemoryStore::new();
        store
            .insert_node(folder("f1", "alice", Parent::Root(UserId::new("alice"))))
            .unwrap();
        store.insert_node(shadow_of("s1", "f1", "bob")).unwrap();

        let changed = store
            .update_ref(&NodeId::new("f1"), &mut |n: &mut VaultNode| n.name = "renamed".into())
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(store.node(&NodeId::new("s1")).unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn test_insert_share_rejects_duplicate() {
        let store = MemoryStore::new();
        let first = store
            .insert_share(shadow_of("s1", "f1", "bob"), grant("g1", "f1", "bob"))
            .unwrap();
        assert_eq!(first, ShareInsert::Inserted);

        let err = store
            .insert_share(shadow_of("s2", "f1", "bob"), grant("g2", "f1", "bob"))
            .unwrap_err();
        assert!(matches!(err, VaultError::AlreadyShared));
        assert_eq!(store.grants_for_item(&NodeId::new("f1")).unwrap().len(), 1);
        assert!(store.node(&NodeId::new("s2")).unwrap().is_none());
    }

    #[test]
    fn test_insert_share_reports_id_collision() {
        let store = MemoryStore::new();
        store
            .insert_node(folder("taken", "carol", Parent::Root(UserId::new("carol"))))
            .unwrap();
        let outcome = store
            .insert_share(shadow_of("taken", "f1", "bob"), grant("g1", "f1", "bob"))
            .unwrap();
        assert_eq!(outcome, ShareInsert::IdTaken);
        assert!(store.grants_for_item(&NodeId::new("f1")).unwrap().is_empty());
    }

    #[test]
    fn test_consume_download_removes_at_zero() {
        let store = MemoryStore::new();
        let send = SendObject {
            id: SendId::new("s"),
            owner_id: UserId::new("alice"),
            name: "n".into(),
            salt: vec![],
            size: 1,
            chunk_count: 1,
            ciphertext_len: 41,
            backend_object_id: Some("obj".into()),
            state: yvault_core::UploadState::Ready,
            downloads_remaining: 2,
            expires_at: u64::MAX,
            created_at: 0,
        };
        store.insert_send(send).unwrap();

        assert_eq!(
            store.consume_download(&SendId::new("s")).unwrap(),
            Consumed::Remaining(1)
        );
        match store.consume_download(&SendId::new("s")).unwrap() {
            Consumed::Exhausted(send) => assert_eq!(send.backend_object_id.as_deref(), Some("obj")),
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert!(store.send(&SendId::new("s")).unwrap().is_none());
    }

    #[test]
    fn test_deletion_queue_dedups_and_drains() {
        let store = MemoryStore::new();
        store.queue_deletion("a".into()).unwrap();
        store.queue_deletion("a".into()).unwrap();
        store.queue_deletion("b".into()).unwrap();
        assert_eq!(store.take_deletions().unwrap(), vec!["a", "b"]);
        assert!(store.take_deletions().unwrap().is_empty());
    }
}
