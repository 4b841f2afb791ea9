//! In-memory remote object store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{RemoteObjectStore, TransportError};
use crate::models::{ContentRange, ItemKind, ItemModel, UploadSession, DEFAULT_SESSION_TTL_SECS};

/// In-memory object store emulating an upload-session API.
///
/// Range uploads are placed at their offset as soon as they arrive, and the
/// item is resized to the total length carried by the upload.
pub struct MemoryObjectStore {
    root_id: Arc<str>,
    items: DashMap<Arc<str>, ItemModel>,
    contents: DashMap<Arc<str>, Vec<u8>>,
    /// Secondary index: folder id -> child ids.
    children: DashMap<Arc<str>, HashSet<Arc<str>>>,
    sessions: DashMap<Arc<str>, UploadSession>,
    session_ttl: Duration,
    /// Every accepted range upload, in arrival order.
    put_log: Mutex<Vec<ContentRange>>,
    fail_next_puts: AtomicUsize,
    fail_once_at: Mutex<HashSet<u64>>,
    put_delay: Mutex<Option<std::time::Duration>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_session_ttl(Duration::seconds(DEFAULT_SESSION_TTL_SECS))
    }

    pub fn with_session_ttl(session_ttl: Duration) -> Self {
        let root = ItemModel::new("root", ItemKind::Folder, None);
        let root_id: Arc<str> = Arc::from(root.id.as_str());

        let items = DashMap::new();
        items.insert(root_id.clone(), root);
        let children = DashMap::new();
        children.insert(root_id.clone(), HashSet::new());

        Self {
            root_id,
            items,
            contents: DashMap::new(),
            children,
            sessions: DashMap::new(),
            session_ttl,
            put_log: Mutex::new(Vec::new()),
            fail_next_puts: AtomicUsize::new(0),
            fail_once_at: Mutex::new(HashSet::new()),
            put_delay: Mutex::new(None),
        }
    }

    /// Id of the root folder.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Creates a file under the root folder holding `content`.
    pub fn insert_file(&self, name: &str, content: impl Into<Bytes>) -> Result<ItemModel, TransportError> {
        let root = self.root_id.clone();
        let mut item = self.create_child(&root, name, ItemKind::File, false)?;
        let content: Bytes = content.into();
        item.size = content.len() as u64;
        let id: Arc<str> = Arc::from(item.id.as_str());
        self.contents.insert(id.clone(), content.to_vec());
        self.items.insert(id, item.clone());
        Ok(item)
    }

    /// Current content of a file, if it exists.
    pub fn content(&self, id: &str) -> Option<Bytes> {
        self.contents
            .get(id)
            .map(|c| Bytes::copy_from_slice(c.value()))
    }

    /// Looks up a live upload session by id.
    pub fn session(&self, id: &str) -> Option<UploadSession> {
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .filter(|s| !s.is_expired())
    }

    /// Returns every accepted range upload, in arrival order.
    pub fn put_log(&self) -> Vec<ContentRange> {
        self.put_log.lock().clone()
    }

    pub fn clear_put_log(&self) {
        self.put_log.lock().clear();
    }

    /// Makes the next `count` range uploads fail.
    pub fn fail_next_puts(&self, count: usize) {
        self.fail_next_puts.store(count, Ordering::SeqCst);
    }

    /// Makes the next range upload starting at `offset` fail once.
    pub fn fail_once_at(&self, offset: u64) {
        self.fail_once_at.lock().insert(offset);
    }

    /// Delays every range upload, to keep uploads in flight.
    pub fn set_put_delay(&self, delay: Option<std::time::Duration>) {
        *self.put_delay.lock() = delay;
    }

    fn injected_failure(&self, range: &ContentRange) -> Option<TransportError> {
        let forced = self
            .fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced || self.fail_once_at.lock().remove(&range.start()) {
            return Some(TransportError::Injected(format!(
                "upload of {} rejected",
                range
            )));
        }
        None
    }

    fn create_child(
        &self,
        parent_id: &str,
        name: &str,
        kind: ItemKind,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        if name.is_empty() || name.contains('/') {
            return Err(TransportError::InvalidArgument(format!(
                "invalid item name {:?}",
                name
            )));
        }

        let parent = self.get_item_sync(parent_id)?;
        if !parent.is_folder() {
            return Err(TransportError::InvalidArgument(format!(
                "{} is not a folder",
                parent_id
            )));
        }
        if overwrite {
            self.remove_child_named(parent_id, name);
        }

        let mut siblings = self
            .children
            .get_mut(parent_id)
            .ok_or_else(|| TransportError::NotFound(parent_id.to_string()))?;
        let clash = siblings
            .iter()
            .filter_map(|id| self.items.get(id))
            .any(|item| item.name == name);
        if clash {
            return Err(TransportError::AlreadyExists(name.to_string()));
        }

        let item = ItemModel::new(name, kind, Some(parent.id.clone()));
        let id: Arc<str> = Arc::from(item.id.as_str());
        siblings.insert(id.clone());
        drop(siblings);

        match kind {
            ItemKind::File => {
                self.contents.insert(id.clone(), Vec::new());
            }
            ItemKind::Folder => {
                self.children.insert(id.clone(), HashSet::new());
            }
        }
        self.items.insert(id, item.clone());

        debug!("Created {} {} under {}", kind.as_str(), name, parent_id);
        Ok(item)
    }

    /// Id of the child of `parent_id` called `name`, if any.
    fn child_named(&self, parent_id: &str, name: &str) -> Option<Arc<str>> {
        let kids = self.children.get(parent_id)?;
        let found = kids
            .iter()
            .find(|kid| self.items.get(*kid).map_or(false, |item| item.name == name))
            .cloned();
        found
    }

    fn remove_child_named(&self, parent_id: &str, name: &str) {
        if let Some(existing) = self.child_named(parent_id, name) {
            if let Some(mut siblings) = self.children.get_mut(parent_id) {
                siblings.remove(&existing);
            }
            self.remove_tree(&existing);
            debug!("Replaced {} under {}", name, parent_id);
        }
    }

    /// True if `id` is `ancestor` or lies somewhere below it.
    fn is_within(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id.to_string());
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.items.get(cur.as_str()).and_then(|item| item.parent_id.clone());
        }
        false
    }

    /// Rejects placing `source` at `dest_parent_id/name`: a folder cannot go
    /// below itself, and overwriting must not delete the source.
    fn check_destination(
        &self,
        source: &ItemModel,
        dest_parent_id: &str,
        name: &str,
        overwrite: bool,
    ) -> Result<(), TransportError> {
        self.get_item_sync(dest_parent_id)?;
        if self.is_within(dest_parent_id, &source.id) {
            return Err(TransportError::InvalidArgument(format!(
                "{} cannot be placed inside itself",
                source.id
            )));
        }
        if overwrite {
            if let Some(existing) = self.child_named(dest_parent_id, name) {
                if self.is_within(&source.id, &existing) {
                    return Err(TransportError::InvalidArgument(format!(
                        "replacing {} would delete {}",
                        name, source.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn get_item_sync(&self, id: &str) -> Result<ItemModel, TransportError> {
        self.items
            .get(id)
            .map(|item| item.clone())
            .ok_or_else(|| TransportError::NotFound(id.to_string()))
    }

    fn remove_tree(&self, id: &str) {
        let kids: Vec<Arc<str>> = self
            .children
            .remove(id)
            .map(|(_, kids)| kids.into_iter().collect())
            .unwrap_or_default();
        for kid in kids {
            self.remove_tree(&kid);
        }
        self.contents.remove(id);
        self.items.remove(id);
        self.sessions.retain(|_, session| session.item_id != id);
    }

    fn copy_tree(
        &self,
        source: &ItemModel,
        dest_parent_id: &str,
        name: &str,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        let kids: Vec<Arc<str>> = self
            .children
            .get(source.id.as_str())
            .map(|kids| kids.iter().cloned().collect())
            .unwrap_or_default();

        let mut copy = self.create_child(dest_parent_id, name, source.kind, overwrite)?;

        match source.kind {
            ItemKind::File => {
                let content = self
                    .contents
                    .get(source.id.as_str())
                    .map(|c| c.value().clone())
                    .unwrap_or_default();
                copy.size = content.len() as u64;
                self.contents.insert(Arc::from(copy.id.as_str()), content);
                self.items.insert(Arc::from(copy.id.as_str()), copy.clone());
            }
            ItemKind::Folder => {
                for kid in kids {
                    let kid = self.get_item_sync(&kid)?;
                    self.copy_tree(&kid, &copy.id, &kid.name, false)?;
                }
            }
        }
        Ok(copy)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteObjectStore for MemoryObjectStore {
    async fn get_item(&self, id: &str) -> Result<ItemModel, TransportError> {
        self.get_item_sync(id)
    }

    async fn read_content(&self, id: &str) -> Result<Bytes, TransportError> {
        let item = self.get_item_sync(id)?;
        if item.is_folder() {
            return Err(TransportError::InvalidArgument(format!(
                "{} is a folder",
                id
            )));
        }
        Ok(self.content(id).unwrap_or_default())
    }

    async fn open_upload_session(&self, id: &str) -> Result<UploadSession, TransportError> {
        let item = self.get_item_sync(id)?;
        if item.is_folder() {
            return Err(TransportError::InvalidArgument(format!(
                "cannot upload into folder {}",
                id
            )));
        }

        let session = UploadSession::new(id, self.session_ttl);
        self.sessions
            .insert(Arc::from(session.id.as_str()), session.clone());
        debug!("Opened upload session {} for {}", session.id, id);
        Ok(session)
    }

    async fn put_range(
        &self,
        session: &UploadSession,
        range: ContentRange,
        data: Bytes,
    ) -> Result<(), TransportError> {
        let delay = *self.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let known = self
            .sessions
            .get(session.id.as_str())
            .map(|s| s.clone())
            .filter(|s| !s.is_expired() && s.item_id == session.item_id)
            .ok_or_else(|| TransportError::SessionNotFound(session.id.clone()))?;

        if range.len() != data.len() as u64 {
            return Err(TransportError::InvalidRange(format!(
                "{} does not match a body of {} bytes",
                range,
                data.len()
            )));
        }

        if let Some(err) = self.injected_failure(&range) {
            return Err(err);
        }

        let total = usize::try_from(range.total())
            .map_err(|_| TransportError::InvalidRange(range.to_header()))?;
        let start = range.start() as usize;
        {
            let mut content = self
                .contents
                .get_mut(known.item_id.as_str())
                .ok_or_else(|| TransportError::NotFound(known.item_id.clone()))?;
            content.resize(total, 0);
            content[start..start + data.len()].copy_from_slice(&data);
        }

        if let Some(mut item) = self.items.get_mut(known.item_id.as_str()) {
            item.size = range.total();
            item.touch();
        }
        self.put_log.lock().push(range);

        debug!("Accepted {} for {}", range, known.item_id);
        Ok(())
    }

    async fn list_children(&self, id: &str) -> Result<Vec<ItemModel>, TransportError> {
        let item = self.get_item_sync(id)?;
        if !item.is_folder() {
            return Err(TransportError::InvalidArgument(format!(
                "{} is not a folder",
                id
            )));
        }

        let mut kids: Vec<ItemModel> = self
            .children
            .get(id)
            .map(|kids| {
                kids.iter()
                    .filter_map(|kid| self.items.get(kid).map(|k| k.clone()))
                    .collect()
            })
            .unwrap_or_default();
        kids.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(kids)
    }

    async fn create_item(
        &self,
        parent_id: &str,
        name: &str,
        kind: ItemKind,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        self.create_child(parent_id, name, kind, overwrite)
    }

    async fn delete_item(&self, id: &str) -> Result<(), TransportError> {
        if id == &*self.root_id {
            return Err(TransportError::InvalidArgument(
                "the root folder cannot be deleted".to_string(),
            ));
        }
        let item = self.get_item_sync(id)?;
        if let Some(parent) = item.parent_id.as_deref() {
            if let Some(mut siblings) = self.children.get_mut(parent) {
                siblings.remove(id);
            }
        }
        self.remove_tree(id);
        debug!("Deleted {}", id);
        Ok(())
    }

    async fn copy_item(
        &self,
        id: &str,
        dest_parent_id: &str,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        let source = self.get_item_sync(id)?;
        let name = name.unwrap_or(&source.name).to_string();
        self.check_destination(&source, dest_parent_id, &name, overwrite)?;
        self.copy_tree(&source, dest_parent_id, &name, overwrite)
    }

    async fn move_item(
        &self,
        id: &str,
        dest_parent_id: &str,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        if id == &*self.root_id {
            return Err(TransportError::InvalidArgument(
                "the root folder cannot be moved".to_string(),
            ));
        }
        let source = self.get_item_sync(id)?;
        let name = name.unwrap_or(&source.name).to_string();
        if source.parent_id.as_deref() == Some(dest_parent_id) && source.name == name {
            return Ok(source);
        }
        self.check_destination(&source, dest_parent_id, &name, overwrite)?;
        if !self.get_item_sync(dest_parent_id)?.is_folder() {
            return Err(TransportError::InvalidArgument(format!(
                "{} is not a folder",
                dest_parent_id
            )));
        }
        if overwrite {
            self.remove_child_named(dest_parent_id, &name);
        }

        let key: Arc<str> = Arc::from(id);
        {
            let mut siblings = self
                .children
                .get_mut(dest_parent_id)
                .ok_or_else(|| TransportError::NotFound(dest_parent_id.to_string()))?;
            let clash = siblings
                .iter()
                .filter_map(|kid| self.items.get(kid))
                .any(|item| item.name == name);
            if clash {
                return Err(TransportError::AlreadyExists(name));
            }
            siblings.insert(key.clone());
        }
        if let Some(old_parent) = source.parent_id.as_deref().filter(|&p| p != dest_parent_id) {
            if let Some(mut siblings) = self.children.get_mut(old_parent) {
                siblings.remove(&key);
            }
        }

        let mut item = self
            .items
            .get_mut(id)
            .ok_or_else(|| TransportError::NotFound(id.to_string()))?;
        item.parent_id = Some(dest_parent_id.to_string());
        item.name = name;
        item.touch();
        debug!("Moved {} to {}", id, dest_parent_id);
        Ok(item.clone())
    }

    async fn get_root(&self) -> Result<ItemModel, TransportError> {
        self.get_item_sync(&self.root_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_out_of_order_ranges_assemble() {
        let store = MemoryObjectStore::new();
        let item = store.insert_file("a.bin", Vec::new()).unwrap();
        let session = store.open_upload_session(&item.id).await.unwrap();

        store
            .put_range(&session, ContentRange::new(5, 9, 10).unwrap(), Bytes::from_static(b"world"))
            .await
            .unwrap();
        store
            .put_range(&session, ContentRange::new(0, 4, 10).unwrap(), Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(store.content(&item.id).unwrap(), Bytes::from_static(b"helloworld"));
        assert_eq!(store.get_item(&item.id).await.unwrap().size, 10);
        assert_eq!(store.put_log().len(), 2);
    }

    #[tokio::test]
    async fn test_body_length_must_match_range() {
        let store = MemoryObjectStore::new();
        let item = store.insert_file("a.bin", Vec::new()).unwrap();
        let session = store.open_upload_session(&item.id).await.unwrap();

        let err = store
            .put_range(&session, ContentRange::new(0, 4, 5).unwrap(), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let store = MemoryObjectStore::with_session_ttl(Duration::seconds(-1));
        let item = store.insert_file("a.bin", Vec::new()).unwrap();
        let session = store.open_upload_session(&item.id).await.unwrap();

        let err = store
            .put_range(&session, ContentRange::new(0, 0, 1).unwrap(), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryObjectStore::new();
        let item = store.insert_file("a.bin", Vec::new()).unwrap();
        let session = store.open_upload_session(&item.id).await.unwrap();
        let range = ContentRange::new(0, 0, 1).unwrap();

        store.fail_next_puts(1);
        assert!(store.put_range(&session, range, Bytes::from_static(b"x")).await.is_err());
        assert!(store.put_range(&session, range, Bytes::from_static(b"x")).await.is_ok());

        store.fail_once_at(0);
        assert!(store.put_range(&session, range, Bytes::from_static(b"x")).await.is_err());
        assert!(store.put_range(&session, range, Bytes::from_static(b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_folder_operations() {
        let store = MemoryObjectStore::new();
        let root = store.root_id().to_string();

        let docs = store.create_item(&root, "docs", ItemKind::Folder, false).await.unwrap();
        store.create_item(&docs.id, "b.txt", ItemKind::File, false).await.unwrap();
        store.create_item(&docs.id, "a.txt", ItemKind::File, false).await.unwrap();

        let err = store
            .create_item(&docs.id, "a.txt", ItemKind::File, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AlreadyExists(_)));

        let names: Vec<String> = store
            .list_children(&docs.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let copy = store.copy_item(&docs.id, &root, Some("docs2"), false).await.unwrap();
        assert_eq!(store.list_children(&copy.id).await.unwrap().len(), 2);

        store.delete_item(&docs.id).await.unwrap();
        assert!(matches!(
            store.get_item(&docs.id).await,
            Err(TransportError::NotFound(_))
        ));
        let names: Vec<String> = store
            .list_children(&root)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["docs2"]);
    }

    #[tokio::test]
    async fn test_copy_file_duplicates_content() {
        let store = MemoryObjectStore::new();
        let root = store.root_id().to_string();
        let item = store.insert_file("src.bin", b"payload".to_vec()).unwrap();

        let copy = store.copy_item(&item.id, &root, Some("dst.bin"), false).await.unwrap();
        assert_eq!(copy.size, 7);
        assert_eq!(
            store.read_content(&copy.id).await.unwrap(),
            Bytes::from_static(b"payload")
        );
    }

    #[tokio::test]
    async fn test_copy_into_own_subtree_rejected() {
        let store = MemoryObjectStore::new();
        let root = store.root_id().to_string();
        let a = store.create_item(&root, "a", ItemKind::Folder, false).await.unwrap();
        let b = store.create_item(&a.id, "b", ItemKind::Folder, false).await.unwrap();

        for dest in [&b.id, &a.id] {
            let err = store.copy_item(&a.id, dest, None, false).await.unwrap_err();
            assert!(matches!(err, TransportError::InvalidArgument(_)));
            let err = store.move_item(&a.id, dest, Some("moved"), false).await.unwrap_err();
            assert!(matches!(err, TransportError::InvalidArgument(_)));
        }
        assert!(store.list_children(&b.id).await.unwrap().is_empty());

        // A sibling destination is fine.
        let c = store.create_item(&root, "c", ItemKind::Folder, false).await.unwrap();
        let copy = store.copy_item(&a.id, &c.id, None, false).await.unwrap();
        assert_eq!(store.list_children(&copy.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_existing() {
        let store = MemoryObjectStore::new();
        let root = store.root_id().to_string();
        let old = store.insert_file("x.bin", b"old".to_vec()).unwrap();

        let fresh = store.create_item(&root, "x.bin", ItemKind::File, true).await.unwrap();
        assert_ne!(fresh.id, old.id);
        assert!(store.get_item(&old.id).await.is_err());
        assert!(store.read_content(&fresh.id).await.unwrap().is_empty());

        let src = store.insert_file("src.bin", b"new".to_vec()).unwrap();
        let err = store
            .copy_item(&src.id, &root, Some("x.bin"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AlreadyExists(_)));
        let copy = store.copy_item(&src.id, &root, Some("x.bin"), true).await.unwrap();
        assert_eq!(store.content(&copy.id).unwrap(), Bytes::from_static(b"new"));
        assert!(store.get_item(&fresh.id).await.is_err());

        // Overwriting the source with itself would delete it.
        let err = store
            .copy_item(&src.id, &root, None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_move_reparents_and_renames() {
        let store = MemoryObjectStore::new();
        let root = store.root_id().to_string();
        let docs = store.create_item(&root, "docs", ItemKind::Folder, false).await.unwrap();
        let file = store.insert_file("a.txt", b"hi".to_vec()).unwrap();

        let moved = store
            .move_item(&file.id, &docs.id, Some("b.txt"), false)
            .await
            .unwrap();
        assert_eq!(moved.id, file.id);
        assert_eq!(moved.name, "b.txt");
        assert_eq!(moved.parent_id.as_deref(), Some(docs.id.as_str()));
        assert_eq!(store.list_children(&docs.id).await.unwrap().len(), 1);
        assert_eq!(store.list_children(&root).await.unwrap().len(), 1);
        assert_eq!(store.content(&file.id).unwrap(), Bytes::from_static(b"hi"));

        let parent = store.get_parent(&file.id).await.unwrap().unwrap();
        assert_eq!(parent.id, docs.id);
        assert!(store.get_parent(&root).await.unwrap().is_none());
        assert_eq!(store.get_root().await.unwrap().id, root);

        // Rename in place keeps the item listed once.
        store.move_item(&file.id, &docs.id, Some("c.txt"), false).await.unwrap();
        let names: Vec<String> = store
            .list_children(&docs.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["c.txt"]);

        let other = store.create_item(&root, "c.txt", ItemKind::File, false).await.unwrap();
        let err = store.move_item(&other.id, &docs.id, None, false).await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyExists(_)));
        store.move_item(&other.id, &docs.id, None, true).await.unwrap();
        assert!(store.get_item(&file.id).await.is_err());

        let err = store.move_item(&root, &docs.id, None, false).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidArgument(_)));
    }
}
