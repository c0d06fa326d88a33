use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use reel::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Object store kept in memory.
///
/// Listings come back shuffled unless [`InMemoryArtifactStore::ordered`]
/// was used, so callers cannot rely on store order.
#[derive(Clone, Debug)]
pub struct InMemoryArtifactStore {
    objects: Arc<Mutex<BTreeMap<ObjectRef, StoredObject>>>,
    public: Arc<Mutex<HashSet<ObjectRef>>>,
    shuffle: bool,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            public: Arc::new(Mutex::new(HashSet::new())),
            shuffle: true,
        }
    }

    /// Store whose listings are sorted by name.
    pub fn ordered() -> Self {
        Self {
            shuffle: false,
            ..Self::new()
        }
    }

    pub fn contains(&self, obj: &ObjectRef) -> bool {
        self.objects.lock().contains_key(obj)
    }

    pub fn content_type(&self, obj: &ObjectRef) -> Option<String> {
        self.objects
            .lock()
            .get(obj)
            .map(|stored| stored.content_type.clone())
    }

    pub fn is_public(&self, obj: &ObjectRef) -> bool {
        self.public.lock().contains(obj)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Store `obj` directly, bypassing any renderer.
    pub fn insert(&self, obj: ObjectRef, bytes: Vec<u8>) {
        self.objects.lock().insert(
            obj,
            StoredObject {
                bytes,
                content_type: "application/octet-stream".to_string(),
            },
        );
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn list(
        &self,
        bucket: &Bucket,
        prefix: &str,
    ) -> Result<Vec<ObjectRef>, ArtifactError> {
        let mut found: Vec<ObjectRef> = self
            .objects
            .lock()
            .keys()
            .filter(|obj| &obj.bucket == bucket && obj.name.starts_with(prefix))
            .cloned()
            .collect();
        if self.shuffle {
            found.shuffle(&mut rand::rng());
        }
        Ok(found)
    }

    async fn get(&self, obj: &ObjectRef) -> Result<Vec<u8>, ArtifactError> {
        self.objects
            .lock()
            .get(obj)
            .map(|stored| stored.bytes.clone())
            .ok_or_else(|| ArtifactError::Missing(obj.to_string()))
    }

    async fn put(
        &self,
        obj: &ObjectRef,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError> {
        self.objects.lock().insert(
            obj.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn make_public(&self, obj: &ObjectRef) -> Result<(), ArtifactError> {
        if !self.contains(obj) {
            return Err(ArtifactError::Missing(obj.to_string()));
        }
        self.public.lock().insert(obj.clone());
        Ok(())
    }
}
