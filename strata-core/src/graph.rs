//! In-memory object table and edge indices.
//!
//! Objects live in an id-indexed map. Edges are kept twice: downstream
//! (`consumes`) as the authoritative list persisted with each object, and
//! upstream (`clients`) as a derived index so destroy can check for users
//! without a scan.

use crate::types::{LifecycleState, ObjectId, ObjectImage, ObjectKind, StorageObject};
use std::collections::{BTreeMap, BTreeSet};

/// Object table with adjacency lists.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: BTreeMap<ObjectId, StorageObject>,
    consumes: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
    clients: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
}

impl ObjectGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from live-region images.
    pub fn from_images(images: impl IntoIterator<Item = ObjectImage>) -> Self {
        let mut graph = Self::new();
        for image in images {
            graph.install(image);
        }
        graph
    }

    /// Object by id, whatever its state.
    pub fn get(&self, id: ObjectId) -> Option<&StorageObject> {
        self.objects.get(&id)
    }

    /// Object by id if lookups may see it.
    pub fn visible(&self, id: ObjectId) -> Option<&StorageObject> {
        self.objects.get(&id).filter(|o| o.state.is_visible())
    }

    /// Mutable object by id.
    pub(crate) fn get_mut(&mut self, id: ObjectId) -> Option<&mut StorageObject> {
        self.objects.get_mut(&id)
    }

    /// Visible object of `kind` carrying `number`.
    pub fn by_number(&self, kind: ObjectKind, number: u32) -> Option<&StorageObject> {
        self.objects
            .values()
            .find(|o| o.kind() == kind && o.number == Some(number) && o.state.is_visible())
    }

    /// Visible objects in id order.
    pub fn iter_visible(&self) -> impl Iterator<Item = &StorageObject> {
        self.objects.values().filter(|o| o.state.is_visible())
    }

    /// Number of stored objects, including tentative ones.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects `id` consumes.
    pub fn consumes_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.consumes
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Objects consuming `id`.
    pub fn clients_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.clients
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `from` consumes `to`.
    pub fn has_edge(&self, from: ObjectId, to: ObjectId) -> bool {
        self.consumes.get(&from).is_some_and(|set| set.contains(&to))
    }

    /// Absolute image of `id` as currently held.
    pub fn image(&self, id: ObjectId) -> Option<ObjectImage> {
        self.objects.get(&id).map(|object| ObjectImage {
            object: object.clone(),
            consumes: self.consumes_of(id),
        })
    }

    /// Lowest id in `1..limit` not held by any object.
    pub fn lowest_free_id(&self, limit: u32) -> Option<ObjectId> {
        (1..limit)
            .map(ObjectId::new)
            .find(|id| !self.objects.contains_key(id))
    }

    /// Add `from -> to`.
    pub(crate) fn link(&mut self, from: ObjectId, to: ObjectId) {
        self.consumes.entry(from).or_default().insert(to);
        self.clients.entry(to).or_default().insert(from);
    }

    /// Remove `from -> to`.
    pub(crate) fn unlink(&mut self, from: ObjectId, to: ObjectId) {
        if let Some(set) = self.consumes.get_mut(&from) {
            set.remove(&to);
            if set.is_empty() {
                self.consumes.remove(&from);
            }
        }
        if let Some(set) = self.clients.get_mut(&to) {
            set.remove(&from);
            if set.is_empty() {
                self.clients.remove(&to);
            }
        }
    }

    /// Replace the entry of an object with `image`, edges included.
    pub fn install(&mut self, image: ObjectImage) {
        let id = image.id();
        for to in self.consumes_of(id) {
            self.unlink(id, to);
        }
        for to in image.consumes {
            self.link(id, to);
        }
        self.objects.insert(id, image.object);
    }

    /// Drop an object and its downstream edges.
    ///
    /// Upstream edges are left to their owners, whose own images carry them.
    pub fn remove(&mut self, id: ObjectId) -> Option<StorageObject> {
        for to in self.consumes_of(id) {
            self.unlink(id, to);
        }
        self.objects.remove(&id)
    }

    /// Move every `Creating` object to `Ready` and drop `Destroying` ones.
    pub(crate) fn finalize(&mut self, touched: impl IntoIterator<Item = ObjectId>) {
        for id in touched {
            match self.objects.get(&id).map(|o| o.state) {
                Some(LifecycleState::Creating) => {
                    if let Some(object) = self.objects.get_mut(&id) {
                        object.state = LifecycleState::Ready;
                    }
                }
                Some(LifecycleState::Destroying) => {
                    self.remove(id);
                }
                _ => {}
            }
        }
    }

    /// Edges with an endpoint that is not stored. Empty for a closed graph.
    pub fn dangling_edges(&self) -> Vec<(ObjectId, ObjectId)> {
        let mut dangling = Vec::new();
        for (from, set) in &self.consumes {
            for to in set {
                if !self.objects.contains_key(from) || !self.objects.contains_key(to) {
                    dangling.push((*from, *to));
                }
            }
        }
        dangling
    }
}
