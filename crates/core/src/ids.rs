use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a dialog: `selfId` plus the `rootId` of the tree it belongs to.
///
/// A dialog is a root iff `self_id == root_id`. Identity never changes once a
/// dialog is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub self_id: Uuid,
    pub root_id: Uuid,
}

impl DialogId {
    pub fn new_root() -> Self {
        let id = Uuid::new_v4();
        Self { self_id: id, root_id: id }
    }

    pub fn new_sub(root_id: Uuid) -> Self {
        Self { self_id: Uuid::new_v4(), root_id }
    }

    pub fn is_root(&self) -> bool {
        self.self_id == self.root_id
    }

    pub fn key(&self) -> DialogKey {
        DialogKey { root: self.root_id, self_id: self.self_id }
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root_id, self.self_id)
    }
}

/// Lookup key for lock tables and registries. `Copy` so it can be used freely
/// as a map key without cloning a `DialogId` around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DialogKey {
    pub root: Uuid,
    pub self_id: Uuid,
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root, self.self_id)
    }
}

impl From<DialogId> for DialogKey {
    fn from(id: DialogId) -> Self {
        id.key()
    }
}

/// Distinct callId allocated by the tellask stream parser for every collected
/// call, before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
