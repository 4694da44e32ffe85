//! The manifest forest and its mutation operations

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::names;

/// File-specific metadata carried by file entries.
///
/// `chunk_count` is the only chunk-index bookkeeping that exists anywhere:
/// chunk addresses are recovered by iterating `[0, chunk_count)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Random uid feeding chunk addressing; lives only inside the manifest
    pub file_uid: String,
    pub size: u64,
    pub chunk_count: u32,
    pub mime_type: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File(FileMeta),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub name: String,
    /// `None` means the entry sits at the vault root
    pub parent: Option<Uuid>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl Entry {
    /// New folder entry; the name is truncated to the length limit.
    pub fn folder(name: &str, parent: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: names::truncate_name(name, false),
            parent,
            kind: EntryKind::Folder,
        }
    }

    /// New file entry; the name is truncated preserving its extension.
    pub fn file(name: &str, parent: Option<Uuid>, meta: FileMeta) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: names::truncate_name(name, true),
            parent,
            kind: EntryKind::File(meta),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, EntryKind::Folder)
    }

    pub fn file_meta(&self) -> Option<&FileMeta> {
        match &self.kind {
            EntryKind::File(meta) => Some(meta),
            EntryKind::Folder => None,
        }
    }
}

/// One element of a breadcrumb trail; the root crumb has `id == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crumb {
    pub id: Option<Uuid>,
    pub name: String,
}

/// The full entry set of a vault.
///
/// Serialized as one JSON document, encrypted, and replaced wholesale on
/// every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub entries: Vec<Entry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::empty()
    }
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            version: 1,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append-only union.
    pub fn add_entries(&mut self, entries: impl IntoIterator<Item = Entry>) {
        self.entries.extend(entries);
    }

    /// Remove the given ids and, for folders, all transitive descendants.
    ///
    /// Returns the removed *file* entries so the caller can delete their
    /// chunk blobs and adjust quota accounting. Unknown ids are no-ops.
    pub fn remove_entries(&mut self, ids: &[Uuid]) -> Vec<Entry> {
        // One children index per batch instead of repeated linear scans
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for entry in &self.entries {
            if let Some(parent) = entry.parent {
                children.entry(parent).or_default().push(entry.id);
            }
        }

        let mut doomed: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = ids.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !doomed.insert(id) {
                continue;
            }
            if let Some(kids) = children.get(&id) {
                queue.extend(kids.iter().copied());
            }
        }

        let mut removed_files = Vec::new();
        self.entries.retain(|entry| {
            if doomed.contains(&entry.id) {
                if !entry.is_folder() {
                    removed_files.push(entry.clone());
                }
                false
            } else {
                true
            }
        });
        removed_files
    }

    /// Replace an entry's name. Returns false when the id is unknown.
    pub fn rename_entry(&mut self, id: Uuid, new_name: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                let is_file = !entry.is_folder();
                entry.name = names::truncate_name(new_name, is_file);
                true
            }
            None => false,
        }
    }

    /// Re-parent an entry. Returns false when the id is unknown.
    pub fn move_entry(&mut self, id: Uuid, new_parent: Option<Uuid>) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.parent = new_parent;
                true
            }
            None => false,
        }
    }

    /// Collision-safe name among the siblings of `parent`.
    pub fn unique_name(&self, name: &str, parent: Option<Uuid>, is_folder: bool) -> String {
        let siblings = self
            .entries
            .iter()
            .filter(|e| e.parent == parent)
            .map(|e| e.name.as_str());
        names::unique_name(name, !is_folder, siblings)
    }

    /// Direct children of `parent`: folders first, then case-insensitive
    /// name order within each group.
    pub fn entries_in_folder(&self, parent: Option<Uuid>) -> Vec<&Entry> {
        let mut listing: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.parent == parent)
            .collect();
        listing.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        listing
    }

    /// Walk parent pointers from `folder_id` to the root, returning the
    /// trail root-first with a synthetic root crumb prepended.
    pub fn breadcrumb_path(&self, folder_id: Uuid) -> Vec<Crumb> {
        let mut trail = Vec::new();
        let mut cursor = Some(folder_id);
        // Step bound guards against malformed (cyclic) parent data
        let mut steps = self.entries.len() + 1;

        while let Some(id) = cursor {
            if steps == 0 {
                break;
            }
            steps -= 1;
            match self.get(id) {
                Some(entry) => {
                    trail.push(Crumb {
                        id: Some(entry.id),
                        name: entry.name.clone(),
                    });
                    cursor = entry.parent;
                }
                None => break,
            }
        }

        trail.push(Crumb {
            id: None,
            name: "Root".to_string(),
        });
        trail.reverse();
        trail
    }

    /// Defensive parent-chain walk; malformed data terminates at the step
    /// bound rather than looping.
    pub fn is_descendant_of(&self, id: Uuid, ancestor: Uuid) -> bool {
        let mut cursor = self.get(id).and_then(|e| e.parent);
        let mut steps = self.entries.len() + 1;

        while let Some(current) = cursor {
            if steps == 0 {
                return false;
            }
            steps -= 1;
            if current == ancestor {
                return true;
            }
            cursor = self.get(current).and_then(|e| e.parent);
        }
        false
    }

    /// Serialize to the JSON document that gets encrypted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
