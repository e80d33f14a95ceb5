//! The virtual directory tree over a container's flat item list.
//!
//! Codecs report items by index with full paths; nothing in that shape is a
//! hierarchy. [`Tree::build`] turns it into one: an arena of entries with
//! final ids handed out at allocation time, directories synthesized for
//! every path component no item accounts for, and a sorted permutation over
//! (parent, directories-first, case-folded name) that answers both "list the
//! children of X" and "find child Y under X" by binary search.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::codec::{ArchiveReader, ItemProperty, PropertyValue};
use crate::entry::{Attributes, Entry, EntryId};
use crate::error::{Error, Result};
use crate::path::split_components;

pub struct Tree {
    entries: Vec<Entry>,
    /// Permutation of all entry ids in the total order; rebuilt whole
    /// whenever the entry list changes, never patched.
    sorted: Vec<EntryId>,
    /// Codec item index -> entry id.
    items: Vec<EntryId>,
}

impl Tree {
    pub fn build(reader: &dyn ArchiveReader) -> Result<Tree> {
        let count = reader.item_count()?;
        let archive_created = archive_time(reader, ItemProperty::Created)?;
        let archive_modified = archive_time(reader, ItemProperty::Modified)?;
        let archive_accessed = archive_time(reader, ItemProperty::Accessed)?;

        let mut entries: Vec<Entry> = Vec::with_capacity(count as usize);
        let mut items: Vec<EntryId> = Vec::with_capacity(count as usize);
        // (parent, folded name) -> directory id, so shared path prefixes and
        // explicit directory items land on a single record
        let mut directories: BTreeMap<(Option<EntryId>, String), EntryId> = BTreeMap::new();

        for index in 0..count {
            let path = match reader.item_property(index, ItemProperty::Path)? {
                Some(PropertyValue::Str(path)) => path,
                _ => placeholder_name(index),
            };
            let explicit_directory = reader
                .item_property(index, ItemProperty::IsDirectory)?
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            let mut attributes = Attributes::from_bits(
                item_u32(reader, index, ItemProperty::Attributes)?.unwrap_or(0),
            );
            let size = item_u64(reader, index, ItemProperty::Size)?.unwrap_or(0);
            let packed_size = item_u64(reader, index, ItemProperty::PackedSize)?.unwrap_or(0);
            let created = item_time(reader, index, ItemProperty::Created)?.or(archive_created);
            let modified = item_time(reader, index, ItemProperty::Modified)?.or(archive_modified);
            let accessed = item_time(reader, index, ItemProperty::Accessed)?.or(archive_accessed);

            let is_directory = explicit_directory || attributes.is_directory();
            if is_directory {
                attributes.insert(Attributes::DIRECTORY);
            }

            let fallback: String;
            let mut components: Vec<&str> = split_components(&path).collect();
            if components.is_empty() {
                fallback = placeholder_name(index);
                components.push(&fallback);
            }

            let mut parent: Option<EntryId> = None;
            for component in &components[..components.len() - 1] {
                parent = Some(intern_directory(
                    &mut entries,
                    &mut directories,
                    parent,
                    component,
                ));
            }
            let leaf = components[components.len() - 1];

            let id = if is_directory {
                // an explicit directory item reuses the synthesized record
                // when one already exists, enriched in place
                let id = intern_directory(&mut entries, &mut directories, parent, leaf);
                let entry = &mut entries[id.0 as usize];
                entry.name = leaf.to_string();
                entry.attributes = attributes;
                entry.size = size;
                entry.packed_size = packed_size;
                entry.created = created;
                entry.modified = modified;
                entry.accessed = accessed;
                entry.codec_item = Some(index);
                id
            } else {
                let id = EntryId::new(entries.len());
                entries.push(Entry {
                    name: leaf.to_string(),
                    parent,
                    attributes,
                    size,
                    packed_size,
                    created,
                    modified,
                    accessed,
                    codec_item: Some(index),
                });
                id
            };
            items.push(id);
        }

        let mut sorted: Vec<EntryId> = (0..entries.len()).map(EntryId::new).collect();
        sorted.sort_by_cached_key(|id| sort_key(&entries, *id));

        tracing::debug!(
            items = count,
            entries = entries.len(),
            synthesized = entries.iter().filter(|e| e.codec_item.is_none()).count(),
            "built virtual index"
        );

        Ok(Tree {
            entries,
            sorted,
            items,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id.0 as usize]
    }

    /// The entry a codec item landed on, if the index is in range.
    pub fn entry_for_item(&self, item: u32) -> Option<EntryId> {
        self.items.get(item as usize).copied()
    }

    /// Direct children of `parent` (`None` is the root): a contiguous slice
    /// of the sort index, directories before files, each group
    /// case-insensitively ordered by name.
    pub fn children(&self, parent: Option<EntryId>) -> &[EntryId] {
        let low = self
            .sorted
            .partition_point(|&id| self.entries[id.0 as usize].parent < parent);
        let high = self
            .sorted
            .partition_point(|&id| self.entries[id.0 as usize].parent <= parent);
        &self.sorted[low..high]
    }

    /// Resolve a slash- (or backslash-)delimited path to an entry.
    /// Intermediate components must name directories; the final component
    /// may name either, with a directory winning a name tie.
    pub fn resolve(&self, path: &str) -> Result<EntryId> {
        let components: Vec<&str> = split_components(path).collect();
        if components.is_empty() {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }

        let mut parent: Option<EntryId> = None;
        for (position, component) in components.iter().enumerate() {
            let folded = fold(component);
            let last = position + 1 == components.len();
            let next = self.find_child(parent, true, &folded).or_else(|| {
                if last {
                    self.find_child(parent, false, &folded)
                } else {
                    None
                }
            });
            match next {
                Some(id) => parent = Some(id),
                None => {
                    return Err(Error::NotFound {
                        path: path.to_string(),
                    })
                }
            }
        }
        Ok(parent.expect("resolved at least one component"))
    }

    /// Path components from just below `base` down to `id`, by walking
    /// parent references. `None` when `id` is not a proper descendant.
    pub fn relative_components(&self, id: EntryId, base: Option<EntryId>) -> Option<Vec<&str>> {
        let mut components = Vec::new();
        let mut cursor = Some(id);
        while cursor != base {
            let current = cursor?;
            let entry = self.entry(current);
            components.push(entry.name.as_str());
            cursor = entry.parent;
        }
        if components.is_empty() {
            return None;
        }
        components.reverse();
        Some(components)
    }

    /// One `equal_range` probe with a synthetic (parent, kind, name) key;
    /// the first element of a non-empty range is the match.
    fn find_child(&self, parent: Option<EntryId>, directory: bool, folded: &str) -> Option<EntryId> {
        let low = self.sorted.partition_point(|&id| {
            let key = sort_key(&self.entries, id);
            (key.0, key.1, key.2.as_str()) < (parent, !directory, folded)
        });
        let candidate = *self.sorted.get(low)?;
        let key = sort_key(&self.entries, candidate);
        if (key.0, key.1, key.2.as_str()) == (parent, !directory, folded) {
            Some(candidate)
        } else {
            None
        }
    }
}

/// The total order behind the sort index: parent, then directories before
/// files, then case-folded name.
fn sort_key(entries: &[Entry], id: EntryId) -> (Option<EntryId>, bool, String) {
    let entry = &entries[id.0 as usize];
    (entry.parent, !entry.is_directory(), fold(&entry.name))
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

fn placeholder_name(index: u32) -> String {
    format!("item{:05}", index)
}

fn intern_directory(
    entries: &mut Vec<Entry>,
    directories: &mut BTreeMap<(Option<EntryId>, String), EntryId>,
    parent: Option<EntryId>,
    name: &str,
) -> EntryId {
    let key = (parent, fold(name));
    if let Some(&id) = directories.get(&key) {
        return id;
    }
    let id = EntryId::new(entries.len());
    entries.push(Entry::synthesized_directory(name.to_string(), parent));
    directories.insert(key, id);
    id
}

fn item_u32(reader: &dyn ArchiveReader, index: u32, property: ItemProperty) -> Result<Option<u32>> {
    Ok(reader
        .item_property(index, property)?
        .and_then(|value| value.as_u32()))
}

fn item_u64(reader: &dyn ArchiveReader, index: u32, property: ItemProperty) -> Result<Option<u64>> {
    Ok(reader
        .item_property(index, property)?
        .and_then(|value| value.as_u64()))
}

fn item_time(
    reader: &dyn ArchiveReader,
    index: u32,
    property: ItemProperty,
) -> Result<Option<SystemTime>> {
    Ok(reader
        .item_property(index, property)?
        .and_then(|value| value.as_time()))
}

fn archive_time(reader: &dyn ArchiveReader, property: ItemProperty) -> Result<Option<SystemTime>> {
    Ok(reader
        .archive_property(property)?
        .and_then(|value| value.as_time()))
}
