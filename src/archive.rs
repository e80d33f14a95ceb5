//! An open container session.
//!
//! Owns the reader for the innermost detected layer and the lazily built
//! virtual tree over it. The tree belongs to this session alone: closing or
//! reopening the container discards it, and the next navigation call builds
//! it afresh.

use crate::codec::ExtractMode;
use crate::detect::DetectedChain;
use crate::entry::{Entry, EntryId};
use crate::error::Result;
use crate::extract::{self, ExtractOptions};
use crate::policy::{ErrorLog, InteractionHandler};
use crate::tree::Tree;

pub struct Archive {
    chain: DetectedChain,
    tree: Option<Tree>,
}

impl Archive {
    pub fn new(chain: DetectedChain) -> Archive {
        Archive { chain, tree: None }
    }

    /// The detected format chain, outermost first.
    pub fn formats(&self) -> &[crate::codec::FormatId] {
        &self.chain.formats
    }

    /// Resolve an archive-internal path to an entry.
    pub fn resolve(&mut self, path: &str) -> Result<EntryId> {
        self.ensure_tree()?.resolve(path)
    }

    /// Direct children of `parent` (`None` is the root), directories first,
    /// both groups ordered case-insensitively by name.
    pub fn children(&mut self, parent: Option<EntryId>) -> Result<&[EntryId]> {
        Ok(self.ensure_tree()?.children(parent))
    }

    pub fn entry(&mut self, id: EntryId) -> Result<&Entry> {
        Ok(self.ensure_tree()?.entry(id))
    }

    /// Total number of entries, synthesized directories included.
    pub fn entry_count(&mut self) -> Result<usize> {
        Ok(self.ensure_tree()?.len())
    }

    /// Extract `selected` entries (directories expand to their file
    /// descendants) into `options.destination`, with paths taken relative
    /// to `base`. Per-file failures are collected into the returned log;
    /// only abort and fatal setup errors fail the call itself.
    pub fn extract(
        &mut self,
        base: Option<EntryId>,
        selected: &[EntryId],
        options: &ExtractOptions,
        ui: &mut dyn InteractionHandler,
    ) -> Result<ErrorLog> {
        self.ensure_tree()?;
        let tree = self.tree.as_ref().expect("tree just built");
        extract::run(
            self.chain.reader.as_mut(),
            tree,
            base,
            selected,
            options,
            ExtractMode::Extract,
            ui,
        )
    }

    /// Decode and verify `selected` without writing anything; corruption
    /// the codec reports lands in the returned log.
    pub fn verify(&mut self, selected: &[EntryId], ui: &mut dyn InteractionHandler) -> Result<ErrorLog> {
        self.ensure_tree()?;
        let tree = self.tree.as_ref().expect("tree just built");
        let options = ExtractOptions::new("");
        extract::run(
            self.chain.reader.as_mut(),
            tree,
            None,
            selected,
            &options,
            ExtractMode::Test,
            ui,
        )
    }

    /// Swap in a freshly opened chain (e.g. after an in-place update) and
    /// drop the stale tree.
    pub fn reopen(&mut self, chain: DetectedChain) {
        self.chain = chain;
        self.tree = None;
    }

    /// Drop the tree without reopening; the next navigation rebuilds it.
    pub fn invalidate_index(&mut self) {
        self.tree = None;
    }

    fn ensure_tree(&mut self) -> Result<&Tree> {
        if self.tree.is_none() {
            self.tree = Some(Tree::build(self.chain.reader.as_ref())?);
        }
        Ok(self.tree.as_ref().expect("tree just built"))
    }
}
