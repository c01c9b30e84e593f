//! The fixed-stride multibit trie.
//!
//! Lookups never touch the btrie: every binding has been expanded into
//! the entries it covers, so a search is one indexed load per address
//! byte, remembering the deepest value seen. Blocks hold 256 entries and
//! are allocated and freed whole; every block except the root is owned
//! by exactly one parent entry's `base`.

use log::{debug, trace};

use crate::alloc::TableAlloc;
use crate::bits::is_stride_boundary;
use crate::errors::LpmError;
use crate::stats::TableStats;
use crate::BLOCK_ENTRIES;

//------------ MtrieEntry ----------------------------------------------------

pub(crate) struct MtrieEntry<T> {
    /// Expanded binding covering this entry, if any.
    pub(crate) value: Option<T>,
    /// The next-level block, present when some longer binding needs it.
    pub(crate) base: Option<Box<MtrieBlock<T>>>,
}

impl<T> MtrieEntry<T> {
    fn empty() -> Self {
        MtrieEntry {
            value: None,
            base: None,
        }
    }
}

//------------ MtrieBlock ----------------------------------------------------

pub(crate) struct MtrieBlock<T> {
    pub(crate) entries: [MtrieEntry<T>; BLOCK_ENTRIES],
}

impl<T> MtrieBlock<T> {
    pub(crate) fn zeroed() -> Self {
        MtrieBlock {
            entries: std::array::from_fn(|_| MtrieEntry::empty()),
        }
    }

    pub(crate) fn entry(&self, idx: u8) -> &MtrieEntry<T> {
        &self.entries[idx as usize]
    }

    pub(crate) fn entry_mut(&mut self, idx: u8) -> &mut MtrieEntry<T> {
        &mut self.entries[idx as usize]
    }
}

//------------ Mtrie ---------------------------------------------------------

pub(crate) struct Mtrie<T> {
    pub(crate) root: Box<MtrieBlock<T>>,
}

impl<T> Mtrie<T> {
    pub(crate) fn new<A: TableAlloc>(
        alloc: &mut A,
        stats: &mut TableStats,
    ) -> Result<Self, LpmError> {
        if alloc.mtrie_block().is_err() {
            stats.mtrie_alloc_failures += 1;
            return Err(LpmError::Resources);
        }
        stats.block_allocated();
        Ok(Mtrie {
            root: Box::new(MtrieBlock::zeroed()),
        })
    }

    /// Longest match walk. One entry per level: remember the value if
    /// the entry has one, follow `base` until it runs out.
    pub(crate) fn search<'a>(&'a self, addr: &[u8]) -> Option<&'a T> {
        let mut best = None;
        let mut block = &*self.root;
        for &idx in addr {
            let entry = block.entry(idx);
            if let Some(value) = entry.value.as_ref() {
                best = Some(value);
            }
            match entry.base.as_deref() {
                Some(next) => block = next,
                None => break,
            }
        }
        best
    }

    /// Writes `value` into every entry of `block` covered by a prefix
    /// whose last significant bit is `bitpos`; `idx` is the address byte
    /// for this level. A `None` value zeroes the range out.
    pub(crate) fn pattern_fill(
        block: &mut MtrieBlock<T>,
        idx: u8,
        bitpos: u8,
        value: Option<&T>,
    ) where
        T: Clone,
    {
        let mask: u8 = if is_stride_boundary(bitpos) {
            0xFF
        } else {
            let in_byte = (bitpos + 1) % 8;
            !((1u8 << (8 - in_byte)) - 1)
        };
        let start = (idx & mask) as usize;
        let end = (idx | !mask) as usize;

        trace!("pattern fill [{}..={}] at bitpos {}", start, end, bitpos);
        for entry in &mut block.entries[start..=end] {
            entry.value = value.cloned();
        }
    }

    /// Frees a detached block and everything below it, counting every
    /// block. Iterative, so the 16-deep worst case stays off the call
    /// stack.
    pub(crate) fn free_block<A: TableAlloc>(
        block: Box<MtrieBlock<T>>,
        alloc: &mut A,
        stats: &mut TableStats,
    ) {
        let mut work = vec![block];
        while let Some(mut block) = work.pop() {
            for entry in block.entries.iter_mut() {
                if let Some(child) = entry.base.take() {
                    work.push(child);
                }
            }
            stats.block_freed();
            alloc.release_mtrie_block();
        }
    }

    /// Unhooks and frees the block below the stride boundary at `bitpos`
    /// along `addr`.
    ///
    /// The caller has established that the btrie keeps nothing below
    /// that boundary anymore, so the block must not have sub-blocks of
    /// its own; one that does means the two tries disagree, and the
    /// error tells the table to quarantine itself.
    pub(crate) fn remove_block_below<A: TableAlloc>(
        &mut self,
        addr: &[u8],
        bitpos: u8,
        alloc: &mut A,
        stats: &mut TableStats,
    ) -> Result<(), LpmError> {
        debug_assert!(is_stride_boundary(bitpos));
        let levels = (bitpos >> 3) as usize + 1;

        let mut block = &mut *self.root;
        for level in 0..levels - 1 {
            block = match block.entry_mut(addr[level]).base.as_deref_mut() {
                Some(next) => next,
                // The chain is already gone; nothing to reclaim.
                None => return Ok(()),
            };
        }

        let entry = block.entry_mut(addr[levels - 1]);
        if let Some(sub) = entry.base.as_deref() {
            if sub.entries.iter().any(|e| e.base.is_some()) {
                debug!(
                    "sub-block below bitpos {} still has children",
                    bitpos
                );
                return Err(LpmError::Internal);
            }
        }
        if let Some(sub) = entry.base.take() {
            Self::free_block(sub, alloc, stats);
        }

        Ok(())
    }

    /// Frees everything below the root and accounts for the root block,
    /// which is dropped together with the table.
    pub(crate) fn teardown<A: TableAlloc>(
        &mut self,
        alloc: &mut A,
        stats: &mut TableStats,
    ) {
        for entry in self.root.entries.iter_mut() {
            entry.value = None;
            if let Some(child) = entry.base.take() {
                Self::free_block(child, alloc, stats);
            }
        }
        stats.block_freed();
        alloc.release_mtrie_block();
    }

    /// Logs the occupancy of every block, depth first.
    pub(crate) fn dump(&self, name: &str) {
        let mut work = vec![(&*self.root, 0usize)];
        while let Some((block, level)) = work.pop() {
            let values =
                block.entries.iter().filter(|e| e.value.is_some()).count();
            let children =
                block.entries.iter().filter(|e| e.base.is_some()).count();
            debug!(
                "[{}] mtrie block at level {}: {} values, {} sub-blocks",
                name, level, values, children
            );
            for entry in block.entries.iter() {
                if let Some(child) = entry.base.as_deref() {
                    work.push((child, level + 1));
                }
            }
        }
    }
}
