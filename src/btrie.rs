//! The 1-bit binary trie.
//!
//! The btrie is the authoritative record of which bindings exist and how
//! they nest; the mtrie is derived from it. One node per consumed
//! address bit, each node exclusively owned by its parent's child slot,
//! the root owned by the table.

use std::ops::ControlFlow;

use log::trace;

use crate::alloc::TableAlloc;
use crate::bits::{bit_at, clear_bit, set_bit};
use crate::errors::LpmError;
use crate::stats::TableStats;
use crate::MAX_LEVELS;

//------------ BtrieNode -----------------------------------------------------

pub(crate) struct BtrieNode<T> {
    /// The binding for the prefix this node spells out, if any.
    pub(crate) value: Option<T>,
    /// `children[0]` continues with a 0 bit, `children[1]` with a 1 bit.
    pub(crate) children: [Option<Box<BtrieNode<T>>>; 2],
}

impl<T> BtrieNode<T> {
    pub(crate) fn empty() -> Self {
        BtrieNode {
            value: None,
            children: [None, None],
        }
    }

    pub(crate) fn child(&self, bit: u8) -> Option<&BtrieNode<T>> {
        self.children[bit as usize].as_deref()
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children[0].is_none() && self.children[1].is_none()
    }
}

//------------ PathAdded -----------------------------------------------------

/// What [`Btrie::add_path`] did.
#[derive(Debug)]
pub(crate) struct PathAdded {
    /// Parent depth and branch bit of the topmost node appended by this
    /// call; `None` when the whole path already existed.
    pub(crate) appended: Option<(u8, u8)>,
}

impl PathAdded {
    /// The path was already fully present before the call.
    pub(crate) fn existed(&self) -> bool {
        self.appended.is_none()
    }
}

//------------ Btrie ---------------------------------------------------------

pub(crate) struct Btrie<T> {
    pub(crate) root: Box<BtrieNode<T>>,
}

impl<T> Btrie<T> {
    pub(crate) fn new<A: TableAlloc>(
        alloc: &mut A,
        stats: &mut TableStats,
    ) -> Result<Self, LpmError> {
        if alloc.btrie_node().is_err() {
            stats.btrie_alloc_failures += 1;
            return Err(LpmError::Resources);
        }
        stats.node_allocated();
        Ok(Btrie {
            root: Box::new(BtrieNode::empty()),
        })
    }

    /// Walks bits `0..masklen` of `addr`. No nodes are created.
    pub(crate) fn find_node<'a>(
        &'a self,
        addr: &[u8],
        masklen: u8,
    ) -> Option<&'a BtrieNode<T>> {
        let mut node = &*self.root;
        for pos in 0..masklen {
            node = node.child(bit_at(addr, pos))?;
        }
        Some(node)
    }

    pub(crate) fn find_node_mut<'a>(
        &'a mut self,
        addr: &[u8],
        masklen: u8,
    ) -> Option<&'a mut BtrieNode<T>> {
        let mut node = &mut *self.root;
        for pos in 0..masklen {
            node = node.children[bit_at(addr, pos) as usize].as_deref_mut()?;
        }
        Some(node)
    }

    /// Exact-match lookup.
    pub(crate) fn find_value<'a>(
        &'a self,
        addr: &[u8],
        masklen: u8,
    ) -> Option<&'a T> {
        self.find_node(addr, masklen).and_then(|n| n.value.as_ref())
    }

    /// Ensures the path for `addr/masklen` exists, allocating nodes as
    /// needed.
    ///
    /// A path that already existed in full is not an error; it is
    /// reported through [`PathAdded::existed`] so `add` can tell a fresh
    /// path from a revisited one. If the allocator refuses mid-path, the
    /// partially appended chain is severed and freed before the error
    /// returns.
    pub(crate) fn add_path<A: TableAlloc>(
        &mut self,
        addr: &[u8],
        masklen: u8,
        alloc: &mut A,
        stats: &mut TableStats,
    ) -> Result<PathAdded, LpmError> {
        let mut appended: Option<(u8, u8)> = None;
        let mut refused = false;

        let mut node = &mut self.root;
        for pos in 0..masklen {
            let bit = bit_at(addr, pos);
            let slot = bit as usize;
            if node.children[slot].is_none() {
                if alloc.btrie_node().is_err() {
                    stats.btrie_alloc_failures += 1;
                    refused = true;
                    break;
                }
                stats.node_allocated();
                if appended.is_none() {
                    appended = Some((pos, bit));
                }
            }
            node = node.children[slot]
                .get_or_insert_with(|| Box::new(BtrieNode::empty()));
        }

        if refused {
            trace!("btrie node refused, undoing appended chain");
            if let Some((depth, bit)) = appended {
                self.sever_appended(addr, depth, bit, alloc, stats);
            }
            return Err(LpmError::Resources);
        }

        Ok(PathAdded { appended })
    }

    /// Severs the chain hanging off (`depth`, `bit`) and frees it.
    ///
    /// Appended chains are linear by construction: a node added by
    /// `add_path` gains at most one child before the call either
    /// completes or unwinds.
    pub(crate) fn sever_appended<A: TableAlloc>(
        &mut self,
        addr: &[u8],
        depth: u8,
        bit: u8,
        alloc: &mut A,
        stats: &mut TableStats,
    ) {
        let chain = match self.find_node_mut(addr, depth) {
            Some(parent) => parent.children[bit as usize].take(),
            None => None,
        };
        let mut next = chain;
        while let Some(mut node) = next {
            debug_assert!(
                node.children[0].is_none() || node.children[1].is_none(),
                "appended btrie nodes cannot have two children"
            );
            next = match node.children[0].take() {
                Some(child) => Some(child),
                None => node.children[1].take(),
            };
            stats.node_freed();
            alloc.release_btrie_node();
        }
    }

    /// Frees a detached subtree, counting every node. Iterative, so the
    /// 128-deep worst case stays off the call stack.
    pub(crate) fn free_subtree<A: TableAlloc>(
        subtree: Box<BtrieNode<T>>,
        alloc: &mut A,
        stats: &mut TableStats,
    ) {
        let mut work = vec![subtree];
        while let Some(mut node) = work.pop() {
            for child in node.children.iter_mut() {
                if let Some(child) = child.take() {
                    work.push(child);
                }
            }
            stats.node_freed();
            alloc.release_btrie_node();
        }
    }

    /// Frees everything below the root and accounts for the root itself,
    /// which is dropped together with the table.
    pub(crate) fn teardown<A: TableAlloc>(
        &mut self,
        alloc: &mut A,
        stats: &mut TableStats,
    ) {
        for child in self.root.children.iter_mut() {
            if let Some(child) = child.take() {
                Self::free_subtree(child, alloc, stats);
            }
        }
        self.root.value = None;
        stats.node_freed();
        alloc.release_btrie_node();
    }

    /// In-order walk: a node's value first, then the 0 branch, then the
    /// 1 branch. The prefix is reconstructed in a scratch buffer on the
    /// way down; after the 1 branch returns, its bit is cleared again so
    /// every visit sees the bits beyond its mask length as zero.
    pub(crate) fn dfs_walk<F>(&self, visitor: &mut F) -> Result<(), LpmError>
    where
        F: FnMut(&[u8], u8, &T) -> ControlFlow<()>,
    {
        let mut addr = [0u8; MAX_LEVELS];
        Self::walk_node(&self.root, &mut addr, 0, visitor)
    }

    fn walk_node<F>(
        node: &BtrieNode<T>,
        addr: &mut [u8; MAX_LEVELS],
        bitpos: u8,
        visitor: &mut F,
    ) -> Result<(), LpmError>
    where
        F: FnMut(&[u8], u8, &T) -> ControlFlow<()>,
    {
        if let Some(value) = node.value.as_ref() {
            if visitor(&addr[..], bitpos, value).is_break() {
                // The abort comes from the visitor, not from the table.
                return Err(LpmError::Exotic);
            }
        }

        if let Some(child) = node.child(0) {
            clear_bit(addr, bitpos);
            Self::walk_node(child, addr, bitpos + 1, visitor)?;
        }

        if let Some(child) = node.child(1) {
            set_bit(addr, bitpos);
            let ret = Self::walk_node(child, addr, bitpos + 1, visitor);
            // Restore the buffer for the caller's next visit, e.g.
            // 128.0.0.0/2 followed by 80.0.0.0/4.
            clear_bit(addr, bitpos);
            ret?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use crate::alloc::{AllocRefused, GlobalHeap, TableAlloc};
    use crate::stats::TableStats;

    use super::Btrie;

    /// Refuses btrie nodes once the budget runs out.
    struct NodeQuota(usize);

    impl TableAlloc for NodeQuota {
        fn btrie_node(&mut self) -> Result<(), AllocRefused> {
            if self.0 == 0 {
                return Err(AllocRefused);
            }
            self.0 -= 1;
            Ok(())
        }

        fn mtrie_block(&mut self) -> Result<(), AllocRefused> {
            Ok(())
        }
    }

    fn new_trie() -> (Btrie<u32>, GlobalHeap, TableStats) {
        let mut alloc = GlobalHeap;
        let mut stats = TableStats::new(0, 0);
        let trie = Btrie::new(&mut alloc, &mut stats).unwrap();
        (trie, alloc, stats)
    }

    #[test]
    fn add_path_reports_the_append_point() {
        let (mut trie, mut alloc, mut stats) = new_trie();
        let addr = [10u8, 20, 0, 0];

        let added = trie.add_path(&addr, 8, &mut alloc, &mut stats).unwrap();
        // 10 == 0b0000_1010: the first appended node hangs off the root
        // on the 0 branch.
        assert_eq!(added.appended, Some((0, 0)));
        assert_eq!(stats.btrie_nodes, 9);

        // Same path again: nothing to append.
        let added = trie.add_path(&addr, 8, &mut alloc, &mut stats).unwrap();
        assert!(added.existed());
        assert_eq!(stats.btrie_nodes, 9);

        // Extending the path appends below the existing /8 chain.
        let added = trie.add_path(&addr, 16, &mut alloc, &mut stats).unwrap();
        assert_eq!(added.appended, Some((8, 0)));
        assert_eq!(stats.btrie_nodes, 17);
    }

    #[test]
    fn refused_allocation_unwinds_the_partial_chain() {
        let mut alloc = NodeQuota(5);
        let mut stats = TableStats::new(0, 0);
        let mut trie = Btrie::<u32>::new(&mut alloc, &mut stats).unwrap();
        let addr = [192u8, 168, 1, 0];

        // Four more nodes fit; the fifth is refused and the four must be
        // freed again.
        let err = trie.add_path(&addr, 8, &mut alloc, &mut stats);
        assert_eq!(err.unwrap_err(), crate::LpmError::Resources);
        assert_eq!(stats.btrie_nodes, 1);
        assert_eq!(stats.btrie_alloc_failures, 1);
        assert!(trie.root.is_leaf());
    }

    #[test]
    fn find_value_is_exact() {
        let (mut trie, mut alloc, mut stats) = new_trie();
        let addr = [10u8, 20, 0, 0];
        trie.add_path(&addr, 16, &mut alloc, &mut stats).unwrap();
        trie.find_node_mut(&addr, 16).unwrap().value = Some(7);

        assert_eq!(trie.find_value(&addr, 16), Some(&7));
        assert_eq!(trie.find_value(&addr, 8), None);
        assert_eq!(trie.find_value(&addr, 24), None);
        assert_eq!(trie.find_value(&[10u8, 21, 0, 0], 16), None);
    }

    #[test]
    fn walk_restores_the_scratch_buffer() {
        let (mut trie, mut alloc, mut stats) = new_trie();
        // 128.0.0.0/2 and 80.0.0.0/4 exercise the bit-restore path: the
        // walk leaves the 1 branch of bit 0 before entering 80/4.
        let a = [128u8, 0, 0, 0];
        let b = [80u8, 0, 0, 0];
        trie.add_path(&a, 2, &mut alloc, &mut stats).unwrap();
        trie.add_path(&b, 4, &mut alloc, &mut stats).unwrap();
        trie.find_node_mut(&a, 2).unwrap().value = Some(1);
        trie.find_node_mut(&b, 4).unwrap().value = Some(2);

        let mut seen = Vec::new();
        trie.dfs_walk(&mut |addr: &[u8], masklen, value: &u32| {
            seen.push((addr[0], masklen, *value));
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(seen, vec![(80, 4, 2), (128, 2, 1)]);
    }

    #[test]
    fn walk_break_surfaces_as_exotic() {
        let (mut trie, mut alloc, mut stats) = new_trie();
        trie.add_path(&[10u8, 0, 0, 0], 8, &mut alloc, &mut stats)
            .unwrap();
        trie.find_node_mut(&[10u8, 0, 0, 0], 8).unwrap().value = Some(1);

        let err = trie.dfs_walk(&mut |_: &[u8], _, _: &u32| {
            ControlFlow::Break(())
        });
        assert_eq!(err.unwrap_err(), crate::LpmError::Exotic);
    }

    #[test]
    fn teardown_balances_the_counters() {
        let (mut trie, mut alloc, mut stats) = new_trie();
        trie.add_path(&[10u8, 20, 30, 40], 32, &mut alloc, &mut stats)
            .unwrap();
        trie.add_path(&[10u8, 21, 0, 0], 16, &mut alloc, &mut stats)
            .unwrap();
        assert!(stats.btrie_nodes > 1);

        trie.teardown(&mut alloc, &mut stats);
        assert_eq!(stats.btrie_nodes, 0);
    }
}
