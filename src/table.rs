//! The lookup table and its public operations.
//!
//! Writers mutate the btrie first and project the result onto the mtrie
//! second; every partial effect of a failed step is undone before the
//! error returns, so callers always observe all-or-nothing behaviour.
//! Readers ([`search`](LpmTable::search), [`find`](LpmTable::find),
//! [`walk`](LpmTable::walk)) never allocate and never modify anything.

use std::mem;
use std::net::IpAddr;
use std::ops::ControlFlow;

use inetnum::addr::Prefix;
use log::{debug, info, trace, warn};

use crate::alloc::{GlobalHeap, TableAlloc};
use crate::bits::{bit_at, same_prefix};
use crate::btrie::{Btrie, BtrieNode};
use crate::errors::LpmError;
use crate::expand::{prefix_expansion, zero_out};
use crate::mtrie::{Mtrie, MtrieBlock};
use crate::stats::TableStats;
use crate::{MAX_LEVELS, MAX_MASKLEN, STRIDE};

/// Table name length bound, in bytes of UTF-8.
const TABLE_NAME_LEN: usize = 31;
const DEFAULT_NAME: &str = "Unknown";

const DBG_NORM: u8 = 1 << 0;
const DBG_MEM: u8 = 1 << 1;
const DBG_ALG: u8 = 1 << 2;
const DBG_LOG: u8 = 1 << 3;

//------------ DebugKind -----------------------------------------------------

/// Per-table diagnostic categories, toggled with
/// [`debug_support`](LpmTable::debug_support).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebugKind {
    /// General warnings and auxiliary information.
    Normal,
    /// Allocation and release of nodes and blocks.
    Memory,
    /// Internal findings of the expansion and delete machinery.
    Algorithm,
    /// One line per public operation.
    Logging,
    /// Everything at once.
    All,
}

//------------ SearchResult --------------------------------------------------

/// What a longest prefix [`search`](LpmTable::search) produced.
#[derive(Clone, Copy, Debug)]
pub struct SearchResult<'a, T> {
    /// The winning value: the longest matching binding, or the default
    /// data when nothing matched.
    pub value: Option<&'a T>,
    /// True when the default slot supplied (or would have supplied) the
    /// answer.
    pub used_default: bool,
}

//------------ LpmTable ------------------------------------------------------

/// A longest prefix match table over big-endian addresses of up to
/// [`MAX_MASKLEN`] bits.
///
/// `T` is the caller's value type; the table clones it into the mtrie
/// entries a binding covers, so it should be cheap to clone (an id, an
/// index, an `Arc`). Equality decides whether a re-added binding is
/// [`Exists`](LpmError::Exists) or [`Conflict`](LpmError::Conflict).
pub struct LpmTable<T, A: TableAlloc = GlobalHeap> {
    name: String,
    btrie: Btrie<T>,
    mtrie: Mtrie<T>,
    /// Clone of the zero-route binding. The 0/0 route lives only in the
    /// btrie root, which `search` never reads; this slot makes it
    /// reachable from the read path.
    zero_route: Option<T>,
    default_data: Option<T>,
    default_addr: [u8; MAX_LEVELS],
    default_masklen: u8,
    debug: u8,
    corrupted: bool,
    stats: TableStats,
    alloc: A,
}

impl<T: Clone + PartialEq> LpmTable<T> {
    /// Creates a table backed by the process heap.
    pub fn new(name: &str) -> Result<Self, LpmError> {
        Self::with_allocator(name, GlobalHeap)
    }
}

impl<T: Clone + PartialEq, A: TableAlloc> LpmTable<T, A> {
    /// Creates a table that allocates through `alloc`. Both roots must
    /// come through before the table exists at all.
    pub fn with_allocator(name: &str, mut alloc: A) -> Result<Self, LpmError> {
        let mut stats = TableStats::new(
            mem::size_of::<BtrieNode<T>>(),
            mem::size_of::<MtrieBlock<T>>(),
        );
        let mut btrie = Btrie::new(&mut alloc, &mut stats)?;
        let mtrie = match Mtrie::new(&mut alloc, &mut stats) {
            Ok(mtrie) => mtrie,
            Err(err) => {
                btrie.teardown(&mut alloc, &mut stats);
                return Err(err);
            }
        };

        Ok(LpmTable {
            name: bounded_name(name),
            btrie,
            mtrie,
            zero_route: None,
            default_data: None,
            default_addr: [0; MAX_LEVELS],
            default_masklen: 0,
            debug: 0,
            corrupted: false,
            stats,
            alloc,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table's counters. `data_total` counts live bindings; the
    /// node and block counts include both roots.
    pub fn statistics(&self) -> &TableStats {
        &self.stats
    }

    /// Logs the statistic report, histogram included.
    pub fn log_statistics(&self) {
        info!("LPM table [{}] statistics:\n{:#}", self.name, self.stats);
    }

    /// Logs the occupancy of every mtrie block, for debugging.
    pub fn dump_mtrie(&self) {
        self.mtrie.dump(&self.name);
    }

    /// Switches a diagnostic category on or off.
    pub fn debug_support(&mut self, kind: DebugKind, on: bool) {
        let bits = match kind {
            DebugKind::Normal => DBG_NORM,
            DebugKind::Memory => DBG_MEM,
            DebugKind::Algorithm => DBG_ALG,
            DebugKind::Logging => DBG_LOG,
            DebugKind::All => u8::MAX,
        };
        if on {
            self.debug |= bits;
        } else {
            self.debug &= !bits;
        }
        if self.logging() {
            debug!(
                "[{}] debug {:?} switched {}",
                self.name,
                kind,
                if on { "on" } else { "off" }
            );
        }
    }

    /// Binds `value` to `addr/masklen`.
    ///
    /// More specific bindings already in the table keep their mtrie
    /// entries; the new binding fills everything else it covers. A
    /// refused allocation rolls the whole call back.
    pub fn add(
        &mut self,
        addr: &[u8],
        masklen: u8,
        value: T,
    ) -> Result<(), LpmError> {
        self.ensure_live()?;
        self.check_args(addr, masklen)?;

        let added = self.btrie.add_path(
            addr,
            masklen,
            &mut self.alloc,
            &mut self.stats,
        );
        let added = match added {
            Ok(added) => added,
            Err(err) => {
                if self.debug_mem() {
                    debug!("[{}] btrie node refused during add", self.name);
                }
                return Err(err);
            }
        };

        let node = match self.btrie.find_node_mut(addr, masklen) {
            Some(node) => node,
            None => {
                self.corrupted = true;
                return Err(LpmError::Internal);
            }
        };
        match node.value.as_ref() {
            Some(existing) if *existing == value => {
                return Err(LpmError::Exists);
            }
            Some(_) => return Err(LpmError::Conflict),
            None => {}
        }
        node.value = Some(value);
        self.stats.binding_added(masklen);

        // The zero route lives only in the btrie root; publish it to
        // the read path and be done.
        if masklen == 0 {
            self.zero_route = self.btrie.root.value.clone();
            if self.logging() {
                debug!("[{}] add 0/0 success", self.name);
            }
            return Ok(());
        }

        let mut temp = [0u8; MAX_LEVELS];
        let cnt = ((masklen - 1) >> 3) as usize + 1;
        temp[..cnt].copy_from_slice(&addr[..cnt]);
        let bitpos = masklen - 1;

        let expanded = match self.btrie.find_node(&temp, masklen) {
            Some(node) => prefix_expansion(
                &mut self.mtrie,
                &mut self.alloc,
                &mut self.stats,
                &mut temp,
                bitpos,
                node,
                node.value.as_ref(),
            ),
            None => Err(LpmError::Internal),
        };

        match expanded {
            Ok(()) => {
                if self.logging() {
                    debug!("[{}] add /{} success", self.name, masklen);
                }
                Ok(())
            }
            Err(LpmError::Resources) => {
                // Roll the btrie half back: clear the value, and if the
                // path was appended by this very call, sever it again.
                if let Some(node) = self.btrie.find_node_mut(addr, masklen) {
                    node.value = None;
                }
                self.stats.binding_removed(masklen);
                if added.existed() {
                    if self.debug_alg() {
                        debug!(
                            "[{}] btrie path existed, mtrie block refused",
                            self.name
                        );
                    }
                } else if let Some((depth, bit)) = added.appended {
                    self.btrie.sever_appended(
                        addr,
                        depth,
                        bit,
                        &mut self.alloc,
                        &mut self.stats,
                    );
                }
                Err(LpmError::Resources)
            }
            Err(_) => Err(self.quarantine("prefix expansion failed")),
        }
    }

    /// Replaces the value of an existing binding and rewrites its mtrie
    /// footprint, which is exactly the set of entries not shadowed by
    /// more specific bindings.
    pub fn update(
        &mut self,
        addr: &[u8],
        masklen: u8,
        value: T,
    ) -> Result<(), LpmError> {
        self.ensure_live()?;
        self.check_args(addr, masklen)?;

        match self.btrie.find_node_mut(addr, masklen) {
            Some(node) if node.value.is_some() => {
                node.value = Some(value);
            }
            _ => return Err(LpmError::NotFound),
        }

        if masklen == 0 {
            self.zero_route = self.btrie.root.value.clone();
            if self.logging() {
                debug!("[{}] update 0/0 success", self.name);
            }
            return Ok(());
        }

        let mut temp = [0u8; MAX_LEVELS];
        let cnt = ((masklen - 1) >> 3) as usize + 1;
        temp[..cnt].copy_from_slice(&addr[..cnt]);
        let bitpos = masklen - 1;

        // The block chain of an existing binding is always materialized,
        // so this expansion performs no allocation and cannot fail with
        // Resources.
        let expanded = match self.btrie.find_node(&temp, masklen) {
            Some(node) => prefix_expansion(
                &mut self.mtrie,
                &mut self.alloc,
                &mut self.stats,
                &mut temp,
                bitpos,
                node,
                node.value.as_ref(),
            ),
            None => Err(LpmError::Internal),
        };

        match expanded {
            Ok(()) => {
                if self.logging() {
                    debug!("[{}] update /{} success", self.name, masklen);
                }
                Ok(())
            }
            Err(LpmError::Resources) => Err(LpmError::Resources),
            Err(_) => Err(self.quarantine("update expansion failed")),
        }
    }

    /// Removes the binding at `addr/masklen`.
    ///
    /// The freed mtrie range is re-covered by the closest less specific
    /// binding where one exists, cleared otherwise; btrie chains and
    /// mtrie blocks that carried nothing but this binding are reclaimed.
    pub fn delete(&mut self, addr: &[u8], masklen: u8) -> Result<(), LpmError> {
        self.ensure_live()?;
        self.check_args(addr, masklen)?;

        if masklen == 0 {
            if self.btrie.root.value.is_none() {
                return Err(LpmError::NotFound);
            }
            self.btrie.root.value = None;
            self.zero_route = None;
            self.stats.binding_removed(0);
            if self.default_data.is_some() && self.default_masklen == 0 {
                self.clear_default();
            }
            if self.logging() {
                debug!("[{}] delete 0/0 success", self.name);
            }
            return Ok(());
        }

        let mut temp = [0u8; MAX_LEVELS];
        let cnt = ((masklen - 1) >> 3) as usize + 1;
        temp[..cnt].copy_from_slice(&addr[..cnt]);

        self.delete_inner(&mut temp, masklen)?;

        if self.default_data.is_some()
            && self.default_masklen == masklen
            && same_prefix(&self.default_addr, &temp, masklen)
        {
            // The deleted binding had been promoted to default data; a
            // clone there would outlive its binding.
            self.clear_default();
        }
        if self.logging() {
            debug!("[{}] delete /{} success", self.name, masklen);
        }
        Ok(())
    }

    fn delete_inner(
        &mut self,
        addr: &mut [u8; MAX_LEVELS],
        masklen: u8,
    ) -> Result<(), LpmError> {
        // First pass: locate the target and remember the deepest
        // ancestor that carries a value. That ancestor becomes newly
        // authoritative over the freed range. The zero route does not
        // take part here; the search falls back to it on its own.
        let mut ancestor: Option<u8> = None;
        {
            let mut node = &*self.btrie.root;
            for pos in 0..masklen {
                node = match node.child(bit_at(addr, pos)) {
                    Some(next) => next,
                    None => return Err(LpmError::NotFound),
                };
                if node.value.is_some() && pos != masklen - 1 {
                    ancestor = Some(pos);
                }
            }
            if node.value.is_none() {
                return Err(LpmError::NotFound);
            }
        }

        match self.btrie.find_node_mut(addr, masklen) {
            Some(node) => node.value = None,
            None => {
                self.corrupted = true;
                return Err(LpmError::Internal);
            }
        }
        self.stats.binding_removed(masklen);

        let bitpos = masklen - 1;
        let restored = match ancestor {
            Some(anc_pos) if anc_pos >> 3 == bitpos >> 3 => {
                // The less specific binding lives in the same stride
                // block: refill the freed range from it, keeping any
                // more specifics below.
                match self.btrie.find_node(&addr[..], anc_pos + 1) {
                    Some(anc) => prefix_expansion(
                        &mut self.mtrie,
                        &mut self.alloc,
                        &mut self.stats,
                        addr,
                        anc_pos,
                        anc,
                        anc.value.as_ref(),
                    ),
                    None => Err(LpmError::Internal),
                }
            }
            Some(_) => {
                // Different block: a higher level entry already routes
                // the search to the less specific value; clearing the
                // freed range is enough.
                match self.btrie.find_node(&addr[..], masklen) {
                    Some(node) => prefix_expansion(
                        &mut self.mtrie,
                        &mut self.alloc,
                        &mut self.stats,
                        addr,
                        bitpos,
                        node,
                        None,
                    ),
                    None => Err(LpmError::Internal),
                }
            }
            None => match self.btrie.find_node(&addr[..], masklen) {
                Some(node) if !node.is_leaf() => {
                    // More specifics below keep their entries; only the
                    // unshadowed part of the range is cleared.
                    prefix_expansion(
                        &mut self.mtrie,
                        &mut self.alloc,
                        &mut self.stats,
                        addr,
                        bitpos,
                        node,
                        None,
                    )
                }
                Some(_) => zero_out(&mut self.mtrie, addr, masklen),
                None => Err(LpmError::Internal),
            },
        };
        match restored {
            Ok(()) => {}
            Err(LpmError::Resources) => return Err(LpmError::Resources),
            Err(_) => {
                return Err(self.quarantine("delete restoration failed"))
            }
        }

        // Lazily prune the now valueless chain, reclaiming the mtrie
        // block under every stride boundary the pruned part crossed.
        let start_len = match ancestor {
            Some(pos) => pos + 1,
            None => 0,
        };
        let pruned = match self.btrie.find_node_mut(&addr[..], start_len) {
            Some(start) => prune_node(
                start,
                addr,
                start_len,
                &mut self.mtrie,
                &mut self.alloc,
                &mut self.stats,
            ),
            None => Err(LpmError::Internal),
        };
        match pruned {
            Ok(_) => Ok(()),
            Err(_) => Err(self.quarantine("btrie/mtrie shrink disagreed")),
        }
    }

    /// Exact-match lookup through the btrie.
    pub fn find(&self, addr: &[u8], masklen: u8) -> Option<&T> {
        if self.corrupted || self.check_args(addr, masklen).is_err() {
            return None;
        }
        let value = self.btrie.find_value(addr, masklen);
        if self.logging() {
            debug!(
                "[{}] find /{} -> {}",
                self.name,
                masklen,
                if value.is_some() { "hit" } else { "miss" }
            );
        }
        value
    }

    /// Longest prefix match through the mtrie. Performance is the key
    /// here: one indexed read per address byte and no btrie access.
    pub fn search(&self, addr: &[u8]) -> SearchResult<'_, T> {
        if self.corrupted {
            return SearchResult {
                value: None,
                used_default: false,
            };
        }

        let mut result = SearchResult {
            value: self.mtrie.search(addr),
            used_default: false,
        };
        if result.value.is_none() {
            match self.zero_route.as_ref() {
                Some(zero) => result.value = Some(zero),
                None => {
                    result.value = self.default_data.as_ref();
                    result.used_default = true;
                }
            }
        }
        result
    }

    /// LPM lookup for a plain IP address.
    pub fn lookup(&self, addr: IpAddr) -> SearchResult<'_, T> {
        match addr {
            IpAddr::V4(addr) => self.search(&addr.octets()),
            IpAddr::V6(addr) => self.search(&addr.octets()),
        }
    }

    /// Visits every binding in prefix order, then the default data if
    /// present. The visitor sees the address with all bits beyond the
    /// mask length zeroed; `Break` aborts the walk with
    /// [`Exotic`](LpmError::Exotic).
    pub fn walk<F>(&self, mut visitor: F) -> Result<(), LpmError>
    where
        F: FnMut(&[u8], u8, &T) -> ControlFlow<()>,
    {
        self.ensure_live()?;

        self.btrie.dfs_walk(&mut visitor)?;

        if let Some(value) = self.default_data.as_ref() {
            trace!("[{}] walking default data", self.name);
            if visitor(&self.default_addr, self.default_masklen, value)
                .is_break()
            {
                return Err(LpmError::Exotic);
            }
        }
        Ok(())
    }

    /// Promotes the value bound at `addr/masklen` into the default
    /// slot, together with its (masked) prefix.
    pub fn update_default(
        &mut self,
        addr: &[u8],
        masklen: u8,
    ) -> Result<(), LpmError> {
        self.ensure_live()?;
        self.check_args(addr, masklen)?;

        let value = match self.btrie.find_value(addr, masklen) {
            Some(value) => value.clone(),
            None => return Err(LpmError::NotFound),
        };

        self.default_data = Some(value);
        self.default_masklen = masklen;
        self.default_addr = [0; MAX_LEVELS];
        if masklen > 0 {
            let cnt = ((masklen - 1) >> 3) as usize + 1;
            self.default_addr[..cnt].copy_from_slice(&addr[..cnt]);
            let mask = !((1u8 << (7 - ((masklen - 1) & 7))) - 1);
            self.default_addr[cnt - 1] &= mask;
        }
        if self.logging() {
            debug!("[{}] default data set from /{}", self.name, masklen);
        }
        Ok(())
    }

    /// Clears the default slot. The binding it was copied from is not
    /// touched.
    pub fn delete_default(&mut self) -> Result<(), LpmError> {
        self.ensure_live()?;
        if self.default_data.is_none() {
            if self.debug_norm() {
                debug!("[{}] no default data to delete", self.name);
            }
            return Err(LpmError::NotFound);
        }
        self.clear_default();
        if self.logging() {
            debug!("[{}] default data cleared", self.name);
        }
        Ok(())
    }

    fn clear_default(&mut self) {
        self.default_data = None;
        self.default_masklen = 0;
        self.default_addr = [0; MAX_LEVELS];
    }

    fn ensure_live(&self) -> Result<(), LpmError> {
        if self.corrupted {
            return Err(LpmError::Internal);
        }
        Ok(())
    }

    fn quarantine(&mut self, what: &str) -> LpmError {
        warn!("[{}] quarantined: {}", self.name, what);
        self.corrupted = true;
        LpmError::Internal
    }

    fn check_args(&self, addr: &[u8], masklen: u8) -> Result<(), LpmError> {
        if masklen > MAX_MASKLEN {
            if self.debug_norm() {
                debug!("[{}] masklen {} is too large", self.name, masklen);
            }
            return Err(LpmError::Invalid);
        }
        if addr.len() * 8 < masklen as usize {
            if self.debug_norm() {
                debug!(
                    "[{}] address buffer too short for /{}",
                    self.name, masklen
                );
            }
            return Err(LpmError::Invalid);
        }
        Ok(())
    }

    fn logging(&self) -> bool {
        self.debug & DBG_LOG != 0
    }

    fn debug_norm(&self) -> bool {
        self.debug & DBG_NORM != 0
    }

    fn debug_mem(&self) -> bool {
        self.debug & DBG_MEM != 0
    }

    fn debug_alg(&self) -> bool {
        self.debug & DBG_ALG != 0
    }
}

//------------ Prefix convenience --------------------------------------------

impl<T: Clone + PartialEq, A: TableAlloc> LpmTable<T, A> {
    /// [`add`](Self::add) with an `inetnum` prefix.
    pub fn add_prefix(
        &mut self,
        prefix: &Prefix,
        value: T,
    ) -> Result<(), LpmError> {
        match prefix.addr() {
            IpAddr::V4(addr) => self.add(&addr.octets(), prefix.len(), value),
            IpAddr::V6(addr) => self.add(&addr.octets(), prefix.len(), value),
        }
    }

    /// [`update`](Self::update) with an `inetnum` prefix.
    pub fn update_prefix(
        &mut self,
        prefix: &Prefix,
        value: T,
    ) -> Result<(), LpmError> {
        match prefix.addr() {
            IpAddr::V4(addr) => {
                self.update(&addr.octets(), prefix.len(), value)
            }
            IpAddr::V6(addr) => {
                self.update(&addr.octets(), prefix.len(), value)
            }
        }
    }

    /// [`delete`](Self::delete) with an `inetnum` prefix.
    pub fn delete_prefix(&mut self, prefix: &Prefix) -> Result<(), LpmError> {
        match prefix.addr() {
            IpAddr::V4(addr) => self.delete(&addr.octets(), prefix.len()),
            IpAddr::V6(addr) => self.delete(&addr.octets(), prefix.len()),
        }
    }

    /// [`find`](Self::find) with an `inetnum` prefix.
    pub fn find_prefix(&self, prefix: &Prefix) -> Option<&T> {
        match prefix.addr() {
            IpAddr::V4(addr) => self.find(&addr.octets(), prefix.len()),
            IpAddr::V6(addr) => self.find(&addr.octets(), prefix.len()),
        }
    }
}

impl<T, A: TableAlloc> Drop for LpmTable<T, A> {
    fn drop(&mut self) {
        self.mtrie.teardown(&mut self.alloc, &mut self.stats);
        self.btrie.teardown(&mut self.alloc, &mut self.stats);
        debug_assert_eq!(
            self.stats.btrie_nodes, 0,
            "btrie node counter unbalanced at destroy"
        );
        debug_assert_eq!(
            self.stats.mtrie_blocks, 0,
            "mtrie block counter unbalanced at destroy"
        );
    }
}

//------------ Subtree pruning -----------------------------------------------

/// Returns true when nothing below (or at) `node` carries a value
/// anymore, in which case the caller removes the node. Crossing a
/// stride boundary on the way back up frees the mtrie block that
/// mirrored the vanished btrie stride.
fn prune_node<T, A: TableAlloc>(
    node: &mut BtrieNode<T>,
    addr: &[u8; MAX_LEVELS],
    depth: u8,
    mtrie: &mut Mtrie<T>,
    alloc: &mut A,
    stats: &mut TableStats,
) -> Result<bool, LpmError> {
    if node.is_leaf() {
        return Ok(node.value.is_none());
    }

    for slot in 0..2 {
        let removable = match node.children[slot].as_deref_mut() {
            Some(child) => prune_node(
                child,
                addr,
                depth + 1,
                mtrie,
                alloc,
                stats,
            )?,
            None => true,
        };
        if !removable {
            // A value survives down there; everything above it stays.
            return Ok(false);
        }
        if let Some(subtree) = node.children[slot].take() {
            Btrie::free_subtree(subtree, alloc, stats);
        }
    }

    if depth == 0 {
        // The root stays, whatever happened below it.
        return Ok(false);
    }
    if depth % STRIDE == 0 {
        // A whole btrie stride below this node is gone; the mtrie
        // block that mirrored it can go too.
        mtrie.remove_block_below(addr, depth - 1, alloc, stats)?;
    }
    Ok(true)
}

fn bounded_name(name: &str) -> String {
    if name.is_empty() {
        return DEFAULT_NAME.into();
    }
    let mut end = name.len().min(TABLE_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LpmTable<u32> {
        LpmTable::new("test").unwrap()
    }

    #[test]
    fn names_are_bounded() {
        assert_eq!(bounded_name(""), "Unknown");
        assert_eq!(bounded_name("v4"), "v4");
        let long = "x".repeat(40);
        assert_eq!(bounded_name(&long).len(), 31);
        // Truncation never splits a character.
        let umlauts = "ü".repeat(20);
        assert_eq!(bounded_name(&umlauts).len(), 30);
    }

    #[test]
    fn argument_validation() {
        let mut t = table();
        assert_eq!(
            t.add(&[0u8; 16], 129, 1).unwrap_err(),
            LpmError::Invalid
        );
        assert_eq!(t.add(&[10u8], 16, 1).unwrap_err(), LpmError::Invalid);
        assert_eq!(t.add(&[], 1, 1).unwrap_err(), LpmError::Invalid);
        // A zero masklen needs no address bytes at all.
        assert!(t.add(&[], 0, 1).is_ok());
    }

    #[test]
    fn zero_route_reaches_the_search_path() {
        let mut t = table();
        t.add(&[], 0, 77).unwrap();

        let res = t.search(&[1, 2, 3, 4]);
        assert_eq!(res.value, Some(&77));
        assert!(!res.used_default);

        t.update(&[], 0, 78).unwrap();
        assert_eq!(t.search(&[9, 9, 9, 9]).value, Some(&78));

        t.delete(&[], 0).unwrap();
        let res = t.search(&[1, 2, 3, 4]);
        assert_eq!(res.value, None);
        assert!(res.used_default);
    }

    #[test]
    fn default_data_is_masked_and_walked_last() {
        let mut t = table();
        // 10.20.30.40/21; the promoted copy must read 10.20.24.0.
        t.add(&[10, 20, 30, 40], 21, 5).unwrap();
        t.update_default(&[10, 20, 30, 40], 21).unwrap();

        let mut visits = Vec::new();
        t.walk(|addr, masklen, value| {
            visits.push((addr[..4].to_vec(), masklen, *value));
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(
            visits,
            vec![
                (vec![10, 20, 24, 0], 21, 5),
                (vec![10, 20, 24, 0], 21, 5),
            ]
        );
    }

    #[test]
    fn deleting_the_promoted_prefix_clears_the_default() {
        let mut t = table();
        t.add(&[10, 0, 0, 0], 8, 1).unwrap();
        t.update_default(&[10, 0, 0, 0], 8).unwrap();

        let res = t.search(&[99, 0, 0, 1]);
        assert_eq!(res.value, Some(&1));
        assert!(res.used_default);

        t.delete(&[10, 0, 0, 0], 8).unwrap();
        let res = t.search(&[99, 0, 0, 1]);
        assert_eq!(res.value, None);
        assert!(res.used_default);
        assert_eq!(t.delete_default().unwrap_err(), LpmError::NotFound);
    }

    #[test]
    fn delete_default_leaves_the_binding() {
        let mut t = table();
        t.add(&[10, 0, 0, 0], 8, 1).unwrap();
        t.update_default(&[10, 0, 0, 0], 8).unwrap();
        t.delete_default().unwrap();

        assert_eq!(t.find(&[10, 0, 0, 0], 8), Some(&1));
        assert_eq!(t.search(&[10, 1, 1, 1]).value, Some(&1));
    }

    #[test]
    fn prefix_convenience_round_trip() {
        use std::str::FromStr;

        let mut t = table();
        let pfx = Prefix::from_str("10.0.0.0/8").unwrap();
        t.add_prefix(&pfx, 1).unwrap();
        assert_eq!(t.find_prefix(&pfx), Some(&1));
        assert_eq!(
            t.lookup("10.20.30.40".parse().unwrap()).value,
            Some(&1)
        );
        t.update_prefix(&pfx, 2).unwrap();
        assert_eq!(
            t.lookup("10.20.30.40".parse().unwrap()).value,
            Some(&2)
        );
        t.delete_prefix(&pfx).unwrap();
        assert_eq!(t.find_prefix(&pfx), None);
    }

    #[test]
    fn debug_support_toggles_bits() {
        let mut t = table();
        t.debug_support(DebugKind::Memory, true);
        assert!(t.debug_mem());
        assert!(!t.debug_norm());
        t.debug_support(DebugKind::All, true);
        assert!(t.debug_norm() && t.debug_alg() && t.logging());
        t.debug_support(DebugKind::All, false);
        assert!(!t.logging());
    }
}
