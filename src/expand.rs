//! Controlled prefix expansion.
//!
//! Projecting a binding onto the mtrie means writing its value into
//! every entry the prefix covers at its own level, while leaving alone
//! any entry that a more specific binding already owns. The btrie
//! subtree rooted at the binding's node describes exactly those more
//! specific bindings, so the expansion descends it bit by bit down to
//! the next stride boundary:
//!
//! * an absent child means the corresponding half of the range is
//!   unshadowed and gets pattern-filled;
//! * a child carrying a value dominates its half, which is skipped;
//! * a child without a value splits its half further, one recursion
//!   step deeper.
//!
//! Expanding with no value is the zero-out used by delete.

use log::trace;

use crate::alloc::TableAlloc;
use crate::bits::{clear_bit, is_stride_boundary, set_bit};
use crate::btrie::BtrieNode;
use crate::errors::LpmError;
use crate::mtrie::{Mtrie, MtrieBlock};
use crate::stats::TableStats;
use crate::{MAX_LEVELS, MAX_MASKLEN};

/// How [`write_combinations`] derives the target range from `bitpos`:
/// fill the range of `bitpos` itself, or first pin the following bit to
/// 0 or 1 and fill that half.
#[derive(Clone, Copy, Debug)]
enum NextBit {
    Keep,
    Zero,
    One,
}

/// Writes `value` across the mtrie range covered by the prefix ending
/// at `bitpos`, honouring the shadowing described by the btrie subtree
/// at `node`.
///
/// `addr` is a scratch copy of the prefix; the descent flips the bits
/// below `bitpos` as it explores both halves. `node` must be the btrie
/// node whose path spells `bitpos + 1` bits of `addr`.
pub(crate) fn prefix_expansion<T, A>(
    mtrie: &mut Mtrie<T>,
    alloc: &mut A,
    stats: &mut TableStats,
    addr: &mut [u8; MAX_LEVELS],
    bitpos: u8,
    node: &BtrieNode<T>,
    value: Option<&T>,
) -> Result<(), LpmError>
where
    T: Clone,
    A: TableAlloc,
{
    debug_assert!(bitpos < MAX_MASKLEN);

    // A boundary bit names exactly one entry at its level; more
    // specific bindings already took effect in deeper blocks.
    if is_stride_boundary(bitpos) {
        return write_combinations(
            mtrie,
            alloc,
            stats,
            addr,
            bitpos,
            value,
            NextBit::Keep,
        );
    }

    // No btrie children: nothing more specific exists on this path and
    // the whole sibling range is ours.
    if node.is_leaf() {
        return write_combinations(
            mtrie,
            alloc,
            stats,
            addr,
            bitpos,
            value,
            NextBit::Keep,
        );
    }

    match node.child(0) {
        Some(child) if child.value.is_none() => {
            clear_bit(addr, bitpos + 1);
            prefix_expansion(
                mtrie,
                alloc,
                stats,
                addr,
                bitpos + 1,
                child,
                value,
            )?;
        }
        Some(_) => {
            // The child holds a more specific binding that owns the
            // whole 0 half; write nothing there.
        }
        None => {
            write_combinations(
                mtrie,
                alloc,
                stats,
                addr,
                bitpos,
                value,
                NextBit::Zero,
            )?;
        }
    }

    match node.child(1) {
        Some(child) if child.value.is_none() => {
            set_bit(addr, bitpos + 1);
            prefix_expansion(
                mtrie,
                alloc,
                stats,
                addr,
                bitpos + 1,
                child,
                value,
            )?;
        }
        Some(_) => {
            // As above, for the 1 half.
        }
        None => {
            write_combinations(
                mtrie,
                alloc,
                stats,
                addr,
                bitpos,
                value,
                NextBit::One,
            )?;
        }
    }

    Ok(())
}

/// Pattern-fills one contiguous range in the block at `bitpos`'s level,
/// materializing the chain of blocks down to it first if needed.
fn write_combinations<T, A>(
    mtrie: &mut Mtrie<T>,
    alloc: &mut A,
    stats: &mut TableStats,
    addr: &[u8; MAX_LEVELS],
    bitpos: u8,
    value: Option<&T>,
    next: NextBit,
) -> Result<(), LpmError>
where
    T: Clone,
    A: TableAlloc,
{
    let level = (bitpos >> 3) as usize;
    let idx = addr[level];
    let (idx, fill_pos) = match next {
        NextBit::Keep => (idx, bitpos),
        NextBit::Zero => {
            debug_assert!(!is_stride_boundary(bitpos));
            (idx & !(1 << (7 - ((bitpos + 1) & 7))), bitpos + 1)
        }
        NextBit::One => {
            debug_assert!(!is_stride_boundary(bitpos));
            (idx | 1 << (7 - ((bitpos + 1) & 7)), bitpos + 1)
        }
    };

    let block = materialize_chain(mtrie, alloc, stats, addr, level)?;
    Mtrie::pattern_fill(block, idx, fill_pos, value);
    Ok(())
}

/// Walks `addr[0..=level]` from the root, allocating any missing blocks,
/// and returns the block at `level`.
///
/// New blocks are built bottom-up as a detached chain and hooked into
/// the trie in a single step afterwards, so a refused allocation never
/// leaves a partial chain behind, and a reader racing a quiescent writer
/// never observes one.
fn materialize_chain<'a, T, A>(
    mtrie: &'a mut Mtrie<T>,
    alloc: &mut A,
    stats: &mut TableStats,
    addr: &[u8; MAX_LEVELS],
    level: usize,
) -> Result<&'a mut MtrieBlock<T>, LpmError>
where
    A: TableAlloc,
{
    // First depth along the path with no block yet, if any.
    let mut missing_at = None;
    {
        let mut block = &*mtrie.root;
        for depth in 1..=level {
            match block.entry(addr[depth - 1]).base.as_deref() {
                Some(next) => block = next,
                None => {
                    missing_at = Some(depth);
                    break;
                }
            }
        }
    }

    if let Some(first) = missing_at {
        trace!(
            "materializing mtrie blocks for levels {}..={}",
            first,
            level
        );
        let mut chain: Option<Box<MtrieBlock<T>>> = None;
        for depth in (first..=level).rev() {
            if alloc.mtrie_block().is_err() {
                stats.mtrie_alloc_failures += 1;
                // Nothing was hooked yet: dropping the partial chain
                // undoes this call completely.
                if let Some(partial) = chain.take() {
                    Mtrie::free_block(partial, alloc, stats);
                }
                return Err(LpmError::Resources);
            }
            stats.block_allocated();
            let mut block = Box::new(MtrieBlock::zeroed());
            if let Some(lower) = chain.take() {
                block.entry_mut(addr[depth]).base = Some(lower);
            }
            chain = Some(block);
        }

        // Hook the finished chain below its deepest existing parent.
        let mut parent = &mut *mtrie.root;
        for depth in 1..first {
            parent = match parent
                .entry_mut(addr[depth - 1])
                .base
                .as_deref_mut()
            {
                Some(next) => next,
                None => return Err(LpmError::Internal),
            };
        }
        parent.entry_mut(addr[first - 1]).base = chain;
    }

    let mut block = &mut *mtrie.root;
    for depth in 1..=level {
        block = match block.entry_mut(addr[depth - 1]).base.as_deref_mut() {
            Some(next) => next,
            None => return Err(LpmError::Internal),
        };
    }
    Ok(block)
}

/// Top-down clear of a binding's whole footprint: the single covering
/// entry per intermediate level, then the pattern range at the
/// binding's own level. Only correct when neither a less nor a more
/// specific binding exists, which is the caller's case analysis.
pub(crate) fn zero_out<T: Clone>(
    mtrie: &mut Mtrie<T>,
    addr: &[u8; MAX_LEVELS],
    masklen: u8,
) -> Result<(), LpmError> {
    debug_assert!(masklen > 0);

    let mut block = &mut *mtrie.root;
    let mut level = 0usize;
    loop {
        let idx = addr[level];
        if masklen as usize - level * 8 <= 8 {
            Mtrie::pattern_fill(block, idx, masklen - 1, None);
            return Ok(());
        }
        let entry = block.entry_mut(idx);
        entry.value = None;
        block = match entry.base.as_deref_mut() {
            Some(next) => next,
            // The binding was reachable a moment ago; its chain cannot
            // be missing.
            None => return Err(LpmError::Internal),
        };
        level += 1;
    }
}
