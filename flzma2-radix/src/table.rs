//! Match table cell storage.
//!
//! Each position of the dictionary holds one entry: the position of an
//! earlier occurrence (the link) and the length of the common prefix. Two
//! layouts exist:
//!
//! - [`BitpackCells`]: one `u32` per position, 26 link bits and 6 length
//!   bits. Used for dictionaries up to 64 MiB, lengths cap at 63.
//! - [`StructuredCells`]: groups of four positions, each with a full `u32`
//!   link and a `u8` length. Lengths cap at 255.
//!
//! Cells are relaxed atomics. During a build, worker threads write disjoint
//! positions (every position belongs to exactly one radix list), so no
//! ordering beyond the pool's job hand-off is needed.

use flzma2_core::{Flzma2Error, Result};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Sentinel for "no earlier occurrence".
pub const NULL_LINK: u32 = 0xFFFF_FFFF;

/// Link bits in a bitpacked cell.
pub const BITPACK_LINK_BITS: u32 = 26;
/// Mask selecting the link of a bitpacked cell.
pub const BITPACK_LINK_MASK: u32 = (1 << BITPACK_LINK_BITS) - 1;
/// Longest length a bitpacked cell stores.
pub const BITPACK_MAX_LENGTH: u32 = 63;
/// Longest length a structured cell stores.
pub const STRUCTURED_MAX_LENGTH: u32 = 255;

/// Largest dictionary the bitpacked layout can address.
pub const BITPACK_MAX_DICTIONARY: usize = 1 << BITPACK_LINK_BITS;

/// Access to one table layout.
pub trait TableCells: Send + Sync {
    /// Longest length the layout can store.
    const MAX_LENGTH: u32;

    /// Number of positions.
    fn capacity(&self) -> usize;

    /// Store an unprocessed link with no length.
    fn init_link(&self, pos: usize, link: u32);

    /// The link of `pos`, or an out-of-range value for null cells.
    fn link(&self, pos: usize) -> u32;

    /// The link written by [`init_link`](Self::init_link), before any length
    /// is attached.
    fn initial_link(&self, pos: usize) -> u32;

    /// The stored length of `pos`.
    fn length(&self, pos: usize) -> u32;

    /// Store a link together with its length.
    fn set_link_and_length(&self, pos: usize, link: u32, length: u32);

    /// Attach a length to a link previously read from `pos`.
    fn set_length(&self, pos: usize, link: u32, length: u32);

    /// Mark `pos` as having no earlier occurrence.
    fn set_null(&self, pos: usize);

    /// Whether `pos` has no earlier occurrence.
    fn is_null(&self, pos: usize) -> bool;

    /// Link and length of `pos`, or `None` when null.
    fn entry(&self, pos: usize) -> Option<(u32, u32)>;
}

fn alloc_cells<T>(count: usize, unit_size: usize, make: impl Fn() -> T) -> Result<Box<[T]>> {
    let mut cells = Vec::new();
    cells
        .try_reserve_exact(count)
        .map_err(|_| Flzma2Error::out_of_memory(count.saturating_mul(unit_size)))?;
    cells.extend((0..count).map(|_| make()));
    Ok(cells.into_boxed_slice())
}

/// One `u32` per position: `link | length << 26`.
pub struct BitpackCells {
    cells: Box<[AtomicU32]>,
}

impl BitpackCells {
    /// Allocate a table for `size` positions, all null.
    pub fn new(size: usize) -> Result<Self> {
        Ok(Self {
            cells: alloc_cells(size, 4, || AtomicU32::new(NULL_LINK))?,
        })
    }

    #[inline]
    fn raw(&self, pos: usize) -> u32 {
        self.cells[pos].load(Ordering::Relaxed)
    }
}

impl TableCells for BitpackCells {
    const MAX_LENGTH: u32 = BITPACK_MAX_LENGTH;

    fn capacity(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn init_link(&self, pos: usize, link: u32) {
        self.cells[pos].store(link, Ordering::Relaxed);
    }

    #[inline]
    fn link(&self, pos: usize) -> u32 {
        self.raw(pos) & BITPACK_LINK_MASK
    }

    #[inline]
    fn initial_link(&self, pos: usize) -> u32 {
        self.raw(pos)
    }

    #[inline]
    fn length(&self, pos: usize) -> u32 {
        self.raw(pos) >> BITPACK_LINK_BITS
    }

    #[inline]
    fn set_link_and_length(&self, pos: usize, link: u32, length: u32) {
        self.cells[pos].store(link | (length << BITPACK_LINK_BITS), Ordering::Relaxed);
    }

    #[inline]
    fn set_length(&self, pos: usize, link: u32, length: u32) {
        self.set_link_and_length(pos, link, length);
    }

    #[inline]
    fn set_null(&self, pos: usize) {
        self.cells[pos].store(NULL_LINK, Ordering::Relaxed);
    }

    #[inline]
    fn is_null(&self, pos: usize) -> bool {
        self.raw(pos) == NULL_LINK
    }

    #[inline]
    fn entry(&self, pos: usize) -> Option<(u32, u32)> {
        let raw = self.raw(pos);
        (raw != NULL_LINK).then(|| (raw & BITPACK_LINK_MASK, raw >> BITPACK_LINK_BITS))
    }
}

/// Four positions sharing one unit.
pub struct Unit {
    links: [AtomicU32; 4],
    lengths: [AtomicU8; 4],
}

impl Unit {
    fn new() -> Self {
        Self {
            links: std::array::from_fn(|_| AtomicU32::new(NULL_LINK)),
            lengths: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }
}

/// Full 32-bit links and 8-bit lengths, for dictionaries above 64 MiB.
pub struct StructuredCells {
    units: Box<[Unit]>,
    size: usize,
}

impl StructuredCells {
    /// Allocate a table for `size` positions, all null.
    pub fn new(size: usize) -> Result<Self> {
        Ok(Self {
            units: alloc_cells(size.div_ceil(4), std::mem::size_of::<Unit>(), Unit::new)?,
            size,
        })
    }

    #[inline]
    fn link_cell(&self, pos: usize) -> &AtomicU32 {
        &self.units[pos >> 2].links[pos & 3]
    }

    #[inline]
    fn length_cell(&self, pos: usize) -> &AtomicU8 {
        &self.units[pos >> 2].lengths[pos & 3]
    }
}

impl TableCells for StructuredCells {
    const MAX_LENGTH: u32 = STRUCTURED_MAX_LENGTH;

    fn capacity(&self) -> usize {
        self.size
    }

    // Also clears the length so an unprocessed cell never reports a match.
    #[inline]
    fn init_link(&self, pos: usize, link: u32) {
        self.link_cell(pos).store(link, Ordering::Relaxed);
        self.length_cell(pos).store(0, Ordering::Relaxed);
    }

    #[inline]
    fn link(&self, pos: usize) -> u32 {
        self.link_cell(pos).load(Ordering::Relaxed)
    }

    #[inline]
    fn initial_link(&self, pos: usize) -> u32 {
        self.link(pos)
    }

    #[inline]
    fn length(&self, pos: usize) -> u32 {
        self.length_cell(pos).load(Ordering::Relaxed) as u32
    }

    #[inline]
    fn set_link_and_length(&self, pos: usize, link: u32, length: u32) {
        self.link_cell(pos).store(link, Ordering::Relaxed);
        self.length_cell(pos).store(length as u8, Ordering::Relaxed);
    }

    #[inline]
    fn set_length(&self, pos: usize, _link: u32, length: u32) {
        self.length_cell(pos).store(length as u8, Ordering::Relaxed);
    }

    #[inline]
    fn set_null(&self, pos: usize) {
        self.link_cell(pos).store(NULL_LINK, Ordering::Relaxed);
    }

    #[inline]
    fn is_null(&self, pos: usize) -> bool {
        self.link(pos) == NULL_LINK
    }

    #[inline]
    fn entry(&self, pos: usize) -> Option<(u32, u32)> {
        let link = self.link(pos);
        (link != NULL_LINK).then(|| (link, self.length(pos)))
    }
}

/// The table layout chosen for a dictionary size.
pub enum TableStorage {
    /// Bitpacked cells.
    Bitpack(BitpackCells),
    /// Structured cells.
    Structured(StructuredCells),
}

impl TableStorage {
    /// Allocate `size` cells in the given layout.
    pub fn new(size: usize, structured: bool) -> Result<Self> {
        if structured {
            StructuredCells::new(size).map(Self::Structured)
        } else {
            BitpackCells::new(size).map(Self::Bitpack)
        }
    }

    /// Whether the structured layout is in use.
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Number of positions.
    pub fn capacity(&self) -> usize {
        match self {
            Self::Bitpack(cells) => cells.capacity(),
            Self::Structured(cells) => cells.capacity(),
        }
    }
}

/// Run `$body` with `$cells` bound to the concrete layout of `$storage`.
#[macro_export]
macro_rules! with_cells {
    ($storage:expr, $cells:ident => $body:expr) => {
        match $storage {
            $crate::table::TableStorage::Bitpack($cells) => $body,
            $crate::table::TableStorage::Structured($cells) => $body,
        }
    };
}
