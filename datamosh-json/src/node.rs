//! Node variants for the document tree.

use bitflags::bitflags;

use crate::arena::NodeId;

/// Distinguished "null" value for [`Node::Number`].
///
/// The interchange format has no separate null type; a number holding this
/// sentinel is rendered as `null` and `null` parses back into it.
pub const NULL_SENTINEL: i64 = i64::MIN;

/// Marks an absent motion vector inside an [`Node::MvGrid`] cell.
pub const MV_NULL: i32 = i32::MIN;

/// Maximum number of motion vectors per grid cell (one per prediction block).
pub const MAX_GRID_BLOCKS: usize = 4;

bitflags! {
    /// Per-container rendering hints for the pretty-printer.
    ///
    /// Each container decides at construction time how its children are
    /// separated, which lets codecs render coefficient blocks one per line
    /// while keeping the top-level structure multi-line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrintFlags: u8 {
        /// Separate children with a single space instead of newline+indent.
        const NO_LF = 0x01;
        /// With `NO_LF`, emit no separator at all.
        const NO_SPACE = 0x02;
        /// Break array elements into runs of 8 per line.
        const SPLIT8 = 0x04;
    }
}

/// Initial fill for a freshly created motion-vector grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFill {
    /// All vectors start at (0, 0).
    Zero,
    /// All vectors start absent ([`MV_NULL`]).
    Null,
}

/// A node in the document tree.
///
/// Container variants hold [`NodeId`] handles into the owning [`Arena`];
/// handles must never be mixed between arenas.
///
/// [`Arena`]: crate::arena::Arena
#[derive(Debug, Clone)]
pub enum Node {
    Object(ObjectNode),
    Array(ArrayNode),
    /// Flat sequence of 64-bit integers. A representation specialization for
    /// coefficient and vector blocks, not an observable type: consumers that
    /// need a generic array must handle both.
    IntArray(IntArrayNode),
    /// Fixed-size grid of motion-vector slots.
    MvGrid(MvGridNode),
    Str(Box<str>),
    /// 64-bit signed integer; [`NULL_SENTINEL`] means null.
    Number(i64),
    Bool(bool),
}

/// Ordered key→node mapping. Insertion order is significant for output.
///
/// While open, keys and values grow in staging vectors and deleted keys leave
/// a `None` tombstone. Closing compacts the tombstones away; after that the
/// object is immutable except for value replacement.
#[derive(Debug, Clone, Default)]
pub struct ObjectNode {
    pub(crate) keys: Vec<Option<Box<str>>>,
    pub(crate) values: Vec<NodeId>,
    pub(crate) flags: PrintFlags,
    pub(crate) closed: bool,
}

impl ObjectNode {
    /// Number of live (non-tombstoned) entries.
    pub fn len(&self) -> usize {
        if self.closed {
            self.keys.len()
        } else {
            self.keys.iter().filter(|k| k.is_some()).count()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate live entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.keys
            .iter()
            .zip(self.values.iter())
            .filter_map(|(k, &v)| k.as_deref().map(|k| (k, v)))
    }
}

/// Ordered node sequence.
#[derive(Debug, Clone, Default)]
pub struct ArrayNode {
    pub(crate) items: Vec<NodeId>,
    pub(crate) flags: PrintFlags,
    pub(crate) closed: bool,
}

impl ArrayNode {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[NodeId] {
        &self.items
    }
}

/// Flat 64-bit integer sequence.
#[derive(Debug, Clone, Default)]
pub struct IntArrayNode {
    pub(crate) items: Vec<i64>,
    pub(crate) flags: PrintFlags,
}

impl IntArrayNode {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn values(&self) -> &[i64] {
        &self.items
    }
}

/// width×height grid of up to [`MAX_GRID_BLOCKS`] (x, y) vector slots per
/// cell, plus a per-cell slot count.
///
/// Storage is one plane per block index, each `width * height` vectors, so
/// that the common one-vector-per-cell case stays a single dense plane.
#[derive(Debug, Clone)]
pub struct MvGridNode {
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) max_blocks: usize,
    pub(crate) planes: Vec<Vec<[i32; 2]>>,
    pub(crate) counts: Vec<u8>,
    pub(crate) flags: PrintFlags,
}

impl MvGridNode {
    pub(crate) fn new(width: u16, height: u16, max_blocks: usize, fill: GridFill) -> Self {
        let cells = width as usize * height as usize;
        let init = match fill {
            GridFill::Zero => [0, 0],
            GridFill::Null => [MV_NULL, MV_NULL],
        };
        Self {
            width,
            height,
            max_blocks,
            planes: (0..max_blocks).map(|_| vec![init; cells]).collect(),
            counts: vec![0; cells],
            flags: PrintFlags::default(),
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Highest per-cell block count, recomputed by
    /// [`Arena::finish_mv_grid`](crate::arena::Arena::finish_mv_grid).
    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn vector(&self, x: u16, y: u16, block: usize) -> [i32; 2] {
        self.planes[block][self.cell_index(x, y)]
    }

    pub fn block_count(&self, x: u16, y: u16) -> u8 {
        self.counts[self.cell_index(x, y)]
    }

    pub(crate) fn cell_index(&self, x: u16, y: u16) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl Node {
    /// Node length as exposed to scripts: entry count for objects, element
    /// count for arrays, grid height for grids, 0 for scalars.
    pub fn len(&self) -> usize {
        match self {
            Node::Object(o) => o.len(),
            Node::Array(a) => a.len(),
            Node::IntArray(a) => a.len(),
            Node::MvGrid(g) => g.height as usize,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for a number holding the null sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Number(v) if *v == NULL_SENTINEL)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Number(v) if *v != NULL_SENTINEL => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
