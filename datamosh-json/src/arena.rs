//! Arena ownership for document nodes.

use std::cmp::Ordering;

use crate::node::{
    ArrayNode, GridFill, IntArrayNode, MvGridNode, Node, ObjectNode, PrintFlags, NULL_SENTINEL,
};

/// Handle to a [`Node`] inside one [`Arena`].
///
/// Handles are plain indices; using one against a different arena is a logic
/// error and will either panic or address an unrelated node. Every handle is
/// created by the arena that owns its storage, so this only happens when code
/// smuggles handles across processing units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

/// Bump-style owner of all nodes for one processing unit.
///
/// Nodes are appended and never removed; dropping the arena frees the whole
/// tree at once. This mirrors the per-frame lifetime of exported codec state:
/// build, hand off, drop.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

/// Node pre-reservation for whole-file documents (read documents span every
/// frame of the input, per-frame arenas stay small).
const LARGE_RESERVE: usize = 64 * 1024;

impl Arena {
    /// Arena for a single frame's worth of nodes.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Arena expected to hold a whole interchange file.
    pub fn with_large_capacity() -> Self {
        Self {
            nodes: Vec::with_capacity(LARGE_RESERVE),
        }
    }

    /// Number of nodes allocated so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    //-----------------------------------------------------------------
    // constructors

    pub fn new_object(&mut self) -> NodeId {
        self.alloc(Node::Object(ObjectNode::default()))
    }

    pub fn new_array(&mut self) -> NodeId {
        self.alloc(Node::Array(ArrayNode::default()))
    }

    /// Array of `len` null slots, for index-addressed population.
    pub fn new_array_sized(&mut self, len: usize) -> NodeId {
        let null = self.new_null();
        self.alloc(Node::Array(ArrayNode {
            items: vec![null; len],
            flags: PrintFlags::default(),
            closed: true,
        }))
    }

    pub fn new_int_array(&mut self, len: usize) -> NodeId {
        self.alloc(Node::IntArray(IntArrayNode {
            items: vec![0; len],
            flags: PrintFlags::default(),
        }))
    }

    pub fn int_array_from(&mut self, values: &[i64]) -> NodeId {
        self.alloc(Node::IntArray(IntArrayNode {
            items: values.to_vec(),
            flags: PrintFlags::default(),
        }))
    }

    pub fn new_mv_grid(
        &mut self,
        width: u16,
        height: u16,
        max_blocks: usize,
        fill: GridFill,
    ) -> NodeId {
        self.alloc(Node::MvGrid(MvGridNode::new(width, height, max_blocks, fill)))
    }

    pub fn new_string(&mut self, s: &str) -> NodeId {
        self.alloc(Node::Str(s.into()))
    }

    pub fn new_number(&mut self, v: i64) -> NodeId {
        self.alloc(Node::Number(v))
    }

    pub fn new_null(&mut self) -> NodeId {
        self.alloc(Node::Number(NULL_SENTINEL))
    }

    pub fn new_bool(&mut self, v: bool) -> NodeId {
        self.alloc(Node::Bool(v))
    }

    //-----------------------------------------------------------------
    // object operations

    /// Append a key/value pair to an open object.
    pub fn object_add(&mut self, obj: NodeId, key: &str, value: NodeId) {
        let o = self.object_mut(obj);
        debug_assert!(!o.closed, "object_add on closed object");
        o.keys.push(Some(key.into()));
        o.values.push(value);
    }

    /// Look up a key; tombstoned keys are invisible.
    pub fn object_get(&self, obj: NodeId, key: &str) -> Option<NodeId> {
        self.object_ref(obj).entries().find_map(
            |(k, v)| {
                if k == key {
                    Some(v)
                } else {
                    None
                }
            },
        )
    }

    /// Replace the value of an existing key.
    pub fn object_set(&mut self, obj: NodeId, key: &str, value: NodeId) -> bool {
        let o = self.object_mut(obj);
        for (k, v) in o.keys.iter().zip(o.values.iter_mut()) {
            if k.as_deref() == Some(key) {
                *v = value;
                return true;
            }
        }
        false
    }

    /// Tombstone a key. Returns false if the key is not present.
    pub fn object_del(&mut self, obj: NodeId, key: &str) -> bool {
        let o = self.object_mut(obj);
        for k in o.keys.iter_mut() {
            if k.as_deref() == Some(key) {
                *k = None;
                return true;
            }
        }
        false
    }

    /// Compact tombstones and freeze the object.
    ///
    /// Closing an already-closed object is a no-op: length and contents are
    /// unchanged.
    pub fn close_object(&mut self, obj: NodeId) {
        let o = self.object_mut(obj);
        if o.closed {
            return;
        }
        let mut keys = Vec::with_capacity(o.keys.len());
        let mut values = Vec::with_capacity(o.values.len());
        for (k, v) in o.keys.drain(..).zip(o.values.drain(..)) {
            if let Some(k) = k {
                keys.push(Some(k));
                values.push(v);
            }
        }
        o.keys = keys;
        o.values = values;
        o.closed = true;
    }

    //-----------------------------------------------------------------
    // array operations

    pub fn array_push(&mut self, arr: NodeId, value: NodeId) {
        let a = self.array_mut(arr);
        debug_assert!(!a.closed, "array_push on closed array");
        a.items.push(value);
    }

    pub fn array_get(&self, arr: NodeId, idx: usize) -> Option<NodeId> {
        self.array_ref(arr).items.get(idx).copied()
    }

    /// Replace an element by index. Valid on closed arrays.
    pub fn array_set(&mut self, arr: NodeId, idx: usize, value: NodeId) {
        self.array_mut(arr).items[idx] = value;
    }

    /// Freeze the array. Idempotent like [`Arena::close_object`].
    pub fn close_array(&mut self, arr: NodeId) {
        let a = self.array_mut(arr);
        if a.closed {
            return;
        }
        a.items.shrink_to_fit();
        a.closed = true;
    }

    /// Sort array elements with a caller-supplied comparator.
    ///
    /// Used to restore position order after concurrent population.
    pub fn sort_array_by<F>(&mut self, arr: NodeId, mut cmp: F)
    where
        F: FnMut(&Arena, NodeId, NodeId) -> Ordering,
    {
        let mut items = std::mem::take(&mut self.array_mut(arr).items);
        items.sort_by(|&a, &b| cmp(self, a, b));
        self.array_mut(arr).items = items;
    }

    //-----------------------------------------------------------------
    // int array operations

    pub fn int_array(&self, arr: NodeId) -> &[i64] {
        match self.node(arr) {
            Node::IntArray(a) => &a.items,
            other => panic!("int_array on {:?}", node_kind(other)),
        }
    }

    pub fn int_array_mut(&mut self, arr: NodeId) -> &mut Vec<i64> {
        match self.node_mut(arr) {
            Node::IntArray(a) => &mut a.items,
            other => panic!("int_array_mut on {:?}", node_kind(other)),
        }
    }

    //-----------------------------------------------------------------
    // motion-vector grid operations

    pub fn mv_grid(&self, grid: NodeId) -> &MvGridNode {
        match self.node(grid) {
            Node::MvGrid(g) => g,
            other => panic!("mv_grid on {:?}", node_kind(other)),
        }
    }

    pub fn set_mv(&mut self, grid: NodeId, x: u16, y: u16, block: usize, mv: [i32; 2]) {
        let g = self.mv_grid_mut(grid);
        let idx = g.cell_index(x, y);
        g.planes[block][idx] = mv;
    }

    pub fn set_mv_count(&mut self, grid: NodeId, x: u16, y: u16, count: u8) {
        let g = self.mv_grid_mut(grid);
        let idx = g.cell_index(x, y);
        g.counts[idx] = count;
    }

    /// Recompute the grid's maximum per-cell block count from the populated
    /// counts. Call once after the last cell is written.
    pub fn finish_mv_grid(&mut self, grid: NodeId) {
        let g = self.mv_grid_mut(grid);
        g.max_blocks = g.counts.iter().copied().max().unwrap_or(0) as usize;
    }

    //-----------------------------------------------------------------
    // print flags

    /// Set rendering hints on a container node.
    pub fn set_print_flags(&mut self, id: NodeId, flags: PrintFlags) {
        match self.node_mut(id) {
            Node::Object(o) => o.flags = flags,
            Node::Array(a) => a.flags = flags,
            Node::IntArray(a) => a.flags = flags,
            Node::MvGrid(g) => g.flags = flags,
            _ => {}
        }
    }

    /// Rendering hints of a container node; empty for scalars.
    pub fn print_flags(&self, id: NodeId) -> PrintFlags {
        match self.node(id) {
            Node::Object(o) => o.flags,
            Node::Array(a) => a.flags,
            Node::IntArray(a) => a.flags,
            Node::MvGrid(g) => g.flags,
            _ => PrintFlags::empty(),
        }
    }

    //-----------------------------------------------------------------
    // typed accessors

    /// Entry count / element count, as [`Node::len`].
    pub fn len_of(&self, id: NodeId) -> usize {
        self.node(id).len()
    }

    pub fn is_null(&self, id: NodeId) -> bool {
        self.node(id).is_null()
    }

    pub fn as_i64(&self, id: NodeId) -> Option<i64> {
        self.node(id).as_i64()
    }

    pub fn as_str(&self, id: NodeId) -> Option<&str> {
        self.node(id).as_str()
    }

    pub fn as_bool(&self, id: NodeId) -> Option<bool> {
        self.node(id).as_bool()
    }

    //-----------------------------------------------------------------

    fn object_ref(&self, id: NodeId) -> &ObjectNode {
        match self.node(id) {
            Node::Object(o) => o,
            other => panic!("object op on {:?}", node_kind(other)),
        }
    }

    fn object_mut(&mut self, id: NodeId) -> &mut ObjectNode {
        match self.node_mut(id) {
            Node::Object(o) => o,
            other => panic!("object op on {:?}", node_kind(other)),
        }
    }

    fn array_ref(&self, id: NodeId) -> &ArrayNode {
        match self.node(id) {
            Node::Array(a) => a,
            other => panic!("array op on {:?}", node_kind(other)),
        }
    }

    fn array_mut(&mut self, id: NodeId) -> &mut ArrayNode {
        match self.node_mut(id) {
            Node::Array(a) => a,
            other => panic!("array op on {:?}", node_kind(other)),
        }
    }

    fn mv_grid_mut(&mut self, id: NodeId) -> &mut MvGridNode {
        match self.node_mut(id) {
            Node::MvGrid(g) => g,
            other => panic!("mv_grid op on {:?}", node_kind(other)),
        }
    }
}

fn node_kind(node: &Node) -> &'static str {
    match node {
        Node::Object(_) => "object",
        Node::Array(_) => "array",
        Node::IntArray(_) => "int array",
        Node::MvGrid(_) => "mv grid",
        Node::Str(_) => "string",
        Node::Number(_) => "number",
        Node::Bool(_) => "bool",
    }
}
