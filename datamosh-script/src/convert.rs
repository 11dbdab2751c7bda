//! Document ↔ rhai value conversion.
//!
//! A single frame can carry tens of thousands of coefficient values, so the
//! outbound direction (document to script value) draws its array allocations
//! from an [`ArrayPool`] instead of allocating fresh vectors per frame, and
//! the inbound direction returns the arrays it consumes to the same pool;
//! steady-state script runs cycle the same buffers frame after frame. The
//! inbound direction re-infers the flat integer and motion-vector grid
//! representations so a round trip through an unmodified script is lossless.

use std::collections::HashMap;

use rhai::Dynamic;

use datamosh_core::error::{Error, Result};
use datamosh_json::node::{IntArrayNode, MvGridNode};
use datamosh_json::{Arena, GridFill, Node, NodeId, MAX_GRID_BLOCKS, MV_NULL, NULL_SENTINEL};

/// Recycled `rhai::Array` allocations, bucketed by capacity.
///
/// `begin()` marks the start of one top-level conversion; the handed-out
/// counter it resets only feeds the trace line, the free lists persist for
/// the lifetime of the pool (one script thread).
#[derive(Debug, Default)]
pub struct ArrayPool {
    free: HashMap<usize, Vec<rhai::Array>>,
    handed_out: usize,
}

impl ArrayPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-conversion cursor.
    pub fn begin(&mut self) {
        if self.handed_out != 0 {
            tracing::trace!(arrays = self.handed_out, "conversion used pooled arrays");
        }
        self.handed_out = 0;
    }

    fn acquire(&mut self, len: usize) -> rhai::Array {
        self.handed_out += 1;
        match self.free.get_mut(&len).and_then(Vec::pop) {
            Some(mut arr) => {
                arr.clear();
                arr
            }
            None => rhai::Array::with_capacity(len),
        }
    }

    /// Return an array's allocation to the pool.
    pub fn recycle(&mut self, mut arr: rhai::Array) {
        let cap = arr.capacity();
        arr.clear();
        self.free.entry(cap).or_default().push(arr);
    }
}

/// Convert a document subtree into a script value.
pub fn doc_to_dynamic(pool: &mut ArrayPool, arena: &Arena, id: NodeId) -> Dynamic {
    match arena.node(id) {
        Node::Object(o) => {
            let mut map = rhai::Map::new();
            for (key, value) in o.entries() {
                map.insert(key.into(), doc_to_dynamic(pool, arena, value));
            }
            Dynamic::from_map(map)
        }
        Node::Array(a) => {
            let mut arr = pool.acquire(a.len());
            for &item in a.items() {
                arr.push(doc_to_dynamic(pool, arena, item));
            }
            Dynamic::from_array(arr)
        }
        Node::IntArray(a) => int_array_to_dynamic(pool, a),
        Node::MvGrid(g) => mv_grid_to_dynamic(pool, g),
        Node::Str(s) => Dynamic::from(s.to_string()),
        Node::Number(v) if *v == NULL_SENTINEL => Dynamic::UNIT,
        Node::Number(v) => Dynamic::from_int(*v),
        Node::Bool(b) => Dynamic::from_bool(*b),
    }
}

fn int_array_to_dynamic(pool: &mut ArrayPool, a: &IntArrayNode) -> Dynamic {
    let mut arr = pool.acquire(a.len());
    for &v in a.values() {
        if v == NULL_SENTINEL {
            arr.push(Dynamic::UNIT);
        } else {
            arr.push(Dynamic::from_int(v));
        }
    }
    Dynamic::from_array(arr)
}

/// Grids become an array of rows; each cell is `()`, a `[x, y]` pair, or an
/// array of pairs, mirroring the text rendering.
fn mv_grid_to_dynamic(pool: &mut ArrayPool, g: &MvGridNode) -> Dynamic {
    let mut rows = pool.acquire(g.height() as usize);
    for y in 0..g.height() {
        let mut row = pool.acquire(g.width() as usize);
        for x in 0..g.width() {
            let cell = if g.max_blocks() == 1 {
                let mv = g.vector(x, y, 0);
                if mv[0] == MV_NULL {
                    Dynamic::UNIT
                } else {
                    pair_to_dynamic(pool, mv)
                }
            } else {
                match g.block_count(x, y) {
                    0 => Dynamic::UNIT,
                    1 => pair_to_dynamic(pool, g.vector(x, y, 0)),
                    n => {
                        let mut blocks = pool.acquire(n as usize);
                        for k in 0..n as usize {
                            blocks.push(pair_to_dynamic(pool, g.vector(x, y, k)));
                        }
                        Dynamic::from_array(blocks)
                    }
                }
            };
            row.push(cell);
        }
        rows.push(Dynamic::from_array(row));
    }
    Dynamic::from_array(rows)
}

fn pair_to_dynamic(pool: &mut ArrayPool, mv: [i32; 2]) -> Dynamic {
    let mut pair = pool.acquire(2);
    pair.push(Dynamic::from_int(mv[0] as i64));
    pair.push(Dynamic::from_int(mv[1] as i64));
    Dynamic::from_array(pair)
}

/// Convert a script value back into a document subtree.
///
/// Arrays come back on the flat integer path when every element is an
/// integer or `()`; arrays shaped like a motion-vector grid (equal-width rows
/// of `()`/pair/pair-list cells) rebuild as a grid. Consumed array
/// allocations go back into `pool` for the next frame's outbound conversion.
pub fn dynamic_to_doc(pool: &mut ArrayPool, arena: &mut Arena, value: Dynamic) -> Result<NodeId> {
    let value = value.flatten();
    if value.is_unit() {
        return Ok(arena.new_null());
    }
    if let Some(v) = value.clone().try_cast::<i64>() {
        return Ok(arena.new_number(v));
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Ok(arena.new_bool(b));
    }
    if let Some(s) = value.clone().try_cast::<rhai::ImmutableString>() {
        return Ok(arena.new_string(s.as_str()));
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let obj = arena.new_object();
        for (key, v) in map {
            let node = dynamic_to_doc(pool, arena, v)?;
            arena.object_add(obj, key.as_str(), node);
        }
        arena.close_object(obj);
        return Ok(obj);
    }
    if let Some(arr) = value.try_cast::<rhai::Array>() {
        return array_to_doc(pool, arena, arr);
    }
    Err(Error::script(
        "script produced a value that has no document representation",
    ))
}

fn array_to_doc(pool: &mut ArrayPool, arena: &mut Arena, mut arr: rhai::Array) -> Result<NodeId> {
    if let Some(ints) = as_int_array(&arr) {
        pool.recycle(arr);
        return Ok(arena.int_array_from(&ints));
    }
    if let Some(grid) = as_mv_grid(&arr) {
        pool.recycle(arr);
        return Ok(build_mv_grid(arena, grid));
    }
    let out = arena.new_array();
    for v in arr.drain(..) {
        let node = dynamic_to_doc(pool, arena, v)?;
        arena.array_push(out, node);
    }
    pool.recycle(arr);
    arena.close_array(out);
    Ok(out)
}

fn as_int_array(arr: &rhai::Array) -> Option<Vec<i64>> {
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        if v.is_unit() {
            out.push(NULL_SENTINEL);
        } else if let Ok(i) = v.as_int() {
            out.push(i);
        } else {
            return None;
        }
    }
    Some(out)
}

/// A parsed grid cell: up to [`MAX_GRID_BLOCKS`] vectors.
type GridCell = Vec<[i32; 2]>;

fn as_mv_grid(arr: &rhai::Array) -> Option<Vec<Vec<GridCell>>> {
    if arr.is_empty() {
        return None;
    }
    let mut rows: Vec<Vec<GridCell>> = Vec::with_capacity(arr.len());
    let mut width = None;
    let mut saw_vector = false;
    for row in arr {
        let row = row.read_lock::<rhai::Array>()?;
        match width {
            None => width = Some(row.len()),
            Some(w) if w != row.len() => return None,
            _ => {}
        }
        let mut cells = Vec::with_capacity(row.len());
        for cell in row.iter() {
            let cell = as_grid_cell(cell)?;
            if !cell.is_empty() {
                saw_vector = true;
            }
            cells.push(cell);
        }
        rows.push(cells);
    }
    if width == Some(0) || !saw_vector {
        return None;
    }
    Some(rows)
}

fn as_grid_cell(cell: &Dynamic) -> Option<GridCell> {
    if cell.is_unit() {
        return Some(Vec::new());
    }
    let arr = cell.read_lock::<rhai::Array>()?;
    if let Some(mv) = as_pair(&arr) {
        return Some(vec![mv]);
    }
    if arr.is_empty() || arr.len() > MAX_GRID_BLOCKS {
        return None;
    }
    let mut blocks = Vec::with_capacity(arr.len());
    for v in arr.iter() {
        let inner = v.read_lock::<rhai::Array>()?;
        blocks.push(as_pair(&inner)?);
    }
    Some(blocks)
}

fn as_pair(arr: &rhai::Array) -> Option<[i32; 2]> {
    if arr.len() != 2 {
        return None;
    }
    let x = arr[0].as_int().ok()?;
    let y = arr[1].as_int().ok()?;
    Some([x as i32, y as i32])
}

fn build_mv_grid(arena: &mut Arena, rows: Vec<Vec<GridCell>>) -> NodeId {
    let height = rows.len() as u16;
    let width = rows[0].len() as u16;
    let grid = arena.new_mv_grid(width, height, MAX_GRID_BLOCKS, GridFill::Null);
    for (y, row) in rows.into_iter().enumerate() {
        for (x, cell) in row.into_iter().enumerate() {
            arena.set_mv_count(grid, x as u16, y as u16, cell.len() as u8);
            for (k, mv) in cell.into_iter().enumerate() {
                arena.set_mv(grid, x as u16, y as u16, k, mv);
            }
        }
    }
    arena.finish_mv_grid(grid);
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamosh_json::to_string;

    fn round_trip(src: &str) -> String {
        let mut arena = Arena::new();
        let root = datamosh_json::parse(&mut arena, src).unwrap();
        let mut pool = ArrayPool::new();
        pool.begin();
        let dynamic = doc_to_dynamic(&mut pool, &arena, root);
        let mut arena2 = Arena::new();
        let root2 = dynamic_to_doc(&mut pool, &mut arena2, dynamic).unwrap();
        to_string(&arena2, root2)
    }

    #[test]
    fn test_scalar_round_trip() {
        assert_eq!(round_trip("42"), "42\n");
        assert_eq!(round_trip("null"), "null\n");
        assert_eq!(round_trip("true"), "true\n");
        assert_eq!(round_trip("\"mv\""), "\"mv\"\n");
    }

    #[test]
    fn test_int_array_survives() {
        let mut arena = Arena::new();
        let root = datamosh_json::parse(&mut arena, "[1,null,3]").unwrap();
        let mut pool = ArrayPool::new();
        let dynamic = doc_to_dynamic(&mut pool, &arena, root);

        let mut arena2 = Arena::new();
        let root2 = dynamic_to_doc(&mut pool, &mut arena2, dynamic).unwrap();
        match arena2.node(root2) {
            Node::IntArray(a) => assert_eq!(a.values(), [1, NULL_SENTINEL, 3]),
            other => panic!("expected int array, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_array_stays_generic() {
        let mut arena = Arena::new();
        let root = datamosh_json::parse(&mut arena, "[1,\"x\"]").unwrap();
        let mut pool = ArrayPool::new();
        let dynamic = doc_to_dynamic(&mut pool, &arena, root);

        let mut arena2 = Arena::new();
        let root2 = dynamic_to_doc(&mut pool, &mut arena2, dynamic).unwrap();
        assert!(matches!(arena2.node(root2), Node::Array(_)));
    }

    #[test]
    fn test_mv_grid_round_trip() {
        let mut arena = Arena::new();
        let grid = arena.new_mv_grid(2, 2, 1, GridFill::Null);
        arena.set_mv(grid, 0, 0, 0, [3, -7]);
        arena.set_mv_count(grid, 0, 0, 1);
        arena.set_mv(grid, 1, 0, 0, [0, 1]);
        arena.set_mv_count(grid, 1, 0, 1);
        arena.finish_mv_grid(grid);
        let rendered = to_string(&arena, grid);

        let mut pool = ArrayPool::new();
        let dynamic = doc_to_dynamic(&mut pool, &arena, grid);
        let mut arena2 = Arena::new();
        let root2 = dynamic_to_doc(&mut pool, &mut arena2, dynamic).unwrap();
        assert!(matches!(arena2.node(root2), Node::MvGrid(_)));
        assert_eq!(to_string(&arena2, root2), rendered);
    }

    #[test]
    fn test_multi_block_grid_round_trip() {
        let mut arena = Arena::new();
        let grid = arena.new_mv_grid(2, 1, 4, GridFill::Null);
        arena.set_mv(grid, 0, 0, 0, [1, 2]);
        arena.set_mv(grid, 0, 0, 1, [3, 4]);
        arena.set_mv_count(grid, 0, 0, 2);
        arena.set_mv(grid, 1, 0, 0, [5, 6]);
        arena.set_mv_count(grid, 1, 0, 1);
        arena.finish_mv_grid(grid);

        let mut pool = ArrayPool::new();
        let dynamic = doc_to_dynamic(&mut pool, &arena, grid);
        let mut arena2 = Arena::new();
        let root2 = dynamic_to_doc(&mut pool, &mut arena2, dynamic).unwrap();
        let g = arena2.mv_grid(root2);
        assert_eq!(g.max_blocks(), 2);
        assert_eq!(g.vector(0, 0, 1), [3, 4]);
        assert_eq!(g.block_count(1, 0), 1);
    }

    #[test]
    fn test_nested_object_round_trip() {
        let src = r#"{"pkt_pos":512,"mv":{"fcode":[1,1]}}"#;
        let mut arena = Arena::new();
        let root = datamosh_json::parse(&mut arena, src).unwrap();
        assert_eq!(round_trip(src), to_string(&arena, root));
    }

    #[test]
    fn test_pool_recycles_by_capacity() {
        let mut pool = ArrayPool::new();
        let mut arr = pool.acquire(8);
        arr.push(Dynamic::from_int(1));
        let cap = arr.capacity();
        pool.recycle(arr);
        let again = pool.acquire(cap);
        assert!(again.is_empty());
        assert_eq!(again.capacity(), cap);
    }

    #[test]
    fn test_inbound_conversion_refills_pool() {
        let mut arena = Arena::new();
        let root = datamosh_json::parse(&mut arena, "[1,2,3,4]").unwrap();
        let mut pool = ArrayPool::new();
        pool.begin();
        let dynamic = doc_to_dynamic(&mut pool, &arena, root);
        assert!(pool.free.values().all(Vec::is_empty));

        let mut arena2 = Arena::new();
        dynamic_to_doc(&mut pool, &mut arena2, dynamic).unwrap();
        let reclaimed: usize = pool.free.values().map(Vec::len).sum();
        assert_eq!(reclaimed, 1);

        // the next frame's conversion draws from the reclaimed allocation
        pool.begin();
        doc_to_dynamic(&mut pool, &arena, root);
        assert!(pool.free.values().all(Vec::is_empty));
    }
}
