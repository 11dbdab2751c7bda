//! Motion-vector export/import state.
//!
//! Codecs that expose motion vectors share this per-frame context instead of
//! each tracking grid coordinates themselves. The frame document gets one
//! grid per prediction direction; a direction nobody used is dropped before
//! the frame is closed, so simple forward-predicted streams export compact
//! documents.

use datamosh_core::error::{CodecError, Error, Result};
use datamosh_json::{Arena, GridFill, Node, NodeId, MAX_GRID_BLOCKS, MV_NULL};

/// Prediction direction of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvDirection {
    Forward,
    Backward,
}

impl MvDirection {
    fn index(self) -> usize {
        match self {
            MvDirection::Forward => 0,
            MvDirection::Backward => 1,
        }
    }

    fn key(self) -> &'static str {
        match self {
            MvDirection::Forward => "forward",
            MvDirection::Backward => "backward",
        }
    }
}

const DIRECTIONS: [MvDirection; 2] = [MvDirection::Forward, MvDirection::Backward];

#[derive(Debug, Clone, Copy)]
struct Selection {
    dir: usize,
    x: u16,
    y: u16,
    block: usize,
}

/// Per-frame motion-vector grid state.
///
/// Export: the codec walks macroblocks, selecting a cell and writing the
/// vectors it decodes. Import: the codec selects the same cells and reads
/// the (possibly edited) vectors back.
#[derive(Debug)]
pub struct MvContext {
    grids: [Option<NodeId>; 2],
    used: [usize; 2],
    cur: Option<Selection>,
}

impl MvContext {
    /// Create grids for both directions in `arena`, null-filled.
    pub fn export_init(arena: &mut Arena, mb_width: u16, mb_height: u16) -> Self {
        let forward = arena.new_mv_grid(mb_width, mb_height, MAX_GRID_BLOCKS, GridFill::Null);
        let backward = arena.new_mv_grid(mb_width, mb_height, MAX_GRID_BLOCKS, GridFill::Null);
        Self {
            grids: [Some(forward), Some(backward)],
            used: [0, 0],
            cur: None,
        }
    }

    /// Pick up the grids of a previously exported frame document.
    pub fn import_init(arena: &Arena, frame_root: NodeId) -> Result<Self> {
        let mv = arena
            .object_get(frame_root, "mv")
            .ok_or(CodecError::DocumentMismatch("frame has no 'mv' key".into()))?;
        let mut grids = [None, None];
        for dir in DIRECTIONS {
            if let Some(id) = arena.object_get(mv, dir.key()) {
                if !matches!(arena.node(id), Node::MvGrid(_)) {
                    return Err(Error::from(CodecError::DocumentMismatch(format!(
                        "'mv.{}' is not a vector grid",
                        dir.key()
                    ))));
                }
                grids[dir.index()] = Some(id);
            }
        }
        Ok(Self {
            grids,
            used: [0, 0],
            cur: None,
        })
    }

    /// Declare how many vector blocks the macroblock at (`mb_x`, `mb_y`)
    /// carries. Call once per macroblock before selecting into it.
    pub fn init_mb(&mut self, arena: &mut Arena, mb_x: u16, mb_y: u16, nb_blocks: u8) {
        for grid in self.grids.iter().flatten() {
            arena.set_mv_count(*grid, mb_x, mb_y, nb_blocks);
        }
    }

    /// Point the context at one block of one macroblock.
    pub fn select(&mut self, dir: MvDirection, mb_x: u16, mb_y: u16, block: usize) {
        self.cur = Some(Selection {
            dir: dir.index(),
            x: mb_x,
            y: mb_y,
            block,
        });
    }

    /// Write the selected block's vector (export path).
    pub fn set(&mut self, arena: &mut Arena, mv: [i32; 2]) {
        if let Some(sel) = self.cur {
            if let Some(grid) = self.grids[sel.dir] {
                arena.set_mv(grid, sel.x, sel.y, sel.block, mv);
                self.used[sel.dir] += 1;
            }
        }
    }

    /// Read the selected block's vector (import path). `None` when the cell
    /// holds no vector or the direction was not exported.
    pub fn get(&self, arena: &Arena) -> Option<[i32; 2]> {
        let sel = self.cur?;
        let grid = self.grids[sel.dir]?;
        let mv = arena.mv_grid(grid).vector(sel.x, sel.y, sel.block);
        if mv[0] == MV_NULL {
            None
        } else {
            Some(mv)
        }
    }

    /// Finish the grids and attach them to the frame document under "mv",
    /// dropping any direction that never received a vector.
    pub fn export_close(mut self, arena: &mut Arena, frame_root: NodeId) {
        let mv = arena.new_object();
        for dir in DIRECTIONS {
            let idx = dir.index();
            if self.used[idx] == 0 {
                self.grids[idx] = None;
                continue;
            }
            if let Some(grid) = self.grids[idx] {
                arena.finish_mv_grid(grid);
                arena.object_add(mv, dir.key(), grid);
            }
        }
        arena.close_object(mv);
        arena.object_add(frame_root, "mv", mv);
    }
}

/// Reconstruct a vector component from its prediction and coded delta,
/// wrapping into the coded range given by `fcode`.
///
/// Decoders short-circuit the zero code before any sign handling, so a zero
/// delta returns the prediction untouched even when it lies outside the
/// coded range. Edited documents round-trip through the same rule.
pub fn modulo_decode(pred: i32, delta: i32, fcode: u8) -> i32 {
    if delta == 0 {
        return pred;
    }
    let bits = 5 + u32::from(fcode) - 1;
    sign_extend(pred.wrapping_add(delta), bits)
}

fn sign_extend(val: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (((val as u32) << shift) as i32) >> shift
}
