//! Deterministic document serializer.
//!
//! Output is byte-stable for a given tree: 2-space indentation, separator
//! behavior driven entirely by each container's [`PrintFlags`], and a single
//! trailing newline. Interchange files are compared by checksum, so the same
//! tree must always render to the same bytes.

use std::io::{self, Write};

use crate::arena::{Arena, NodeId};
use crate::node::{MvGridNode, Node, PrintFlags, MV_NULL, NULL_SENTINEL};

/// Serialize `root` to a writer, with a trailing newline.
pub fn to_writer<W: Write>(writer: &mut W, arena: &Arena, root: NodeId) -> io::Result<()> {
    let mut out = io::BufWriter::new(writer);
    print_node(&mut out, arena, root, 0)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Serialize `root` to a `String`.
pub fn to_string(arena: &Arena, root: NodeId) -> String {
    let mut buf = Vec::new();
    // Vec<u8> writes cannot fail and the printer only emits UTF-8
    let _ = print_node(&mut buf, arena, root, 0);
    buf.push(b'\n');
    String::from_utf8_lossy(&buf).into_owned()
}

/// Newline + indent for multi-line containers, a single space for `NO_LF`
/// ones, nothing when `NO_SPACE` is also set.
fn output_lf<W: Write>(out: &mut W, flags: PrintFlags, level: usize) -> io::Result<()> {
    if !flags.contains(PrintFlags::NO_LF) {
        out.write_all(b"\n")?;
        for _ in 0..level {
            out.write_all(b"  ")?;
        }
    } else if !flags.contains(PrintFlags::NO_SPACE) {
        out.write_all(b" ")?;
    }
    Ok(())
}

/// Array element separator: `SPLIT8` breaks every eighth element per the
/// container's line mode and spaces the rest.
fn output_lf_array<W: Write>(
    out: &mut W,
    flags: PrintFlags,
    level: usize,
    i: usize,
) -> io::Result<()> {
    if flags.contains(PrintFlags::SPLIT8) {
        if i & 7 == 0 {
            output_lf(out, flags, level)?;
        } else {
            out.write_all(b" ")?;
        }
        Ok(())
    } else {
        output_lf(out, flags, level)
    }
}

fn output_num<W: Write>(out: &mut W, val: i64) -> io::Result<()> {
    if val == NULL_SENTINEL {
        out.write_all(b"null")
    } else {
        write!(out, "{val}")
    }
}

fn output_string<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    out.write_all(b"\"")?;
    for c in s.chars() {
        match c {
            '"' => out.write_all(b"\\\"")?,
            '\\' => out.write_all(b"\\\\")?,
            '/' => out.write_all(b"\\/")?,
            '\u{8}' => out.write_all(b"\\b")?,
            '\u{c}' => out.write_all(b"\\f")?,
            '\n' => out.write_all(b"\\n")?,
            '\r' => out.write_all(b"\\r")?,
            '\t' => out.write_all(b"\\t")?,
            c => write!(out, "{c}")?,
        }
    }
    out.write_all(b"\"")
}

fn output_mv<W: Write>(out: &mut W, mv: [i32; 2]) -> io::Result<()> {
    write!(out, "[{},{}]", mv[0], mv[1])
}

fn print_node<W: Write>(out: &mut W, arena: &Arena, id: NodeId, level: usize) -> io::Result<()> {
    match arena.node(id) {
        Node::Object(o) => {
            out.write_all(b"{")?;
            for (i, (key, value)) in o.entries().enumerate() {
                if i != 0 {
                    out.write_all(b",")?;
                }
                output_lf(out, o.flags, level + 1)?;
                output_string(out, key)?;
                out.write_all(b":")?;
                print_node(out, arena, value, level + 1)?;
            }
            output_lf(out, o.flags, level)?;
            out.write_all(b"}")
        }
        Node::Array(a) => {
            out.write_all(b"[")?;
            for (i, &item) in a.items.iter().enumerate() {
                if i != 0 {
                    out.write_all(b",")?;
                }
                output_lf_array(out, a.flags, level + 1, i)?;
                print_node(out, arena, item, level + 1)?;
            }
            output_lf(out, a.flags, level)?;
            out.write_all(b"]")
        }
        Node::IntArray(a) => {
            out.write_all(b"[")?;
            for (i, &val) in a.items.iter().enumerate() {
                if i != 0 {
                    out.write_all(b",")?;
                }
                output_lf_array(out, a.flags, level + 1, i)?;
                output_num(out, val)?;
            }
            output_lf(out, a.flags, level)?;
            out.write_all(b"]")
        }
        Node::MvGrid(g) => print_mv_grid(out, g, level),
        Node::Str(s) => output_string(out, s),
        Node::Number(v) => output_num(out, *v),
        Node::Bool(b) => out.write_all(if *b { b"true" } else { b"false" }),
    }
}

/// Grid rows render one per line as `[ cell, cell, ... ]`. With a single
/// block plane a cell is `[x,y]` or `null`; otherwise the per-cell count
/// picks `null`, a bare vector, or a nested vector list.
fn print_mv_grid<W: Write>(out: &mut W, g: &MvGridNode, level: usize) -> io::Result<()> {
    out.write_all(b"[")?;
    for y in 0..g.height {
        if y != 0 {
            out.write_all(b",")?;
        }
        output_lf(out, g.flags, level + 1)?;
        out.write_all(b"[")?;
        for x in 0..g.width {
            if x != 0 {
                out.write_all(b",")?;
            }
            out.write_all(b" ")?;
            let idx = g.cell_index(x, y);
            if g.max_blocks == 1 {
                let mv = g.planes[0][idx];
                if mv[0] == MV_NULL {
                    out.write_all(b"null")?;
                } else {
                    output_mv(out, mv)?;
                }
            } else {
                match g.counts[idx] {
                    0 => out.write_all(b"null")?,
                    1 => output_mv(out, g.planes[0][idx])?,
                    n => {
                        out.write_all(b"[")?;
                        for k in 0..n as usize {
                            if k != 0 {
                                out.write_all(b",")?;
                            }
                            output_mv(out, g.planes[k][idx])?;
                        }
                        out.write_all(b"]")?;
                    }
                }
            }
        }
        out.write_all(b" ]")?;
    }
    output_lf(out, g.flags, level)?;
    out.write_all(b"]")
}
