//! # Datamosh JSON
//!
//! Arena-backed structured document model used as the interchange format
//! between codec internals and user scripts.
//!
//! Documents are trees of [`Node`]s owned by an [`Arena`]. The arena owns all
//! node storage for one processing unit (one frame, or a whole interchange
//! file) and frees everything at once when dropped; nodes are addressed by
//! lightweight [`NodeId`] handles and are never individually freed.
//!
//! The text format is JSON restricted to 64-bit signed integers. Arrays whose
//! elements are all numeric are stored flat as [`Node::IntArray`], and
//! motion-vector fields use the [`Node::MvGrid`] specialization. Both matter
//! for throughput: a single frame can carry tens of thousands of coefficient
//! and vector values.

pub mod arena;
pub mod dump;
pub mod node;
pub mod parse;

pub use arena::{Arena, NodeId};
pub use dump::{to_string, to_writer};
pub use node::{GridFill, Node, PrintFlags, MAX_GRID_BLOCKS, MV_NULL, NULL_SENTINEL};
pub use parse::{parse, Diagnostic, ParseError};
