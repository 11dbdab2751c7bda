//! # Datamosh Scripting
//!
//! Bridge between per-frame documents and user scripts.
//!
//! Scripts are rhai programs exposing a mandatory `glitch_frame(frame,
//! stream)` function and an optional `setup(args)` function. Frame documents
//! are converted to shared rhai values before the call, so in-place mutation
//! by the script is visible to the host, and converted back afterwards.

pub mod convert;
pub mod host;

pub use convert::{doc_to_dynamic, dynamic_to_doc, ArrayPool};
pub use host::{ScriptHost, SetupArgs, SetupOverrides};
