//! # Datamosh Transplication
//!
//! The machinery that turns per-frame rewrites into a complete output file.
//!
//! While a codec worker replicates a frame it writes the rebuilt payload into
//! a [`BitSession`] or [`ByteSession`]; flushing the session yields a
//! [`PatchRecord`] describing which input byte range the payload replaces.
//! The [`OutputAssembler`] later replays the input file, substitutes every
//! patch, and repairs container offset and size fields through its
//! [`FixupLedger`].

pub mod output;
pub mod session;

pub use output::{
    DirectWriter, FixupKind, FixupLedger, FixupRecord, OutputAssembler, PatchPayload, PatchRecord,
};
pub use session::{BitSession, BitSnapshot, ByteSession, ByteSnapshot};
