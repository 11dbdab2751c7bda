//! # Datamosh Core
//!
//! Core types and utilities shared across the datamosh bitstream editor:
//! - Error handling types
//! - Bitstream writing utilities
//! - Packet and per-frame document abstractions
//! - The editable-feature registry
//! - Run configuration and validation

pub mod bitstream;
pub mod config;
pub mod error;
pub mod feature;
pub mod packet;

pub use bitstream::BitWriter;
pub use config::{RunConfig, RunMode};
pub use error::{BitstreamError, CodecError, Error, Result};
pub use feature::{Feature, FeatureSet};
pub use packet::{FrameDoc, Packet, PacketFlags, NO_POS, NO_TS};
