//! # Datamosh Pipeline
//!
//! Orchestration for the bitstream editor: bounded queues between stages,
//! the codec hook contract, interchange file construction and consumption,
//! motion-vector grid state, and the five run topologies (probe, replicate,
//! export, transplicate, script).

pub mod hooks;
pub mod interchange;
pub mod mv;
pub mod queue;
pub mod raw;
pub mod run;

pub use hooks::{GlitchCodec, HookContext};
pub use interchange::{ImportFile, InterchangeBuilder};
pub use queue::{DocQueue, Queue, QueueItem, QUEUE_CAPACITY};
pub use run::{
    run, CodecFactory, PacketSource, Progress, RunReport, StreamInfo, StreamReport,
};
