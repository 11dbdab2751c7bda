//! Packet and per-frame document abstractions.
//!
//! Packets own their data: they cross thread boundaries between the demuxer,
//! the codec workers, and the output assembler.

use bitflags::bitflags;
use std::fmt;

use datamosh_json::{Arena, NodeId};

/// Byte position placeholder for packets whose input offset is unknown.
pub const NO_POS: i64 = -1;

/// Timestamp placeholder for packets without pts/dts.
pub const NO_TS: i64 = i64::MIN;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
    }
}

/// An encoded media packet.
#[derive(Clone)]
pub struct Packet {
    /// The packet data.
    data: Vec<u8>,
    /// Presentation timestamp, or [`NO_TS`].
    pub pts: i64,
    /// Decode timestamp, or [`NO_TS`].
    pub dts: i64,
    /// Stream index this packet belongs to.
    pub stream_index: usize,
    /// Packet flags.
    pub flags: PacketFlags,
    /// Byte position in the input stream, or [`NO_POS`].
    ///
    /// This is the packet's identity throughout the pipeline: exported frames
    /// are keyed by it and applied documents are matched back to packets
    /// through it.
    pub pos: i64,
}

impl Packet {
    /// Create a new packet with owned data.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pts: NO_TS,
            dts: NO_TS,
            stream_index: 0,
            flags: PacketFlags::empty(),
            pos: NO_POS,
        }
    }

    /// Create an empty packet.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Get the packet data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the size of the packet data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Set the keyframe flag.
    pub fn set_keyframe(&mut self, keyframe: bool) {
        if keyframe {
            self.flags.insert(PacketFlags::KEYFRAME);
        } else {
            self.flags.remove(PacketFlags::KEYFRAME);
        }
    }

    /// Create a new packet with the specified input position.
    pub fn with_pos(mut self, pos: i64) -> Self {
        self.pos = pos;
        self
    }

    /// Create a new packet with the specified timestamps.
    pub fn with_timestamps(mut self, pts: i64, dts: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// Create a new packet with the specified stream index.
    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .field("pos", &self.pos)
            .finish()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

/// One frame's structured document, keyed by the position of the packet it
/// was decoded from.
///
/// The arena owns the whole tree; the document travels between threads as a
/// unit and is dropped (or merged into the interchange file) as a unit.
#[derive(Debug)]
pub struct FrameDoc {
    /// Node storage for this frame.
    pub arena: Arena,
    /// Root of the frame object.
    pub root: NodeId,
    /// Stream the frame belongs to.
    pub stream_index: usize,
    /// Input byte position of the originating packet.
    pub pkt_pos: i64,
}

impl FrameDoc {
    pub fn new(arena: Arena, root: NodeId, stream_index: usize, pkt_pos: i64) -> Self {
        Self {
            arena,
            root,
            stream_index,
            pkt_pos,
        }
    }
}
