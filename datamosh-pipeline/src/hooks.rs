//! The codec hook contract.
//!
//! Codec parsers live outside this crate; they plug in through
//! [`GlitchCodec`] and drive everything else through the [`HookContext`]
//! handed to every decode call. The context tells the parser which features
//! are being exported or applied, carries the frame document being built or
//! consumed, and owns the replication sessions and fixup sink.

use datamosh_core::error::Result;
use datamosh_core::feature::{Feature, FeatureSet};
use datamosh_core::packet::{FrameDoc, Packet};
use datamosh_json::Arena;
use datamosh_xp::output::{FixupLedger, PatchRecord};
use datamosh_xp::session::{BitSession, ByteSession};

/// An instrumented codec parser.
pub trait GlitchCodec: Send {
    /// Codec name as it appears in interchange files and probe output.
    fn name(&self) -> &str;

    /// Features this codec knows how to export and apply.
    fn features(&self) -> FeatureSet;

    /// Decode one packet, reading and writing codec state through `cx`.
    ///
    /// The orchestrator calls [`HookContext::begin_frame`] before and
    /// [`HookContext::finish_frame`] after; the parser only fills in
    /// feature data and drives the replication sessions.
    fn decode(&mut self, cx: &mut HookContext, pkt: &Packet) -> Result<()>;
}

/// Per-stream state shared between the orchestrator and a codec parser.
pub struct HookContext {
    export: FeatureSet,
    import: FeatureSet,
    apply: FeatureSet,
    replicate: bool,
    import_doc: Option<FrameDoc>,
    export_doc: Option<FrameDoc>,
    patches: Vec<PatchRecord>,
    /// Container fields that must track output size changes.
    pub ledger: FixupLedger,
    /// Bit-granular replication session for the current frame.
    pub bits: BitSession,
    /// Byte-granular replication session for the current frame.
    pub bytes: ByteSession,
}

impl HookContext {
    /// Build a context. `replicate` selects whether decoded frames are
    /// re-emitted through the sessions (replicate/transplicate/script runs)
    /// or only read (probe/export runs).
    pub fn new(export: FeatureSet, import: FeatureSet, apply: FeatureSet, replicate: bool) -> Self {
        Self {
            export,
            import,
            apply,
            replicate,
            import_doc: None,
            export_doc: None,
            patches: Vec::new(),
            ledger: FixupLedger::new(),
            bits: BitSession::new(),
            bytes: ByteSession::new(),
        }
    }

    pub fn export_mask(&self) -> FeatureSet {
        self.export
    }

    pub fn import_mask(&self) -> FeatureSet {
        self.import
    }

    pub fn apply_mask(&self) -> FeatureSet {
        self.apply
    }

    pub fn exporting(&self, feature: Feature) -> bool {
        self.export.has(feature)
    }

    pub fn importing(&self, feature: Feature) -> bool {
        self.import.has(feature)
    }

    pub fn applying(&self, feature: Feature) -> bool {
        self.apply.has(feature)
    }

    /// Whether the decoded frame must be re-emitted bit-exactly.
    pub fn replicating(&self) -> bool {
        self.replicate
    }

    /// Install the previously exported document for the next packet.
    pub fn set_import_doc(&mut self, doc: Option<FrameDoc>) {
        self.import_doc = doc;
    }

    /// The document to apply to the current packet, if any.
    pub fn import_doc(&self) -> Option<&FrameDoc> {
        self.import_doc.as_ref()
    }

    /// Start a frame: when exporting, seed the frame document with the
    /// packet identity keys. Feature keys are appended by the parser.
    pub fn begin_frame(&mut self, pkt: &Packet) {
        if self.export.is_empty() {
            return;
        }
        let mut arena = Arena::new();
        let root = arena.new_object();
        let pos = arena.new_number(pkt.pos);
        arena.object_add(root, "pkt_pos", pos);
        let pts = arena.new_number(pkt.pts);
        arena.object_add(root, "pts", pts);
        let dts = arena.new_number(pkt.dts);
        arena.object_add(root, "dts", dts);
        self.export_doc = Some(FrameDoc::new(arena, root, pkt.stream_index, pkt.pos));
    }

    /// The frame document under construction, if this is an exporting run.
    pub fn export_doc_mut(&mut self) -> Option<&mut FrameDoc> {
        self.export_doc.as_mut()
    }

    /// End a frame: flush any active replication session into the patch
    /// list, drop the import document, and hand back the finished export
    /// document.
    pub fn finish_frame(&mut self, pkt: &Packet) -> Option<FrameDoc> {
        if let Some(patch) = self.bits.flush(pkt) {
            self.patches.push(patch);
        }
        if let Some(patch) = self.bytes.flush(pkt) {
            self.patches.push(patch);
        }
        self.import_doc = None;
        let mut doc = self.export_doc.take()?;
        doc.arena.close_object(doc.root);
        Some(doc)
    }

    /// Drain the patches accumulated so far.
    pub fn take_patches(&mut self) -> Vec<PatchRecord> {
        std::mem::take(&mut self.patches)
    }
}
