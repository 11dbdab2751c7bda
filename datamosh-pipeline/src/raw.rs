//! Built-in support for raw elementary streams.
//!
//! A raw input has no container at all: the file is one stream and every
//! byte belongs to a packet. [`RawSource`] packetizes it in fixed chunks
//! and [`RawCodec`] treats each packet's payload as opaque coded data,
//! exporting it byte-for-byte under the `mb` feature so scripts can rewrite
//! it directly. This is the smallest complete parser over the hook
//! contract; real codec parsers live in their own crates.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use datamosh_core::error::{CodecError, Error, Result};
use datamosh_core::feature::{Feature, FeatureSet};
use datamosh_core::packet::Packet;
use datamosh_json::{Node, PrintFlags};

use crate::hooks::{GlitchCodec, HookContext};
use crate::run::{PacketSource, StreamInfo};

/// Packet size raw inputs are split into.
pub const RAW_CHUNK: usize = 4096;

/// Fixed-chunk packetizer over a single raw stream.
pub struct RawSource {
    file: File,
    pos: u64,
    streams: Vec<StreamInfo>,
}

impl RawSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            pos: 0,
            streams: vec![StreamInfo {
                index: 0,
                codec: "raw".to_owned(),
            }],
        })
    }
}

impl PacketSource for RawSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        let mut buf = vec![0u8; RAW_CHUNK];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        let pkt = Packet::new(buf).with_pos(self.pos as i64);
        self.pos += filled as u64;
        Ok(Some(pkt))
    }

    fn is_raw(&self) -> bool {
        true
    }
}

/// Pass-through parser: the whole packet payload is the editable unit.
#[derive(Debug, Default)]
pub struct RawCodec;

impl RawCodec {
    pub fn new() -> Self {
        Self
    }
}

impl GlitchCodec for RawCodec {
    fn name(&self) -> &str {
        "raw"
    }

    fn features(&self) -> FeatureSet {
        FeatureSet::empty().with(Feature::Info).with(Feature::Mb)
    }

    fn decode(&mut self, cx: &mut HookContext, pkt: &Packet) -> Result<()> {
        let data = if cx.applying(Feature::Mb) {
            let doc = cx
                .import_doc()
                .ok_or(CodecError::MissingFrame { pos: pkt.pos })?;
            match doc.arena.object_get(doc.root, "mb") {
                Some(mb) => match doc.arena.node(mb) {
                    Node::IntArray(values) => {
                        values.values().iter().map(|v| *v as u8).collect()
                    }
                    _ => {
                        return Err(Error::from(CodecError::DocumentMismatch(
                            "'mb' must be an array of integers".into(),
                        )));
                    }
                },
                // frame left untouched by the edit
                None => pkt.data().to_vec(),
            }
        } else {
            pkt.data().to_vec()
        };

        if cx.replicating() {
            cx.bytes.begin(data.len());
            cx.bytes.write(&data)?;
        }

        let export = cx.export_mask();
        if let Some(doc) = cx.export_doc_mut() {
            if export.has(Feature::Info) {
                let info = doc.arena.new_object();
                let size = doc.arena.new_number(pkt.size() as i64);
                doc.arena.object_add(info, "size", size);
                doc.arena.close_object(info);
                doc.arena.set_print_flags(info, PrintFlags::NO_LF);
                doc.arena.object_add(doc.root, "info", info);
            }
            if export.has(Feature::Mb) {
                let bytes: Vec<i64> = pkt.data().iter().map(|b| i64::from(*b)).collect();
                let mb = doc.arena.int_array_from(&bytes);
                doc.arena.set_print_flags(mb, PrintFlags::SPLIT8);
                doc.arena.object_add(doc.root, "mb", mb);
            }
        }
        Ok(())
    }
}
