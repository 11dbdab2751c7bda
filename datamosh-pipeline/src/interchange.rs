//! Interchange files: the JSON documents that carry exported feature data.
//!
//! An export run builds one document for the whole input file and serializes
//! it once at the end; a transplicate run parses the (possibly edited)
//! document back and hands each frame to the codec workers. The layout is
//! part of the tool's contract: frames are keyed by packet position and
//! sorted, so an edited file can be produced by any tool that keeps the
//! keys intact.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use sha1::{Digest, Sha1};

use datamosh_core::error::{Error, Result};
use datamosh_core::feature::{Feature, FeatureSet};
use datamosh_core::packet::FrameDoc;
use datamosh_json::{Arena, GridFill, Node, NodeId, PrintFlags};

/// Lowercase hex SHA-1 of a file's contents.
pub fn sha1_of_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Deep-copy a node tree into another arena, preserving print flags.
pub fn copy_node(src: &Arena, id: NodeId, dst: &mut Arena) -> NodeId {
    let flags = src.print_flags(id);
    let copy = match src.node(id) {
        Node::Object(obj) => {
            let entries: Vec<(String, NodeId)> = obj
                .entries()
                .map(|(k, v)| (k.to_owned(), v))
                .collect();
            let new_obj = dst.new_object();
            for (key, value) in entries {
                let child = copy_node(src, value, dst);
                dst.object_add(new_obj, &key, child);
            }
            dst.close_object(new_obj);
            new_obj
        }
        Node::Array(arr) => {
            let items = arr.items().to_vec();
            let new_arr = dst.new_array();
            for item in items {
                let child = copy_node(src, item, dst);
                dst.array_push(new_arr, child);
            }
            dst.close_array(new_arr);
            new_arr
        }
        Node::IntArray(arr) => dst.int_array_from(arr.values()),
        Node::MvGrid(grid) => {
            let new_grid =
                dst.new_mv_grid(grid.width(), grid.height(), grid.max_blocks(), GridFill::Null);
            for y in 0..grid.height() {
                for x in 0..grid.width() {
                    dst.set_mv_count(new_grid, x, y, grid.block_count(x, y));
                    for block in 0..grid.max_blocks() {
                        dst.set_mv(new_grid, x, y, block, grid.vector(x, y, block));
                    }
                }
            }
            new_grid
        }
        Node::Str(s) => dst.new_string(s),
        Node::Number(v) => dst.new_number(*v),
        Node::Bool(v) => dst.new_bool(*v),
    };
    dst.set_print_flags(copy, flags);
    copy
}

/// Accumulates exported frames into the single output document.
pub struct InterchangeBuilder {
    arena: Arena,
    root: NodeId,
    streams: NodeId,
    stream_objs: Vec<NodeId>,
    frame_arrays: Vec<NodeId>,
}

impl InterchangeBuilder {
    /// Start the document. `codecs` names the codec of each stream, in
    /// stream order. The version stamp is omitted in test mode so reference
    /// outputs stay stable across releases.
    pub fn new(
        input: &Path,
        sha1sum: &str,
        codecs: &[String],
        features: FeatureSet,
        test_mode: bool,
    ) -> Self {
        let mut arena = Arena::with_large_capacity();
        let root = arena.new_object();

        if !test_mode {
            let version = arena.new_string(env!("CARGO_PKG_VERSION"));
            arena.object_add(root, "datamosh_version", version);
        }
        let basename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        let filename = arena.new_string(&basename);
        arena.object_add(root, "filename", filename);
        let sha1 = arena.new_string(sha1sum);
        arena.object_add(root, "sha1sum", sha1);

        let feat_arr = arena.new_array();
        for feature in features.iter_features() {
            let name = arena.new_string(feature.name());
            arena.array_push(feat_arr, name);
        }
        arena.close_array(feat_arr);
        arena.set_print_flags(feat_arr, PrintFlags::NO_LF);
        arena.object_add(root, "features", feat_arr);

        let streams = arena.new_array();
        let mut stream_objs = Vec::with_capacity(codecs.len());
        let mut frame_arrays = Vec::with_capacity(codecs.len());
        for codec in codecs {
            let stream = arena.new_object();
            let codec_str = arena.new_string(codec);
            arena.object_add(stream, "codec", codec_str);
            let frames = arena.new_array();
            arena.object_add(stream, "frames", frames);
            arena.array_push(streams, stream);
            stream_objs.push(stream);
            frame_arrays.push(frames);
        }
        arena.object_add(root, "streams", streams);

        Self {
            arena,
            root,
            streams,
            stream_objs,
            frame_arrays,
        }
    }

    /// Merge one frame document in. Frames may arrive in any order; they
    /// are sorted by packet position when the document is finished.
    pub fn add_frame(&mut self, doc: &FrameDoc) {
        let Some(&frames) = self.frame_arrays.get(doc.stream_index) else {
            tracing::warn!(stream = doc.stream_index, "frame for unknown stream dropped");
            return;
        };
        let frame = copy_node(&doc.arena, doc.root, &mut self.arena);
        self.arena.array_push(frames, frame);
    }

    /// Close the document: sort each stream's frames by position.
    pub fn finish(mut self) -> (Arena, NodeId) {
        for &frames in &self.frame_arrays {
            self.arena.sort_array_by(frames, |arena, a, b| {
                let pos_of = |id| {
                    arena
                        .object_get(id, "pkt_pos")
                        .and_then(|p| arena.as_i64(p))
                        .unwrap_or(i64::MAX)
                };
                pos_of(a).cmp(&pos_of(b))
            });
            self.arena.close_array(frames);
        }
        for &stream in &self.stream_objs {
            self.arena.close_object(stream);
        }
        self.arena.close_array(self.streams);
        self.arena.close_object(self.root);
        (self.arena, self.root)
    }

    /// Finish and serialize to `writer`.
    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<()> {
        let (arena, root) = self.finish();
        datamosh_json::to_writer(writer, &arena, root)?;
        Ok(())
    }
}

#[derive(Debug)]
struct ImportStream {
    codec: String,
    frames: HashMap<i64, NodeId>,
}

/// A parsed interchange file, indexed for per-packet lookup.
#[derive(Debug)]
pub struct ImportFile {
    arena: Arena,
    features: FeatureSet,
    sha1sum: Option<String>,
    streams: Vec<ImportStream>,
}

impl ImportFile {
    /// Parse and index an interchange file. Parse failures are fatal and
    /// reported with the full line/column diagnostic.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let mut arena = Arena::with_large_capacity();
        let root = match datamosh_json::parse(&mut arena, &source) {
            Ok(root) => root,
            Err(err) => {
                return Err(Error::config(format!(
                    "{}: {err}\n{}",
                    path.display(),
                    err.diagnostic(&source)
                )));
            }
        };
        Self::index(arena, root, path)
    }

    fn index(arena: Arena, root: NodeId, path: &Path) -> Result<Self> {
        let bad = |what: &str| Error::config(format!("{}: {what}", path.display()));

        if !matches!(arena.node(root), Node::Object(_)) {
            return Err(bad("top-level value must be an object"));
        }

        let mut features = FeatureSet::empty();
        let feat_arr = arena
            .object_get(root, "features")
            .ok_or_else(|| bad("missing 'features'"))?;
        let feat_ids = element_ids(&arena, feat_arr)
            .ok_or_else(|| bad("'features' must be an array of strings"))?;
        for &id in feat_ids {
            let name = arena
                .as_str(id)
                .ok_or_else(|| bad("'features' must be an array of strings"))?;
            let feature = Feature::from_name(name)
                .ok_or_else(|| bad(&format!("unknown feature '{name}'")))?;
            features = features.with(feature);
        }
        features.validate()?;

        let sha1sum = arena
            .object_get(root, "sha1sum")
            .and_then(|id| arena.as_str(id))
            .map(str::to_owned);

        let streams_arr = arena
            .object_get(root, "streams")
            .ok_or_else(|| bad("missing 'streams'"))?;
        let stream_ids = element_ids(&arena, streams_arr)
            .ok_or_else(|| bad("'streams' must be an array of stream objects"))?;
        let mut streams = Vec::with_capacity(stream_ids.len());
        for &stream in stream_ids {
            if !matches!(arena.node(stream), Node::Object(_)) {
                return Err(bad("'streams' must be an array of stream objects"));
            }
            let codec = arena
                .object_get(stream, "codec")
                .and_then(|id| arena.as_str(id))
                .ok_or_else(|| bad("stream missing 'codec'"))?
                .to_owned();
            let frames_arr = arena
                .object_get(stream, "frames")
                .ok_or_else(|| bad("stream missing 'frames'"))?;
            let frame_ids = element_ids(&arena, frames_arr)
                .ok_or_else(|| bad("'frames' must be an array of frame objects"))?;
            let mut frames = HashMap::new();
            for &frame in frame_ids {
                if !matches!(arena.node(frame), Node::Object(_)) {
                    return Err(bad("'frames' must be an array of frame objects"));
                }
                let pos = arena
                    .object_get(frame, "pkt_pos")
                    .and_then(|id| arena.as_i64(id))
                    .ok_or_else(|| bad("frame missing 'pkt_pos'"))?;
                frames.insert(pos, frame);
            }
            streams.push(ImportStream { codec, frames });
        }

        tracing::info!(
            path = %path.display(),
            streams = streams.len(),
            "interchange file loaded"
        );
        Ok(Self {
            arena,
            features,
            sha1sum,
            streams,
        })
    }

    /// Features the file was exported with.
    pub fn features(&self) -> FeatureSet {
        self.features
    }

    /// The recorded input checksum, if present.
    pub fn sha1sum(&self) -> Option<&str> {
        self.sha1sum.as_deref()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn codec(&self, stream_index: usize) -> Option<&str> {
        self.streams.get(stream_index).map(|s| s.codec.as_str())
    }

    /// Copy the frame for one packet out into its own document.
    pub fn frame_doc(&self, stream_index: usize, pkt_pos: i64) -> Option<FrameDoc> {
        let frame = *self.streams.get(stream_index)?.frames.get(&pkt_pos)?;
        let mut arena = Arena::new();
        let root = copy_node(&self.arena, frame, &mut arena);
        Some(FrameDoc::new(arena, root, stream_index, pkt_pos))
    }
}

/// The element handles of a generic array. An all-numeric array parses as a
/// flat integer array, which holds no handles; only an empty one is accepted
/// here, so a numeric `features` or `frames` list is a config error rather
/// than a panic further down.
fn element_ids(arena: &Arena, id: NodeId) -> Option<&[NodeId]> {
    match arena.node(id) {
        Node::Array(a) => Some(a.items()),
        Node::IntArray(a) if a.values().is_empty() => Some(&[]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamosh_core::packet::FrameDoc;

    fn frame_doc(stream_index: usize, pkt_pos: i64, qscale: i64) -> FrameDoc {
        let mut arena = Arena::new();
        let root = arena.new_object();
        let pos = arena.new_number(pkt_pos);
        arena.object_add(root, "pkt_pos", pos);
        let q = arena.new_number(qscale);
        arena.object_add(root, "qscale", q);
        arena.close_object(root);
        FrameDoc::new(arena, root, stream_index, pkt_pos)
    }

    fn builder(features: FeatureSet) -> InterchangeBuilder {
        InterchangeBuilder::new(
            Path::new("clip.mpg"),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            &["toy".to_string()],
            features,
            true,
        )
    }

    #[test]
    fn test_frames_sorted_by_position() {
        let mut b = builder(FeatureSet::empty().with(Feature::QScale));
        b.add_frame(&frame_doc(0, 300, 1));
        b.add_frame(&frame_doc(0, 100, 2));
        b.add_frame(&frame_doc(0, 200, 3));
        let (arena, root) = b.finish();

        let streams = arena.object_get(root, "streams").unwrap();
        let stream = arena.array_get(streams, 0).unwrap();
        let frames = arena.object_get(stream, "frames").unwrap();
        let positions: Vec<i64> = (0..arena.len_of(frames))
            .map(|i| {
                let f = arena.array_get(frames, i).unwrap();
                let p = arena.object_get(f, "pkt_pos").unwrap();
                arena.as_i64(p).unwrap()
            })
            .collect();
        assert_eq!(positions, [100, 200, 300]);
    }

    #[test]
    fn test_round_trip_through_text() {
        let mut b = builder(FeatureSet::empty().with(Feature::QScale));
        b.add_frame(&frame_doc(0, 0, 12));
        b.add_frame(&frame_doc(0, 64, 31));
        let mut text = Vec::new();
        b.write_to(&mut text).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.json");
        std::fs::write(&path, &text).unwrap();

        let file = ImportFile::load(&path).unwrap();
        assert_eq!(file.features(), FeatureSet::empty().with(Feature::QScale));
        assert_eq!(file.codec(0), Some("toy"));
        assert_eq!(
            file.sha1sum(),
            Some("da39a3ee5e6b4b0d3255bfef95601890afd80709")
        );

        let doc = file.frame_doc(0, 64).unwrap();
        let q = doc.arena.object_get(doc.root, "qscale").unwrap();
        assert_eq!(doc.arena.as_i64(q), Some(31));
        assert!(file.frame_doc(0, 32).is_none());
    }

    #[test]
    fn test_test_mode_omits_version() {
        let b = builder(FeatureSet::empty().with(Feature::Info));
        let (arena, root) = b.finish();
        assert!(arena.object_get(root, "datamosh_version").is_none());
        assert!(arena.object_get(root, "sha1sum").is_some());
    }

    #[test]
    fn test_load_rejects_unknown_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"features":["qt"],"streams":[]}"#,
        )
        .unwrap();
        let err = ImportFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("unknown feature"));
    }

    #[test]
    fn test_load_rejects_numeric_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"features":[1,2],"streams":[]}"#).unwrap();
        let err = ImportFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("'features'"), "{err}");
    }

    #[test]
    fn test_load_rejects_numeric_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"features":["mb"],"streams":[{"codec":"raw","frames":[1,2]}]}"#,
        )
        .unwrap();
        let err = ImportFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("'frames'"), "{err}");
    }

    #[test]
    fn test_load_accepts_empty_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(
            &path,
            r#"{"features":[],"streams":[{"codec":"raw","frames":[]}]}"#,
        )
        .unwrap();
        let file = ImportFile::load(&path).unwrap();
        assert_eq!(file.stream_count(), 1);
        assert!(file.frame_doc(0, 0).is_none());
    }

    #[test]
    fn test_load_rejects_non_object_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1,2,3]").unwrap();
        let err = ImportFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("object"), "{err}");
    }

    #[test]
    fn test_load_reports_parse_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{\"features\": [1.5]}").unwrap();
        let err = ImportFile::load(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("corrupt.json"));
        assert!(msg.contains('^'), "diagnostic caret missing: {msg}");
    }

    #[test]
    fn test_copy_node_preserves_grids() {
        let mut src = Arena::new();
        let grid = src.new_mv_grid(2, 1, 1, GridFill::Null);
        src.set_mv_count(grid, 0, 0, 1);
        src.set_mv(grid, 0, 0, 0, [5, -6]);
        src.finish_mv_grid(grid);

        let mut dst = Arena::new();
        let copy = copy_node(&src, grid, &mut dst);
        let g = dst.mv_grid(copy);
        assert_eq!(g.vector(0, 0, 0), [5, -6]);
        assert_eq!(g.block_count(0, 0), 1);
        assert_eq!(g.block_count(1, 0), 0);
    }

    #[test]
    fn test_sha1_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha1_of_file(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
