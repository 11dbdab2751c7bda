//! End-to-end runs over the built-in raw stream support: every topology,
//! plus the container replay path with size/offset fixups.

use std::path::{Path, PathBuf};

use datamosh_core::config::{RunConfig, RunMode};
use datamosh_core::error::Result;
use datamosh_core::feature::{Feature, FeatureSet};
use datamosh_core::packet::Packet;
use datamosh_json::Arena;
use datamosh_pipeline::raw::{RawCodec, RawSource, RAW_CHUNK};
use datamosh_pipeline::run::{run, PacketSource, Progress, StreamInfo};
use datamosh_pipeline::GlitchCodec;
use datamosh_xp::output::{FixupKind, FixupLedger};

fn raw_factory(_: &StreamInfo) -> Result<Box<dyn GlitchCodec>> {
    Ok(Box::new(RawCodec::new()))
}

fn mb_only() -> FeatureSet {
    FeatureSet::empty().with(Feature::Mb)
}

fn write_input(dir: &Path, bytes: &[u8]) -> PathBuf {
    let path = dir.join("clip.raw");
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_probe_reports_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &[1, 2, 3]);

    let cfg = RunConfig::for_input(&input);
    let source = Box::new(RawSource::open(&input).unwrap());
    let report = run(&cfg, source, &raw_factory, None).unwrap();

    assert_eq!(report.mode, RunMode::Probe);
    assert_eq!(report.streams.len(), 1);
    assert_eq!(report.streams[0].codec, "raw");
    assert!(report.streams[0].features.has(Feature::Mb));
    assert!(report.output.is_none());
}

#[test]
fn test_replicate_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let bytes: Vec<u8> = (0..(RAW_CHUNK + 700)).map(|i| i as u8).collect();
    let input = write_input(dir.path(), &bytes);
    let output = dir.path().join("out.raw");

    let mut cfg = RunConfig::for_input(&input);
    cfg.output = Some(output.clone());
    let source = Box::new(RawSource::open(&input).unwrap());
    let progress = Progress::new();
    let report = run(&cfg, source, &raw_factory, Some(&progress)).unwrap();

    assert_eq!(report.mode, RunMode::Replicate);
    assert_eq!(report.frames, 2);
    assert_eq!(progress.frames(), 2);
    assert_eq!(std::fs::read(&output).unwrap(), bytes);
}

#[test]
fn test_replicate_refuses_to_clobber_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &[1, 2, 3]);
    let output = dir.path().join("out.raw");
    std::fs::write(&output, b"precious").unwrap();

    let mut cfg = RunConfig::for_input(&input);
    cfg.output = Some(output.clone());
    let source = Box::new(RawSource::open(&input).unwrap());
    assert!(run(&cfg, source, &raw_factory, None).is_err());
    assert_eq!(std::fs::read(&output).unwrap(), b"precious");

    cfg.overwrite = true;
    let source = Box::new(RawSource::open(&input).unwrap());
    run(&cfg, source, &raw_factory, None).unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), &[1, 2, 3]);
}

#[test]
fn test_export_then_edit_then_transplicate() {
    let dir = tempfile::tempdir().unwrap();
    let bytes: Vec<u8> = (0..(RAW_CHUNK + 8)).map(|i| (i % 251) as u8).collect();
    let input = write_input(dir.path(), &bytes);
    let export = dir.path().join("frames.json");

    let mut cfg = RunConfig::for_input(&input);
    cfg.export = Some(export.clone());
    cfg.features = mb_only();
    cfg.test_mode = true;
    let source = Box::new(RawSource::open(&input).unwrap());
    let report = run(&cfg, source, &raw_factory, None).unwrap();
    assert_eq!(report.mode, RunMode::Export);
    assert_eq!(report.frames, 2);

    // rewrite the first three payload bytes of the second frame
    let text = std::fs::read_to_string(&export).unwrap();
    let mut arena = Arena::with_large_capacity();
    let root = datamosh_json::parse(&mut arena, &text).unwrap();
    let streams = arena.object_get(root, "streams").unwrap();
    let stream = arena.array_get(streams, 0).unwrap();
    let frames = arena.object_get(stream, "frames").unwrap();
    let mut edited = false;
    for idx in 0..arena.len_of(frames) {
        let frame = arena.array_get(frames, idx).unwrap();
        let pos = arena.object_get(frame, "pkt_pos").unwrap();
        if arena.as_i64(pos) == Some(RAW_CHUNK as i64) {
            let mb = arena.object_get(frame, "mb").unwrap();
            let values = arena.int_array_mut(mb);
            values[0] = 0xAA;
            values[1] = 0xBB;
            values[2] = 0xCC;
            edited = true;
        }
    }
    assert!(edited);
    std::fs::write(&export, datamosh_json::to_string(&arena, root)).unwrap();

    let output = dir.path().join("out.raw");
    let mut cfg = RunConfig::for_input(&input);
    cfg.apply = Some(export);
    cfg.output = Some(output.clone());
    let source = Box::new(RawSource::open(&input).unwrap());
    let report = run(&cfg, source, &raw_factory, None).unwrap();
    assert_eq!(report.mode, RunMode::Transplicate);

    let mut expected = bytes.clone();
    expected[RAW_CHUNK] = 0xAA;
    expected[RAW_CHUNK + 1] = 0xBB;
    expected[RAW_CHUNK + 2] = 0xCC;
    assert_eq!(std::fs::read(&output).unwrap(), expected);
}

#[test]
fn test_transplicate_rejects_checksum_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &[1, 2, 3, 4]);
    let export = dir.path().join("frames.json");

    let mut cfg = RunConfig::for_input(&input);
    cfg.export = Some(export.clone());
    cfg.features = mb_only();
    let source = Box::new(RawSource::open(&input).unwrap());
    run(&cfg, source, &raw_factory, None).unwrap();

    // the interchange file now describes a different input
    std::fs::write(&input, [9, 9, 9, 9]).unwrap();
    let mut cfg = RunConfig::for_input(&input);
    cfg.apply = Some(export);
    cfg.output = Some(dir.path().join("out.raw"));
    let source = Box::new(RawSource::open(&input).unwrap());
    let err = run(&cfg, source, &raw_factory, None).unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
}

#[test]
fn test_script_topology_rewrites_frames() {
    let dir = tempfile::tempdir().unwrap();
    let bytes: Vec<u8> = (0..(RAW_CHUNK * 2 + 16)).map(|i| (i % 13) as u8).collect();
    let input = write_input(dir.path(), &bytes);
    let output = dir.path().join("out.raw");
    let script = dir.path().join("glitch.rhai");
    std::fs::write(
        &script,
        r#"
fn glitch_frame(frame, stream) {
    if stream.codec != "raw" {
        throw "unexpected codec";
    }
    frame.mb[0] = 255;
    frame.mb[1] = 0;
}
"#,
    )
    .unwrap();

    let mut cfg = RunConfig::for_input(&input);
    cfg.output = Some(output.clone());
    cfg.script = Some(script);
    cfg.features = mb_only();
    let source = Box::new(RawSource::open(&input).unwrap());
    let progress = Progress::new();
    let report = run(&cfg, source, &raw_factory, Some(&progress)).unwrap();

    assert_eq!(report.mode, RunMode::Script);
    assert_eq!(report.frames, 3);

    let mut expected = bytes.clone();
    for pos in [0, RAW_CHUNK, RAW_CHUNK * 2] {
        expected[pos] = 255;
        expected[pos + 1] = 0;
    }
    assert_eq!(std::fs::read(&output).unwrap(), expected);
}

#[test]
fn test_script_setup_overrides_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &[3, 1, 4, 1, 5]);
    let decoy = dir.path().join("decoy.raw");
    let real = dir.path().join("real.raw");
    let script = dir.path().join("glitch.rhai");
    std::fs::write(
        &script,
        format!(
            r#"
fn setup(args) {{
    #{{ output: "{}" }}
}}
fn glitch_frame(frame, stream) {{}}
"#,
            real.display()
        ),
    )
    .unwrap();

    let mut cfg = RunConfig::for_input(&input);
    cfg.output = Some(decoy.clone());
    cfg.script = Some(script);
    cfg.features = mb_only();
    let source = Box::new(RawSource::open(&input).unwrap());
    let report = run(&cfg, source, &raw_factory, None).unwrap();

    assert_eq!(report.output.as_deref(), Some(real.as_path()));
    assert!(!decoy.exists());
    assert_eq!(std::fs::read(&real).unwrap(), &[3, 1, 4, 1, 5]);
}

#[test]
fn test_script_error_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), &[1, 2, 3]);
    let script = dir.path().join("bad.rhai");
    std::fs::write(
        &script,
        r#"
fn glitch_frame(frame, stream) {
    throw "boom";
}
"#,
    )
    .unwrap();

    let mut cfg = RunConfig::for_input(&input);
    cfg.output = Some(dir.path().join("out.raw"));
    cfg.script = Some(script);
    cfg.features = mb_only();
    let source = Box::new(RawSource::open(&input).unwrap());
    let err = run(&cfg, source, &raw_factory, None).unwrap_err();
    assert!(err.to_string().contains("glitch_frame"));
}

#[test]
fn test_script_apply_error_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    // enough frames to fill every queue past capacity once a stage dies
    let bytes = vec![7u8; RAW_CHUNK * 12];
    let input = write_input(dir.path(), &bytes);
    let script = dir.path().join("bad.rhai");
    std::fs::write(
        &script,
        r#"
fn glitch_frame(frame, stream) {
    frame.mb = "broken";
}
"#,
    )
    .unwrap();

    let mut cfg = RunConfig::for_input(&input);
    cfg.output = Some(dir.path().join("out.raw"));
    cfg.script = Some(script);
    cfg.features = mb_only();
    let source = Box::new(RawSource::open(&input).unwrap());
    let err = run(&cfg, source, &raw_factory, None).unwrap_err();
    assert!(err.to_string().contains("'mb'"), "unexpected error: {err}");
}

/// A two-packet input wrapped in an 8-byte header: a little-endian size
/// field over the packet region and a little-endian offset to its start.
struct HeaderedSource {
    packets: Vec<Packet>,
    next: usize,
    streams: Vec<StreamInfo>,
}

const HEADER_LEN: usize = 8;

impl HeaderedSource {
    fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let body = &bytes[HEADER_LEN..];
        let mid = body.len() / 2;
        let packets = vec![
            Packet::new(body[..mid].to_vec()).with_pos(HEADER_LEN as i64),
            Packet::new(body[mid..].to_vec()).with_pos((HEADER_LEN + mid) as i64),
        ];
        Ok(Self {
            packets,
            next: 0,
            streams: vec![StreamInfo {
                index: 0,
                codec: "raw".to_owned(),
            }],
        })
    }
}

impl PacketSource for HeaderedSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        let pkt = self.packets.get(self.next).cloned();
        self.next += 1;
        Ok(pkt)
    }

    fn collect_fixups(&mut self, ledger: &mut FixupLedger) -> Result<()> {
        let body_len: i64 = self.packets.iter().map(|p| p.size() as i64).sum();
        ledger.add_size(
            FixupKind::SizeLe32,
            0,
            body_len,
            HEADER_LEN as i64,
            body_len,
        );
        ledger.add_offset(FixupKind::OffsetLe32, 4, HEADER_LEN as i64, HEADER_LEN as i64);
        Ok(())
    }
}

#[test]
fn test_container_fixups_track_shrinking_packet() {
    let dir = tempfile::tempdir().unwrap();
    // header: size = 8 over [8, 16), offset = 8
    let mut bytes = vec![8, 0, 0, 0, 8, 0, 0, 0];
    bytes.extend_from_slice(&[10, 11, 12, 13, 20, 21, 22, 23]);
    let input = write_input(dir.path(), &bytes);
    let export = dir.path().join("frames.json");

    let mut cfg = RunConfig::for_input(&input);
    cfg.export = Some(export.clone());
    cfg.features = mb_only();
    cfg.test_mode = true;
    let source = Box::new(HeaderedSource::open(&input).unwrap());
    run(&cfg, source, &raw_factory, None).unwrap();

    // shrink the second packet from 4 bytes to 2
    let text = std::fs::read_to_string(&export).unwrap();
    let mut arena = Arena::with_large_capacity();
    let root = datamosh_json::parse(&mut arena, &text).unwrap();
    let streams = arena.object_get(root, "streams").unwrap();
    let stream = arena.array_get(streams, 0).unwrap();
    let frames = arena.object_get(stream, "frames").unwrap();
    for idx in 0..arena.len_of(frames) {
        let frame = arena.array_get(frames, idx).unwrap();
        let pos = arena.object_get(frame, "pkt_pos").unwrap();
        if arena.as_i64(pos) == Some(12) {
            let short = arena.int_array_from(&[9, 9]);
            assert!(arena.object_set(frame, "mb", short));
        }
    }
    std::fs::write(&export, datamosh_json::to_string(&arena, root)).unwrap();

    let output = dir.path().join("out.bin");
    let mut cfg = RunConfig::for_input(&input);
    cfg.apply = Some(export);
    cfg.output = Some(output.clone());
    let source = Box::new(HeaderedSource::open(&input).unwrap());
    run(&cfg, source, &raw_factory, None).unwrap();

    let out = std::fs::read(&output).unwrap();
    assert_eq!(out.len(), bytes.len() - 2);
    // size field shrank with the packet; offset target did not move
    assert_eq!(u32::from_le_bytes(out[0..4].try_into().unwrap()), 6);
    assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()), 8);
    assert_eq!(&out[8..12], &[10, 11, 12, 13]);
    assert_eq!(&out[12..14], &[9, 9]);
}
