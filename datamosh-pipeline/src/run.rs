//! Run topologies.
//!
//! A run wires a packet source, per-stream codec parsers, and the output
//! machinery into one of five shapes:
//!
//! - `probe`: report each stream's codec and editable features.
//! - `replicate`: decode and re-emit every frame, rebuilding the file
//!   bit-exactly. The round-trip proves the parser is lossless.
//! - `export`: decode and serialize the selected features to an
//!   interchange file.
//! - `transplicate`: decode, apply an edited interchange file, re-emit.
//! - `script`: export and apply in a single pass, with a script stage
//!   rewriting each frame document between the two decode passes.
//!
//! The stage set is a handful of plain threads. A dedicated read stage
//! feeds one bounded queue per worker (two per worker in script mode,
//! where packets fan out to the export and apply sides); the script stage
//! sits between two document queues. Workers never talk to each other;
//! everything meets again when the stages are joined and the output is
//! assembled.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use rhai::Dynamic;

use datamosh_core::config::{RunConfig, RunMode};
use datamosh_core::error::{CodecError, Error, Result};
use datamosh_core::feature::{Feature, FeatureSet};
use datamosh_core::packet::{FrameDoc, Packet};
use datamosh_json::Arena;
use datamosh_script::{doc_to_dynamic, dynamic_to_doc, ArrayPool, ScriptHost, SetupArgs};
use datamosh_xp::output::{
    DirectWriter, FixupLedger, OutputAssembler, PatchPayload, PatchRecord,
};

use crate::hooks::{GlitchCodec, HookContext};
use crate::interchange::{sha1_of_file, ImportFile, InterchangeBuilder};
use crate::queue::{DocQueue, Queue, QueueItem};

/// One demuxed stream of the input.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    /// Codec name, used to pick a parser and recorded in interchange files.
    pub codec: String,
}

/// Supplies packets to a run. Container demuxing lives behind this trait;
/// the orchestrator only sees streams, packets, and the container's fixups.
pub trait PacketSource: Send {
    fn streams(&self) -> &[StreamInfo];

    /// The next packet in read order, or `None` at end of input.
    fn next_packet(&mut self) -> Result<Option<Packet>>;

    /// Whether the input is a raw elementary stream: every byte belongs to
    /// some packet and no container fields reference rewritten ranges. Such
    /// inputs can be written straight through without a replay pass.
    fn is_raw(&self) -> bool {
        false
    }

    /// Register container size/offset fields that reference byte ranges the
    /// run may rewrite. Called once, after the last packet.
    fn collect_fixups(&mut self, ledger: &mut FixupLedger) -> Result<()> {
        let _ = ledger;
        Ok(())
    }
}

/// Instantiates a codec parser for a stream.
pub type CodecFactory<'a> = dyn Fn(&StreamInfo) -> Result<Box<dyn GlitchCodec>> + Sync + 'a;

/// Live frame counter a caller can poll while a run is in flight.
#[derive(Debug, Default)]
pub struct Progress {
    frames: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-stream outcome of a run.
#[derive(Debug, Clone)]
pub struct StreamReport {
    pub index: usize,
    pub codec: String,
    /// Features the codec parser can export and apply.
    pub features: FeatureSet,
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub mode: RunMode,
    /// Frames that went through the writing (or exporting) side.
    pub frames: u64,
    pub streams: Vec<StreamReport>,
    /// The media file written, if the topology produces one.
    pub output: Option<PathBuf>,
}

/// Execute the run described by `cfg`.
pub fn run(
    cfg: &RunConfig,
    source: Box<dyn PacketSource>,
    new_codec: &CodecFactory,
    progress: Option<&Progress>,
) -> Result<RunReport> {
    cfg.validate()?;
    let mode = cfg.mode();
    tracing::info!(?mode, input = %cfg.input.display(), "starting run");
    match mode {
        RunMode::Probe => probe(source, new_codec),
        RunMode::Export => export_run(cfg, source, new_codec, progress),
        RunMode::Replicate | RunMode::Transplicate => rebuild_run(cfg, source, new_codec, progress),
        RunMode::Script => script_run(cfg, source, new_codec, progress),
    }
}

//---------------------------------------------------------------------
// stage plumbing

enum PacketEvent {
    Packet(Packet),
    /// The stream with this index has no further packets.
    StreamEnd(usize),
}

struct StreamSlot {
    codec: Box<dyn GlitchCodec>,
    cx: HookContext,
}

struct StageMasks {
    export: FeatureSet,
    import: FeatureSet,
    apply: FeatureSet,
    replicate: bool,
}

impl StageMasks {
    fn replicate_only() -> Self {
        Self {
            export: FeatureSet::empty(),
            import: FeatureSet::empty(),
            apply: FeatureSet::empty(),
            replicate: true,
        }
    }

    fn exporting(features: FeatureSet) -> Self {
        Self {
            export: features,
            import: FeatureSet::empty(),
            apply: FeatureSet::empty(),
            replicate: false,
        }
    }

    fn applying(features: FeatureSet) -> Self {
        Self {
            export: FeatureSet::empty(),
            import: features,
            apply: features,
            replicate: true,
        }
    }
}

struct WorkerOutput {
    patches: Vec<PatchRecord>,
    ledger: FixupLedger,
    frames: u64,
}

struct WorkerCtx<'a> {
    /// Pre-parsed interchange file for transplicate runs.
    import_file: Option<&'a ImportFile>,
    /// Script output queue for the apply side of script runs.
    import_queue: Option<&'a DocQueue>,
    /// Where finished frame documents go, when this side exports.
    export_sink: Option<&'a DocQueue>,
    progress: Option<&'a Progress>,
}

fn worker_count(cfg: &RunConfig, streams: usize) -> usize {
    cfg.threads.unwrap_or(streams).min(streams).max(1)
}

/// Build one slot map per worker; stream `s` belongs to worker
/// `s % worker_count`, matching how the read stage routes packets.
fn make_slots(
    infos: &[StreamInfo],
    new_codec: &CodecFactory,
    workers: usize,
    masks: &StageMasks,
) -> Result<Vec<HashMap<usize, StreamSlot>>> {
    let mut sets: Vec<HashMap<usize, StreamSlot>> = (0..workers).map(|_| HashMap::new()).collect();
    for info in infos {
        let codec = new_codec(info)?;
        let caps = codec.features();
        let selected = masks.export.union(masks.import).union(masks.apply);
        let unsupported = selected.difference(caps);
        if !unsupported.is_empty() {
            let names: Vec<&str> = unsupported.iter_features().map(Feature::name).collect();
            tracing::warn!(
                stream = info.index,
                codec = codec.name(),
                features = names.join(","),
                "selected features not supported by this codec"
            );
        }
        let cx = HookContext::new(
            masks.export.intersection(caps),
            masks.import.intersection(caps),
            masks.apply.intersection(caps),
            masks.replicate,
        );
        sets[info.index % workers].insert(info.index, StreamSlot { codec, cx });
    }
    Ok(sets)
}

/// Read stage: pump packets to every consumer side, then emit one
/// end-of-stream event per stream, then collect the container's fixups.
fn read_stage(
    mut source: Box<dyn PacketSource>,
    sides: Vec<Vec<&Queue<PacketEvent>>>,
) -> Result<FixupLedger> {
    let result = pump_packets(source.as_mut(), &sides);
    if result.is_err() {
        // leave no worker blocked on a queue that will never fill
        for side in &sides {
            for queue in side {
                queue.shutdown();
            }
        }
    }
    result
}

fn pump_packets(
    source: &mut dyn PacketSource,
    sides: &[Vec<&Queue<PacketEvent>>],
) -> Result<FixupLedger> {
    let stream_count = source.streams().len();
    let mut packets = 0u64;
    while let Some(pkt) = source.next_packet()? {
        packets += 1;
        let (last, rest) = sides.split_last().ok_or_else(|| {
            Error::from(CodecError::Other("read stage has no consumers".into()))
        })?;
        for side in rest {
            side[pkt.stream_index % side.len()].push(PacketEvent::Packet(pkt.clone()));
        }
        last[pkt.stream_index % last.len()].push(PacketEvent::Packet(pkt));
    }
    for stream in 0..stream_count {
        for side in sides {
            side[stream % side.len()].push(PacketEvent::StreamEnd(stream));
        }
    }
    tracing::debug!(packets, "read stage finished");

    let mut ledger = FixupLedger::new();
    source.collect_fixups(&mut ledger)?;
    Ok(ledger)
}

/// Decode/apply stage: drain one packet queue, drive the codec hooks, and
/// collect patches. Ends when every owned stream has signalled its end.
fn worker_stage(
    input: &Queue<PacketEvent>,
    mut slots: HashMap<usize, StreamSlot>,
    ctx: &WorkerCtx<'_>,
) -> Result<WorkerOutput> {
    let result = decode_loop(input, &mut slots, ctx);
    if result.is_err() {
        // close every queue this worker touches, or a peer stage blocked on
        // one of them would never wake for the scope join
        input.shutdown();
        if let Some(queue) = ctx.import_queue {
            queue.shutdown();
        }
        if let Some(sink) = ctx.export_sink {
            sink.shutdown();
        }
    }
    let frames = result?;

    let mut patches = Vec::new();
    let mut ledger = FixupLedger::new();
    for slot in slots.values_mut() {
        patches.extend(slot.cx.take_patches());
        ledger.merge(std::mem::take(&mut slot.cx.ledger));
    }
    Ok(WorkerOutput {
        patches,
        ledger,
        frames,
    })
}

fn decode_loop(
    input: &Queue<PacketEvent>,
    slots: &mut HashMap<usize, StreamSlot>,
    ctx: &WorkerCtx<'_>,
) -> Result<u64> {
    let mut pending = slots.len();
    let mut frames = 0u64;
    loop {
        match input.pop() {
            QueueItem::Item(PacketEvent::Packet(pkt)) => {
                let slot = slots.get_mut(&pkt.stream_index).ok_or_else(|| {
                    Error::from(CodecError::Other(format!(
                        "packet for unowned stream {}",
                        pkt.stream_index
                    )))
                })?;

                if let Some(file) = ctx.import_file {
                    let doc = file
                        .frame_doc(pkt.stream_index, pkt.pos)
                        .ok_or(CodecError::MissingFrame { pos: pkt.pos })?;
                    slot.cx.set_import_doc(Some(doc));
                }
                if let Some(queue) = ctx.import_queue {
                    match queue.pop_at(pkt.pos) {
                        QueueItem::Item(doc) => slot.cx.set_import_doc(Some(doc)),
                        QueueItem::Shutdown => {
                            return Err(Error::script(
                                "script stage ended before all frames were delivered",
                            ));
                        }
                    }
                }

                slot.cx.begin_frame(&pkt);
                slot.codec.decode(&mut slot.cx, &pkt)?;
                if let Some(doc) = slot.cx.finish_frame(&pkt) {
                    if let Some(sink) = ctx.export_sink {
                        sink.push(doc);
                    }
                }
                frames += 1;
                if let Some(progress) = ctx.progress {
                    progress.bump();
                }
            }
            QueueItem::Item(PacketEvent::StreamEnd(_)) => {
                pending -= 1;
                if pending == 0 {
                    break;
                }
            }
            QueueItem::Shutdown => break,
        }
    }
    Ok(frames)
}

/// Script stage: pull the lowest pending frame, run the callback, push the
/// edited frame onward keyed by the same packet position.
fn script_stage(
    host: &ScriptHost,
    streams: &[StreamInfo],
    from_export: &DocQueue,
    to_apply: &DocQueue,
) -> Result<u64> {
    let mut pool = ArrayPool::new();
    let mut frames = 0u64;
    loop {
        let doc = match from_export.pop_lowest() {
            QueueItem::Item(doc) => doc,
            QueueItem::Shutdown => break,
        };
        pool.begin();
        let frame = doc_to_dynamic(&mut pool, &doc.arena, doc.root);

        let mut stream = rhai::Map::new();
        let codec = streams
            .get(doc.stream_index)
            .map(|s| s.codec.clone())
            .unwrap_or_default();
        stream.insert("codec".into(), Dynamic::from(codec));
        stream.insert(
            "stream_index".into(),
            Dynamic::from(doc.stream_index as i64),
        );
        stream.insert("pkt_pos".into(), Dynamic::from(doc.pkt_pos));
        for key in ["pts", "dts"] {
            let ts = doc
                .arena
                .object_get(doc.root, key)
                .and_then(|id| doc.arena.as_i64(id));
            if let Some(ts) = ts {
                stream.insert(key.into(), Dynamic::from(ts));
            }
        }

        let edited = host.glitch_frame(frame, Dynamic::from_map(stream))?;
        let mut arena = Arena::new();
        let root = dynamic_to_doc(&mut pool, &mut arena, edited)?;
        to_apply.push(FrameDoc::new(arena, root, doc.stream_index, doc.pkt_pos));
        frames += 1;
    }
    Ok(frames)
}

fn join_stage<T>(handle: thread::ScopedJoinHandle<'_, Result<T>>, what: &str) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(Error::from(CodecError::Other(format!(
            "{what} stage panicked"
        )))),
    }
}

//---------------------------------------------------------------------
// output assembly

fn check_overwrite(cfg: &RunConfig, path: &Path) -> Result<()> {
    if path.exists() && !cfg.overwrite {
        return Err(Error::config(format!(
            "output file '{}' already exists (use overwrite to replace it)",
            path.display()
        )));
    }
    Ok(())
}

fn write_output(
    cfg: &RunConfig,
    out_path: &Path,
    raw: bool,
    outputs: Vec<WorkerOutput>,
    reader_ledger: FixupLedger,
) -> Result<u64> {
    let mut patches = Vec::new();
    let mut ledger = reader_ledger;
    let mut frames = 0u64;
    for out in outputs {
        frames += out.frames;
        patches.extend(out.patches);
        ledger.merge(out.ledger);
    }

    if raw && ledger.is_empty() {
        // every input byte belongs to a packet, so the patches are the file
        patches.sort_by_key(|p| p.i_pos);
        let mut writer = DirectWriter::new(BufWriter::new(File::create(out_path)?));
        for patch in patches {
            match patch.payload {
                PatchPayload::Data(data) => writer.write_packet(&data)?,
                PatchPayload::Padding { .. } => {
                    return Err(Error::unsupported(
                        "padding patches on a raw elementary stream",
                    ));
                }
            }
        }
        let mut inner = writer.finish()?;
        inner.flush()?;
    } else {
        let mut assembler = OutputAssembler::new();
        for patch in patches {
            assembler.push_patch(patch);
        }
        assembler.ledger.merge(ledger);
        let mut input = File::open(&cfg.input)?;
        let mut output = File::create(out_path)?;
        assembler.flush(&mut input, &mut output)?;
    }

    tracing::info!(frames, output = %out_path.display(), "output written");
    Ok(frames)
}

fn stream_reports(infos: &[StreamInfo], new_codec: &CodecFactory) -> Result<Vec<StreamReport>> {
    infos
        .iter()
        .map(|info| {
            let codec = new_codec(info)?;
            Ok(StreamReport {
                index: info.index,
                codec: codec.name().to_owned(),
                features: codec.features(),
            })
        })
        .collect()
}

//---------------------------------------------------------------------
// topologies

fn probe(source: Box<dyn PacketSource>, new_codec: &CodecFactory) -> Result<RunReport> {
    let streams = stream_reports(source.streams(), new_codec)?;
    Ok(RunReport {
        mode: RunMode::Probe,
        frames: 0,
        streams,
        output: None,
    })
}

fn rebuild_run(
    cfg: &RunConfig,
    source: Box<dyn PacketSource>,
    new_codec: &CodecFactory,
    progress: Option<&Progress>,
) -> Result<RunReport> {
    let mode = cfg.mode();
    let out_path = cfg
        .output
        .clone()
        .ok_or_else(|| Error::config("output file required to rebuild a stream"))?;
    check_overwrite(cfg, &out_path)?;

    let import_file = match &cfg.apply {
        Some(apply) => {
            let file = ImportFile::load(apply)?;
            if let Some(expected) = file.sha1sum() {
                let actual = sha1_of_file(&cfg.input)?;
                if expected != actual {
                    return Err(Error::config(format!(
                        "checksum mismatch: '{}' was exported from a different input \
                         (expected {expected}, got {actual})",
                        apply.display()
                    )));
                }
            }
            Some(file)
        }
        None => None,
    };
    // apply exactly what the file carries; the selection was fixed at export
    let masks = match &import_file {
        Some(file) => StageMasks::applying(file.features()),
        None => StageMasks::replicate_only(),
    };

    let infos = source.streams().to_vec();
    let raw = source.is_raw();
    let workers = worker_count(cfg, infos.len());
    let mut slot_sets = make_slots(&infos, new_codec, workers, &masks)?;
    let streams = stream_reports(&infos, new_codec)?;
    let queues: Vec<Queue<PacketEvent>> = (0..workers).map(|_| Queue::new()).collect();

    let (reader_ledger, outputs) = thread::scope(|s| -> Result<(FixupLedger, Vec<WorkerOutput>)> {
        let sides = vec![queues.iter().collect::<Vec<_>>()];
        let reader = s.spawn(move || read_stage(source, sides));
        let import_file = import_file.as_ref();
        let handles: Vec<_> = slot_sets
            .drain(..)
            .zip(&queues)
            .map(|(slots, queue)| {
                let ctx = WorkerCtx {
                    import_file,
                    import_queue: None,
                    export_sink: None,
                    progress,
                };
                s.spawn(move || worker_stage(queue, slots, &ctx))
            })
            .collect();

        let ledger = join_stage(reader, "read")?;
        let mut outputs = Vec::with_capacity(handles.len());
        for handle in handles {
            outputs.push(join_stage(handle, "decode")?);
        }
        Ok((ledger, outputs))
    })?;

    let frames = write_output(cfg, &out_path, raw, outputs, reader_ledger)?;
    Ok(RunReport {
        mode,
        frames,
        streams,
        output: Some(out_path),
    })
}

fn export_run(
    cfg: &RunConfig,
    source: Box<dyn PacketSource>,
    new_codec: &CodecFactory,
    progress: Option<&Progress>,
) -> Result<RunReport> {
    let export_path = cfg
        .export
        .clone()
        .ok_or_else(|| Error::config("no export file specified"))?;
    check_overwrite(cfg, &export_path)?;
    let out_path = match &cfg.output {
        Some(path) => {
            check_overwrite(cfg, path)?;
            Some(path.clone())
        }
        None => None,
    };

    let sha1sum = sha1_of_file(&cfg.input)?;
    let infos = source.streams().to_vec();
    let raw = source.is_raw();
    let streams = stream_reports(&infos, new_codec)?;
    let codec_names: Vec<String> = streams.iter().map(|s| s.codec.clone()).collect();
    let mut builder =
        InterchangeBuilder::new(&cfg.input, &sha1sum, &codec_names, cfg.features, cfg.test_mode);

    let mut masks = StageMasks::exporting(cfg.features);
    masks.replicate = out_path.is_some();

    let workers = worker_count(cfg, infos.len());
    let mut slot_sets = make_slots(&infos, new_codec, workers, &masks)?;
    let queues: Vec<Queue<PacketEvent>> = (0..workers).map(|_| Queue::new()).collect();
    let doc_sink = DocQueue::new();

    let (reader_ledger, outputs, builder) =
        thread::scope(|s| -> Result<(FixupLedger, Vec<WorkerOutput>, InterchangeBuilder)> {
            let sides = vec![queues.iter().collect::<Vec<_>>()];
            let reader = s.spawn(move || read_stage(source, sides));
            let handles: Vec<_> = slot_sets
                .drain(..)
                .zip(&queues)
                .map(|(slots, queue)| {
                    let ctx = WorkerCtx {
                        import_file: None,
                        import_queue: None,
                        export_sink: Some(&doc_sink),
                        progress,
                    };
                    s.spawn(move || worker_stage(queue, slots, &ctx))
                })
                .collect();
            let collector = s.spawn(|| {
                while let QueueItem::Item(doc) = doc_sink.pop_lowest() {
                    builder.add_frame(&doc);
                }
                builder
            });

            let mut first_err = None;
            let ledger = match join_stage(reader, "read") {
                Ok(ledger) => ledger,
                Err(err) => {
                    first_err = Some(err);
                    FixupLedger::new()
                }
            };
            let mut outputs = Vec::with_capacity(handles.len());
            for handle in handles {
                match join_stage(handle, "decode") {
                    Ok(out) => outputs.push(out),
                    Err(err) => first_err = first_err.or(Some(err)),
                }
            }
            // the collector only ends once the sink is closed
            doc_sink.shutdown();
            let builder = collector
                .join()
                .map_err(|_| Error::from(CodecError::Other("collect stage panicked".into())))?;
            if let Some(err) = first_err {
                return Err(err);
            }
            Ok((ledger, outputs, builder))
        })?;

    let mut writer = BufWriter::new(File::create(&export_path)?);
    builder.write_to(&mut writer)?;
    writer.flush()?;
    tracing::info!(export = %export_path.display(), "interchange file written");

    let frames = match &out_path {
        Some(path) => write_output(cfg, path, raw, outputs, reader_ledger)?,
        None => outputs.iter().map(|o| o.frames).sum(),
    };
    Ok(RunReport {
        mode: RunMode::Export,
        frames,
        streams,
        output: out_path,
    })
}

fn script_run(
    cfg: &RunConfig,
    source: Box<dyn PacketSource>,
    new_codec: &CodecFactory,
    progress: Option<&Progress>,
) -> Result<RunReport> {
    let script_path = cfg
        .script
        .clone()
        .ok_or_else(|| Error::config("no script specified"))?;
    let host = ScriptHost::load(&script_path)?;

    let args = SetupArgs {
        input: cfg.input.display().to_string(),
        output: cfg
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        features: cfg
            .features
            .iter_features()
            .map(|f| f.name().to_owned())
            .collect(),
        params: parse_script_params(cfg.script_args.as_deref()),
    };
    let overrides = host.setup(&args)?;

    let mut features = cfg.features;
    if let Some(names) = &overrides.features {
        let mut set = FeatureSet::empty();
        for name in names {
            let feature = Feature::from_name(name).ok_or_else(|| {
                Error::script(format!("setup() selected unknown feature '{name}'"))
            })?;
            set = set.with(feature);
        }
        set.validate()?;
        features = set;
    }
    let out_path = overrides
        .output
        .map(PathBuf::from)
        .or_else(|| cfg.output.clone())
        .ok_or_else(|| Error::config("output file required when using a script"))?;
    check_overwrite(cfg, &out_path)?;

    let infos = source.streams().to_vec();
    let raw = source.is_raw();
    let workers = worker_count(cfg, infos.len());
    let mut export_slots = make_slots(&infos, new_codec, workers, &StageMasks::exporting(features))?;
    let mut apply_slots = make_slots(&infos, new_codec, workers, &StageMasks::applying(features))?;
    let streams = stream_reports(&infos, new_codec)?;

    let export_queues: Vec<Queue<PacketEvent>> = (0..workers).map(|_| Queue::new()).collect();
    let apply_queues: Vec<Queue<PacketEvent>> = (0..workers).map(|_| Queue::new()).collect();
    let to_script = DocQueue::new();
    let from_script = DocQueue::new();

    let (reader_ledger, outputs) = thread::scope(|s| -> Result<(FixupLedger, Vec<WorkerOutput>)> {
        let sides = vec![
            export_queues.iter().collect::<Vec<_>>(),
            apply_queues.iter().collect::<Vec<_>>(),
        ];
        let reader = s.spawn(move || read_stage(source, sides));

        let export_handles: Vec<_> = export_slots
            .drain(..)
            .zip(&export_queues)
            .map(|(slots, queue)| {
                let ctx = WorkerCtx {
                    import_file: None,
                    import_queue: None,
                    export_sink: Some(&to_script),
                    progress: None,
                };
                s.spawn(move || worker_stage(queue, slots, &ctx))
            })
            .collect();

        let script_infos = &infos;
        let scripter = s.spawn({
            let host = &host;
            let to_script = &to_script;
            let from_script = &from_script;
            move || {
                let result = script_stage(host, script_infos, to_script, from_script);
                from_script.shutdown();
                if result.is_err() {
                    to_script.shutdown();
                }
                result
            }
        });

        let apply_handles: Vec<_> = apply_slots
            .drain(..)
            .zip(&apply_queues)
            .map(|(slots, queue)| {
                let ctx = WorkerCtx {
                    import_file: None,
                    import_queue: Some(&from_script),
                    export_sink: None,
                    progress,
                };
                s.spawn(move || worker_stage(queue, slots, &ctx))
            })
            .collect();

        let mut first_err = None;
        let ledger = match join_stage(reader, "read") {
            Ok(ledger) => ledger,
            Err(err) => {
                first_err = Some(err);
                FixupLedger::new()
            }
        };
        for handle in export_handles {
            if let Err(err) = join_stage(handle, "export decode") {
                first_err = first_err.or(Some(err));
            }
        }
        // the script stage only ends once its input is closed
        to_script.shutdown();
        let script_result = join_stage(scripter, "script");
        let mut outputs = Vec::with_capacity(apply_handles.len());
        for handle in apply_handles {
            match join_stage(handle, "apply decode") {
                Ok(out) => outputs.push(out),
                Err(err) => first_err = first_err.or(Some(err)),
            }
        }
        if let Err(err) = script_result {
            return Err(err);
        }
        if let Some(err) = first_err {
            return Err(err);
        }
        Ok((ledger, outputs))
    })?;

    let frames = write_output(cfg, &out_path, raw, outputs, reader_ledger)?;
    Ok(RunReport {
        mode: RunMode::Script,
        frames,
        streams,
        output: Some(out_path),
    })
}

/// Split `key=value,key=value` script parameters.
fn parse_script_params(args: Option<&str>) -> Vec<(String, String)> {
    let Some(args) = args else {
        return Vec::new();
    };
    args.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (part.to_owned(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script_params() {
        assert_eq!(parse_script_params(None), vec![]);
        assert_eq!(
            parse_script_params(Some("a=1,b=two,flag")),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_worker_count_bounds() {
        let mut cfg = RunConfig::for_input("in.mpg");
        assert_eq!(worker_count(&cfg, 2), 2);
        cfg.threads = Some(1);
        assert_eq!(worker_count(&cfg, 2), 1);
        cfg.threads = Some(8);
        assert_eq!(worker_count(&cfg, 2), 2);
    }
}
