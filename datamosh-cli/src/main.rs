//! Command-line front end for the bitstream editor.
//!
//! The mode of operation falls out of which file arguments are given:
//! input alone probes, input plus output replicates, `-e` exports feature
//! data to an interchange file, `-a` applies an edited one back, and `-s`
//! runs a script against every frame in a single pass.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use datamosh_core::config::{RunConfig, RunMode};
use datamosh_core::error::{CodecError, Error, Result};
use datamosh_core::feature::{Feature, FeatureSet};
use datamosh_pipeline::raw::{RawCodec, RawSource};
use datamosh_pipeline::run::{
    run, CodecFactory, PacketSource, Progress, RunReport, StreamInfo,
};
use datamosh_pipeline::GlitchCodec;

#[derive(Parser, Debug)]
#[command(name = "datamosh")]
#[command(version)]
#[command(about = "Edit coded bitstream features without re-encoding")]
struct Args {
    /// Input media file
    #[arg(short, long)]
    input: PathBuf,

    /// Output media file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export selected features to this interchange file
    #[arg(short, long, conflicts_with = "apply")]
    export: Option<PathBuf>,

    /// Apply an edited interchange file back onto the input
    #[arg(short, long)]
    apply: Option<PathBuf>,

    /// Run this script against every frame
    #[arg(short, long, conflicts_with_all = ["export", "apply"])]
    script: Option<PathBuf>,

    /// Parameters passed to the script's setup(), as key=value pairs
    #[arg(short = 'p', long = "params", requires = "script")]
    script_params: Option<String>,

    /// Select a feature to export or apply (repeatable)
    #[arg(short, long = "feature", value_name = "FEATURE")]
    features: Vec<String>,

    /// List the known features and exit
    #[arg(long)]
    list_features: bool,

    /// Bit-exact output: omit version stamps from interchange files
    #[arg(short, long)]
    test: bool,

    /// Overwrite the output file if it exists
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Worker thread count (default: one per stream)
    #[arg(long)]
    threads: Option<usize>,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> Result<RunConfig> {
        let features = if self.features.is_empty() {
            FeatureSet::defaults()
        } else {
            let mut set = FeatureSet::empty();
            for name in &self.features {
                let feature = Feature::from_name(name).ok_or_else(|| {
                    Error::config(format!(
                        "unknown feature '{name}' (see --list-features)"
                    ))
                })?;
                set = set.with(feature);
            }
            set
        };
        Ok(RunConfig {
            input: self.input,
            output: self.output,
            export: self.export,
            apply: self.apply,
            script: self.script,
            script_args: self.script_params,
            features,
            test_mode: self.test,
            overwrite: self.overwrite,
            threads: self.threads,
        })
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn new_codec(stream: &StreamInfo) -> Result<Box<dyn GlitchCodec>> {
    match stream.codec.as_str() {
        "raw" => Ok(Box::new(RawCodec::new())),
        other => Err(Error::unsupported(format!(
            "no parser for codec '{other}'"
        ))),
    }
}

fn list_features() {
    println!("{}", style("Features:").cyan().bold());
    for feature in Feature::ALL {
        let marker = if feature.is_default() { "*" } else { " " };
        println!(
            "  {} {:<10} {}",
            marker,
            style(feature.name()).white(),
            feature.description()
        );
    }
    println!();
    println!("  * selected by default");
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    // frame total is unknown up front, so a spinner with a live message
    if let Ok(tpl) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(tpl);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn execute(cfg: &RunConfig, progress: &Progress) -> Result<RunReport> {
    let source: Box<dyn PacketSource> = Box::new(RawSource::open(&cfg.input)?);
    let factory: &CodecFactory = &new_codec;

    let show_bar = cfg.mode() != RunMode::Probe && console::user_attended_stderr();
    let started = Instant::now();

    thread::scope(|scope| {
        let handle = scope.spawn(move || run(cfg, source, factory, Some(progress)));
        let pb = show_bar.then(progress_bar);
        while !handle.is_finished() {
            if let Some(pb) = &pb {
                let frames = progress.frames();
                let fps = frames as f64 / started.elapsed().as_secs_f64().max(0.001);
                pb.set_message(format!("{frames} frames | {fps:.1} fps"));
            }
            thread::sleep(Duration::from_millis(500));
        }
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        handle
            .join()
            .map_err(|_| Error::from(CodecError::Other("run thread panicked".into())))?
    })
}

fn print_report(report: &RunReport, elapsed: Duration) {
    match report.mode {
        RunMode::Probe => {
            println!("{}", style("Streams:").cyan().bold());
            for stream in &report.streams {
                let features: Vec<&str> = stream
                    .features
                    .iter_features()
                    .map(Feature::name)
                    .collect();
                println!(
                    "  #{} {:<8} [{}]",
                    stream.index,
                    style(&stream.codec).white(),
                    features.join(", ")
                );
            }
        }
        _ => {
            println!(
                "{} {} frames in {:.1}s",
                style("Done:").green().bold(),
                report.frames,
                elapsed.as_secs_f64()
            );
            if let Some(output) = &report.output {
                println!("  Output: {}", style(output.display()).white());
            }
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list_features {
        list_features();
        return;
    }

    let cfg = match args.into_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{} {}", style("Error:").red().bold(), err);
            std::process::exit(1);
        }
    };
    debug!(?cfg, "parsed configuration");

    let progress = Progress::new();
    let started = Instant::now();
    match execute(&cfg, &progress) {
        Ok(report) => print_report(&report, started.elapsed()),
        Err(err) => {
            eprintln!("{} {}", style("Error:").red().bold(), err);
            std::process::exit(1);
        }
    }
}
