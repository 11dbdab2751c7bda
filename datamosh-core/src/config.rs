//! Run configuration and validation.
//!
//! One [`RunConfig`] describes everything a run needs; the pipeline never
//! consults global state. The mode of operation is derived from which file
//! arguments are present, after [`RunConfig::validate`] has rejected
//! inconsistent combinations.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::feature::FeatureSet;

/// What a run does, derived from the configured file arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Input only: decode and report stream info, produce nothing.
    Probe,
    /// Input and output: rebuild the file bit-exactly with no edits.
    Replicate,
    /// Export selected features to an interchange file.
    Export,
    /// Apply a previously exported (and edited) interchange file.
    Transplicate,
    /// Run a script against each frame and apply its edits in one pass.
    Script,
}

/// Configuration for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Input media file.
    pub input: PathBuf,
    /// Output media file, if any.
    pub output: Option<PathBuf>,
    /// Interchange file to export feature data into.
    pub export: Option<PathBuf>,
    /// Interchange file to apply feature data from.
    pub apply: Option<PathBuf>,
    /// Script to run against each frame.
    pub script: Option<PathBuf>,
    /// Optional argument string passed to the script's `setup()`.
    pub script_args: Option<String>,
    /// Selected features.
    pub features: FeatureSet,
    /// Bit-exact output: omit version stamps from interchange files.
    pub test_mode: bool,
    /// Overwrite the output file if it exists.
    pub overwrite: bool,
    /// Worker thread count; `None` picks one per stream.
    pub threads: Option<usize>,
}

impl RunConfig {
    /// Configuration with default features for `input`.
    pub fn for_input(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            features: FeatureSet::defaults(),
            ..Self::default()
        }
    }

    /// Derive the run mode. Only meaningful after validation.
    pub fn mode(&self) -> RunMode {
        if self.script.is_some() {
            RunMode::Script
        } else if self.apply.is_some() {
            RunMode::Transplicate
        } else if self.export.is_some() {
            RunMode::Export
        } else if self.output.is_some() {
            RunMode::Replicate
        } else {
            RunMode::Probe
        }
    }

    /// Reject inconsistent option combinations.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(Error::config("no input file specified"));
        }
        if self.export.is_some() && self.apply.is_some() {
            return Err(Error::config("only one of export or apply may be used"));
        }
        if self.script.is_some() {
            if self.export.is_some() || self.apply.is_some() {
                return Err(Error::config(
                    "a script may not be combined with export or apply",
                ));
            }
            if self.output.is_none() {
                return Err(Error::config("output file required when using a script"));
            }
        }
        if let Some(n) = self.threads {
            if n == 0 {
                return Err(Error::config("thread count must be at least 1"));
            }
        }
        self.features.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;

    fn base() -> RunConfig {
        RunConfig::for_input("in.mpg")
    }

    #[test]
    fn test_mode_derivation() {
        assert_eq!(base().mode(), RunMode::Probe);

        let mut cfg = base();
        cfg.output = Some("out.mpg".into());
        assert_eq!(cfg.mode(), RunMode::Replicate);

        let mut cfg = base();
        cfg.export = Some("frames.json".into());
        assert_eq!(cfg.mode(), RunMode::Export);

        let mut cfg = base();
        cfg.apply = Some("frames.json".into());
        cfg.output = Some("out.mpg".into());
        assert_eq!(cfg.mode(), RunMode::Transplicate);

        let mut cfg = base();
        cfg.script = Some("glitch.rhai".into());
        cfg.output = Some("out.mpg".into());
        assert_eq!(cfg.mode(), RunMode::Script);
    }

    #[test]
    fn test_export_and_apply_conflict() {
        let mut cfg = base();
        cfg.export = Some("a.json".into());
        cfg.apply = Some("b.json".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_script_requires_output() {
        let mut cfg = base();
        cfg.script = Some("glitch.rhai".into());
        assert!(cfg.validate().is_err());
        cfg.output = Some("out.mpg".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_script_excludes_export() {
        let mut cfg = base();
        cfg.script = Some("glitch.rhai".into());
        cfg.output = Some("out.mpg".into());
        cfg.export = Some("frames.json".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_input() {
        let cfg = RunConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_feature_conflicts_checked() {
        let mut cfg = base();
        cfg.features = [Feature::Mv, Feature::MvDelta].into_iter().collect();
        assert!(cfg.validate().is_err());
    }
}
