//! Script host: compiles a user script and drives its callbacks.
//!
//! The contract has two entry points. `setup(args)` runs once before any
//! packet is read and may override the output path and the selected feature
//! set. `glitch_frame(frame, stream)` runs for every exported frame; `frame`
//! is handed over as a shared value, so scripts edit it in place.

use std::path::Path;

use rhai::{Dynamic, Engine, Scope, AST};

use datamosh_core::error::{Error, Result};

/// Inputs handed to the script's `setup()`.
#[derive(Debug, Clone, Default)]
pub struct SetupArgs {
    pub input: String,
    pub output: String,
    /// Selected feature names, in registry order.
    pub features: Vec<String>,
    /// Raw `key=value` parameter pairs from the command line.
    pub params: Vec<(String, String)>,
}

/// Overrides returned by `setup()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupOverrides {
    pub output: Option<String>,
    pub features: Option<Vec<String>>,
}

/// A compiled user script.
pub struct ScriptHost {
    engine: Engine,
    ast: AST,
    name: String,
    has_setup: bool,
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("name", &self.name)
            .field("has_setup", &self.has_setup)
            .finish()
    }
}

impl ScriptHost {
    /// Load and compile a script file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_source(&name, &source)
    }

    /// Compile a script from source.
    pub fn from_source(name: &str, source: &str) -> Result<Self> {
        let engine = Engine::new();
        let ast = engine
            .compile(source)
            .map_err(|e| Error::script(format!("{name}: {e}")))?;

        let mut has_setup = false;
        let mut has_glitch_frame = false;
        for f in ast.iter_functions() {
            match f.name {
                "setup" => has_setup = true,
                "glitch_frame" => has_glitch_frame = true,
                _ => {}
            }
        }
        if !has_glitch_frame {
            return Err(Error::script(format!(
                "function glitch_frame() not found in {name}"
            )));
        }

        tracing::debug!(script = name, has_setup, "script compiled");
        Ok(Self {
            engine,
            ast,
            name: name.to_owned(),
            has_setup,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `setup()` if the script defines one, validating the shape of the
    /// returned overrides.
    pub fn setup(&self, args: &SetupArgs) -> Result<SetupOverrides> {
        if !self.has_setup {
            return Ok(SetupOverrides::default());
        }

        let mut map = rhai::Map::new();
        map.insert("input".into(), Dynamic::from(args.input.clone()));
        map.insert("output".into(), Dynamic::from(args.output.clone()));
        let features: rhai::Array = args
            .features
            .iter()
            .map(|f| Dynamic::from(f.clone()))
            .collect();
        map.insert("features".into(), Dynamic::from_array(features));
        let mut params = rhai::Map::new();
        for (k, v) in &args.params {
            params.insert(k.as_str().into(), Dynamic::from(v.clone()));
        }
        map.insert("params".into(), Dynamic::from_map(params));

        let mut scope = Scope::new();
        let ret: Dynamic = self
            .engine
            .call_fn(&mut scope, &self.ast, "setup", (Dynamic::from_map(map),))
            .map_err(|e| Error::script(format!("{}: setup(): {e}", self.name)))?;

        self.parse_overrides(ret)
    }

    fn parse_overrides(&self, ret: Dynamic) -> Result<SetupOverrides> {
        if ret.is_unit() {
            return Ok(SetupOverrides::default());
        }
        let map = ret.try_cast::<rhai::Map>().ok_or_else(|| {
            Error::script(format!(
                "{}: setup() must return nothing or a map",
                self.name
            ))
        })?;

        let mut overrides = SetupOverrides::default();
        for (key, value) in map {
            match key.as_str() {
                "output" => {
                    let s = value.try_cast::<rhai::ImmutableString>().ok_or_else(|| {
                        Error::script(format!(
                            "{}: setup() key 'output' must be a string",
                            self.name
                        ))
                    })?;
                    overrides.output = Some(s.to_string());
                }
                "features" => {
                    let arr = value.try_cast::<rhai::Array>().ok_or_else(|| {
                        Error::script(format!(
                            "{}: setup() key 'features' must be an array of strings",
                            self.name
                        ))
                    })?;
                    let mut names = Vec::with_capacity(arr.len());
                    for v in arr {
                        let s = v.try_cast::<rhai::ImmutableString>().ok_or_else(|| {
                            Error::script(format!(
                                "{}: setup() key 'features' must be an array of strings",
                                self.name
                            ))
                        })?;
                        names.push(s.to_string());
                    }
                    overrides.features = Some(names);
                }
                other => {
                    return Err(Error::script(format!(
                        "{}: setup() returned unknown key '{other}'",
                        self.name
                    )));
                }
            }
        }
        Ok(overrides)
    }

    /// Run `glitch_frame(frame, stream)` for one frame.
    ///
    /// `frame` is converted to a shared value before the call; the returned
    /// handle reflects any in-place edits the script made.
    pub fn glitch_frame(&self, frame: Dynamic, stream: Dynamic) -> Result<Dynamic> {
        let shared = frame.into_shared();
        let mut scope = Scope::new();
        self.engine
            .call_fn::<Dynamic>(
                &mut scope,
                &self.ast,
                "glitch_frame",
                (shared.clone(), stream),
            )
            .map_err(|e| Error::script(format!("{}: glitch_frame(): {e}", self.name)))?;
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{doc_to_dynamic, dynamic_to_doc, ArrayPool};
    use datamosh_json::Arena;

    #[test]
    fn test_missing_glitch_frame_is_fatal() {
        let err = ScriptHost::from_source("empty.rhai", "fn setup(args) {}").unwrap_err();
        assert!(err.to_string().contains("glitch_frame"));
    }

    #[test]
    fn test_compile_error_is_fatal() {
        assert!(ScriptHost::from_source("bad.rhai", "fn glitch_frame(").is_err());
    }

    #[test]
    fn test_setup_absent_yields_no_overrides() {
        let host = ScriptHost::from_source("s.rhai", "fn glitch_frame(frame, stream) {}").unwrap();
        let overrides = host.setup(&SetupArgs::default()).unwrap();
        assert_eq!(overrides, SetupOverrides::default());
    }

    #[test]
    fn test_setup_overrides() {
        let src = r#"
fn setup(args) {
    #{ output: args.output + ".glitched", features: ["mv"] }
}
fn glitch_frame(frame, stream) {}
"#;
        let host = ScriptHost::from_source("s.rhai", src).unwrap();
        let args = SetupArgs {
            output: "out.mpg".into(),
            ..SetupArgs::default()
        };
        let overrides = host.setup(&args).unwrap();
        assert_eq!(overrides.output.as_deref(), Some("out.mpg.glitched"));
        assert_eq!(overrides.features, Some(vec!["mv".to_string()]));
    }

    #[test]
    fn test_setup_shape_validation() {
        let src = r#"
fn setup(args) { #{ output: 42 } }
fn glitch_frame(frame, stream) {}
"#;
        let host = ScriptHost::from_source("s.rhai", src).unwrap();
        assert!(host.setup(&SetupArgs::default()).is_err());

        let src = r#"
fn setup(args) { "nope" }
fn glitch_frame(frame, stream) {}
"#;
        let host = ScriptHost::from_source("s.rhai", src).unwrap();
        assert!(host.setup(&SetupArgs::default()).is_err());
    }

    #[test]
    fn test_glitch_frame_edits_are_visible() {
        let src = r#"
fn glitch_frame(frame, stream) {
    frame.qscale = 31;
}
"#;
        let host = ScriptHost::from_source("s.rhai", src).unwrap();

        let mut arena = Arena::new();
        let root = datamosh_json::parse(&mut arena, r#"{"qscale":2}"#).unwrap();
        let mut pool = ArrayPool::new();
        let frame = doc_to_dynamic(&mut pool, &arena, root);
        let edited = host.glitch_frame(frame, Dynamic::UNIT).unwrap();

        let mut arena2 = Arena::new();
        let root2 = dynamic_to_doc(&mut pool, &mut arena2, edited).unwrap();
        let qscale = arena2.object_get(root2, "qscale").unwrap();
        assert_eq!(arena2.as_i64(qscale), Some(31));
    }

    #[test]
    fn test_runtime_error_is_fatal() {
        let src = r#"
fn glitch_frame(frame, stream) {
    frame.missing_fn();
}
"#;
        let host = ScriptHost::from_source("s.rhai", src).unwrap();
        let err = host.glitch_frame(Dynamic::UNIT, Dynamic::UNIT).unwrap_err();
        assert!(err.to_string().contains("glitch_frame"));
    }
}
