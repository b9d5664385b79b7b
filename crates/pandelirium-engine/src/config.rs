use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::animation::{AnimationSession, FiringMode, DEFAULT_THRESHOLD, DEFAULT_TICK_MS};
use crate::assets::{read_to_string_result, resolve_assets_path, AssetsRoot};
use crate::control::ChannelFilter;
use crate::error::{EngineError, RegistryError, SessionError};
use crate::operator::{OperatorCategory, OperatorDefinition, ParamType, ParameterSpec};
use crate::pipeline::FallbackPolicy;
use crate::retarget::{NonRepeatingChoice, RetargetAction};

/// How strictly to interpret/validate config files.
///
/// - `Lenient` is forward-compatible: unknown fields are ignored and missing optional
///   keys fall back to defaults.
/// - `Strict` is fail-fast: unknown top-level fields and unsupported versions become errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    Lenient,
    Strict,
}

/// Resolved, OS-aware config paths for a run.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub assets_dir: PathBuf,
    pub session_json: PathBuf,
    pub operators_json: PathBuf,
}

impl ConfigPaths {
    pub fn resolve(assets: &AssetsRoot) -> Self {
        Self {
            assets_dir: assets.path().to_path_buf(),
            session_json: assets.pick_platform_json("session"),
            operators_json: assets.pick_platform_json("operators"),
        }
    }
}

/// `"*"`, `"3"` or `3`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChannelSpec {
    Number(u8),
    Text(String),
}

impl Default for ChannelSpec {
    fn default() -> Self {
        ChannelSpec::Text("*".into())
    }
}

impl ChannelSpec {
    pub fn filter(&self) -> Option<ChannelFilter> {
        match self {
            ChannelSpec::Number(n) => ChannelFilter::from_number(*n),
            ChannelSpec::Text(s) => ChannelFilter::parse(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct MidiCfg {
    /// Case-insensitive substring of the input port name. First port when absent.
    #[serde(default)]
    pub input_contains: Option<String>,
    #[serde(default)]
    pub channel: ChannelSpec,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OscCfg {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_osc_bind")]
    pub bind: String,
    #[serde(default = "default_osc_prefix")]
    pub prefix: String,
}

fn default_osc_bind() -> String {
    "0.0.0.0:9000".into()
}

fn default_osc_prefix() -> String {
    "/pandelirium".into()
}

impl Default for OscCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_osc_bind(),
            prefix: default_osc_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParamCfg {
    pub name: String,
    #[serde(default)]
    pub initial: f32,
    pub rate: f32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionCfg {
    VibrantColor {
        targets: [String; 3],
        #[serde(default = "default_saturation")]
        saturation: f32,
        #[serde(default = "default_lightness")]
        lightness: f32,
    },
    IntRange {
        target: String,
        min: i32,
        max: i32,
    },
    Choice {
        target: String,
        options: Vec<f32>,
    },
}

fn default_saturation() -> f32 {
    1.0
}

fn default_lightness() -> f32 {
    0.5
}

impl ActionCfg {
    pub fn to_action(&self) -> Result<RetargetAction, SessionError> {
        Ok(match self {
            ActionCfg::VibrantColor {
                targets,
                saturation,
                lightness,
            } => RetargetAction::VibrantColor {
                targets: targets.clone(),
                saturation: *saturation,
                lightness: *lightness,
            },
            ActionCfg::IntRange { target, min, max } => RetargetAction::IntRange {
                target: target.clone(),
                min: *min,
                max: *max,
            },
            ActionCfg::Choice { target, options } => RetargetAction::Choice {
                target: target.clone(),
                choice: NonRepeatingChoice::new(options.clone()).map_err(|source| {
                    SessionError::OptionSet {
                        param: target.clone(),
                        source,
                    }
                })?,
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TriggerCfg {
    pub cc: u8,
    pub action: ActionCfg,
}

/// Typed view of `assets/session.json`.
///
/// Versioning: `version` defaults to 1 when omitted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub firing: FiringMode,
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default)]
    pub midi: MidiCfg,
    #[serde(default)]
    pub osc: OscCfg,
    #[serde(default)]
    pub params: Vec<ParamCfg>,
    #[serde(default)]
    pub triggers: Vec<TriggerCfg>,
}

/// Strict version of `SessionConfig` that fails on unknown top-level fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionConfigStrict {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "default_tick_ms")]
    tick_ms: u64,
    #[serde(default = "default_threshold")]
    threshold: f32,
    #[serde(default)]
    firing: FiringMode,
    #[serde(default)]
    fallback: FallbackPolicy,
    #[serde(default)]
    midi: MidiCfg,
    #[serde(default)]
    osc: OscCfg,
    #[serde(default)]
    params: Vec<ParamCfg>,
    #[serde(default)]
    triggers: Vec<TriggerCfg>,
}

impl From<SessionConfigStrict> for SessionConfig {
    fn from(s: SessionConfigStrict) -> Self {
        Self {
            version: s.version,
            tick_ms: s.tick_ms,
            threshold: s.threshold,
            firing: s.firing,
            fallback: s.fallback,
            midi: s.midi,
            osc: s.osc,
            params: s.params,
            triggers: s.triggers,
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

impl Default for SessionConfig {
    /// The kaleidoscope set: CC4 recolors, CC5 re-rolls the segment count, CC6 jumps scale.
    fn default() -> Self {
        let param = |name: &str, initial: f32, rate: f32| ParamCfg {
            name: name.into(),
            initial,
            rate,
        };
        Self {
            version: 1,
            tick_ms: DEFAULT_TICK_MS,
            threshold: DEFAULT_THRESHOLD,
            firing: FiringMode::Level,
            fallback: FallbackPolicy::SubstituteDefault,
            midi: MidiCfg {
                input_contains: Some("borderland_pandelirium".into()),
                channel: ChannelSpec::default(),
            },
            osc: OscCfg::default(),
            params: vec![
                param("color_r", 1.0, 0.05),
                param("color_g", 1.0, 0.05),
                param("color_b", 1.0, 0.05),
                param("kaleid", 3.0, 0.1),
                param("scale", 1.0, 0.1),
            ],
            triggers: vec![
                TriggerCfg {
                    cc: 4,
                    action: ActionCfg::VibrantColor {
                        targets: ["color_r".into(), "color_g".into(), "color_b".into()],
                        saturation: default_saturation(),
                        lightness: default_lightness(),
                    },
                },
                TriggerCfg {
                    cc: 5,
                    action: ActionCfg::IntRange {
                        target: "kaleid".into(),
                        min: 3,
                        max: 11,
                    },
                },
                TriggerCfg {
                    cc: 6,
                    action: ActionCfg::Choice {
                        target: "scale".into(),
                        options: vec![0.05, 0.2, 1.0, 5.0],
                    },
                },
            ],
        }
    }
}

impl SessionConfig {
    /// Build a fresh animation session. Every setup defect is reported here, before the clock runs.
    pub fn build_session(&self) -> Result<AnimationSession, SessionError> {
        let mut session = AnimationSession::new(self.threshold, self.firing)?;
        self.populate(&mut session)?;
        Ok(session)
    }

    /// Fill an existing (e.g. seeded) session with params and triggers.
    pub fn populate(&self, session: &mut AnimationSession) -> Result<(), SessionError> {
        for p in &self.params {
            session.add_param(&p.name, p.initial, p.rate)?;
        }
        for t in &self.triggers {
            session.add_trigger(t.cc, t.action.to_action()?)?;
        }
        Ok(())
    }

    pub fn channel_filter(&self) -> Option<ChannelFilter> {
        self.midi.channel.filter()
    }
}

/// Parse session JSON text in the requested mode. `path` is only used for error messages.
pub fn parse_session_config(
    src: &str,
    path: &Path,
    mode: ConfigMode,
) -> Result<SessionConfig, EngineError> {
    let json_err = |e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    };
    let cfg: SessionConfig = match mode {
        ConfigMode::Lenient => serde_json::from_str(src).map_err(json_err)?,
        ConfigMode::Strict => serde_json::from_str::<SessionConfigStrict>(src)
            .map_err(json_err)?
            .into(),
    };

    if mode == ConfigMode::Strict && cfg.version != 1 {
        return Err(EngineError::InvalidConfig {
            path: path.to_path_buf(),
            msg: format!("unsupported session.json version {} (expected 1)", cfg.version),
        });
    }
    if cfg.tick_ms == 0 {
        return Err(EngineError::InvalidConfig {
            path: path.to_path_buf(),
            msg: "tick_ms must be at least 1".into(),
        });
    }
    if cfg.channel_filter().is_none() {
        return Err(EngineError::InvalidConfig {
            path: path.to_path_buf(),
            msg: format!("midi.channel must be \"*\" or 1..16, got {:?}", cfg.midi.channel),
        });
    }
    Ok(cfg)
}

/// Load `session(.<os>).json`; a missing file means the built-in kaleidoscope set.
pub fn load_session_config(path: &Path, mode: ConfigMode) -> Result<SessionConfig, EngineError> {
    if !path.exists() {
        return Ok(SessionConfig::default());
    }
    let src = read_to_string_result(path)?;
    parse_session_config(&src, path, mode)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InputCfg {
    #[serde(default, rename = "type")]
    pub ty: ParamType,
    pub name: String,
    #[serde(default)]
    pub default: f64,
}

/// One entry of `operators.json`. Mirrors the `setFunction` call surface.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OperatorCfg {
    pub name: String,
    #[serde(rename = "type")]
    pub category: OperatorCategory,
    #[serde(default)]
    pub inputs: Vec<InputCfg>,
    #[serde(default)]
    pub glsl: Option<String>,
    /// Body read from a file relative to assets/ (wins over `glsl`).
    #[serde(default)]
    pub glsl_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OperatorsFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub operators: Vec<OperatorCfg>,
}

/// An operator entry that could not become a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedOperators {
    pub definitions: Vec<OperatorDefinition>,
    pub rejected: Vec<Rejected>,
}

impl OperatorCfg {
    pub fn to_definition(&self, assets_dir: &Path) -> Result<OperatorDefinition, String> {
        let body = match (&self.glsl_file, &self.glsl) {
            (Some(file), _) => {
                let path = resolve_assets_path(assets_dir, file);
                read_to_string_result(&path).map_err(|e| e.to_string())?
            }
            (None, Some(inline)) => inline.clone(),
            (None, None) => return Err("missing body (glsl or glsl_file)".into()),
        };
        let params = self
            .inputs
            .iter()
            .map(|i| ParameterSpec {
                name: i.name.clone(),
                ty: i.ty,
                default: i.default,
            })
            .collect();
        OperatorDefinition::new(self.name.clone(), self.category, params, body)
            .map_err(|e: RegistryError| e.to_string())
    }
}

/// Load `operators(.<os>).json`. The file as a whole must parse; individual malformed entries
/// are collected in `rejected` so the rest still register.
pub fn load_operators(path: &Path, assets_dir: &Path) -> Result<LoadedOperators, EngineError> {
    if !path.exists() {
        return Ok(LoadedOperators::default());
    }
    let src = read_to_string_result(path)?;
    let file: OperatorsFile = serde_json::from_str(&src).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut out = LoadedOperators::default();
    for cfg in &file.operators {
        match cfg.to_definition(assets_dir) {
            Ok(def) => out.definitions.push(def),
            Err(reason) => out.rejected.push(Rejected {
                name: cfg.name.clone(),
                reason,
            }),
        }
    }
    Ok(out)
}

/// A JSON file loaded from disk (path + raw text + parsed `serde_json::Value`), kept untyped
/// so validation can point at exact locations before typed parsing.
#[derive(Debug, Clone)]
pub struct LoadedJson {
    pub path: PathBuf,
    pub src: String,
    pub value: Value,
}

/// Load any JSON file as `LoadedJson`.
pub fn load_json_file(path: &Path) -> Result<LoadedJson, EngineError> {
    let src = read_to_string_result(path)?;
    let value: Value = serde_json::from_str(&src).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(LoadedJson {
        path: path.to_path_buf(),
        src,
        value,
    })
}

/// Aggregate configuration for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub assets: AssetsRoot,
    pub paths: ConfigPaths,
    pub session: SessionConfig,
    pub operators: LoadedOperators,
}

pub fn load_engine_config(
    assets: AssetsRoot,
    mode: ConfigMode,
) -> Result<EngineConfig, EngineError> {
    let paths = ConfigPaths::resolve(&assets);
    let session = load_session_config(&paths.session_json, mode)?;
    let operators = load_operators(&paths.operators_json, &paths.assets_dir)?;
    Ok(EngineConfig {
        assets,
        paths,
        session,
        operators,
    })
}
