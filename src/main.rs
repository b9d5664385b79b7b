mod hotreload;
mod logging;
mod midi;
mod osc;
mod scene;
mod validate;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{never, select, tick, Receiver};
use pandelirium_engine::animation::{shared, FiringMode, SharedSession};
use pandelirium_engine::assets::AssetsRoot;
use pandelirium_engine::config::{
    load_engine_config, load_json_file, load_operators, load_session_config, ConfigMode,
    ConfigPaths, LoadedOperators, SessionConfig,
};
use pandelirium_engine::control::ControlTable;
use pandelirium_engine::operator::{OperatorRegistry, Registration};
use pandelirium_engine::pipeline::{Fallback, OutputBuffer, Program};

use crate::hotreload::{HotEvent, HotReload};

/// Command line, parsed by hand.
#[derive(Debug, Clone, PartialEq)]
struct Args {
    assets: Option<PathBuf>,
    log_file: Option<PathBuf>,
    strict: bool,
    edge: bool,
    frames: Option<u64>,
    fps: u32,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            assets: None,
            log_file: None,
            strict: false,
            edge: false,
            frames: None,
            fps: 60,
        }
    }
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut out = Args::default();
        let mut it = args.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "--assets" => out.assets = Some(PathBuf::from(value(&mut it, &a)?)),
                "--log-file" => out.log_file = Some(PathBuf::from(value(&mut it, &a)?)),
                "--strict" => out.strict = true,
                "--edge" => out.edge = true,
                "--frames" => {
                    let v = value(&mut it, &a)?;
                    out.frames = Some(v.parse().with_context(|| format!("--frames {v}"))?);
                }
                "--fps" => {
                    let v = value(&mut it, &a)?;
                    let fps: u32 = v.parse().with_context(|| format!("--fps {v}"))?;
                    anyhow::ensure!(fps > 0, "--fps must be positive");
                    out.fps = fps;
                }
                other => anyhow::bail!("unknown argument {other}"),
            }
        }
        Ok(out)
    }

    fn config_mode(&self) -> ConfigMode {
        if self.strict {
            ConfigMode::Strict
        } else {
            ConfigMode::Lenient
        }
    }
}

fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    it.next().with_context(|| format!("{flag} needs a value"))
}

fn main() -> anyhow::Result<()> {
    let mut args = Args::parse(std::env::args().skip(1))?;
    if args.log_file.is_none() {
        if let Ok(p) = std::env::var("PANDELIRIUM_LOG_FILE") {
            if !p.trim().is_empty() {
                args.log_file = Some(PathBuf::from(p));
            }
        }
    }
    let run_id = logging::init(args.log_file.clone());
    logging::install_panic_hook();
    logi!("INIT", "run_id={run_id}");

    let assets = match &args.assets {
        Some(dir) => AssetsRoot::at(dir)?,
        None => {
            let cwd = std::env::current_dir().context("current dir")?;
            AssetsRoot::discover(&cwd)
                .or_else(|_| AssetsRoot::discover(Path::new(env!("CARGO_MANIFEST_DIR"))))?
        }
    };

    let paths = ConfigPaths::resolve(&assets);
    validate_file("session.json", &paths.session_json, validate::validate_session_json);
    validate_file("operators.json", &paths.operators_json, validate::validate_operators_json);

    let mut cfg = load_engine_config(assets, args.config_mode())?;
    if args.edge {
        cfg.session.firing = FiringMode::Edge;
    }
    logi!("INIT", "assets base: {}", cfg.paths.assets_dir.display());
    logi!("INIT", "session: {}", cfg.paths.session_json.display());
    logi!("INIT", "operators: {}", cfg.paths.operators_json.display());
    logi!(
        "CONFIG",
        "tick={}ms threshold={} firing={:?} fallback={:?} params={} triggers={}",
        cfg.session.tick_ms,
        cfg.session.threshold,
        cfg.session.firing,
        cfg.session.fallback,
        cfg.session.params.len(),
        cfg.session.triggers.len()
    );

    let registry = Arc::new(RwLock::new(OperatorRegistry::new()));
    register_all(&registry, cfg.operators);

    let session = shared(cfg.session.build_session().context("session setup")?);
    let controls = ControlTable::new(cfg.session.channel_filter().unwrap_or_default());

    let mut midi_link = midi::connect_midi(&cfg.session.midi, controls.clone());
    let mut midi_lost = false;
    let midi_clock = tick(Duration::from_secs(1));
    let _osc = osc::connect_osc(
        &cfg.session.osc,
        osc::OscContext {
            prefix: cfg.session.osc.prefix.clone(),
            table: controls.clone(),
            session: session.clone(),
            registry: registry.clone(),
        },
    );

    let mut program = rebuild_scene(&registry, &session, &controls, &cfg.session);

    let hot = match HotReload::new(&cfg.paths.assets_dir) {
        Ok(h) => Some(h),
        Err(e) => {
            logw!("WATCH", "hot reload disabled: {e}");
            None
        }
    };
    let hot_rx: Receiver<HotEvent> = hot.as_ref().map(|h| h.rx().clone()).unwrap_or_else(never);

    let mut session_cfg = cfg.session;
    let mut anim_clock = tick(Duration::from_millis(session_cfg.tick_ms));
    let frame_clock = tick(Duration::from_secs_f64(1.0 / args.fps as f64));

    let mut frames: u64 = 0;
    let mut last_status = Instant::now();
    let mut last_fallbacks: Vec<(OutputBuffer, Fallback)> = Vec::new();

    logi!("INIT", "running (fps={} frames={:?})", args.fps, args.frames);

    loop {
        let mut retick: Option<u64> = None;
        select! {
            recv(anim_clock) -> _ => {
                let report = match session.lock() {
                    Ok(mut s) => s.tick(&controls),
                    Err(_) => {
                        loge!("ANIM", "animation session lock poisoned");
                        break;
                    }
                };
                for f in &report.fired {
                    logi!(
                        "ANIM",
                        "tick={} cc={} sample={:.3} {} -> {:?}",
                        report.tick,
                        f.cc,
                        f.sample,
                        f.kind,
                        f.targets
                    );
                }
            }
            recv(frame_clock) -> _ => {
                let frame = program.evaluate_frame();
                frames += 1;

                // only log when the set of failing arguments changes
                let fallbacks: Vec<(OutputBuffer, Fallback)> =
                    frame.fallbacks().map(|(o, f)| (o, f.clone())).collect();
                if fallbacks != last_fallbacks {
                    for (o, f) in &fallbacks {
                        logw!(
                            "FRAME",
                            "{o} stage {} {} arg {} ({}): {} -> {}",
                            f.stage,
                            f.operator,
                            f.arg,
                            f.param.as_deref().unwrap_or("-"),
                            f.error,
                            f.substituted.map_or("dropped".to_string(), |d| format!("default {d}"))
                        );
                    }
                    if frame.aborted {
                        logw!("FRAME", "frame aborted, outputs left empty");
                    }
                    if fallbacks.is_empty() && !last_fallbacks.is_empty() {
                        logi!("FRAME", "all arguments resolving again");
                    }
                    last_fallbacks = fallbacks;
                }

                if last_status.elapsed() >= Duration::from_secs(5) {
                    last_status = Instant::now();
                    if let Some(chain) = frame.outputs.get(&frame.shown) {
                        let summary: Vec<String> = chain
                            .stages
                            .iter()
                            .map(|s| format!("{}{:?}", s.operator, s.values))
                            .collect();
                        logi!("FRAME", "frame={} {}: {}", frames, frame.shown, summary.join(" "));
                    }
                }

                if args.frames.is_some_and(|n| frames >= n) {
                    logi!("FRAME", "rendered {frames} frames, stopping");
                    break;
                }
            }
            recv(midi_clock) -> _ => {
                if midi_link.is_none() {
                    continue;
                }
                let Some(names) = midi::list_port_names() else { continue };
                let status = midi_link.as_ref().map(|l| {
                    let present = midi::port_still_present(&names, l.port_name());
                    (l.port_name().to_string(), present)
                });
                match status {
                    Some((name, false)) if !midi_lost => {
                        logw!("MIDI", "input '{name}' disconnected; controls read 0");
                        controls.clear();
                        midi_lost = true;
                    }
                    Some((name, true)) if midi_lost => {
                        logi!("MIDI", "input '{name}' is back, reconnecting");
                        let relinked = midi::connect_midi(&session_cfg.midi, controls.clone());
                        if relinked.is_some() {
                            midi_link = relinked;
                            midi_lost = false;
                        }
                    }
                    _ => {}
                }
            }
            recv(hot_rx) -> ev => {
                let Ok(ev) = ev else { continue };
                match ev {
                    HotEvent::OperatorsChanged(p) | HotEvent::ShaderChanged(p) => {
                        logi!("WATCH", "change detected: {}", p.display());
                        reload_operators(&cfg.paths, &registry);
                        program = rebuild_scene(&registry, &session, &controls, &session_cfg);
                    }
                    HotEvent::SessionChanged(p) => {
                        logi!("WATCH", "change detected: {}", p.display());
                        let reloaded = reload_session(&cfg.paths, &args, &session, &session_cfg);
                        if let Some(next) = reloaded {
                            if next.tick_ms != session_cfg.tick_ms {
                                retick = Some(next.tick_ms);
                            }
                            if next.midi != session_cfg.midi || next.osc != session_cfg.osc {
                                logw!("CONFIG", "midi/osc settings changed; they apply on restart");
                            }
                            controls.set_filter(next.channel_filter().unwrap_or_default());
                            session_cfg = next;
                            program = rebuild_scene(&registry, &session, &controls, &session_cfg);
                        }
                    }
                }
            }
        }
        if let Some(ms) = retick {
            logi!("ANIM", "tick period now {ms}ms");
            anim_clock = tick(Duration::from_millis(ms));
        }
    }

    Ok(())
}

fn validate_file(
    label: &str,
    path: &Path,
    check: fn(&serde_json::Value) -> Vec<validate::ValidationIssue>,
) {
    if !path.exists() {
        logi!("CONFIG", "{label} not found at {}, using defaults", path.display());
        return;
    }
    match load_json_file(path) {
        Ok(j) => {
            let issues = check(&j.value);
            validate::emit_summary("CONFIG", label, &issues);
            validate::emit_issues("CONFIG", &issues);
        }
        Err(e) => loge!("CONFIG", "{e}"),
    }
}

fn register_all(registry: &RwLock<OperatorRegistry>, loaded: LoadedOperators) {
    for r in &loaded.rejected {
        logw!("OPS", "rejected operator {}: {}", r.name, r.reason);
    }
    let Ok(mut reg) = registry.write() else {
        loge!("OPS", "operator registry lock poisoned");
        return;
    };
    for def in loaded.definitions {
        let name = def.name().to_string();
        let category = def.category().as_str();
        let inputs = def.parameters().len();
        match reg.register(def) {
            Registration::Inserted => {
                logi!("OPS", "registered {name} ({category}, {inputs} inputs)")
            }
            Registration::Replaced { previous } => logi!(
                "OPS",
                "replaced {name} ({} -> {category}, {inputs} inputs)",
                previous.category().as_str()
            ),
        }
    }
    logi!("OPS", "{} custom operators available", reg.len());
}

fn reload_operators(paths: &ConfigPaths, registry: &RwLock<OperatorRegistry>) {
    validate_file("operators.json", &paths.operators_json, validate::validate_operators_json);
    match load_operators(&paths.operators_json, &paths.assets_dir) {
        Ok(loaded) => register_all(registry, loaded),
        Err(e) => loge!("OPS", "reload failed, keeping previous operators: {e}"),
    }
}

/// Swap in a new session, keeping the live values of params that survive.
fn reload_session(
    paths: &ConfigPaths,
    args: &Args,
    session: &SharedSession,
    current: &SessionConfig,
) -> Option<SessionConfig> {
    validate_file("session.json", &paths.session_json, validate::validate_session_json);

    let mut next = match load_session_config(&paths.session_json, args.config_mode()) {
        Ok(c) => c,
        Err(e) => {
            loge!("CONFIG", "reload failed, keeping previous session: {e}");
            return None;
        }
    };
    if args.edge {
        next.firing = FiringMode::Edge;
    }
    if next == *current {
        return None;
    }

    let mut fresh = match next.build_session() {
        Ok(s) => s,
        Err(e) => {
            loge!("CONFIG", "reload failed, keeping previous session: {e}");
            return None;
        }
    };

    match session.lock() {
        Ok(mut live) => {
            fresh.carry_over(&live);
            *live = fresh;
        }
        Err(_) => {
            loge!("CONFIG", "animation session lock poisoned");
            return None;
        }
    }
    logi!(
        "CONFIG",
        "session reloaded: params={} triggers={} firing={:?}",
        next.params.len(),
        next.triggers.len(),
        next.firing
    );
    Some(next)
}

fn rebuild_scene(
    registry: &RwLock<OperatorRegistry>,
    session: &SharedSession,
    controls: &ControlTable,
    cfg: &SessionConfig,
) -> Program {
    let reg = match registry.read() {
        Ok(r) => r.clone(),
        Err(_) => {
            loge!("OPS", "operator registry lock poisoned");
            OperatorRegistry::new()
        }
    };
    let built = scene::build(&reg, session, controls, cfg.fallback);
    for (out, e) in &built.skipped {
        logw!("OPS", "{out} left unpatched: {e}");
    }
    logi!(
        "OPS",
        "scene built: render {} ({} custom functions)",
        built.program.shown(),
        built.program.glsl_functions().len()
    );
    built.program
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(a: &[&str]) -> anyhow::Result<Args> {
        Args::parse(a.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        let a = parse(&[
            "--assets", "live", "--strict", "--edge", "--frames", "120", "--fps", "30",
        ])
        .unwrap();
        assert_eq!(a.assets, Some(PathBuf::from("live")));
        assert!(a.strict && a.edge);
        assert_eq!(a.frames, Some(120));
        assert_eq!(a.fps, 30);
        assert_eq!(a.config_mode(), ConfigMode::Strict);
    }

    #[test]
    fn defaults_run_forever_at_sixty() {
        let a = parse(&[]).unwrap();
        assert_eq!(a, Args::default());
        assert_eq!(a.fps, 60);
        assert_eq!(a.frames, None);
    }

    #[test]
    fn rejects_bad_flags() {
        assert!(parse(&["--frames"]).is_err());
        assert!(parse(&["--fps", "0"]).is_err());
        assert!(parse(&["--fps", "fast"]).is_err());
        assert!(parse(&["--wat"]).is_err());
    }
}
