//! Hot-reload watcher
//!
//! We watch the assets **directory** rather than single files: editors often save by writing a
//! temp file and renaming it over the original, which per-file watches miss.
//!
//! The watcher only classifies changes. Re-reading and re-registering happens on the main loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotEvent {
    /// `operators(.<os>).json` changed.
    OperatorsChanged(PathBuf),
    /// `session(.<os>).json` changed.
    SessionChanged(PathBuf),
    /// An operator body under `shaders/` changed.
    ShaderChanged(PathBuf),
}

/// Map a changed path to the reload it calls for.
pub fn classify(path: &Path) -> Option<HotEvent> {
    let name = path.file_name()?.to_str()?;
    let ext = path.extension().and_then(|e| e.to_str());
    match ext {
        Some("json") => {
            // session.json, session.macos.json, ...
            let stem = name.split('.').next().unwrap_or("");
            match stem {
                "operators" => Some(HotEvent::OperatorsChanged(path.to_path_buf())),
                "session" => Some(HotEvent::SessionChanged(path.to_path_buf())),
                _ => None,
            }
        }
        Some("glsl") => Some(HotEvent::ShaderChanged(path.to_path_buf())),
        _ => None,
    }
}

pub struct HotReload {
    _watcher: RecommendedWatcher,
    rx: Receiver<HotEvent>,
}

impl HotReload {
    pub fn rx(&self) -> &Receiver<HotEvent> {
        &self.rx
    }

    pub fn new(assets_dir: &Path) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<HotEvent>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(ev) => {
                    if !matches!(
                        ev.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    for p in ev.paths {
                        if let Some(hot) = classify(&p) {
                            let _ = tx.send(hot);
                        }
                    }
                }
                Err(e) => crate::logw!("WATCH", "notify error: {e}"),
            },
            Config::default().with_poll_interval(Duration::from_millis(250)),
        )?;

        watcher.watch(assets_dir, RecursiveMode::NonRecursive)?;
        let shaders = assets_dir.join("shaders");
        if shaders.is_dir() {
            watcher.watch(&shaders, RecursiveMode::NonRecursive)?;
        }

        Ok(Self { _watcher: watcher, rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_config_files_by_stem() {
        assert_eq!(
            classify(Path::new("assets/operators.json")),
            Some(HotEvent::OperatorsChanged(PathBuf::from("assets/operators.json")))
        );
        assert_eq!(
            classify(Path::new("assets/session.linux.json")),
            Some(HotEvent::SessionChanged(PathBuf::from("assets/session.linux.json")))
        );
        assert!(matches!(
            classify(Path::new("assets/shaders/fisheye.glsl")),
            Some(HotEvent::ShaderChanged(_))
        ));
        assert_eq!(classify(Path::new("assets/notes.txt")), None);
        assert_eq!(classify(Path::new("assets/other.json")), None);
    }
}
