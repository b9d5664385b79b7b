use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// A validated root directory holding the session JSON files and operator shader bodies.
#[derive(Debug, Clone)]
pub struct AssetsRoot {
    path: PathBuf,
}

impl AssetsRoot {
    /// Locate the `assets/` directory.
    ///
    /// Resolution order:
    /// 1) `PANDELIRIUM_ASSETS` env var (if set and existing)
    /// 2) Search upward from `start_dir` for a folder named `assets`
    pub fn discover(start_dir: &Path) -> Result<Self, EngineError> {
        if let Ok(p) = std::env::var("PANDELIRIUM_ASSETS") {
            let pb = PathBuf::from(p);
            if pb.is_dir() {
                return Ok(Self { path: pb });
            }
        }

        let mut cur = start_dir.to_path_buf();
        loop {
            let cand = cur.join("assets");
            if cand.is_dir() {
                return Ok(Self { path: cand });
            }
            if !cur.pop() {
                break;
            }
        }

        Err(EngineError::AssetsNotFound {
            start_dir: start_dir.to_path_buf(),
        })
    }

    /// Use `dir` as-is (from `--assets`). It must exist.
    pub fn at(dir: &Path) -> Result<Self, EngineError> {
        if dir.is_dir() {
            Ok(Self { path: dir.to_path_buf() })
        } else {
            Err(EngineError::AssetsNotFound {
                start_dir: dir.to_path_buf(),
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel)
    }

    /// Choose OS-specific JSON config if present, otherwise fall back to `<stem>.json`.
    ///
    /// Example: `session.linux.json` overrides `session.json` on Linux.
    pub fn pick_platform_json(&self, stem: &str) -> PathBuf {
        pick_platform_json(&self.path, stem)
    }
}

/// Choose OS-specific JSON config if present, otherwise fall back to `<stem>.json`.
pub fn pick_platform_json(assets: &Path, stem: &str) -> PathBuf {
    let os = if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "other"
    };

    let platform = assets.join(format!("{stem}.{os}.json"));
    if platform.exists() {
        platform
    } else {
        assets.join(format!("{stem}.json"))
    }
}

/// Resolve a JSON-provided path relative to the assets directory unless it is already absolute.
pub fn resolve_assets_path(assets_dir: &Path, s: &str) -> PathBuf {
    let p = PathBuf::from(s);
    if p.is_absolute() {
        p
    } else {
        assets_dir.join(p)
    }
}

pub fn read_to_string_result(path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pandelirium-assets-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn discover_walks_upward() {
        let root = scratch_dir("walk");
        std::fs::create_dir_all(root.join("assets")).unwrap();
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = AssetsRoot::discover(&nested).unwrap();
        assert_eq!(found.path(), root.join("assets"));
    }

    #[test]
    fn relative_paths_resolve_against_assets() {
        let base = Path::new("/srv/assets");
        assert_eq!(
            resolve_assets_path(base, "shaders/fisheye.glsl"),
            base.join("shaders/fisheye.glsl")
        );
        assert_eq!(resolve_assets_path(base, "/abs/x.glsl"), PathBuf::from("/abs/x.glsl"));
    }

    #[test]
    fn platform_json_falls_back_to_plain_stem() {
        let root = scratch_dir("platform");
        assert_eq!(pick_platform_json(&root, "session"), root.join("session.json"));
    }
}
