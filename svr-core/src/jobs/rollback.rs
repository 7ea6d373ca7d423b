//! Structural cleanup for multi-step job handlers. Each step registers the
//! artifact it created; removal then happens on every exit path instead of
//! being repeated at each failure site.

use std::path::{Path, PathBuf};

use tracing::warn;

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove artifact");
        }
    }
}

/// Intermediate files (segments, manifests) that must not outlive the
/// handler, whether it succeeds or fails.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_quietly(path);
        }
    }
}

/// A final output that should be deleted unless the handler reaches
/// `disarm()`.
#[derive(Debug)]
pub struct RollbackGuard {
    path: PathBuf,
    armed: bool,
}

impl RollbackGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.armed {
            remove_quietly(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn temp_artifacts_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.ts");
        let b = dir.path().join("b.ts");
        std::fs::write(&a, "x").unwrap();
        std::fs::write(&b, "x").unwrap();
        {
            let mut temps = TempArtifacts::new();
            temps.track(&a);
            temps.track(&b);
            temps.track(dir.path().join("never-created.ts"));
        }
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn disarmed_guard_keeps_output() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.mp4");
        let dropped = dir.path().join("dropped.mp4");
        std::fs::write(&kept, "x").unwrap();
        std::fs::write(&dropped, "x").unwrap();
        RollbackGuard::new(&kept).disarm();
        drop(RollbackGuard::new(&dropped));
        assert!(kept.exists());
        assert!(!dropped.exists());
    }
}
