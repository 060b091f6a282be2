// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Run lifecycle: the run-local working directory and interrupt handling.
//!
//! A [`WorkDir`] is the only top-level temporary directory a run creates. The
//! manager removes it with [`WorkDir::close`] so removal errors surface; drop
//! is the fallback for early returns and for the run future being dropped
//! after an interrupt. Interrupts never touch the filesystem themselves; they
//! only trip a [`CancellationToken`] that the scheduler and manager observe.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;

/// Run-scoped temporary directory, deleted recursively on close or drop.
#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl WorkDir {
    /// Create a fresh directory under `root`, or the system temp dir.
    pub fn acquire(root: Option<&Path>, run_name: &str) -> Result<Self> {
        let prefix = format!("archive-{run_name}-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix(&prefix).tempdir()?,
        };
        let path = dir.path().to_path_buf();
        info!(path = ?path, "Work directory acquired");
        Ok(Self { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything below it.
    pub fn close(mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
            info!(path = ?self.path, "Work directory removed");
        }
        Ok(())
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => info!(path = ?self.path, "Work directory removed on drop"),
            Err(e) => warn!(path = ?self.path, error = %e, "Cannot remove work directory"),
        }
    }
}

/// Trip `token` on SIGINT / SIGTERM. Repeated signals are logged and ignored.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = 0u32;
        loop {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = token.cancelled(), if signals == 0 => {
                    // Cancelled from elsewhere; nothing left to watch.
                    return;
                }
            }
            signals += 1;
            if signals == 1 {
                info!("Interrupt received, stopping after in-flight clips drain");
                token.cancel();
            } else {
                warn!(signals, "Interrupt already in progress, waiting for cleanup");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let work = WorkDir::acquire(Some(root.path()), "2024-10-08-cam").unwrap();
            std::fs::write(work.join("clip.mp4"), b"data").unwrap();
            std::fs::create_dir(work.join("nested")).unwrap();
            work.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn close_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let work = WorkDir::acquire(Some(root.path()), "2024-10-08-cam").unwrap();
        std::fs::write(work.join("pip_a.mp4"), b"data").unwrap();
        let path = work.path().to_path_buf();

        work.close().unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn close_reports_removal_errors() {
        let root = tempfile::tempdir().unwrap();
        let work = WorkDir::acquire(Some(root.path()), "gone").unwrap();
        std::fs::remove_dir_all(work.path()).unwrap();
        assert!(work.close().is_err());
    }

    #[test]
    fn system_temp_dir_is_used_without_a_root() {
        let work = WorkDir::acquire(None, "no-root").unwrap();
        let path = work.path().to_path_buf();
        assert!(path.starts_with(std::env::temp_dir()));
        drop(work);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn listener_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = spawn_signal_listener(token.clone());
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
