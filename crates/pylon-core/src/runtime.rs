//! Process-wide runtime state.
//!
//! A [`Runtime`] is created once per process and shared (it is cheap to clone)
//! between the orchestrator, the servers and any component that needs to know
//! whether the process is winding down.
//!
//! Shutdown is requested at most once. The first call to
//! [`Runtime::shutdown`] records whether a restart was asked for, marks the
//! runtime inactive and wakes every task awaiting [`Runtime::done`]. Later
//! calls are ignored, so the restart intent of the first caller wins.

use crate::error::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Application name reported in runtime stats.
pub const APP_NAME: &str = "pylon";

/// Application version reported in runtime stats.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared runtime state.
#[derive(Debug, Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

#[derive(Debug)]
struct RuntimeInner {
    profile: String,
    home_dir: PathBuf,
    executable: String,
    executable_dir: PathBuf,
    shutting_down: AtomicBool,
    restarting: AtomicBool,
    done: watch::Sender<bool>,
}

impl Runtime {
    /// Creates a runtime for the given profile and home directory.
    ///
    /// A relative home directory is resolved against the current working
    /// directory. The executable name and directory are taken from the
    /// running process.
    pub fn new(profile: impl Into<String>, home_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let home_dir = absolute(home_dir.as_ref())?;
        let exe = std::env::current_exe()
            .or_else(|_| {
                std::env::args_os()
                    .next()
                    .map(PathBuf::from)
                    .ok_or_else(|| std::io::Error::other("no program argument"))
            })
            .map_err(|e| CoreError::Executable(e.to_string()))?;
        let exe = absolute(&exe)?;

        let executable = exe
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::Executable(exe.display().to_string()))?;
        let executable_dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(Self::from_parts(profile, home_dir, executable, executable_dir))
    }

    /// Creates a runtime from already resolved parts.
    pub fn from_parts(
        profile: impl Into<String>,
        home_dir: PathBuf,
        executable: impl Into<String>,
        executable_dir: PathBuf,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(RuntimeInner {
                profile: profile.into(),
                home_dir,
                executable: executable.into(),
                executable_dir,
                shutting_down: AtomicBool::new(false),
                restarting: AtomicBool::new(false),
                done,
            }),
        }
    }

    /// Configuration profile name, e.g. `dev` or `prod`.
    pub fn profile(&self) -> &str {
        &self.inner.profile
    }

    /// Absolute home directory.
    pub fn home_dir(&self) -> &Path {
        &self.inner.home_dir
    }

    /// Basename of the running executable.
    pub fn executable(&self) -> &str {
        &self.inner.executable
    }

    /// Directory containing the running executable.
    pub fn executable_dir(&self) -> &Path {
        &self.inner.executable_dir
    }

    /// Returns `true` until shutdown has been requested.
    pub fn active(&self) -> bool {
        !self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Returns `true` if the shutdown that was requested asked for a restart.
    pub fn restarting(&self) -> bool {
        self.inner.restarting.load(Ordering::Acquire)
    }

    /// Requests shutdown.
    ///
    /// Returns `true` for the call that actually initiated shutdown.
    pub fn shutdown(&self, restart: bool) -> bool {
        if self
            .inner
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.inner.restarting.store(restart, Ordering::Release);
        tracing::debug!(restart, "runtime shutdown requested");
        self.inner.done.send_replace(true);
        true
    }

    /// Resolves once shutdown has been requested.
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        // The sender lives as long as `self`, so this only fails if it never fires.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Name/value pairs describing this process, in display order.
    pub fn stats(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", APP_NAME.to_string()),
            ("version", APP_VERSION.to_string()),
            ("build", option_env!("PYLON_BUILD").unwrap_or("dev").to_string()),
            ("executable", self.executable().to_string()),
            ("home", self.home_dir().display().to_string()),
            ("profile", self.profile().to_string()),
        ]
    }
}

fn absolute(path: &Path) -> CoreResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| CoreError::home_dir(path, e))?;
    let joined = cwd.join(path);
    // Strip "." components so the reported home reads cleanly.
    Ok(joined
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runtime() -> Runtime {
        Runtime::from_parts("test", PathBuf::from("/srv/pylon"), "pylon", PathBuf::from("/usr/bin"))
    }

    #[test]
    fn test_new_runtime_is_active() {
        let rt = runtime();
        assert!(rt.active());
        assert!(!rt.restarting());
    }

    #[test]
    fn test_relative_home_is_made_absolute() {
        let rt = Runtime::new("dev", ".").unwrap();
        assert!(rt.home_dir().is_absolute());
        assert_eq!(rt.home_dir(), std::env::current_dir().unwrap());
        assert!(!rt.executable().is_empty());
        assert!(rt.executable_dir().is_absolute());
    }

    #[test]
    fn test_absolute_home_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new("prod", dir.path()).unwrap();
        assert_eq!(rt.home_dir(), dir.path());
        assert_eq!(rt.profile(), "prod");
    }

    #[test]
    fn test_shutdown_is_once_only() {
        let rt = runtime();
        assert!(rt.shutdown(true));
        assert!(!rt.shutdown(false));
        assert!(!rt.active());
        // First caller's restart intent wins
        assert!(rt.restarting());
    }

    #[test]
    fn test_shutdown_without_restart() {
        let rt = runtime();
        rt.shutdown(false);
        assert!(!rt.active());
        assert!(!rt.restarting());
    }

    #[test]
    fn test_done_pending_until_shutdown() {
        let rt = runtime();
        let mut done = tokio_test::task::spawn(rt.done());
        tokio_test::assert_pending!(done.poll());

        rt.shutdown(true);
        assert!(done.is_woken());
        tokio_test::assert_ready!(done.poll());
    }

    #[tokio::test]
    async fn test_done_wakes_all_waiters() {
        let rt = runtime();
        let a = tokio::spawn({
            let rt = rt.clone();
            async move { rt.done().await }
        });
        let b = tokio::spawn({
            let rt = rt.clone();
            async move { rt.done().await }
        });

        tokio::task::yield_now().await;
        rt.shutdown(false);

        tokio::time::timeout(Duration::from_secs(1), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .expect("waiters should be released");
    }

    #[tokio::test]
    async fn test_done_after_shutdown_resolves_immediately() {
        let rt = runtime();
        rt.shutdown(false);
        tokio::time::timeout(Duration::from_millis(100), rt.done())
            .await
            .expect("done should resolve");
    }

    #[test]
    fn test_stats_order() {
        let stats = runtime().stats();
        let names: Vec<_> = stats.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["name", "version", "build", "executable", "home", "profile"]);
        assert_eq!(stats[5].1, "test");
        assert_eq!(stats[4].1, "/srv/pylon");
    }
}
