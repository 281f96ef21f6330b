//! Startup and shutdown hooks run around the server group.
//!
//! Startup hooks run in registration order before any server binds; the
//! first failure aborts the run. Shutdown hooks run in reverse order after
//! every server has stopped, and keep going past failures so each hook gets
//! its chance to release what it owns.
//!
//! ```rust
//! use pylon_server::Lifecycle;
//!
//! let lifecycle = Lifecycle::new()
//!     .on_startup("warm-cache", || async { Ok(()) })
//!     .on_shutdown("flush", || async { Ok(()) });
//!
//! assert_eq!(lifecycle.startup_hook_count(), 1);
//! assert_eq!(lifecycle.shutdown_hook_count(), 1);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use pylon_middleware::BoxFuture;
use thiserror::Error;

/// Lifecycle hook failure.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A startup hook failed; nothing was started.
    #[error("startup hook failed: {0}")]
    StartupFailed(String),

    /// One or more shutdown hooks failed.
    #[error("shutdown hook failed: {0}")]
    ShutdownFailed(String),

    /// Error reported by a hook.
    #[error("{message}")]
    Hook {
        /// Error message.
        message: String,
        /// Optional source error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LifecycleError {
    /// Creates a hook error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Hook {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a hook error with a source.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Hook {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for lifecycle hooks.
pub type LifecycleResult<T = ()> = Result<T, LifecycleError>;

type Hook = Arc<dyn Fn() -> BoxFuture<'static, LifecycleResult> + Send + Sync>;

/// Ordered startup and shutdown hooks.
#[must_use]
#[derive(Default, Clone)]
pub struct Lifecycle {
    startup_hooks: Vec<(String, Hook)>,
    shutdown_hooks: Vec<(String, Hook)>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("startup_hooks", &self.startup_hooks.len())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .finish()
    }
}

impl Lifecycle {
    /// Creates an empty lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a startup hook.
    pub fn on_startup<F, Fut>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let hook: Hook = Arc::new(move || Box::pin(hook()));
        self.startup_hooks.push((name.into(), hook));
        self
    }

    /// Registers a shutdown hook.
    pub fn on_shutdown<F, Fut>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LifecycleResult> + Send + 'static,
    {
        let hook: Hook = Arc::new(move || Box::pin(hook()));
        self.shutdown_hooks.push((name.into(), hook));
        self
    }

    /// Number of startup hooks.
    pub fn startup_hook_count(&self) -> usize {
        self.startup_hooks.len()
    }

    /// Number of shutdown hooks.
    pub fn shutdown_hook_count(&self) -> usize {
        self.shutdown_hooks.len()
    }

    /// Runs startup hooks in registration order, stopping at the first failure.
    pub async fn run_startup(&self) -> LifecycleResult {
        for (name, hook) in &self.startup_hooks {
            tracing::debug!(hook = %name, "running startup hook");
            if let Err(e) = hook().await {
                tracing::error!(hook = %name, error = %e, "startup hook failed");
                return Err(LifecycleError::StartupFailed(format!("{name}: {e}")));
            }
        }
        Ok(())
    }

    /// Runs shutdown hooks in reverse order, collecting every failure.
    pub async fn run_shutdown(&self) -> LifecycleResult {
        let mut errors = Vec::new();

        for (name, hook) in self.shutdown_hooks.iter().rev() {
            tracing::debug!(hook = %name, "running shutdown hook");
            if let Err(e) = hook().await {
                tracing::error!(hook = %name, error = %e, "shutdown hook failed");
                errors.push(format!("{name}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::ShutdownFailed(errors.join("; ")))
        }
    }

    /// Appends the hooks of `other`.
    pub fn merge(mut self, other: Lifecycle) -> Self {
        self.startup_hooks.extend(other.startup_hooks);
        self.shutdown_hooks.extend(other.shutdown_hooks);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        entry: &'static str,
    ) -> impl Fn() -> BoxFuture<'static, LifecycleResult> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move || {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(entry);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_empty_lifecycle() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.run_startup().await.is_ok());
        assert!(lifecycle.run_shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_startup_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new()
            .on_startup("a", recorder(&log, "a"))
            .on_startup("b", recorder(&log, "b"))
            .on_startup("c", recorder(&log, "c"));

        lifecycle.run_startup().await.unwrap();
        assert_eq!(*log.lock(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_shutdown_runs_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new()
            .on_shutdown("a", recorder(&log, "a"))
            .on_shutdown("b", recorder(&log, "b"));

        lifecycle.run_shutdown().await.unwrap();
        assert_eq!(*log.lock(), ["b", "a"]);
    }

    #[tokio::test]
    async fn test_startup_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new()
            .on_startup("ok", recorder(&log, "ok"))
            .on_startup("broken", || async { Err(LifecycleError::new("no database")) })
            .on_startup("never", recorder(&log, "never"));

        let err = lifecycle.run_startup().await.unwrap_err();
        assert_eq!(err.to_string(), "startup hook failed: broken: no database");
        assert_eq!(*log.lock(), ["ok"]);
    }

    #[tokio::test]
    async fn test_shutdown_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new()
            .on_shutdown("first", recorder(&log, "first"))
            .on_shutdown("bad-1", || async { Err(LifecycleError::new("x")) })
            .on_shutdown("bad-2", || async { Err(LifecycleError::new("y")) });

        let err = lifecycle.run_shutdown().await.unwrap_err();
        assert_eq!(err.to_string(), "shutdown hook failed: bad-2: y; bad-1: x");
        assert_eq!(*log.lock(), ["first"]);
    }

    #[test]
    fn test_merge() {
        let a = Lifecycle::new().on_startup("a", || async { Ok(()) });
        let b = Lifecycle::new()
            .on_startup("b", || async { Ok(()) })
            .on_shutdown("b", || async { Ok(()) });

        let merged = a.merge(b);
        assert_eq!(merged.startup_hook_count(), 2);
        assert_eq!(merged.shutdown_hook_count(), 1);
    }

    #[test]
    fn test_error_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = LifecycleError::with_source("flush failed", io);
        assert_eq!(err.to_string(), "flush failed");
        assert!(std::error::Error::source(&err).is_some());
    }
}
