//! Bridge runner for lifecycle management.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use plclink_common::{Format, connect, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;
use crate::status::StatusPublisher;

/// Default time allowed for shutdown hooks before forced teardown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type ShutdownHook = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bridge runner that manages the lifecycle of a bridge process.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection
/// - Task spawning and management
/// - Graceful shutdown on Ctrl+C or SIGTERM
/// - Status publishing (optional)
///
/// # Example
///
/// ```ignore
/// use plclink_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new("mybridge", config).await?;
///
///     let publisher = runner.publisher();
///     runner.spawn(async move {
///         // Worker logic here
///     });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Zenoh session.
    session: Arc<zenoh::Session>,
    /// Publisher for bridge output.
    publisher: Publisher,
    /// Status publisher (optional).
    status_publisher: Option<StatusPublisher>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
    /// Teardown run before tasks are aborted.
    shutdown_hooks: Vec<ShutdownHook>,
    /// Upper bound for the shutdown hooks.
    shutdown_grace: Duration,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Connect to Zenoh
    /// 3. Create the publisher
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let mut log_config = config.logging().clone();
        if let Some(level) = args.and_then(|a| a.log_level.as_ref()) {
            log_config.level = level.clone();
        }

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?,
        );

        tracing::info!(zid = %session.zid(), "Connected to Zenoh");

        Ok(Self::from_session(name, version, config, session))
    }

    /// Build a runner around an already open session.
    ///
    /// Tracing is left untouched; used by embedders and tests.
    pub fn with_session(name: impl Into<String>, config: C, session: Arc<zenoh::Session>) -> Self {
        Self::from_session(
            name.into(),
            env!("CARGO_PKG_VERSION").to_string(),
            config,
            session,
        )
    }

    fn from_session(name: String, version: String, config: C, session: Arc<zenoh::Session>) -> Self {
        let publisher = Publisher::new(session.clone(), config.key_prefix(), Format::Json);

        Self {
            name,
            version,
            config,
            session,
            publisher,
            status_publisher: None,
            tasks: Vec::new(),
            shutdown_hooks: Vec::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Enable status publishing.
    ///
    /// When enabled, the runner will publish status messages on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            &self.name,
            &self.version,
        ));
        self
    }

    /// Set a custom serialization format for the publisher.
    pub fn with_format(mut self, format: Format) -> Self {
        self.publisher = Publisher::new(self.session.clone(), self.config.key_prefix(), format);
        if self.status_publisher.is_some() {
            self.status_publisher = Some(StatusPublisher::new(
                self.publisher.clone(),
                &self.name,
                &self.version,
            ));
        }
        self
    }

    /// Set how long shutdown hooks may run before the remaining teardown is forced.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Get the status publisher, if enabled.
    pub fn status_publisher(&self) -> Option<&StatusPublisher> {
        self.status_publisher.as_ref()
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Register teardown to run when a shutdown signal arrives.
    ///
    /// Hooks run concurrently, each bounded by the shutdown grace period.
    pub fn on_shutdown<F>(&mut self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_hooks.push(Box::pin(hook));
    }

    /// Run the bridge until Ctrl+C or SIGTERM is received.
    ///
    /// This will:
    /// 1. Publish "running" status (if enabled)
    /// 2. Wait for a shutdown signal
    /// 3. Run shutdown hooks concurrently, bounded by the shutdown grace period
    /// 4. Abort all remaining tasks
    /// 5. Publish "offline" status (if enabled)
    /// 6. Close the Zenoh session
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run the bridge with custom status metadata.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        self.run_until(wait_for_shutdown_signal(), metadata).await
    }

    /// Run the bridge until `stop` completes.
    pub async fn run_until<S>(self, stop: S, metadata: Option<serde_json::Value>) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        stop.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        let hooks: Vec<JoinHandle<()>> = self.shutdown_hooks.into_iter().map(tokio::spawn).collect();
        let mut forced = 0usize;
        for mut hook in hooks {
            match tokio::time::timeout_at(deadline, &mut hook).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Shutdown hook panicked"),
                Err(_) => {
                    hook.abort();
                    forced += 1;
                }
            }
        }
        if forced > 0 {
            tracing::warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                hooks = forced,
                "Shutdown grace period elapsed, forcing teardown"
            );
        }

        for task in &self.tasks {
            task.abort();
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoggingConfig, ZenohConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, serde::Deserialize)]
    struct TestConfig {
        zenoh: ZenohConfig,
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn zenoh(&self) -> &ZenohConfig {
            &self.zenoh
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn key_prefix(&self) -> &str {
            "test_runner"
        }
    }

    async fn runner() -> BridgeRunner<TestConfig> {
        let session = Arc::new(zenoh::open(zenoh::Config::default()).await.unwrap());
        let config = TestConfig {
            zenoh: ZenohConfig::default(),
            logging: LoggingConfig::default(),
        };
        BridgeRunner::with_session("test", config, session)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_hooks_run() {
        let mut runner = runner().await;
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        runner.on_shutdown(async move {
            flag.store(true, Ordering::SeqCst);
        });

        runner.run_until(async {}, None).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_hook_is_bounded() {
        let mut runner = runner()
            .await
            .with_shutdown_grace(Duration::from_millis(50));
        runner.on_shutdown(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        runner.spawn(std::future::pending::<()>());

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(10), runner.run_until(async {}, None))
            .await
            .expect("teardown should not wait for the slow hook")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hooks_share_the_grace_period() {
        let mut runner = runner()
            .await
            .with_shutdown_grace(Duration::from_millis(500));
        let finished = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..3 {
            let finished = finished.clone();
            runner.on_shutdown(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        runner.run_until(async {}, None).await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}
