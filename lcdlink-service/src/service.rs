//! lcdlink service core logic.
//!
//! Owns one [`Scheduler`] task per configured panel and keeps them fed
//! with configuration snapshots. The config file is polled for changes
//! (and re-read on SIGHUP on Unix); every reload is applied as a whole
//! or not at all.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use lcdlink_core::{DeviceConfig, ProfileRegistry, Scheduler, UsbBackend};

use crate::config::ServiceConfig;

/// How long `run` sleeps between stop checks while idle.
const STOP_POLL: Duration = Duration::from_millis(100);

// ── DeviceTask ───────────────────────────────────────────────────

/// A running scheduler and the handles to steer it.
struct DeviceTask {
    config_tx: watch::Sender<DeviceConfig>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// What a reload changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub started: Vec<String>,
    pub updated: Vec<String>,
    pub stopped: Vec<String>,
}

impl ReloadSummary {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.updated.is_empty() && self.stopped.is_empty()
    }
}

// ── Supervisor ───────────────────────────────────────────────────

/// Spawns, updates and stops per-device scheduler tasks.
pub struct Supervisor {
    registry: Arc<ProfileRegistry>,
    backend: Arc<dyn UsbBackend>,
    tasks: BTreeMap<String, DeviceTask>,
}

impl Supervisor {
    pub fn new(registry: Arc<ProfileRegistry>, backend: Arc<dyn UsbBackend>) -> Self {
        Self {
            registry,
            backend,
            tasks: BTreeMap::new(),
        }
    }

    /// Names of the devices currently driven.
    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Snapshot last published to `name`'s scheduler.
    pub fn snapshot(&self, name: &str) -> Option<DeviceConfig> {
        self.tasks.get(name).map(|t| t.config_tx.borrow().clone())
    }

    /// Bring the running set in line with `config`.
    ///
    /// New entries are started, removed ones stopped, and changed ones
    /// receive their new snapshot; unchanged entries are left alone.
    /// Removed schedulers have released their panel before any new one
    /// starts.
    pub async fn apply(&mut self, config: &ServiceConfig) -> ReloadSummary {
        let wanted = config.named_devices();
        let mut summary = ReloadSummary::default();

        let removed: Vec<String> = self
            .tasks
            .keys()
            .filter(|name| !wanted.iter().any(|(n, _)| n == *name))
            .cloned()
            .collect();
        let mut stopping = Vec::with_capacity(removed.len());
        for name in removed {
            if let Some(task) = self.tasks.remove(&name) {
                task.stop.store(false, Ordering::SeqCst);
                info!("[{name}] removed from configuration; stopping");
                stopping.push((name, task.handle));
            }
        }
        for (name, handle) in stopping {
            if let Err(e) = handle.await {
                warn!("[{name}] scheduler task ended abnormally: {e}");
            }
            summary.stopped.push(name);
        }

        for (name, device) in wanted {
            match self.tasks.get(&name) {
                Some(task) => {
                    let changed = task.config_tx.send_if_modified(|current| {
                        if *current == device {
                            false
                        } else {
                            *current = device;
                            true
                        }
                    });
                    if changed {
                        summary.updated.push(name);
                    }
                }
                None => {
                    self.spawn(&name, device);
                    summary.started.push(name);
                }
            }
        }
        summary
    }

    fn spawn(&mut self, name: &str, device: DeviceConfig) {
        info!("[{name}] driving {}", device.selector.describe());
        let (config_tx, config_rx) = watch::channel(device);
        let mut scheduler = Scheduler::new(
            name,
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            config_rx,
        );
        let stop = scheduler.stop_handle();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                error!("[{task_name}] scheduler failed: {e}");
            }
        });
        self.tasks.insert(
            name.to_string(),
            DeviceTask {
                config_tx,
                stop,
                handle,
            },
        );
    }

    /// Stop every scheduler and wait for them to finish.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.values() {
            task.stop.store(false, Ordering::SeqCst);
        }
        for (name, task) in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.handle.await {
                warn!("[{name}] scheduler task ended abnormally: {e}");
            }
        }
    }
}

// ── LcdService ───────────────────────────────────────────────────

/// The top-level service.
pub struct LcdService {
    config: ServiceConfig,
    config_path: Option<PathBuf>,
    supervisor: Supervisor,
    running: Arc<AtomicBool>,
}

impl LcdService {
    /// Create a service for `config`.
    ///
    /// With a `config_path`, the file is watched and reloaded while the
    /// service runs.
    pub fn new(
        config: ServiceConfig,
        config_path: Option<PathBuf>,
        registry: Arc<ProfileRegistry>,
        backend: Arc<dyn UsbBackend>,
    ) -> Self {
        Self {
            config,
            config_path,
            supervisor: Supervisor::new(registry, backend),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Run the service until stopped.
    ///
    /// 1. Starts one scheduler per configured device.
    /// 2. Polls the config file and applies changes.
    /// 3. On stop, stops every scheduler and waits for them.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);
        self.supervisor.apply(&self.config).await;
        info!("lcdlink service started with {} device(s)", self.supervisor.names().len());

        let mut hangup = Hangup::new();
        let mut last_modified = self.modified_time();
        let mut next_poll = tokio::time::Instant::now() + self.config.reload.poll_interval();

        while self.is_running() {
            let forced = tokio::select! {
                _ = tokio::time::sleep(STOP_POLL) => false,
                _ = hangup.recv() => true,
            };
            if forced {
                info!("SIGHUP received; reloading configuration");
                self.reload().await;
                last_modified = self.modified_time();
                continue;
            }
            if !self.config.reload.enabled || tokio::time::Instant::now() < next_poll {
                continue;
            }
            next_poll = tokio::time::Instant::now() + self.config.reload.poll_interval();
            let modified = self.modified_time();
            if modified.is_some() && modified != last_modified {
                last_modified = modified;
                self.reload().await;
            }
        }

        self.supervisor.shutdown().await;
        self.running.store(false, Ordering::SeqCst);
        info!("lcdlink service stopped");
        Ok(())
    }

    /// Re-read the config file and apply it. A file that fails to load
    /// leaves the running configuration untouched.
    pub async fn reload(&mut self) -> Option<ReloadSummary> {
        let path = self.config_path.as_ref()?;
        match ServiceConfig::try_load(path) {
            Ok(config) => {
                let summary = self.supervisor.apply(&config).await;
                if !summary.is_empty() {
                    info!(
                        "config reloaded: {} started, {} updated, {} stopped",
                        summary.started.len(),
                        summary.updated.len(),
                        summary.stopped.len()
                    );
                }
                self.config = config;
                Some(summary)
            }
            Err(e) => {
                warn!("config reload from {} failed: {e}; keeping current", path.display());
                None
            }
        }
    }

    fn modified_time(&self) -> Option<SystemTime> {
        let path = self.config_path.as_ref()?;
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

// ── Hangup ───────────────────────────────────────────────────────

/// SIGHUP listener; never fires where the signal does not exist.
struct Hangup {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl Hangup {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let signal = match signal(SignalKind::hangup()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("cannot listen for SIGHUP: {e}");
                    None
                }
            };
            Self { signal }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if let Some(signal) = self.signal.as_mut() {
                if signal.recv().await.is_some() {
                    return;
                }
                self.signal = None;
            }
        }
        std::future::pending::<()>().await
    }
}

// ── Tests ────────────────────────────────────────────────────────
