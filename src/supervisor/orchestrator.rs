//! The supervisor state machine
//!
//! Sequences the guard, port allocation, worker start, health check and
//! address registration, then waits for a shutdown request.

use crate::config::{ConfigStore, ServerConfig};
use crate::error::{Result, RuntimeError};
use crate::instance::{Acquisition, AddressRegistry, InstancePaths, SingleInstanceGuard};
use crate::supervisor::browser::BrowserLauncher;
use crate::supervisor::health::HealthChecker;
use crate::supervisor::observer::{
    CancelReconfigurer, LoggingObserver, ReconfigureOutcome, Reconfigurer, RuntimeEvent,
    RuntimeObserver,
};
use crate::supervisor::port::PortAllocator;
use crate::supervisor::types::{AuthKey, RunOutcome, SupervisorState};
use crate::supervisor::worker::WorkerProcess;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_HANDOFF_WAIT: Duration = Duration::from_secs(5);

/// Requests a clean shutdown of a running supervisor
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Honored once the supervisor reaches `Ready`, or immediately if it is there
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        while !self.is_requested() {
            self.notify.notified().await;
        }
    }
}

/// Why the supervisor left `Ready`
enum ReadyExit {
    ShutdownRequested,
    WorkerExited,
}

/// Drives one run of the local service
pub struct Supervisor {
    app_name: String,
    config: ServerConfig,
    store: Option<ConfigStore>,
    paths: InstancePaths,
    registry: AddressRegistry,
    observer: Arc<dyn RuntimeObserver>,
    reconfigurer: Box<dyn Reconfigurer>,
    shutdown: ShutdownHandle,
    handoff_wait: Duration,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(app_name: &str, config: ServerConfig, paths: InstancePaths) -> Self {
        let registry = AddressRegistry::new(&paths.address_file);
        Self {
            app_name: app_name.to_string(),
            config,
            store: None,
            paths,
            registry,
            observer: Arc::new(LoggingObserver),
            reconfigurer: Box::new(CancelReconfigurer),
            shutdown: ShutdownHandle::new(),
            handoff_wait: DEFAULT_HANDOFF_WAIT,
            state: SupervisorState::Init,
        }
    }

    /// Persist accepted reconfigurations through `store`
    pub fn with_store(mut self, store: ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RuntimeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_reconfigurer(mut self, reconfigurer: Box<dyn Reconfigurer>) -> Self {
        self.reconfigurer = reconfigurer;
        self
    }

    /// How long a second launch waits for the running instance's address
    pub fn with_handoff_wait(mut self, wait: Duration) -> Self {
        self.handoff_wait = wait;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Run until handoff, shutdown or an unrecoverable failure
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let lease = match SingleInstanceGuard::acquire(&self.paths, &self.registry) {
            Ok(Acquisition::Acquired(lease)) => lease,
            Ok(Acquisition::AlreadyRunning { url }) => {
                self.transition(SupervisorState::GuardChecked);
                return self.hand_off(url).await;
            }
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(SupervisorState::GuardChecked);

        let mut health = self.health_checker().map_err(|e| self.fail(e))?;

        let port = PortAllocator::choose(&self.config).map_err(|e| self.fail(e))?;
        self.transition(SupervisorState::PortChosen);

        let mut worker = WorkerProcess::new(
            &self.app_name,
            self.config.clone(),
            port,
            AuthKey::generate(),
            self.paths.server_log.clone(),
        );

        loop {
            self.transition(SupervisorState::WorkerStarting);
            let err = match self.start_worker(&mut worker).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    worker.force_stop().await;
                    return Err(self.fail(e));
                }
            };

            self.transition(SupervisorState::WorkerStartFailed);
            worker.mark_failed();
            error!("Worker start failed: {}", err);
            self.observer.on_event(&RuntimeEvent::WorkerStartFailed {
                message: err.to_string(),
            });
            self.observer.on_event(&RuntimeEvent::DiagnosticsAvailable {
                server_log: self.paths.server_log.clone(),
            });

            let mut reason = err;
            let new_config = loop {
                match self.reconfigurer.reconfigure(&self.config, &reason) {
                    ReconfigureOutcome::Accepted(config) => match config.validate() {
                        Ok(()) => break config,
                        Err(e) => {
                            warn!("Rejected configuration: {}", e);
                            reason = e;
                        }
                    },
                    ReconfigureOutcome::Cancelled => {
                        info!("Configuration cancelled after failed worker start");
                        worker.force_stop().await;
                        return Err(self.fail(RuntimeError::Cancelled));
                    }
                }
            };

            let port = match Self::rederive_port(&self.config, &new_config, worker.port()) {
                Ok(port) => port,
                Err(e) => {
                    worker.force_stop().await;
                    return Err(self.fail(e));
                }
            };

            if let Some(ref store) = self.store {
                if let Err(e) = store.save(&new_config) {
                    warn!("Could not persist the new configuration: {}", e);
                }
            }

            self.config = new_config;
            health = self.health_checker().map_err(|e| self.fail(e))?;
            worker.reset(self.config.clone(), port).await;
            self.transition(SupervisorState::PortChosen);
        }

        self.transition(SupervisorState::HealthChecking);
        let url = worker.url().to_string();
        let healthy = health
            .wait_until_healthy(
                &url,
                self.config.connection_timeout_seconds,
                self.observer.as_ref(),
            )
            .await;

        if !healthy {
            self.transition(SupervisorState::HealthCheckFailed);
            worker.force_stop().await;
            let mut message = format!(
                "The application server could not be contacted within {} seconds",
                self.config.connection_timeout_seconds
            );
            if let Some(worker_error) = worker.get_error() {
                message.push_str(&format!(": {}", worker_error));
            }
            return Err(self.fail(RuntimeError::health_check(message)));
        }

        if let Err(e) = self.registry.write(&url) {
            worker.force_stop().await;
            return Err(self.fail(e));
        }
        let address_guard = self.registry.registration_guard();
        self.transition(SupervisorState::Registered);

        self.observer
            .on_event(&RuntimeEvent::Ready { url: url.clone() });
        if self.config.auto_open_on_start {
            if let Err(e) = BrowserLauncher::new(self.config.browser_command()).open(&url) {
                self.observer.on_event(&RuntimeEvent::BrowserFailed {
                    message: e.to_string(),
                });
            }
        }
        self.transition(SupervisorState::Ready);

        let exit = self.wait_while_ready(&worker).await;

        self.transition(SupervisorState::ShuttingDown);
        worker.shutdown(&url, &health).await;
        if let Some(worker_error) = worker.get_error() {
            warn!("Worker reported during shutdown: {}", worker_error);
        }
        self.registry.remove();
        drop(address_guard);
        drop(lease);

        match exit {
            ReadyExit::ShutdownRequested => {
                self.transition(SupervisorState::Stopped);
                info!("✅ Shutdown complete");
                Ok(RunOutcome::Shutdown)
            }
            ReadyExit::WorkerExited => {
                let message = match worker.get_error() {
                    Some(worker_error) => format!("The application server stopped: {}", worker_error),
                    None => "The application server stopped unexpectedly".to_string(),
                };
                Err(self.fail(RuntimeError::worker(message)))
            }
        }
    }

    /// Port for the next attempt after a reconfiguration
    ///
    /// A newly fixed port is used as given, leaving fixed mode draws a new
    /// ephemeral port, and staying ephemeral keeps the current one.
    pub fn rederive_port(
        previous: &ServerConfig,
        next: &ServerConfig,
        current_port: u16,
    ) -> Result<u16> {
        match (previous.fixed_port, next.fixed_port) {
            (_, true) => Ok(next.port_number),
            (true, false) => PortAllocator::ephemeral_port(),
            (false, false) => Ok(current_port),
        }
    }

    async fn start_worker(&self, worker: &mut WorkerProcess) -> Result<()> {
        worker.init(&self.config.worker_search_paths)?;
        worker.start()?;

        tokio::time::sleep(Duration::from_millis(self.config.startup_grace_ms)).await;

        if worker.is_finished() {
            let message = worker
                .get_error()
                .unwrap_or_else(|| "The application server exited during startup".to_string());
            return Err(RuntimeError::worker(message));
        }
        Ok(())
    }

    async fn wait_while_ready(&self, worker: &WorkerProcess) -> ReadyExit {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.wait() => {
                info!("Shutdown requested");
                ReadyExit::ShutdownRequested
            }
            _ = wait_for_exit(worker) => {
                warn!("Worker exited while the server was ready");
                ReadyExit::WorkerExited
            }
        }
    }

    /// Delegate to the running instance and stop
    async fn hand_off(&mut self, url: Option<String>) -> Result<RunOutcome> {
        let url = match url {
            Some(url) => Some(url),
            None => self.wait_for_address().await,
        };

        self.observer
            .on_event(&RuntimeEvent::HandedOff { url: url.clone() });

        if let Some(ref url) = url {
            if let Err(e) = BrowserLauncher::new(self.config.browser_command()).open(url) {
                return Err(self.fail(e));
            }
        }

        self.transition(SupervisorState::Stopped);
        Ok(RunOutcome::HandedOff { url })
    }

    /// Poll for the address of an instance that is still starting
    async fn wait_for_address(&self) -> Option<String> {
        let deadline = Instant::now() + self.handoff_wait;
        loop {
            if let Some(url) = self.registry.read() {
                return Some(url);
            }
            if Instant::now() >= deadline {
                warn!(
                    "Running instance did not publish its address within {:?}",
                    self.handoff_wait
                );
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn health_checker(&self) -> Result<HealthChecker> {
        Ok(HealthChecker::new(&self.config)?.with_server_log(self.paths.server_log.clone()))
    }

    fn transition(&mut self, to: SupervisorState) {
        let from = self.state;
        self.state = to;
        debug!("Supervisor transition {} -> {}", from, to);
        self.observer.state_changed(from, to);
    }

    /// Report an unrecoverable failure and stop
    fn fail(&mut self, err: RuntimeError) -> RuntimeError {
        self.observer.on_event(&RuntimeEvent::Fatal {
            message: err.to_string(),
        });
        self.transition(SupervisorState::Stopped);
        err
    }
}

async fn wait_for_exit(worker: &WorkerProcess) {
    while !worker.is_finished() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
