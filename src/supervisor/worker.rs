//! Worker process lifecycle
//!
//! The worker is the interpreter running the web application's entry script.
//! It is launched and waited on from a single background thread; everything
//! the supervisor learns about it travels through [`WorkerShared`] and is
//! polled, never thrown across the thread boundary.

use crate::config::ServerConfig;
use crate::error::{Result, RuntimeError};
use crate::startup::ServerLogPreamble;
use crate::supervisor::health::HealthChecker;
use crate::supervisor::types::{AuthKey, ServerUrl, WorkerState};
use crate::utils::{open_append_owner_only, rotate_if_larger};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Environment variable carrying the port the worker must bind
pub const PORT_ENV: &str = "WEBAPP_INT_PORT";
/// Environment variable carrying the auth key the worker must require
pub const KEY_ENV: &str = "WEBAPP_INT_KEY";
/// Environment variable forcing the worker out of standalone server mode
pub const SERVER_MODE_ENV: &str = "WEBAPP_SERVER_MODE";
/// Module search path handed to the interpreter
pub const MODULE_PATH_ENV: &str = "PYTHONPATH";

const WORKER_THREAD_NAME: &str = "webapp-worker";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(not(windows))]
const BUNDLED_INTERPRETER: &str = "../venv/bin/python3";
#[cfg(windows)]
const BUNDLED_INTERPRETER: &str = "../python/python.exe";

#[cfg(not(windows))]
const DEFAULT_INTERPRETER: &str = "python3";
#[cfg(windows)]
const DEFAULT_INTERPRETER: &str = "python";

/// State written by the worker thread and read by the supervisor
#[derive(Debug, Default)]
struct WorkerShared {
    finished: AtomicBool,
    kill_requested: AtomicBool,
    /// 0 until the child is spawned
    pid: AtomicU32,
    error: Mutex<Option<String>>,
}

impl WorkerShared {
    /// Keep the first error; later ones are consequences of it
    fn record_error(&self, message: String) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Handle on the worker for one supervisor run
pub struct WorkerProcess {
    app_name: String,
    config: ServerConfig,
    server_log: PathBuf,
    port: u16,
    auth_key: AuthKey,
    entry_file: Option<PathBuf>,
    state: WorkerState,
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerProcess {
    pub fn new(
        app_name: &str,
        config: ServerConfig,
        port: u16,
        auth_key: AuthKey,
        server_log: PathBuf,
    ) -> Self {
        Self {
            app_name: app_name.to_string(),
            config,
            server_log,
            port,
            auth_key,
            entry_file: None,
            state: WorkerState::NotStarted,
            shared: Arc::new(WorkerShared::default()),
            thread: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_key(&self) -> &AuthKey {
        &self.auth_key
    }

    pub fn url(&self) -> ServerUrl {
        ServerUrl::new(self.port, self.auth_key.clone())
    }

    pub fn entry_file(&self) -> Option<&Path> {
        self.entry_file.as_deref()
    }

    /// Child process id once spawned
    pub fn pid(&self) -> Option<u32> {
        match self.shared.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Directories probed for the entry file, in order
    pub fn candidate_dirs(&self, search_paths: &[String]) -> Vec<PathBuf> {
        let mut dirs = Vec::new();

        if let Some(exe_dir) = executable_dir() {
            dirs.push(exe_dir.join("..").join("web"));
            dirs.push(exe_dir.join("..").join("..").join("web"));
            dirs.push(exe_dir.join("..").join("Resources").join("web"));
            dirs.push(
                exe_dir
                    .join("..")
                    .join("share")
                    .join(&self.app_name)
                    .join("web"),
            );
        }

        for path in search_paths.iter().filter(|p| !p.trim().is_empty()) {
            dirs.push(PathBuf::from(expand_path(path)));
        }

        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd);
        }

        dirs
    }

    /// Resolve the entry file; the first candidate directory containing it wins
    pub fn init(&mut self, search_paths: &[String]) -> Result<PathBuf> {
        for dir in self.candidate_dirs(search_paths) {
            let candidate = dir.join(&self.config.entry_file);
            debug!("Probing for worker entry file: {:?}", candidate);
            if candidate.is_file() {
                let entry = candidate.canonicalize().unwrap_or(candidate);
                info!("Worker entry file: {:?}", entry);
                self.entry_file = Some(entry.clone());
                return Ok(entry);
            }
        }

        self.entry_file = None;
        Err(RuntimeError::config(format!(
            "Could not find the worker entry file '{}' in any application path",
            self.config.entry_file
        )))
    }

    /// Launch the worker on its background thread
    ///
    /// Returns once the thread is running; early failures show up later
    /// through [`is_finished`](Self::is_finished) and [`get_error`](Self::get_error).
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(RuntimeError::worker("Worker is already started"));
        }
        let entry = self
            .entry_file
            .clone()
            .ok_or_else(|| RuntimeError::worker("Worker entry file is not resolved"))?;

        let (mut command, preamble) = self.build_command(&entry);
        self.attach_server_log(&mut command, &preamble)?;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(command, shared))
            .map_err(|e| RuntimeError::worker(format!("Cannot spawn worker thread: {}", e)))?;

        self.thread = Some(handle);
        self.state = WorkerState::Running;
        info!("Worker launched on port {}", self.port);
        Ok(())
    }

    /// True once the worker thread has stopped (or was never started)
    pub fn is_finished(&self) -> bool {
        self.thread.is_none() || self.shared.finished.load(Ordering::SeqCst)
    }

    /// Error captured from the worker, if any
    pub fn get_error(&self) -> Option<String> {
        self.shared.error()
    }

    /// Record that the worker did not survive its start
    pub fn mark_failed(&mut self) {
        self.state = WorkerState::Failed;
    }

    /// Prepare the handle for another attempt with a new configuration
    ///
    /// The previous worker thread must have been stopped.
    pub async fn reset(&mut self, config: ServerConfig, port: u16) {
        self.force_stop().await;
        self.config = config;
        self.port = port;
        self.entry_file = None;
        self.shared = Arc::new(WorkerShared::default());
        self.state = WorkerState::NotStarted;
    }

    /// Ask the worker to exit, then make sure it does
    ///
    /// Always returns with the worker stopped. A refused or failed shutdown
    /// request is recorded in [`get_error`](Self::get_error).
    pub async fn shutdown(&mut self, url: &str, health: &HealthChecker) {
        if self.thread.is_none() {
            self.state = WorkerState::Stopped;
            return;
        }

        self.state = WorkerState::ShuttingDown;

        if !self.is_finished() {
            info!("Requesting worker shutdown");
            if !health.request_shutdown(url).await {
                let message = "Failed to send the shutdown request to the server".to_string();
                error!("{}", message);
                self.shared.record_error(message);
            }

            let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_grace_secs);
            while !self.is_finished() && Instant::now() < deadline {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        self.force_stop().await;
    }

    /// Terminate the worker without asking and join its thread
    pub async fn force_stop(&mut self) {
        if !self.is_finished() {
            warn!("Terminating worker process");
            self.shared.kill_requested.store(true, Ordering::SeqCst);
        }

        while !self.is_finished() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                self.shared.record_error("Worker thread panicked".to_string());
            }
            self.state = WorkerState::Stopped;
        }
    }

    fn build_command(&self, entry: &Path) -> (Command, ServerLogPreamble) {
        let interpreter = self.resolve_interpreter();
        let module_path = self.module_search_path();

        let mut args = self.config.interpreter_args.clone();
        args.push(entry.display().to_string());

        let mut command = Command::new(&interpreter);
        command
            .args(&args)
            .env(PORT_ENV, self.port.to_string())
            .env(KEY_ENV, self.auth_key.as_str())
            .env(SERVER_MODE_ENV, "OFF")
            .stdin(Stdio::null());

        if let Some(dir) = entry.parent() {
            command.current_dir(dir);
        }

        if !module_path.is_empty() {
            match std::env::join_paths(&module_path) {
                Ok(joined) => {
                    command.env(MODULE_PATH_ENV, joined);
                }
                Err(e) => warn!("Cannot build {}: {}", MODULE_PATH_ENV, e),
            }
        }

        let mut command_line = vec![interpreter.display().to_string()];
        command_line.extend(args);

        let preamble = ServerLogPreamble::new(&interpreter, entry)
            .with_module_path(module_path)
            .with_command(command_line);

        (command, preamble)
    }

    /// Rotate the server log, write the preamble and point stdout/stderr at it
    fn attach_server_log(&self, command: &mut Command, preamble: &ServerLogPreamble) -> Result<()> {
        let log_error = |e: std::io::Error| {
            RuntimeError::worker(format!("Cannot open server log {:?}: {}", self.server_log, e))
        };

        match rotate_if_larger(&self.server_log, self.config.log_max_bytes, self.config.log_keep_files) {
            Ok(true) => debug!("Rotated server log {:?}", self.server_log),
            Ok(false) => {}
            Err(e) => warn!("Could not rotate server log {:?}: {}", self.server_log, e),
        }

        let mut log = open_append_owner_only(&self.server_log).map_err(log_error)?;
        preamble.write_to(&mut log).map_err(log_error)?;

        let stderr = log.try_clone().map_err(log_error)?;
        command.stdout(Stdio::from(log)).stderr(Stdio::from(stderr));
        Ok(())
    }

    fn resolve_interpreter(&self) -> PathBuf {
        if let Some(ref interpreter) = self.config.interpreter {
            return PathBuf::from(expand_path(interpreter));
        }

        if let Some(exe_dir) = executable_dir() {
            let bundled = exe_dir.join(BUNDLED_INTERPRETER);
            if bundled.is_file() {
                return bundled;
            }
        }

        PathBuf::from(DEFAULT_INTERPRETER)
    }

    /// Bundled environment directories followed by the configured ones
    fn module_search_path(&self) -> Vec<PathBuf> {
        let mut dirs = executable_dir()
            .map(|exe_dir| bundled_module_dirs(&exe_dir))
            .unwrap_or_default();

        dirs.extend(
            self.config
                .python_path
                .iter()
                .filter(|p| !p.trim().is_empty())
                .map(|p| PathBuf::from(expand_path(p))),
        );
        dirs
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.shared.kill_requested.store(true, Ordering::SeqCst);
        }
    }
}

/// Body of the worker thread: spawn the child and wait for it
fn run_worker(mut command: Command, shared: Arc<WorkerShared>) {
    let program = command.get_program().to_string_lossy().into_owned();

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            shared.record_error(format!("Failed to launch {}: {}", program, e));
            shared.finished.store(true, Ordering::SeqCst);
            return;
        }
    };
    shared.pid.store(child.id(), Ordering::SeqCst);
    debug!("Worker process {} started", child.id());

    loop {
        if shared.kill_requested.load(Ordering::SeqCst) {
            if let Err(e) = child.kill() {
                debug!("Kill of worker process failed: {}", e);
            }
            let _ = child.wait();
            shared.record_error("Worker process was terminated".to_string());
            break;
        }

        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                debug!("Worker process exited cleanly");
                break;
            }
            Ok(Some(status)) => {
                shared.record_error(format!("Worker process exited with {}", status));
                break;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                shared.record_error(format!("Cannot wait for worker process: {}", e));
                break;
            }
        }
    }

    shared.finished.store(true, Ordering::SeqCst);
}

fn executable_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe = exe.canonicalize().unwrap_or(exe);
    exe.parent().map(Path::to_path_buf)
}

fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .map(|expanded| expanded.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

#[cfg(not(windows))]
fn bundled_module_dirs(exe_dir: &Path) -> Vec<PathBuf> {
    let lib = exe_dir.join("..").join("venv").join("lib");
    let Ok(entries) = std::fs::read_dir(&lib) else {
        return Vec::new();
    };

    let mut versions: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| name.starts_with("python"))
        })
        .collect();
    versions.sort();

    let mut dirs = Vec::new();
    for version in versions {
        dirs.push(version.clone());
        for sub in ["lib-dynload", "site-packages"] {
            let dir = version.join(sub);
            if dir.is_dir() {
                dirs.push(dir);
            }
        }
    }
    dirs
}

#[cfg(windows)]
fn bundled_module_dirs(exe_dir: &Path) -> Vec<PathBuf> {
    let root = exe_dir.join("..").join("python");
    ["Lib", "DLLs", "Lib/site-packages"]
        .iter()
        .map(|sub| root.join(sub))
        .filter(|dir| dir.is_dir())
        .collect()
}
