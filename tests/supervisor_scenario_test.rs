//! End-to-end supervisor runs with a mock worker endpoint and `sh` workers
#![cfg(unix)]

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use webapp_runtime::config::{ConfigStore, ServerConfig};
use webapp_runtime::error::RuntimeError;
use webapp_runtime::instance::{
    Acquisition, AddressRegistry, InstanceKey, InstancePaths, SingleInstanceGuard,
};
use webapp_runtime::supervisor::{
    PortAllocator, ReconfigureOutcome, Reconfigurer, RunOutcome, RuntimeEvent, RuntimeObserver,
    Supervisor, SupervisorState,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const ENTRY: &str = "scenario_entry_0b7e.sh";

#[derive(Default)]
struct RecordingObserver {
    states: Mutex<Vec<SupervisorState>>,
    events: Mutex<Vec<RuntimeEvent>>,
}

impl RecordingObserver {
    fn states(&self) -> Vec<SupervisorState> {
        self.states.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl RuntimeObserver for RecordingObserver {
    fn state_changed(&self, _from: SupervisorState, to: SupervisorState) {
        self.states.lock().unwrap().push(to);
    }

    fn on_event(&self, event: &RuntimeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Answers the retry dialog by pointing ApplicationPath at `app_dir`
struct FixApplicationPath {
    app_dir: PathBuf,
    calls: Arc<Mutex<Vec<String>>>,
    observer: Arc<RecordingObserver>,
    events_before_call: Arc<Mutex<Vec<RuntimeEvent>>>,
}

impl Reconfigurer for FixApplicationPath {
    fn reconfigure(&mut self, current: &ServerConfig, error: &RuntimeError) -> ReconfigureOutcome {
        self.calls.lock().unwrap().push(error.to_string());
        *self.events_before_call.lock().unwrap() = self.observer.events();
        let mut config = current.clone();
        config.worker_search_paths = vec![self.app_dir.display().to_string()];
        ReconfigureOutcome::Accepted(config)
    }
}

struct Scenario {
    temp_dir: TempDir,
    paths: InstancePaths,
    app_dir: PathBuf,
}

impl Scenario {
    fn new(script: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let app_dir = temp_dir.path().join("app");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join(ENTRY), script).unwrap();

        let key = InstanceKey::new("webapp", "tester", Path::new("/opt/webapp/bin/webapp-runtime"));
        let paths = InstancePaths::in_dir(&key, temp_dir.path().join("data"));

        Self {
            temp_dir,
            paths,
            app_dir,
        }
    }

    fn config(&self, port: u16) -> ServerConfig {
        ServerConfig {
            fixed_port: true,
            port_number: port,
            worker_search_paths: vec![self.app_dir.display().to_string()],
            interpreter: Some("sh".to_string()),
            interpreter_args: Vec::new(),
            entry_file: ENTRY.to_string(),
            connection_timeout_seconds: 10,
            auto_open_on_start: false,
            startup_grace_ms: 200,
            shutdown_grace_secs: 1,
            ..Default::default()
        }
    }

    fn missing_dir(&self) -> String {
        self.temp_dir.path().join("not-here").display().to_string()
    }
}

async fn mock_worker_endpoints() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/misc/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("PING"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/misc/shutdown"))
        .respond_with(ResponseTemplate::new(200).set_body_string("SHUTDOWN"))
        .mount(&server)
        .await;
    server
}

async fn wait_for_address(registry: &AddressRegistry, limit: Duration) -> Option<String> {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if let Some(url) = registry.read() {
            return Some(url);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

#[tokio::test]
async fn test_reconfiguration_recovers_missing_entry_file() {
    let server = mock_worker_endpoints().await;
    let port = server.address().port();
    let scenario = Scenario::new("exec sleep 60\n");

    let mut config = scenario.config(port);
    config.worker_search_paths = vec![scenario.missing_dir()];

    let store = ConfigStore::at(scenario.temp_dir.path().join("runtime_config.json"));
    let observer = Arc::new(RecordingObserver::default());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let events_before_call = Arc::new(Mutex::new(Vec::new()));
    let reconfigurer = FixApplicationPath {
        app_dir: scenario.app_dir.clone(),
        calls: Arc::clone(&calls),
        observer: observer.clone(),
        events_before_call: Arc::clone(&events_before_call),
    };

    let mut supervisor = Supervisor::new("webapp", config, scenario.paths.clone())
        .with_store(store.clone())
        .with_observer(observer.clone())
        .with_reconfigurer(Box::new(reconfigurer));
    let shutdown = supervisor.shutdown_handle();
    let registry = AddressRegistry::new(&scenario.paths.address_file);

    let (outcome, address) = tokio::join!(supervisor.run(), async {
        let address = wait_for_address(&registry, Duration::from_secs(20)).await;
        shutdown.request();
        address
    });

    assert_eq!(outcome.unwrap(), RunOutcome::Shutdown);

    let address = address.expect("address file should be written once ready");
    let pattern = Regex::new(&format!(r"^http://127\.0\.0\.1:{}/\?key=[0-9a-f]{{32}}$", port)).unwrap();
    assert!(pattern.is_match(&address), "unexpected address {}", address);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains(ENTRY));

    let states = observer.states();
    let failed_at = states
        .iter()
        .position(|s| *s == SupervisorState::WorkerStartFailed)
        .unwrap();
    let ready_at = states.iter().position(|s| *s == SupervisorState::Ready).unwrap();
    assert!(failed_at < ready_at);
    assert_eq!(states.last(), Some(&SupervisorState::Stopped));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);

    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, RuntimeEvent::Ready { url } if *url == address)));

    // The failure and the server log location are reported before the retry dialog
    let before_call = events_before_call.lock().unwrap().clone();
    let start_failed = before_call
        .iter()
        .position(|e| matches!(e, RuntimeEvent::WorkerStartFailed { .. }))
        .expect("WorkerStartFailed before reconfiguration");
    let diagnostics = before_call
        .iter()
        .position(|e| {
            matches!(e, RuntimeEvent::DiagnosticsAvailable { server_log }
                if *server_log == scenario.paths.server_log)
        })
        .expect("DiagnosticsAvailable before reconfiguration");
    assert!(start_failed < diagnostics);

    // Cleaned up on shutdown, and the corrected path was persisted
    assert_eq!(registry.read(), None);
    assert_eq!(
        store.load().unwrap().worker_search_paths,
        vec![scenario.app_dir.display().to_string()]
    );
}

#[tokio::test]
async fn test_worker_exit_while_ready_stops_the_runtime() {
    let server = mock_worker_endpoints().await;
    let port = server.address().port();
    let scenario = Scenario::new("sleep 2\nexit 2\n");

    let observer = Arc::new(RecordingObserver::default());
    let mut supervisor = Supervisor::new("webapp", scenario.config(port), scenario.paths.clone())
        .with_observer(observer.clone());
    let registry = AddressRegistry::new(&scenario.paths.address_file);

    let (result, address) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(30), supervisor.run()),
        wait_for_address(&registry, Duration::from_secs(10))
    );
    let err = result
        .expect("runtime must stop after the worker exits")
        .unwrap_err();

    assert!(address.is_some(), "worker should have reached Ready");
    assert!(matches!(err, RuntimeError::Worker { .. }), "unexpected error: {}", err);
    assert!(err.to_string().contains("exit status: 2"), "exit status missing from: {}", err);
    assert_eq!(err.exit_code(), 1);

    let states = observer.states();
    let ready_at = states.iter().position(|s| *s == SupervisorState::Ready).unwrap();
    let shutting_down_at = states
        .iter()
        .position(|s| *s == SupervisorState::ShuttingDown)
        .unwrap();
    assert!(ready_at < shutting_down_at);
    assert_eq!(states.last(), Some(&SupervisorState::Stopped));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, RuntimeEvent::Fatal { .. })));

    assert!(!scenario.paths.address_file.exists());
    assert_eq!(registry.read(), None);
}

#[tokio::test]
async fn test_second_launch_only_opens_browser() {
    let scenario = Scenario::new("exec sleep 60\n");
    let registry = AddressRegistry::new(&scenario.paths.address_file);
    let url = "http://127.0.0.1:5050/?key=0123456789abcdef0123456789abcdef";

    // First instance
    let first = SingleInstanceGuard::acquire(&scenario.paths, &registry).unwrap();
    assert!(first.is_acquired());
    registry.write(url).unwrap();

    let opened = scenario.temp_dir.path().join("opened.txt");
    let mut config = scenario.config(5050);
    config.browser_launch_command = Some(format!(
        "sh -c \"echo '%URL%' > '{}'\"",
        opened.display()
    ));

    let observer = Arc::new(RecordingObserver::default());
    let mut second = Supervisor::new("webapp", config, scenario.paths.clone())
        .with_observer(observer.clone());
    let outcome = second.run().await.unwrap();

    assert_eq!(
        outcome,
        RunOutcome::HandedOff {
            url: Some(url.to_string())
        }
    );
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(second.state(), SupervisorState::Stopped);
    assert!(!observer.states().contains(&SupervisorState::WorkerStarting));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !opened.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(std::fs::read_to_string(&opened).unwrap().trim(), url);

    // No worker was started by the second launch
    assert!(!scenario.paths.server_log.exists());
    assert_eq!(registry.read().as_deref(), Some(url));
    drop(first);
}

#[tokio::test]
async fn test_handoff_without_address_does_not_start_worker() {
    let scenario = Scenario::new("exec sleep 60\n");
    let registry = AddressRegistry::new(&scenario.paths.address_file);
    let _first = SingleInstanceGuard::acquire(&scenario.paths, &registry).unwrap();

    let mut second = Supervisor::new("webapp", scenario.config(5050), scenario.paths.clone())
        .with_handoff_wait(Duration::from_millis(300));
    let outcome = second.run().await.unwrap();

    assert_eq!(outcome, RunOutcome::HandedOff { url: None });
    assert!(!scenario.paths.server_log.exists());
}

#[tokio::test]
async fn test_health_check_failure_is_fatal() {
    let scenario = Scenario::new("exec sleep 60\n");
    let dead_port = PortAllocator::ephemeral_port().unwrap();
    let mut config = scenario.config(dead_port);
    config.connection_timeout_seconds = 1;

    let observer = Arc::new(RecordingObserver::default());
    let mut supervisor = Supervisor::new("webapp", config, scenario.paths.clone())
        .with_observer(observer.clone());

    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(err, RuntimeError::HealthCheck { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(observer.states().contains(&SupervisorState::HealthCheckFailed));
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, RuntimeEvent::Fatal { .. })));
    assert!(!scenario.paths.address_file.exists());

    // The lease was released with the failed run
    let registry = AddressRegistry::new(&scenario.paths.address_file);
    let next = SingleInstanceGuard::acquire(&scenario.paths, &registry).unwrap();
    assert!(matches!(next, Acquisition::Acquired(_)));
}

#[tokio::test]
async fn test_cancelled_reconfiguration_fails_the_launch() {
    let scenario = Scenario::new("exit 1\n");
    let mut supervisor = Supervisor::new("webapp", scenario.config(5050), scenario.paths.clone());

    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}
