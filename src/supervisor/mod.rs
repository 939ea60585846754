//! Local service supervisor
//!
//! This module launches the web application worker, checks its health,
//! publishes its address and shuts it down again.

pub mod browser;
pub mod health;
pub mod observer;
pub mod orchestrator;
pub mod port;
pub mod types;
pub mod worker;

pub use browser::BrowserLauncher;
pub use health::HealthChecker;
pub use observer::{
    CancelReconfigurer, LoggingObserver, ReconfigureOutcome, Reconfigurer, RuntimeEvent,
    RuntimeObserver,
};
pub use orchestrator::{ShutdownHandle, Supervisor};
pub use port::PortAllocator;
pub use types::*;
pub use worker::WorkerProcess;
