//! Port selection for the worker

use crate::config::ServerConfig;
use crate::error::{Result, RuntimeError};
use crate::supervisor::types::WORKER_HOST;
use std::net::TcpListener;
use tracing::{debug, info};

/// Chooses the TCP port the worker binds
pub struct PortAllocator;

impl PortAllocator {
    /// The configured port when fixed, otherwise a free ephemeral port
    ///
    /// The ephemeral port is released before returning; another process may
    /// take it before the worker binds.
    pub fn choose(config: &ServerConfig) -> Result<u16> {
        if config.fixed_port {
            info!("Using fixed port {}", config.port_number);
            return Ok(config.port_number);
        }

        let port = Self::ephemeral_port()?;
        info!("Using ephemeral port {}", port);
        Ok(port)
    }

    /// Ask the OS for a free port by binding port 0
    pub fn ephemeral_port() -> Result<u16> {
        let listener = TcpListener::bind((WORKER_HOST, 0))
            .map_err(|e| RuntimeError::port(format!("Cannot bind an ephemeral port: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| RuntimeError::port(format!("Cannot read ephemeral port: {}", e)))?
            .port();
        drop(listener);
        Ok(port)
    }

    /// Advisory check whether `port` can currently be bound on loopback
    pub fn is_port_in_use(port: u16) -> bool {
        match TcpListener::bind((WORKER_HOST, port)) {
            Ok(listener) => {
                let bound = listener.local_addr().map(|addr| addr.port()).unwrap_or(0);
                debug!("Port probe {} bound {}", port, bound);
                bound == 0
            }
            Err(e) => {
                debug!("Port {} unavailable: {}", port, e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_port_is_returned_unchanged() {
        let config = ServerConfig {
            fixed_port: true,
            port_number: 5050,
            ..Default::default()
        };
        assert_eq!(PortAllocator::choose(&config).unwrap(), 5050);
    }

    #[test]
    fn test_occupied_port_is_reported() {
        let listener = TcpListener::bind((WORKER_HOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(PortAllocator::is_port_in_use(port));
    }
}
