//! Port selection contract

use std::net::TcpListener;
use webapp_runtime::config::ServerConfig;
use webapp_runtime::supervisor::PortAllocator;

#[test]
fn test_fixed_port_is_used_even_when_busy() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let busy_port = listener.local_addr().unwrap().port();

    let config = ServerConfig {
        fixed_port: true,
        port_number: busy_port,
        ..Default::default()
    };

    assert_eq!(PortAllocator::choose(&config).unwrap(), busy_port);
    assert!(PortAllocator::is_port_in_use(busy_port));
}

#[test]
fn test_ephemeral_port_is_free_after_choice() {
    let config = ServerConfig::default();
    assert!(!config.fixed_port);

    let port = PortAllocator::choose(&config).unwrap();
    assert_ne!(port, 0);
    assert_ne!(port, config.port_number);

    // Released for the worker to bind
    let listener = TcpListener::bind(("127.0.0.1", port));
    assert!(listener.is_ok(), "port {} should be bindable", port);
}

#[test]
fn test_port_probe_reports_free_port() {
    let port = PortAllocator::ephemeral_port().unwrap();
    assert!(!PortAllocator::is_port_in_use(port));
}
