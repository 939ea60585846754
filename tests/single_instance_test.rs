//! Single instance detection across concurrent launches

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use webapp_runtime::instance::{
    Acquisition, AddressRegistry, InstanceKey, InstancePaths, SingleInstanceGuard,
};

fn test_paths(temp_dir: &TempDir, user: &str) -> InstancePaths {
    let key = InstanceKey::new("webapp", user, Path::new("/opt/webapp/bin/webapp-runtime"));
    InstancePaths::in_dir(&key, temp_dir.path())
}

#[test]
fn test_exactly_one_concurrent_launch_acquires() {
    const LAUNCHES: usize = 8;

    let temp_dir = TempDir::new().unwrap();
    let paths = test_paths(&temp_dir, "tester");
    let barrier = Arc::new(Barrier::new(LAUNCHES));

    let handles: Vec<_> = (0..LAUNCHES)
        .map(|_| {
            let paths = paths.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let registry = AddressRegistry::new(&paths.address_file);
                barrier.wait();
                SingleInstanceGuard::acquire(&paths, &registry).unwrap()
            })
        })
        .collect();

    // Leases stay alive until every launch has finished its check
    let results: Vec<Acquisition> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let acquired = results.iter().filter(|a| a.is_acquired()).count();
    assert_eq!(acquired, 1, "exactly one launch must own the instance");

    let running = results
        .iter()
        .filter(|a| matches!(a, Acquisition::AlreadyRunning { .. }))
        .count();
    assert_eq!(running, LAUNCHES - 1);
}

#[test]
fn test_running_instance_reports_its_address() {
    let temp_dir = TempDir::new().unwrap();
    let paths = test_paths(&temp_dir, "tester");
    let registry = AddressRegistry::new(&paths.address_file);

    let _owner = SingleInstanceGuard::acquire(&paths, &registry).unwrap();
    registry
        .write("http://127.0.0.1:5050/?key=0123456789abcdef0123456789abcdef")
        .unwrap();

    match SingleInstanceGuard::acquire(&paths, &AddressRegistry::new(&paths.address_file)).unwrap() {
        Acquisition::AlreadyRunning { url } => assert_eq!(
            url.as_deref(),
            Some("http://127.0.0.1:5050/?key=0123456789abcdef0123456789abcdef")
        ),
        Acquisition::Acquired(_) => panic!("second launch must not acquire"),
    }
}

#[test]
fn test_different_users_do_not_collide() {
    let temp_dir = TempDir::new().unwrap();
    let alice = test_paths(&temp_dir, "alice");
    let bob = test_paths(&temp_dir, "bob");

    let first = SingleInstanceGuard::acquire(&alice, &AddressRegistry::new(&alice.address_file)).unwrap();
    let second = SingleInstanceGuard::acquire(&bob, &AddressRegistry::new(&bob.address_file)).unwrap();

    assert!(first.is_acquired());
    assert!(second.is_acquired());
}

#[test]
fn test_instance_is_free_again_after_release() {
    let temp_dir = TempDir::new().unwrap();
    let paths = test_paths(&temp_dir, "tester");
    let registry = AddressRegistry::new(&paths.address_file);

    for _ in 0..3 {
        let acquisition = SingleInstanceGuard::acquire(&paths, &registry).unwrap();
        assert!(acquisition.is_acquired());
    }
}
