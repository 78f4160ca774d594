//! Remote trigger server threads and clients attached through fd maps.

use evo_common::status::RtError;
use evo_common::time::Deadline;
use evo_rt_sync::{
    RemoteTriggerClient, RemoteTriggerServer, SharedMemoryManager, ThreadOptions,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

fn counting_server(
    manager: &mut SharedMemoryManager,
    name: &str,
    delay: Duration,
) -> (RemoteTriggerServer, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let server = {
        let calls = Arc::clone(&calls);
        RemoteTriggerServer::new(manager, name, move || {
            thread::sleep(delay);
            calls.fetch_add(1, Ordering::AcqRel);
        })
        .expect("server")
    };
    (server, calls)
}

/// Synchronous triggers run the callback once each.
#[test]
fn synchronous_trigger_runs_callback() {
    let mut manager = SharedMemoryManager::new();
    let (server, calls) = counting_server(&mut manager, "activate", Duration::ZERO);
    let mut running = server
        .start(ThreadOptions::named("trg-activate"))
        .expect("start");

    let mut client = RemoteTriggerClient::new("activate");
    client.connect(&manager.fd_map()).expect("connect");
    for _ in 0..5 {
        client
            .trigger(Deadline::after(Duration::from_secs(5)))
            .expect("trigger");
    }
    assert_eq!(calls.load(Ordering::Acquire), 5);
    assert!(running.stop().is_some());
}

/// Async handles allow overlapping management calls on different triggers.
#[test]
fn async_triggers_overlap_across_servers() {
    let mut manager = SharedMemoryManager::new();
    let (slow, slow_calls) = counting_server(&mut manager, "prepare", Duration::from_millis(50));
    let (fast, fast_calls) = counting_server(&mut manager, "read_status", Duration::ZERO);
    let _slow = slow.start(ThreadOptions::named("trg-prepare")).expect("start");
    let _fast = fast
        .start(ThreadOptions::named("trg-status").with_priority(80))
        .expect("start");

    let fds = manager.fd_map();
    let mut slow_client = RemoteTriggerClient::new("prepare");
    let mut fast_client = RemoteTriggerClient::new("read_status");
    slow_client.connect(&fds).expect("connect");
    fast_client.connect(&fds).expect("connect");

    let mut pending = slow_client.trigger_async().expect("async");
    assert!(matches!(
        slow_client.trigger(Deadline::Infinite),
        Err(RtError::AlreadyExists(_))
    ));
    fast_client
        .trigger(Deadline::after(Duration::from_secs(5)))
        .expect("fast trigger");
    pending
        .wait_until(Deadline::after(Duration::from_secs(5)))
        .expect("slow completes");

    assert!(!slow_client.is_in_flight());
    assert_eq!(slow_calls.load(Ordering::Acquire), 1);
    assert_eq!(fast_calls.load(Ordering::Acquire), 1);
}

/// A timed-out request leaves a late response behind; the next request
/// skips it and still waits for its own completion.
#[test]
fn late_response_is_drained_before_next_request() {
    let mut manager = SharedMemoryManager::new();
    let (server, calls) = counting_server(&mut manager, "deactivate", Duration::from_millis(60));
    let _running = server
        .start(ThreadOptions::named("trg-deactivate"))
        .expect("start");
    let mut client = RemoteTriggerClient::new("deactivate");
    client.connect(&manager.fd_map()).expect("connect");

    assert!(matches!(
        client.trigger(Deadline::after(Duration::from_millis(5))),
        Err(RtError::DeadlineExceeded(_))
    ));
    thread::sleep(Duration::from_millis(100));
    client
        .trigger(Deadline::after(Duration::from_secs(5)))
        .expect("second trigger");
    assert_eq!(calls.load(Ordering::Acquire), 2);
}

/// A retry issued while the server still runs the abandoned request waits
/// for a run of its own instead of taking the abandoned response.
#[test]
fn retry_while_server_busy_waits_for_its_own_run() {
    let mut manager = SharedMemoryManager::new();
    let (server, calls) = counting_server(&mut manager, "enable_motion", Duration::from_millis(200));
    let _running = server
        .start(ThreadOptions::named("trg-enable"))
        .expect("start");
    let mut client = RemoteTriggerClient::new("enable_motion");
    client.connect(&manager.fd_map()).expect("connect");

    assert!(matches!(
        client.trigger(Deadline::after(Duration::from_millis(20))),
        Err(RtError::DeadlineExceeded(_))
    ));
    client
        .trigger(Deadline::after(Duration::from_secs(5)))
        .expect("retry");
    assert_eq!(calls.load(Ordering::Acquire), 2);
}

/// Stopping the server fails outstanding requests instead of hanging them.
#[test]
fn stopped_server_cancels_clients() {
    let mut manager = SharedMemoryManager::new();
    let (server, _calls) = counting_server(&mut manager, "clear_faults", Duration::ZERO);
    let mut running = server
        .start(ThreadOptions::named("trg-clear"))
        .expect("start");
    let mut client = RemoteTriggerClient::new("clear_faults");
    client.connect(&manager.fd_map()).expect("connect");
    drop(running.stop());
    assert!(matches!(
        client.trigger(Deadline::after(Duration::from_secs(1))),
        Err(RtError::Cancelled(_))
    ));
}
