//! Real signals delivered to this test process.
//!
//! Everything lives in one test: signal dispositions and the panic hook are
//! process-wide, so parallel tests would see each other's signals.

use fatal_guard::{
    Emission, Event, EventHub, FatalError, FatalErrorGuard, MemorySink, Phase, ProcessHub, Signal,
};
use nix::sys::signal::{kill, Signal as NixSignal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

async fn next_raised(rx: &mut mpsc::UnboundedReceiver<FatalError>) -> FatalError {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a raised error")
        .expect("channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_guard_handles_real_process_events() {
    let hub = ProcessHub::start().unwrap();
    let sink = Arc::new(MemorySink::new());
    let guard = FatalErrorGuard::with_output(hub.clone(), sink.clone()).unwrap();
    let hooked = Arc::new(Mutex::new(Vec::new()));
    let seen = hooked.clone();
    guard.set_shutdown_hook(move |error| {
        seen.lock().unwrap().push(error);
        tokio::time::sleep(Duration::from_millis(10))
    });
    guard.install();

    // Stands in for the rest of the process: receives whatever is raised once
    // the guard is done, so the default disposition never kills the test.
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.add_listener(
        Event::UncaughtError,
        Arc::new(move |emission: &Emission| {
            if let Emission::Error(error) = emission {
                let _ = tx.send(error.clone());
            }
        }),
    );

    // A panic on a task reaches the guard as an uncaught error.
    let _ = tokio::spawn(async { panic!("worker exploded") }).await;
    let panic = next_raised(&mut rx).await;
    assert!(matches!(&panic, FatalError::Panic { message, .. } if message == "worker exploded"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(guard.phase(), Phase::Idle);
    assert!(sink.contains("fatal error: uncaught exception"));

    // SIGHUP belongs to the application while it listens for it.
    let app_hups = Arc::new(AtomicUsize::new(0));
    let counter = app_hups.clone();
    let app_listener = hub.add_listener(
        Event::Signal(Signal::Hup),
        Arc::new(move |_: &Emission| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    kill(Pid::this(), NixSignal::SIGHUP).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app_hups.load(Ordering::SeqCst), 1);
    assert_eq!(hooked.lock().unwrap().len(), 1);
    hub.remove_listener(Event::Signal(Signal::Hup), app_listener)
        .unwrap();

    // SIGTERM runs the hook and is raised again afterwards.
    kill(Pid::this(), NixSignal::SIGTERM).unwrap();
    let raised = next_raised(&mut rx).await;
    assert_eq!(raised, FatalError::signal(Signal::Term));
    assert_eq!(
        hooked.lock().unwrap().last(),
        Some(&FatalError::signal(Signal::Term))
    );
    assert!(sink.contains("fatal error: SIGTERM"));

    guard.uninstall();
}
