//! Blocking wait/signal behavior across threads.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use karl_kb::{KnowledgeBase, UpdateSettings, WaitSettings};

#[test]
fn wait_unblocks_on_another_threads_set() {
    let kb = KnowledgeBase::new();
    let writer = kb.clone();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        writer.set("go", 1i64).unwrap();
    });

    let settings = WaitSettings {
        poll_frequency: Duration::from_millis(500),
        max_wait_time: Some(Duration::from_secs(5)),
        ..WaitSettings::default()
    };
    let started = Instant::now();
    let result = kb.wait("go", &settings).unwrap();
    let elapsed = started.elapsed();

    handle.join().unwrap();
    assert!(result.is_true());
    // Signalled well before a full poll interval elapsed.
    assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
}

#[test]
fn wait_polls_even_without_a_signal() {
    let kb = KnowledgeBase::new();
    let writer = kb.clone();

    // Simulates a remote-transport thread that updates state without
    // signalling local waiters.
    let silent = UpdateSettings {
        signal_changes: false,
        ..UpdateSettings::default()
    };
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        writer.set_with("quiet", 1i64, &silent).unwrap();
    });

    let settings = WaitSettings {
        poll_frequency: Duration::from_millis(25),
        max_wait_time: Some(Duration::from_secs(5)),
        ..WaitSettings::default()
    };
    let result = kb.wait("quiet", &settings).unwrap();
    handle.join().unwrap();
    assert!(result.is_true());
}

#[test]
fn wait_timeout_returns_the_false_record() {
    let kb = KnowledgeBase::new();
    let settings = WaitSettings {
        poll_frequency: Duration::from_millis(10),
        max_wait_time: Some(Duration::from_millis(60)),
        ..WaitSettings::default()
    };
    let started = Instant::now();
    let result = kb.wait("never.set", &settings).unwrap();
    assert!(!result.is_true());
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn zero_budget_waits_evaluate_exactly_once() {
    let kb = KnowledgeBase::new();
    let settings = WaitSettings::with_max_wait(Duration::ZERO);

    let started = Instant::now();
    let result = kb.wait("missing", &settings).unwrap();
    assert!(!result.is_true());
    assert!(started.elapsed() < Duration::from_millis(50));

    kb.set("present", 1i64).unwrap();
    assert!(kb.wait("present", &settings).unwrap().is_true());
}

#[test]
fn wait_condition_with_side_effects() {
    let kb = KnowledgeBase::new();
    let writer = kb.clone();

    let handle = thread::spawn(move || {
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(10));
            writer.evaluate("progress += 1").unwrap();
        }
    });

    let settings = WaitSettings {
        poll_frequency: Duration::from_millis(20),
        max_wait_time: Some(Duration::from_secs(5)),
        ..WaitSettings::default()
    };
    let result = kb.wait("progress >= 5", &settings).unwrap();
    handle.join().unwrap();
    assert!(result.is_true());
    assert_eq!(kb.get("progress").unwrap().as_integer(), 5);
}

#[test]
fn shutdown_wakes_blocked_waiters() {
    let kb = KnowledgeBase::new();
    let waiter = kb.clone();

    let handle = thread::spawn(move || {
        let settings = WaitSettings {
            poll_frequency: Duration::from_secs(10),
            max_wait_time: Some(Duration::from_secs(30)),
            ..WaitSettings::default()
        };
        waiter.wait("never", &settings).unwrap()
    });

    thread::sleep(Duration::from_millis(50));
    kb.shutdown().unwrap();

    let started = Instant::now();
    let result = handle.join().unwrap();
    assert!(!result.is_true());
    // The waiter observed shutdown long before its poll interval.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn many_waiters_all_wake() {
    let kb = KnowledgeBase::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let waiter = kb.clone();
        handles.push(thread::spawn(move || {
            let settings = WaitSettings {
                poll_frequency: Duration::from_millis(200),
                max_wait_time: Some(Duration::from_secs(5)),
                ..WaitSettings::default()
            };
            waiter.wait("broadcast", &settings).unwrap()
        }));
    }

    thread::sleep(Duration::from_millis(30));
    kb.set("broadcast", 1i64).unwrap();

    for handle in handles {
        assert!(handle.join().unwrap().is_true());
    }
}
