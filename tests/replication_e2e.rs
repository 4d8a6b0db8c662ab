//! Replication through the in-process channel fabric: evaluate on one
//! knowledge base, observe on another, converge under conflicts.

use std::time::Duration;

use karl_kb::{ChannelHub, EvalSettings, KnowledgeBase, UpdateSettings, WaitSettings};

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn eventually(kb: &KnowledgeBase, expr: &str) -> bool {
    let settings = WaitSettings {
        poll_frequency: Duration::from_millis(10),
        max_wait_time: Some(Duration::from_secs(5)),
        ..WaitSettings::default()
    };
    kb.wait(expr, &settings).unwrap().is_true()
}

#[test]
fn evaluation_propagates_to_peers() {
    init_logs();
    let hub = ChannelHub::default();
    let alice = KnowledgeBase::with_id("alice");
    let bob = KnowledgeBase::with_id("bob");
    let _ta = alice.connect(&hub).unwrap();
    let _tb = bob.connect(&hub).unwrap();

    alice.evaluate("position = 7; heading = 90").unwrap();

    assert!(eventually(&bob, "position == 7 && heading == 90"));
    // Propagated records keep the sender's shared clock stamp.
    let position = bob.get("position").unwrap();
    let heading = bob.get("heading").unwrap();
    assert_eq!(position.clock, heading.clock);

    alice.shutdown().unwrap();
    bob.shutdown().unwrap();
}

#[test]
fn local_keys_never_leave_the_process() {
    let hub = ChannelHub::default();
    let alice = KnowledgeBase::with_id("alice");
    let bob = KnowledgeBase::with_id("bob");
    let _ta = alice.connect(&hub).unwrap();
    let _tb = bob.connect(&hub).unwrap();

    alice.evaluate(".secret = 41; shared = 1").unwrap();

    assert!(eventually(&bob, "shared"));
    assert!(bob.get(".secret").unwrap().value.is_uncreated());

    alice.shutdown().unwrap();
    bob.shutdown().unwrap();
}

#[test]
fn waiters_wake_on_remote_updates() {
    let hub = ChannelHub::default();
    let alice = KnowledgeBase::with_id("alice");
    let bob = KnowledgeBase::with_id("bob");
    let _ta = alice.connect(&hub).unwrap();
    let _tb = bob.connect(&hub).unwrap();

    let waiter = bob.clone();
    let handle = std::thread::spawn(move || {
        let settings = WaitSettings {
            poll_frequency: Duration::from_millis(250),
            max_wait_time: Some(Duration::from_secs(5)),
            ..WaitSettings::default()
        };
        waiter.wait("barrier.alice", &settings).unwrap()
    });

    std::thread::sleep(Duration::from_millis(30));
    alice.evaluate("barrier.alice = 1").unwrap();

    assert!(handle.join().unwrap().is_true());
    alice.shutdown().unwrap();
    bob.shutdown().unwrap();
}

#[test]
fn concurrent_writers_converge() {
    let hub = ChannelHub::default();
    let alice = KnowledgeBase::with_id("alice");
    let bob = KnowledgeBase::with_id("bob");
    let _ta = alice.connect(&hub).unwrap();
    let _tb = bob.connect(&hub).unwrap();

    // Both sides write the same key before either delivery lands; the
    // conflict rule decides one winner for both replicas.
    alice.evaluate("target = 10").unwrap();
    bob.evaluate("target = 20").unwrap();

    let settings = WaitSettings {
        poll_frequency: Duration::from_millis(10),
        max_wait_time: Some(Duration::from_secs(5)),
        ..WaitSettings::default()
    };
    // Convergence: both replicas settle on the same value.
    let converged = |a: &KnowledgeBase, b: &KnowledgeBase| {
        let x = a.get("target").unwrap();
        let y = b.get("target").unwrap();
        x.value == y.value && x.clock == y.clock
    };
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !converged(&alice, &bob) && std::time::Instant::now() < deadline {
        std::thread::sleep(settings.poll_frequency);
    }
    assert!(converged(&alice, &bob));

    alice.shutdown().unwrap();
    bob.shutdown().unwrap();
}

#[test]
fn delayed_modifieds_batch_until_flushed() {
    let hub = ChannelHub::default();
    let alice = KnowledgeBase::with_id("alice");
    let bob = KnowledgeBase::with_id("bob");
    let _ta = alice.connect(&hub).unwrap();
    let _tb = bob.connect(&hub).unwrap();

    alice
        .evaluate_with("staged.a = 1; staged.b = 2", &EvalSettings::delayed())
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(bob.get("staged.a").unwrap().value.is_uncreated());

    alice.send_modifieds().unwrap();
    assert!(eventually(&bob, "staged.a == 1 && staged.b == 2"));

    alice.shutdown().unwrap();
    bob.shutdown().unwrap();
}

#[test]
fn three_replicas_share_one_fabric() {
    let hub = ChannelHub::default();
    let nodes: Vec<KnowledgeBase> = ["a", "b", "c"]
        .iter()
        .map(|id| KnowledgeBase::with_id(*id))
        .collect();
    let transports: Vec<_> = nodes.iter().map(|n| n.connect(&hub).unwrap()).collect();

    nodes[0].evaluate("round = 1").unwrap();
    for node in &nodes[1..] {
        assert!(eventually(node, "round == 1"));
    }

    nodes[2].evaluate("round = 2").unwrap();
    for node in &nodes[..2] {
        assert!(eventually(node, "round == 2"));
    }

    drop(transports);
    for node in &nodes {
        node.shutdown().unwrap();
    }
}

#[test]
fn stale_clocks_lose_on_every_replica() {
    let hub = ChannelHub::default();
    let sensor = KnowledgeBase::with_id("sensor");
    let display = KnowledgeBase::with_id("display");
    let _ts = sensor.connect(&hub).unwrap();
    let _td = display.connect(&hub).unwrap();

    // The display writes at a low clock while the sensor jumps far ahead;
    // whichever delivery order happens, the higher clock wins everywhere.
    display.evaluate("temperature = 0").unwrap();
    sensor
        .set_with(
            "temperature",
            21i64,
            &UpdateSettings {
                clock_increment: 100,
                ..UpdateSettings::default()
            },
        )
        .unwrap();
    sensor.evaluate("published = 1").unwrap();

    assert!(eventually(&display, "temperature == 21 && published"));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(sensor.get("temperature").unwrap().as_integer(), 21);

    sensor.shutdown().unwrap();
    display.shutdown().unwrap();
}
