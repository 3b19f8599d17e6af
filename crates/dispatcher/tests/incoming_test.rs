use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use bulksend_dispatcher::duplicate_detector::{DuplicateDetector, DuplicateKind};
use bulksend_dispatcher::incoming::{IncomingDecision, IncomingMessageGate};

const PHONE: &str = "0722000111";

#[test]
fn test_new_message_is_accepted_and_registered() {
    let detector = Arc::new(DuplicateDetector::default());
    let gate = IncomingMessageGate::new(detector.clone());

    let decision = gate.accept("STOP", PHONE, Utc::now());
    assert_eq!(decision, IncomingDecision::Accepted);
    assert_eq!(detector.len(), 1);
}

#[test]
fn test_carrier_retransmission_is_rejected() {
    let detector = Arc::new(DuplicateDetector::default());
    let gate = IncomingMessageGate::new(detector.clone());
    let t0 = Utc::now();

    assert!(gate.accept("Please call me back", PHONE, t0).is_accepted());

    let decision = gate.accept("Please call me back", PHONE, t0 + Duration::seconds(3));
    match decision {
        IncomingDecision::Rejected(check) => assert_eq!(check.kind, DuplicateKind::Exact),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(detector.recent_count(PHONE), 1);
}

#[test]
fn test_similar_message_is_accepted_with_warning() {
    let detector = Arc::new(DuplicateDetector::default());
    let gate = IncomingMessageGate::new(detector.clone());
    let t0 = Utc::now();

    gate.accept("Sent Ksh 250 for airtime", PHONE, t0);
    let decision = gate.accept("Airtime purchase of KES 250.00 complete", PHONE, t0 + Duration::minutes(2));

    assert!(matches!(decision, IncomingDecision::AcceptedSimilar(_)));
    assert!(decision.is_accepted());
    assert_eq!(detector.len(), 2);
}

#[test]
fn test_gate_shares_history_with_outgoing_path() {
    let detector = Arc::new(DuplicateDetector::default());
    let gate = IncomingMessageGate::new(detector.clone());
    let t0 = Utc::now();

    // 发送路径登记的两条消息
    detector.register("Your order shipped", PHONE, t0);
    detector.register("Your order arrived", PHONE, t0 + Duration::seconds(20));

    let decision = gate.accept("ok thanks", PHONE, t0 + Duration::seconds(40));
    assert!(matches!(
        decision,
        IncomingDecision::Rejected(ref check) if check.kind == DuplicateKind::Burst
    ));
}

#[test]
fn test_concurrent_identical_messages_accept_exactly_one() {
    let received_at = Utc::now();

    for _ in 0..200 {
        let detector = Arc::new(DuplicateDetector::default());
        let gate = Arc::new(IncomingMessageGate::new(detector.clone()));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    gate.accept("Confirm payment ref QK7HX2M9PL", PHONE, received_at)
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(IncomingDecision::is_accepted)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(detector.recent_count(PHONE), 1);
    }
}
