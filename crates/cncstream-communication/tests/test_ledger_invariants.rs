//! Property tests for the command ledger
//!
//! Whatever sequence of enqueues and acknowledgements arrives:
//! 1. In-flight usage never exceeds the budget.
//! 2. Usage equals the sum of in-flight wire lengths.
//! 3. Acknowledgements complete commands in submission order.
//! 4. Parked commands are never overtaken.

use cncstream_communication::communication::{
    ledger::wire_length, CommandLedger, CommandOrigin, Enqueued, QueuedCommand,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Send(String),
    Ack,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => "[A-Z0-9]{1,24}".prop_map(Op::Send),
        2 => Just(Op::Ack),
    ]
}

proptest! {
    #[test]
    fn budget_and_order_hold(capacity in 8usize..=64, ops in prop::collection::vec(op_strategy(), 1..120)) {
        let mut ledger = CommandLedger::new(capacity);
        let mut submitted: Vec<String> = Vec::new();
        let mut completed: Vec<String> = Vec::new();

        for op in ops {
            match op {
                Op::Send(text) => {
                    let command = QueuedCommand::new(text.clone(), CommandOrigin::Manual, false);
                    match ledger.try_enqueue(command) {
                        Ok(Enqueued::Accepted(_)) | Ok(Enqueued::Queued) => submitted.push(text),
                        Err(_) => prop_assert!(wire_length(&text) > capacity),
                    }
                }
                Op::Ack => {
                    if let Ok((done, _)) = ledger.complete_oldest("ok") {
                        completed.push(done.text);
                    }
                    ledger.drain_queue_into_ledger();
                }
            }

            let in_flight: usize = ledger.in_flight().map(|p| p.wire_length).sum();
            prop_assert_eq!(ledger.current_budget_usage(), in_flight);
            prop_assert!(ledger.current_budget_usage() <= capacity);
        }

        let remaining: Vec<String> = ledger
            .in_flight()
            .map(|p| p.text.clone())
            .chain(ledger.queued().map(|q| q.text.clone()))
            .collect();
        let mut order = completed;
        order.extend(remaining);
        prop_assert_eq!(order, submitted);
    }

    #[test]
    fn backlog_drains_in_order(capacity in 10usize..=40, texts in prop::collection::vec("[A-Z]{1,8}", 1..30)) {
        let mut ledger = CommandLedger::new(capacity);
        for text in &texts {
            ledger
                .try_enqueue(QueuedCommand::new(text.clone(), CommandOrigin::Manual, false))
                .unwrap();
        }

        let mut completed = Vec::new();
        while let Ok((done, _)) = ledger.complete_oldest("ok") {
            completed.push(done.text);
            ledger.drain_queue_into_ledger();
        }
        prop_assert!(ledger.is_empty());
        prop_assert_eq!(completed, texts);
    }
}

#[test]
fn terminator_without_command_is_a_violation() {
    let mut ledger = CommandLedger::new(127);
    ledger.append_fragment("[MSG:stray]");
    assert!(ledger.complete_oldest("ok").is_err());
    assert_eq!(ledger.partial_response(), "");
}

#[test]
fn oversized_command_is_rejected() {
    let mut ledger = CommandLedger::new(10);
    let result = ledger.try_enqueue(QueuedCommand::new("G1X100Y100", CommandOrigin::Manual, false));
    assert!(result.is_err());
    assert!(ledger.is_empty());
}
