//! Error hold, abort, reset and check mode recovery

use cncstream_communication::communication::{LoopbackHandle, LoopbackLink};
use cncstream_communication::stream::{
    HoldDecision, PollCadence, StreamConfig, StreamController, StreamEvent, VecProgram,
};
use tokio::sync::broadcast;

const BANNER: &str = "Grbl 1.1h ['$' for help]";

fn grbl(capacity: usize) -> (StreamController<LoopbackLink>, LoopbackHandle) {
    let (link, handle) = LoopbackLink::new();
    let config = StreamConfig {
        buffer_capacity: capacity,
        echo_ui_commands: false,
        ..StreamConfig::default()
    };
    (StreamController::new(link, config), handle)
}

fn drain(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn start(controller: &mut StreamController<LoopbackLink>, lines: &[&str]) {
    controller.load_program(Box::new(VecProgram::from_lines(lines.iter().copied())));
    controller.start_job().unwrap();
}

#[test]
fn test_error_holds_streaming_until_ignored() {
    let (mut controller, handle) = grbl(10);
    let mut rx = controller.subscribe();
    start(&mut controller, &["G0X1", "G1X2F100", "G0X3"]);
    assert_eq!(handle.take_written_lines(), vec!["G0X1"]);

    controller.on_line("error:20");
    assert_eq!(handle.take_written(), b"!".to_vec());
    let message = controller.hold_message().unwrap().to_string();
    assert!(message.starts_with("1: G0X1 < error:20 ("));
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::HoldRequested { .. })));

    controller.resolve_hold(HoldDecision::Ignore {
        ignore_future: false,
    });
    assert!(controller.hold_message().is_none());
    assert_eq!(handle.written_text(), "~G1X2F100\r");
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::HoldResolved)));
}

#[test]
fn test_errors_while_held_extend_the_same_hold() {
    let (mut controller, handle) = grbl(127);
    let mut rx = controller.subscribe();
    start(&mut controller, &["G0X1", "G0X2", "G0X3"]);
    handle.take_written();

    controller.on_line("error:1");
    controller.on_line("error:2");

    assert_eq!(handle.take_written(), b"!".to_vec());
    let message = controller.hold_message().unwrap();
    assert!(message.contains("1: G0X1 < error:1"));
    assert!(message.contains("2: G0X2 < error:2"));

    let events = drain(&mut rx);
    let requested = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::HoldRequested { .. }))
        .count();
    let updated = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::HoldUpdated { .. }))
        .count();
    assert_eq!((requested, updated), (1, 1));
}

#[test]
fn test_ignore_future_errors() {
    let (mut controller, handle) = grbl(127);
    start(&mut controller, &["G0X1", "G0X2"]);
    controller.on_line("error:1");
    controller.resolve_hold(HoldDecision::Ignore {
        ignore_future: true,
    });
    handle.take_written();

    controller.on_line("error:2");
    assert!(controller.hold_message().is_none());
    assert!(handle.take_written().is_empty());
    assert!(controller.config().ignore_errors);
}

#[test]
fn test_errors_on_manual_commands_do_not_hold() {
    let (mut controller, _handle) = grbl(127);
    controller
        .send_command(
            "G0X1",
            cncstream_communication::CommandOrigin::Manual,
            false,
        )
        .unwrap();
    controller.on_line("error:9");
    assert!(controller.hold_message().is_none());
}

#[test]
fn test_abort_holds_then_resets_then_restores() {
    let (mut controller, handle) = grbl(127);
    start(&mut controller, &["G1X10F100", "G1X20"]);
    controller.on_line("<Run|MPos:1.000,2.000,3.000>");
    handle.take_written();

    controller.resolve_hold(HoldDecision::Abort);
    assert!(!controller.is_aborting());

    controller.abort_job();
    assert!(controller.is_aborting());
    assert_eq!(handle.take_written(), b"!".to_vec());

    // Reset once two reports show the machine standing still
    controller.on_line("<Hold:1|MPos:1.400,2.000,3.000>");
    controller.on_line("<Hold:0|MPos:1.500,2.000,3.000>");
    assert!(handle.take_written().is_empty());
    controller.on_line("<Hold:0|MPos:1.500,2.000,3.000>");
    assert_eq!(handle.take_written(), vec![0x18]);
    assert!(controller.is_resetting());
    assert!(!controller.reset_completed());
    assert!(!controller.is_job_active());
    assert_eq!(controller.cadence(), PollCadence::Fast);

    // Anything before the banner is dropped
    controller.on_line("ok");
    assert_eq!(controller.ledger().in_flight_len(), 1);

    controller.on_line(BANNER);
    assert!(controller.reset_completed());
    assert!(!controller.is_resetting());
    assert!(controller.ledger().is_empty());
    assert_eq!(controller.cadence(), PollCadence::Normal);

    controller.on_line("<Idle|MPos:1.500,2.000,3.000>");
    assert!(!controller.is_aborting());
    assert_eq!(
        handle.take_written_lines(),
        vec!["G21G53G90X1.5Y2Z3", "G21G92X1.5Y2Z3"]
    );
}

#[test]
fn test_commands_refused_while_reset_pending() {
    let (mut controller, _handle) = grbl(127);
    controller.machine_reset();
    let result = controller.send_command(
        "G0X1",
        cncstream_communication::CommandOrigin::Manual,
        false,
    );
    assert!(result.is_err());
}

#[test]
fn test_unexpected_reset_is_idempotent() {
    let (mut controller, _handle) = grbl(127);
    let mut rx = controller.subscribe();
    start(&mut controller, &["G0X1", "G0X2", "G0X3"]);
    controller.on_line("ok");

    controller.on_line(BANNER);
    let once = controller.job_progress().clone();
    assert!(controller.ledger().is_empty());
    assert!(!controller.is_job_active());
    assert!(controller.reset_completed());
    assert!(once.transfer_completed);
    assert_eq!(once.command_index, 0);

    controller.on_line(BANNER);
    assert_eq!(controller.job_progress(), &once);
    assert!(controller.ledger().is_empty());
    assert_eq!(controller.cadence(), PollCadence::Normal);

    let events = drain(&mut rx);
    let resets = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::UnexpectedReset { .. }))
        .count();
    assert_eq!(resets, 2);
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::PollCadenceChanged(_))));
}

#[test]
fn test_check_mode_round_trip_restores_parser_state() {
    let (mut controller, handle) = grbl(127);

    // A reset asks for fresh spindle and parser state
    controller.machine_reset();
    controller.on_line(BANNER);
    handle.take_written();
    controller.on_housekeeping_tick();
    assert_eq!(handle.take_written_lines(), vec!["S0", "$G"]);
    controller.on_line("ok");
    controller.on_line("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
    controller.on_line("ok");
    assert_eq!(
        controller.parser_state(),
        "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]"
    );

    controller.set_check_mode(true);
    assert_eq!(controller.stored_parser_state(), "G54 G17 G21 G90 G94 M9 T0");
    assert_eq!(handle.take_written_lines(), vec!["$C"]);
    controller.on_line("[MSG:Enabled]");
    controller.on_line("ok");
    assert_eq!(controller.cadence(), PollCadence::CheckMode);

    controller.set_check_mode(false);
    assert_eq!(handle.take_written(), vec![0x18]);
    controller.on_line(BANNER);
    controller.on_line("<Idle|MPos:0.000,0.000,0.000>");
    assert_eq!(
        handle.take_written_lines(),
        vec!["G21G53G90X0Y0Z0", "G21G92X0Y0Z0", "G54 G17 G21 G90 G94 M9 T0"]
    );
}

#[test]
fn test_housekeeping_skipped_while_homing() {
    let (mut controller, handle) = grbl(127);
    controller.home();
    assert_eq!(handle.take_written_lines(), vec!["$H"]);
    assert!(controller.is_homing());

    controller.on_housekeeping_tick();
    assert!(handle.take_written().is_empty());

    controller.on_line("ok");
    assert!(!controller.is_homing());
    controller.on_housekeeping_tick();
    assert_eq!(handle.take_written_lines(), vec!["S0"]);
}

#[test]
fn test_write_failure_is_reported() {
    let (mut controller, handle) = grbl(127);
    let mut rx = controller.subscribe();
    handle.set_fail_writes(true);

    let result = controller.send_command(
        "G0X1",
        cncstream_communication::CommandOrigin::Manual,
        false,
    );
    assert!(result.is_err());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::TransportError(_))));
}

#[test]
fn test_oversized_last_line_still_lets_the_job_finish() {
    let (mut controller, handle) = grbl(10);
    let mut rx = controller.subscribe();
    start(&mut controller, &["G0X1", "G1X100Y100Z100"]);
    assert_eq!(handle.take_written(), b"G0X1\r!".to_vec());
    let message = controller.hold_message().unwrap();
    assert!(message.starts_with("2: G1X100Y100Z100 < Buffer overflow"));

    controller.on_line("ok");
    assert!(controller.job_progress().transfer_completed);
    assert_eq!(controller.job_progress().processed_index, 1);

    controller.resolve_hold(HoldDecision::Ignore {
        ignore_future: false,
    });
    assert_eq!(handle.take_written(), b"~".to_vec());

    controller.on_line("<Run|MPos:1.000,0.000,0.000>");
    controller.on_line("<Idle|MPos:1.000,0.000,0.000>");
    assert!(!controller.is_job_active());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::LineAcknowledged { index: 1, response } if response.starts_with("Buffer overflow")
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::JobCompleted { .. })));
}

#[test]
fn test_oversized_line_skipped_when_ignoring_errors() {
    let (link, handle) = LoopbackLink::new();
    let config = StreamConfig {
        buffer_capacity: 10,
        ignore_errors: true,
        echo_ui_commands: false,
        ..StreamConfig::default()
    };
    let mut controller = StreamController::new(link, config);
    start(&mut controller, &["G1X100Y100Z100", "G0X1"]);

    assert!(controller.hold_message().is_none());
    assert_eq!(handle.take_written_lines(), vec!["G0X1"]);
    assert!(!controller.job_progress().transfer_completed);

    controller.on_line("ok");
    assert!(controller.job_progress().transfer_completed);
    controller.on_line("<Run|MPos:1.000,0.000,0.000>");
    controller.on_line("<Idle|MPos:1.000,0.000,0.000>");
    assert!(!controller.is_job_active());
}
