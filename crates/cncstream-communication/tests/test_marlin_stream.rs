//! Marlin streaming against a manually driven loopback link

use cncstream_communication::communication::{LoopbackHandle, LoopbackLink};
use cncstream_communication::firmware::{DialectKind, MachineStatus, MarlinStatus};
use cncstream_communication::stream::{
    HeightMapGrid, SegmentPath, StreamConfig, StreamController, StreamEvent, VecProgram,
};
use cncstream_core::{CoordinateReadout, Position};
use tokio::sync::broadcast;

fn marlin() -> (StreamController<LoopbackLink>, LoopbackHandle) {
    let (link, handle) = LoopbackLink::new();
    let config = StreamConfig {
        dialect: DialectKind::Marlin,
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

#[test]
fn test_homing_uses_newline_terminator() {
    let (mut controller, handle) = marlin();
    controller.home();
    assert_eq!(handle.written_text(), "G28\n");
    assert!(controller.is_homing());

    controller.on_line("ok");
    assert!(!controller.is_homing());
}

#[test]
fn test_state_and_position_lines() {
    let (mut controller, _handle) = marlin();
    assert_eq!(controller.status(), MachineStatus::Marlin(MarlinStatus::Init));

    controller.on_line("S_XYZ:5");
    assert_eq!(controller.status(), MachineStatus::Marlin(MarlinStatus::Running));

    controller.on_line("X:1.00 Y:2.00 Z:3.00 E:0.00 Count X:80 Y:160 Z:1200");
    assert_eq!(
        controller.machine_position(),
        &CoordinateReadout::new("1.00", "2.00", "3.00")
    );
}

#[test]
fn test_status_request_is_a_line() {
    let (mut controller, handle) = marlin();
    controller.on_status_tick();
    assert_eq!(handle.written_text(), "S000\n");
}

#[test]
fn test_abort_is_an_emergency_stop() {
    let (mut controller, handle) = marlin();
    let mut rx = controller.subscribe();
    controller.load_program(Box::new(VecProgram::from_lines(["G1X10F300", "G1X20"])));
    controller.start_job().unwrap();
    handle.take_written();

    controller.abort_job();
    assert_eq!(handle.take_written_lines(), vec!["M112", "M999"]);
    assert!(controller.reset_completed());
    assert!(!controller.is_resetting());
    assert!(controller.ledger().is_empty());
    assert!(!controller.is_job_active());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::ResetCompleted)));
}

#[test]
fn test_pause_tokens() {
    let (mut controller, handle) = marlin();
    controller.pause(true);
    controller.set_spindle(true);
    controller.pause(false);
    assert_eq!(handle.take_written_lines(), vec!["P000", "R000"]);
}

#[test]
fn test_m400_waits_for_acknowledgement() {
    let (mut controller, handle) = marlin();
    controller.load_program(Box::new(VecProgram::from_lines(["G1X1", "M400", "G1X2"])));
    controller.start_job().unwrap();
    assert_eq!(handle.take_written_lines(), vec!["G1X1", "M400"]);

    controller.on_line("ok");
    assert!(handle.take_written().is_empty());

    controller.on_line("ok");
    assert_eq!(handle.take_written_lines(), vec!["G1X2"]);
}

#[test]
fn test_bed_probe_fills_height_map() {
    let (mut controller, _handle) = marlin();
    let mut rx = controller.subscribe();
    controller.set_height_map(Some(HeightMapGrid::new(1, 2)));
    controller.load_program(Box::new(VecProgram::from_lines(["G29", "G29"])));
    controller.start_job().unwrap();

    controller.on_line("Bed X:0.000 Y:0.000 Z:0.250");
    controller.on_line("ok");
    controller.on_line("Bed X:10.000 Y:0.000 Z:-0.100");
    controller.on_line("ok");

    let grid = controller.height_map().unwrap();
    assert_eq!(grid.get(0, 0), Some(0.25));
    assert_eq!(grid.get(0, 1), Some(-0.1));
    assert!(grid.is_complete());

    let captured: Vec<(usize, usize)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::ProbePointCaptured { row, col, .. } => Some((row, col)),
            _ => None,
        })
        .collect();
    assert_eq!(captured, vec![(0, 0), (0, 1)]);
}

#[test]
fn test_toolpath_advances_on_acknowledgement() {
    let (mut controller, _handle) = marlin();
    let mut path = SegmentPath::new();
    path.push(0, Position::new(10.0, 0.0, 0.0));
    path.push(1, Position::new(10.0, 10.0, 0.0));
    controller.set_toolpath(Some(Box::new(path)));
    controller.load_program(Box::new(VecProgram::from_lines(["G1X10F300", "G1Y10"])));
    let mut rx = controller.subscribe();
    controller.start_job().unwrap();

    controller.on_line("X:10.00 Y:5.00 Z:0.00 E:0.00");
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::SegmentsDrawn(_))));

    controller.on_line("ok");
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::SegmentsDrawn(s) if s == &vec![0])));
}

#[test]
fn test_grbl_only_operations_are_skipped() {
    let (mut controller, handle) = marlin();
    controller.unlock();
    controller.set_check_mode(true);
    controller.jog(Position::new(1.0, 0.0, 0.0), 1.0, 500.0);
    controller.restore_origin();
    controller.set_spindle_speed(1000.0);
    controller.on_housekeeping_tick();
    assert!(handle.written().is_empty());
}

#[test]
fn test_boot_banner_during_job_clears_state() {
    let (mut controller, _handle) = marlin();
    let mut rx = controller.subscribe();
    controller.load_program(Box::new(VecProgram::from_lines(["G1X10F300", "G1X20"])));
    controller.start_job().unwrap();
    assert_eq!(controller.ledger().in_flight_len(), 2);

    controller.on_line("start");
    assert!(controller.ledger().is_empty());
    assert!(!controller.is_job_active());
    assert!(controller.reset_completed());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StreamEvent::UnexpectedReset { banner } if banner == "start")));
}
