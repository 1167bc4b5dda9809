//! Async session driver against an auto-replying loopback controller

use cncstream_communication::communication::{AutoReply, LoopbackLink};
use cncstream_communication::stream::{
    run_session, SessionEnd, SessionRequest, StreamConfig, StreamController, VecProgram,
};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

const IDLE: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";
const RUN: &str = "<Run|MPos:1.000,0.000,0.000|FS:100,0>";

fn fast_config() -> StreamConfig {
    StreamConfig {
        status_poll_interval: Duration::from_millis(5),
        link_poll_interval: Duration::from_millis(2),
        housekeeping_interval: Duration::from_secs(60),
        ..StreamConfig::default()
    }
}

#[tokio::test]
async fn test_session_streams_job_to_completion() {
    let (link, handle) = LoopbackLink::with_auto_reply(AutoReply::Grbl);
    handle.set_status_report(RUN);
    let mut controller = StreamController::new(link, fast_config());
    controller.load_program(Box::new(VecProgram::parse(
        "G21\nG0 X1 Y1\nG1 X2 F100 ; cut\nM5\n",
    )));
    controller.start_job().unwrap();

    let machine = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        machine.set_status_report(IDLE);
    });

    let (_requests_tx, requests) = mpsc::channel(8);
    let (_shutdown_tx, shutdown) = watch::channel(false);
    let end = timeout(
        Duration::from_secs(5),
        run_session(&mut controller, requests, shutdown, true),
    )
    .await
    .expect("session did not finish")
    .unwrap();

    assert_eq!(end, SessionEnd::JobFinished);
    assert!(controller.job_progress().transfer_completed);
    assert!(controller.ledger().is_empty());
    let written = handle.written_text();
    assert!(written.contains("G21\rG0 X1 Y1\rG1 X2 F100\rM5\r"));
}

#[tokio::test]
async fn test_session_handles_requests_until_shutdown() {
    let (link, handle) = LoopbackLink::with_auto_reply(AutoReply::Grbl);
    let mut controller = StreamController::new(link, fast_config());

    let (requests_tx, requests) = mpsc::channel(8);
    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        requests_tx
            .send(SessionRequest::Command("g0 x5".to_string()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
    });

    let end = timeout(
        Duration::from_secs(5),
        run_session(&mut controller, requests, shutdown, false),
    )
    .await
    .expect("session did not stop")
    .unwrap();

    assert_eq!(end, SessionEnd::Shutdown);
    assert!(handle.written_text().contains("G0 X5\r"));
    assert!(controller.ledger().is_empty());
}

#[tokio::test]
async fn test_session_fails_when_link_drops() {
    let (link, handle) = LoopbackLink::with_auto_reply(AutoReply::Grbl);
    let mut controller = StreamController::new(link, fast_config());

    let machine = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        machine.disconnect();
    });

    let (_requests_tx, requests) = mpsc::channel(8);
    let (_shutdown_tx, shutdown) = watch::channel(false);
    let result = timeout(
        Duration::from_secs(5),
        run_session(&mut controller, requests, shutdown, false),
    )
    .await
    .expect("session did not notice the dropped link");

    assert!(result.is_err());
}
