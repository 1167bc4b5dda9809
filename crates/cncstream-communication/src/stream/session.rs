//! Async driver for a stream controller
//!
//! One task owns the controller and multiplexes link reads, the status
//! poll, housekeeping and operator requests with `tokio::select!`.

use super::{HoldDecision, StreamController};
use crate::communication::{CommandOrigin, Link};
use cncstream_core::{ConnectionError, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested
    Shutdown,
    /// The job finished and the session was asked to stop with it
    JobFinished,
}

/// Operator request delivered to a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    /// Send a manual command
    Command(String),
    /// Start streaming the loaded program
    StartJob,
    /// Feed hold or resume
    Pause(bool),
    /// Abort the running job
    Abort,
    /// Soft reset
    Reset,
    /// Answer an error hold
    ResolveHold(HoldDecision),
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Drive `controller` until shutdown, link loss or, with
/// `stop_when_done`, the end of the job
pub async fn run_session<L: Link>(
    controller: &mut StreamController<L>,
    mut requests: mpsc::Receiver<SessionRequest>,
    mut shutdown: watch::Receiver<bool>,
    stop_when_done: bool,
) -> Result<SessionEnd> {
    let config = controller.config().clone();
    let mut link_poll = ticker(config.link_poll_interval);
    let mut housekeeping = ticker(config.housekeeping_interval);
    let mut status_period = controller.poll_interval();
    let mut status = ticker(status_period);

    tracing::info!("Session started on {}", controller.link().name());

    loop {
        if *shutdown.borrow() {
            tracing::info!("Shutdown requested, ending session");
            return Ok(SessionEnd::Shutdown);
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    tracing::debug!("Shutdown sender dropped");
                    return Ok(SessionEnd::Shutdown);
                }
                continue;
            }
            _ = link_poll.tick() => {
                controller.poll_link();
            }
            _ = status.tick() => {
                controller.on_status_tick();
            }
            _ = housekeeping.tick() => {
                controller.on_housekeeping_tick();
            }
            Some(request) = requests.recv() => {
                handle_request(controller, request);
            }
        }

        if !controller.link().is_open() {
            let error = controller
                .link_mut()
                .take_error()
                .unwrap_or(ConnectionError::NotOpen);
            tracing::error!("Session lost its link: {}", error);
            return Err(error.into());
        }

        if stop_when_done && !controller.is_job_active() {
            tracing::info!("Job finished, ending session");
            return Ok(SessionEnd::JobFinished);
        }

        let period = controller.poll_interval();
        if period != status_period {
            status_period = period;
            status = ticker(period);
        }
    }
}

fn handle_request<L: Link>(controller: &mut StreamController<L>, request: SessionRequest) {
    tracing::debug!("Session request: {:?}", request);
    match request {
        SessionRequest::Command(text) => {
            let echo = controller.config().echo_ui_commands;
            match controller.send_command(&text, CommandOrigin::Manual, echo) {
                Ok(()) => {}
                Err(e) if e.is_connection_error() => {
                    tracing::error!("Command '{}' lost: {}", text, e)
                }
                Err(e) => tracing::warn!("Command '{}' rejected: {}", text, e),
            }
        }
        SessionRequest::StartJob => {
            if let Err(e) = controller.start_job() {
                tracing::warn!("Job not started: {}", e);
            }
        }
        SessionRequest::Pause(on) => controller.pause(on),
        SessionRequest::Abort => controller.abort_job(),
        SessionRequest::Reset => controller.machine_reset(),
        SessionRequest::ResolveHold(decision) => controller.resolve_hold(decision),
    }
}
