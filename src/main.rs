use anyhow::{bail, Context};
use clap::Parser;
use cncstream::init_logging;
use cncstream_communication::communication::AutoReply;
use cncstream_communication::stream::VecProgram;
use cncstream_communication::{
    run_session, DialectKind, HoldDecision, IoLink, Link, LoopbackLink, SessionEnd,
    SessionRequest, StreamController, StreamEvent,
};
use cncstream_settings::StreamSettings;
use std::net::TcpStream;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, watch};

/// Stream a G-code program to a CNC controller
#[derive(Parser, Debug)]
#[command(name = "cncstream", version, about)]
struct Cli {
    /// G-code program to stream
    program: PathBuf,

    /// Settings file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Firmware dialect, overrides the settings file
    #[arg(short, long)]
    dialect: Option<String>,

    /// Connect over TCP, e.g. 192.168.1.20:23
    #[arg(long, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Connect to a serial port, e.g. /dev/ttyUSB0
    #[arg(long)]
    serial: Option<String>,

    /// Serial baud rate, overrides the settings file
    #[arg(long)]
    baud: Option<u32>,

    /// Keep streaming when the controller reports an error
    #[arg(long)]
    ignore_errors: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json)?;

    let mut settings = match &cli.config {
        Some(path) => StreamSettings::load_from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => StreamSettings::default(),
    };
    if let Some(name) = &cli.dialect {
        settings.dialect = name.parse::<DialectKind>()?;
    }
    if let Some(baud) = cli.baud {
        settings.connection.baud_rate = baud;
    }
    if cli.ignore_errors {
        settings.ignore_errors = true;
    }

    let text = std::fs::read_to_string(&cli.program)
        .with_context(|| format!("reading {}", cli.program.display()))?;
    let program = VecProgram::parse(&text);
    tracing::info!(
        "Loaded {} lines from {}",
        program.lines().len(),
        cli.program.display()
    );

    if let Some(address) = &cli.tcp {
        let stream =
            TcpStream::connect(address).with_context(|| format!("connecting to {}", address))?;
        stream_program(IoLink::tcp(stream)?, program, &settings).await
    } else if let Some(port) = &cli.serial {
        let link = IoLink::open_serial(port, settings.connection.baud_rate)
            .with_context(|| format!("opening {}", port))?;
        stream_program(link, program, &settings).await
    } else {
        tracing::info!("No link given, streaming to a simulated controller");
        let reply = match settings.dialect {
            DialectKind::Grbl => AutoReply::Grbl,
            DialectKind::Marlin => AutoReply::Marlin,
        };
        let (link, _machine) = LoopbackLink::with_auto_reply(reply);
        stream_program(link, program, &settings).await
    }
}

async fn stream_program<L: Link>(
    link: L,
    program: VecProgram,
    settings: &StreamSettings,
) -> anyhow::Result<()> {
    let mut controller = StreamController::new(link, settings.stream_config());
    let events = controller.subscribe();
    let (requests_tx, requests) = mpsc::channel(16);
    let (shutdown_tx, shutdown) = watch::channel(false);

    let reporter = tokio::spawn(report_events(events, requests_tx));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted");
            let _ = shutdown_tx.send(true);
        }
    });

    controller.load_program(Box::new(program));
    controller.start_job().context("starting job")?;

    let end = run_session(&mut controller, requests, shutdown, true).await;
    let progress = controller.job_progress().clone();
    if end.as_ref().is_ok_and(|end| *end == SessionEnd::Shutdown) {
        controller.abort_job();
    }
    drop(controller);

    let held = reporter.await.context("event reporter")?;
    match end.context("streaming session")? {
        SessionEnd::Shutdown => bail!("interrupted at line {}", progress.command_index),
        SessionEnd::JobFinished if held => {
            bail!("aborted after a controller error at line {}", progress.command_index)
        }
        SessionEnd::JobFinished => {
            tracing::info!("Streamed {} lines", progress.command_index);
            Ok(())
        }
    }
}

/// Log events until the controller goes away. Error holds abort the job.
/// Returns whether a hold happened.
async fn report_events(
    mut events: broadcast::Receiver<StreamEvent>,
    requests: mpsc::Sender<SessionRequest>,
) -> bool {
    let mut held = false;
    loop {
        match events.recv().await {
            Ok(StreamEvent::HoldRequested { message }) => {
                tracing::error!("Controller error, aborting:\n{}", message);
                held = true;
                let _ = requests
                    .send(SessionRequest::ResolveHold(HoldDecision::Abort))
                    .await;
            }
            Ok(event @ StreamEvent::AlarmRaised { .. }) => tracing::error!("{}", event),
            Ok(event @ (StreamEvent::JobStarted { .. } | StreamEvent::JobCompleted { .. })) => {
                tracing::info!("{}", event)
            }
            Ok(event) => tracing::debug!("{}", event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Event reporter skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => return held,
        }
    }
}
