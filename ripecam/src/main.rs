use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use ripecam::{
    config::{CameraArgs, ServiceArgs},
    session::{Command, Event, Session},
    terminal::TerminalSurface,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::{self, UnboundedSender},
};

const HELP: &str = "Commands:
  on             power the camera on
  off            power the camera off
  capture, c     capture one frame and detect
  auto           detect every interval
  stop           stop auto-detect
  toggle, t      start or stop auto-detect
  upload <path>  upload a file to the service
  status         show status and controls
  help           show this help
  quit           exit";

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    #[clap(flatten)]
    service: ServiceArgs,

    #[clap(flatten)]
    camera: CameraArgs,

    /// Auto-detect period in milliseconds
    #[clap(long, default_value_t = 3000)]
    poll_ms: u64,

    /// Directory the latest annotated image is written to
    #[clap(long)]
    output_dir: Option<PathBuf>,

    /// Power the camera on at startup
    #[clap(long)]
    power_on: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let service = Arc::new(
        args.service
            .connect()
            .with_context(|| format!("Failed to set up client for {}", &args.service.server))?,
    );
    log::info!("Using detection service at {}", &args.service.server);

    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        service,
        Box::new(args.camera.opener()),
        TerminalSurface::new(args.output_dir.clone()),
        tx.clone(),
    )
    .with_interval(Duration::from_millis(args.poll_ms));

    if args.power_on {
        // A failure is shown and the camera stays off
        session.power_on().ok();
    }

    println!("{HELP}");
    tokio::spawn(read_commands(BufReader::new(tokio::io::stdin()), tx));

    session.run(rx).await;

    Ok(())
}

/// Forward commands read line by line to the session. End of input or a read error quits.
async fn read_commands<R: AsyncBufRead + Unpin>(input: R, tx: UnboundedSender<Event>) {
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                log::error!("Failed to read commands: {}", err);
                break;
            }
        };
        match line.trim() {
            "" => continue,
            "help" | "?" => println!("{HELP}"),
            line => match line.parse::<Command>() {
                Ok(command) => {
                    // Stop reading on quit, a pending stdin read would block runtime shutdown
                    let quit = command == Command::Quit;
                    if tx.send(Event::Command(command)).is_err() || quit {
                        return;
                    }
                }
                Err(err) => println!("{err}, type `help` for commands"),
            },
        }
    }

    tx.send(Event::Command(Command::Quit)).ok();
}

#[cfg(test)]
mod test {

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn commands(rx: &mut UnboundedReceiver<Event>) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Command(command) = event {
                commands.push(command);
            }
        }
        commands
    }

    #[tokio::test]
    async fn test_end_of_input_quits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_commands(&b"on\n\nbogus\ncapture\n"[..], tx).await;

        assert_eq!(
            commands(&mut rx),
            vec![Command::PowerOn, Command::Capture, Command::Quit]
        );
    }

    #[tokio::test]
    async fn test_stops_after_quit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_commands(&b"status\nquit\nstatus\n"[..], tx).await;

        assert_eq!(commands(&mut rx), vec![Command::Status, Command::Quit]);
    }

    #[tokio::test]
    async fn test_unreadable_input_quits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_commands(&b"status\n\xff\xfe\nstatus\n"[..], tx).await;

        assert_eq!(commands(&mut rx), vec![Command::Status, Command::Quit]);
    }
}
