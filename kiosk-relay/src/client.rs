use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::SimulateArgs,
    message::{ClientEvent, FrameReader, KnobDirection, ServerEvent, write_message},
};

/// A line typed into the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatorCommand {
    Send(ClientEvent),
    Quit,
}

impl SimulatorCommand {
    /// Parses `left`, `right`, `vote`, `arrow` (or their first letter),
    /// `load <count>` and `/quit`. Returns `None` for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        let mut words = input.split_whitespace();
        let command = words.next()?.to_ascii_lowercase();
        let event = match command.as_str() {
            "/quit" => return Some(SimulatorCommand::Quit),
            "left" | "l" => ClientEvent::SimulateKnob(KnobDirection::Left),
            "right" | "r" => ClientEvent::SimulateKnob(KnobDirection::Right),
            "vote" | "v" => ClientEvent::SimulateVote,
            "arrow" | "a" => ClientEvent::SimulateArrow,
            "load" => ClientEvent::ProfilesLoaded {
                count: words.next()?.parse().ok()?,
            },
            _ => return None,
        };
        Some(SimulatorCommand::Send(event))
    }
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    let (mut frames, mut writer) = establish_connection(&args).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut frames, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &SimulateArgs,
) -> Result<(FrameReader<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((FrameReader::new(BufReader::new(reader)), writer))
}

// Both reads are cancel safe: partial lines stay buffered in `frames` and `stdin`.
async fn run_client_loop(
    frames: &mut FrameReader<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    loop {
        select! {
            server_message = frames.next_frame::<ServerEvent>() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_input(line, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(message: io::Result<Option<ServerEvent>>) -> Result<bool> {
    match message {
        Ok(Some(event)) => {
            write_stdout(&render_server_event(&event)).await?;
            Ok(true)
        }
        Ok(None) => {
            write_stdout("*** relay closed the connection").await?;
            Ok(false)
        }
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            warn!(error = %err, "ignoring undecodable relay frame");
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

async fn handle_stdin_input(
    line: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(input) = line? else {
        return Ok(false);
    };

    let text = input.trim();
    if text.is_empty() {
        return Ok(true);
    }

    match SimulatorCommand::parse(text) {
        Some(SimulatorCommand::Quit) => {
            write_stdout("*** leaving simulator").await?;
            Ok(false)
        }
        Some(SimulatorCommand::Send(event)) => {
            write_message(writer, &event).await?;
            Ok(true)
        }
        None => {
            write_stderr(&format!(
                "!!! unknown command '{text}' (left, right, vote, arrow, load <n>, /quit)"
            ))
            .await?;
            Ok(true)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown simulator writer cleanly");
    }
}

/// One terminal line per relay event.
pub fn render_server_event(event: &ServerEvent) -> String {
    match event {
        ServerEvent::StateUpdate(state) => format!(
            "*** state: profile {} artwork {} voting {} of {} profiles",
            state.selected_profile_index,
            state.selected_artwork_index,
            state.is_voting,
            state.total_profiles
        ),
        ServerEvent::ArduinoStatus { connected: true } => {
            "*** input device connected".to_string()
        }
        ServerEvent::ArduinoStatus { connected: false } => {
            "*** input device disconnected, simulator active".to_string()
        }
        ServerEvent::ProfileSelected { profile_index, .. } => {
            format!("profile-selected {profile_index}")
        }
        ServerEvent::ArtworkSelected {
            profile_index,
            artwork_index,
        } => format!("artwork-selected {profile_index}/{artwork_index}"),
        ServerEvent::CarouselUpdate { selected_index } => {
            format!("carousel-update {selected_index}")
        }
        ServerEvent::NextArtwork {
            profile_index,
            current_artwork_index,
        } => match current_artwork_index {
            Some(artwork) => format!("next-artwork {profile_index}/{artwork}"),
            None => format!("next-artwork {profile_index}"),
        },
        ServerEvent::EnterVoting { profile_index } => format!("enter-voting {profile_index}"),
        ServerEvent::ExitVoting => "exit-voting".to_string(),
        ServerEvent::VoteConfirmed { profile_index } => format!("vote-confirmed {profile_index}"),
        ServerEvent::GetCurrentArtwork { profile_index, .. } => {
            format!("get-current-artwork {profile_index}")
        }
        ServerEvent::CurrentArtworkIndex {
            profile_index,
            artwork_index,
        } => match artwork_index {
            Some(artwork) => format!("current-artwork-index {profile_index}/{artwork}"),
            None => format!("current-artwork-index {profile_index}"),
        },
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
