//! Hardware controller input.
//!
//! The kiosk's rotary encoder and two buttons sit behind a microcontroller
//! that prints one token per line on its serial port. This module reads that
//! stream from a device path and feeds the hub the same events the keyboard
//! simulator produces. When the device is missing or goes away the hub is
//! told, clients show the simulator as active, and the relay keeps running.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use tracing::{debug, info, warn};

use crate::{
    hub::HubHandle,
    message::{ClientEvent, KnobDirection},
};

const VOTE_BUTTON: &str = "Blauwe knop ingedrukt!";
const ARROW_BUTTON: &str = "Groene knop ingedrukt!";

/// One decoded line from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    Knob(KnobDirection),
    Vote,
    Arrow,
}

impl InputSignal {
    /// Decodes a single serial line; unknown lines yield `None`.
    ///
    /// The encoder reports signed detent deltas (`+1`, `-1`); only the sign
    /// matters.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            VOTE_BUTTON => return Some(InputSignal::Vote),
            ARROW_BUTTON => return Some(InputSignal::Arrow),
            _ => {}
        }

        let delta: i64 = line.parse().ok()?;
        match delta.signum() {
            1 => Some(InputSignal::Knob(KnobDirection::Right)),
            -1 => Some(InputSignal::Knob(KnobDirection::Left)),
            _ => None,
        }
    }

    pub fn into_event(self) -> ClientEvent {
        match self {
            InputSignal::Knob(direction) => ClientEvent::SimulateKnob(direction),
            InputSignal::Vote => ClientEvent::SimulateVote,
            InputSignal::Arrow => ClientEvent::SimulateArrow,
        }
    }
}

/// Reads controller input from `path` until the device closes.
///
/// A device that cannot be opened is not an error: the hub is told input is
/// disconnected and the installation falls back to the simulator. Errors are
/// only returned when the hub itself is gone.
pub async fn run_device(path: PathBuf, hub: HubHandle) -> Result<()> {
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            warn!(
                device = %path.display(),
                error = %err,
                "input device unavailable; simulator mode"
            );
            hub.report_input_status(false)?;
            return Ok(());
        }
    };

    info!(device = %path.display(), "input device connected");
    hub.report_input_status(true)?;

    let outcome = forward_lines(&path, BufReader::new(file), &hub).await;
    info!(device = %path.display(), "input device disconnected; simulator mode");
    hub.report_input_status(false)?;
    outcome
}

async fn forward_lines<R>(path: &Path, reader: R, hub: &HubHandle) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(err) => {
                warn!(device = %path.display(), error = %err, "input device read failed");
                return Ok(());
            }
        };

        match InputSignal::parse(&line) {
            Some(signal) => {
                debug!(?signal, "input signal");
                hub.dispatch(signal.into_event())
                    .context("hub stopped while forwarding input")?;
            }
            None => debug!(line = line.trim(), "ignoring unrecognised input line"),
        }
    }
}
