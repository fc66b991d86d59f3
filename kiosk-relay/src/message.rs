use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::state::SharedState;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Direction of a single knob detent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum KnobDirection {
    Left,
    Right,
}

/// Payload the controller sends once a visitor confirms a vote.
///
/// The hub never inspects these fields; they are only logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_email: Option<String>,
    #[serde(default)]
    pub receive_updates: bool,
}

/// Events a controller, monitor or input adapter sends to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    ProfileSelected {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<Value>,
    },
    ProfilesLoaded {
        count: u32,
    },
    ArtworksLoaded {
        profile_index: u32,
        count: u32,
    },
    ArtworkSelected {
        profile_index: u32,
        artwork_index: u32,
    },
    VoteSubmitted(VoteSubmission),
    SimulateKnob(KnobDirection),
    SimulateVote,
    SimulateArrow,
    GetCurrentArtwork {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artwork_index: Option<u32>,
    },
    CurrentArtworkIndex {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artwork_index: Option<u32>,
    },
}

impl ClientEvent {
    /// Wire name of the event, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::ProfileSelected { .. } => "profile-selected",
            ClientEvent::ProfilesLoaded { .. } => "profiles-loaded",
            ClientEvent::ArtworksLoaded { .. } => "artworks-loaded",
            ClientEvent::ArtworkSelected { .. } => "artwork-selected",
            ClientEvent::VoteSubmitted(_) => "vote-submitted",
            ClientEvent::SimulateKnob(_) => "simulate-knob",
            ClientEvent::SimulateVote => "simulate-vote",
            ClientEvent::SimulateArrow => "simulate-arrow",
            ClientEvent::GetCurrentArtwork { .. } => "get-current-artwork",
            ClientEvent::CurrentArtworkIndex { .. } => "current-artwork-index",
        }
    }
}

/// Events the hub fans out to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    StateUpdate(SharedState),
    ArduinoStatus {
        connected: bool,
    },
    ProfileSelected {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<Value>,
    },
    ArtworkSelected {
        profile_index: u32,
        artwork_index: u32,
    },
    CarouselUpdate {
        selected_index: u32,
    },
    NextArtwork {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_artwork_index: Option<u32>,
    },
    EnterVoting {
        profile_index: u32,
    },
    ExitVoting,
    VoteConfirmed {
        profile_index: u32,
    },
    GetCurrentArtwork {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artwork_index: Option<u32>,
    },
    CurrentArtworkIndex {
        profile_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artwork_index: Option<u32>,
    },
}

/// Reads newline-delimited JSON frames from a buffered stream.
///
/// The partially received line is kept inside the reader, so [`FrameReader::next_frame`]
/// can sit in a `select!` next to other branches without losing bytes when
/// another branch wins.
pub struct FrameReader<R> {
    lines: Lines<R>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next decoded frame, or `None` once the peer closes the stream.
    ///
    /// Cancel safe. A frame that fails to decode is reported as
    /// [`io::ErrorKind::InvalidData`] and the reader stays usable.
    pub async fn next_frame<T>(&mut self) -> io::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        // Blank lines are keep-alives.
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };

            let trimmed = line.trim_end_matches(LINE_ENDINGS);
            if trimmed.is_empty() {
                continue;
            }

            let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
            return Ok(Some(parsed));
        }
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
