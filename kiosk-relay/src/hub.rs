//! The relay hub: one worker task that owns the [`SharedState`].
//!
//! Transports never touch the state directly. They talk to the worker through
//! a cloneable [`HubHandle`], which queues commands on an mpsc channel; the
//! worker applies them strictly in arrival order, so no handler can observe
//! another one half-way through. Everything the worker wants clients to see
//! goes out on a single `broadcast` channel, which every connection
//! subscribes to when it registers.
//!
//! Two timed behaviours live in the worker's select loop as plain deadlines:
//!
//! - the knob debounce: every knob step pushes the deadline out, and only the
//!   settled position is announced as `profile-selected`;
//! - the vote window: after `vote-submitted` the overlay is dismissed with
//!   `exit-voting` once the confirmation delay has passed. A newer vote
//!   replaces the pending dismissal and toggling voting cancels it.

use std::{future, time::Duration};

use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, info};

use crate::{
    error::{HubError, Result},
    message::{ClientEvent, KnobDirection, ServerEvent, VoteSubmission},
    state::SharedState,
};

pub type ConnectionId = u64;

/// Timing and buffering knobs for a hub instance.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Quiet period after the last knob step before `profile-selected` goes out.
    pub knob_debounce: Duration,
    /// How long the vote confirmation stays up before `exit-voting`.
    pub vote_confirmation: Duration,
    /// Capacity of the fan-out channel; slower clients are resynchronised.
    pub event_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            knob_debounce: Duration::from_millis(150),
            vote_confirmation: Duration::from_millis(2000),
            event_buffer: 128,
        }
    }
}

/// What a freshly connected client receives from the hub.
pub struct Subscription {
    pub id: ConnectionId,
    pub snapshot: SharedState,
    pub input_connected: bool,
    pub events: broadcast::Receiver<ServerEvent>,
}

impl Subscription {
    /// Frames every transport sends right after the connection is accepted.
    pub fn greeting(&self) -> [ServerEvent; 2] {
        [
            ServerEvent::StateUpdate(self.snapshot),
            ServerEvent::ArduinoStatus {
                connected: self.input_connected,
            },
        ]
    }
}

/// Cloneable front door to a running hub worker.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Registers a new client and subscribes it to the broadcast stream.
    ///
    /// The subscription is created inside the worker, so the snapshot and the
    /// first broadcast the client sees are consistent with each other.
    pub async fn connect(&self) -> Result<Subscription> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Connect { respond_to })?;
        response.await.map_err(|_| HubError::Closed)
    }

    pub fn disconnect(&self, id: ConnectionId) {
        // Nothing to clean up if the hub is already gone.
        let _ = self.commands.send(HubCommand::Disconnect { id });
    }

    pub fn dispatch(&self, event: ClientEvent) -> Result<()> {
        self.send(HubCommand::Client(event))
    }

    /// Records whether the hardware input device is attached and tells every client.
    pub fn report_input_status(&self, connected: bool) -> Result<()> {
        self.send(HubCommand::InputStatus { connected })
    }

    pub async fn snapshot(&self) -> Result<SharedState> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubCommand::Snapshot { respond_to })?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Stops the worker. Connected clients see their event stream close.
    pub fn shutdown(&self) -> Result<()> {
        self.send(HubCommand::Shutdown)
    }

    fn send(&self, command: HubCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }
}

/// Starts a hub worker on the current Tokio runtime.
///
/// The worker runs until [`HubHandle::shutdown`] is called or every handle is
/// dropped; the returned join handle completes at that point.
pub fn spawn_hub(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let worker = HubWorker::new(config);
    let task = tokio::spawn(worker.run(commands_rx));
    (
        HubHandle {
            commands: commands_tx,
        },
        task,
    )
}

#[derive(Debug)]
enum HubCommand {
    Connect {
        respond_to: oneshot::Sender<Subscription>,
    },
    Disconnect {
        id: ConnectionId,
    },
    Client(ClientEvent),
    InputStatus {
        connected: bool,
    },
    Snapshot {
        respond_to: oneshot::Sender<SharedState>,
    },
    Shutdown,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("input_connected", &self.input_connected)
            .finish_non_exhaustive()
    }
}

struct HubWorker {
    config: HubConfig,
    state: SharedState,
    input_connected: bool,
    events: broadcast::Sender<ServerEvent>,
    next_connection: ConnectionId,
    knob_deadline: Option<Instant>,
    vote_deadline: Option<Instant>,
}

impl HubWorker {
    fn new(config: HubConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            state: SharedState::new(),
            input_connected: false,
            events,
            next_connection: 1,
            knob_deadline: None,
            vote_deadline: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        loop {
            select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = wait_until(self.knob_deadline) => self.settle_knob(),
                _ = wait_until(self.vote_deadline) => self.close_vote_window(),
            }
        }
        info!("relay hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Connect { respond_to } => self.register(respond_to),
            HubCommand::Disconnect { id } => info!(connection = id, "client disconnected"),
            HubCommand::Client(event) => self.handle_event(event),
            HubCommand::InputStatus { connected } => {
                info!(connected, "input device status changed");
                self.input_connected = connected;
                self.publish(ServerEvent::ArduinoStatus { connected });
            }
            HubCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.state);
            }
            HubCommand::Shutdown => return false,
        }
        true
    }

    fn register(&mut self, respond_to: oneshot::Sender<Subscription>) {
        let id = self.next_connection;
        self.next_connection += 1;

        let subscription = Subscription {
            id,
            snapshot: self.state,
            input_connected: self.input_connected,
            events: self.events.subscribe(),
        };
        if respond_to.send(subscription).is_err() {
            debug!(connection = id, "client left before registration completed");
            return;
        }
        info!(connection = id, "client connected");
    }

    fn handle_event(&mut self, event: ClientEvent) {
        debug!(event = event.name(), "client event");
        match event {
            ClientEvent::ProfileSelected {
                profile_index,
                profile,
            } => {
                // An explicit selection supersedes any knob movement still settling.
                self.knob_deadline = None;
                self.state.select_profile(profile_index);
                self.publish(ServerEvent::ProfileSelected {
                    profile_index,
                    profile,
                });
            }
            ClientEvent::ProfilesLoaded { count } => {
                self.state.set_total_profiles(count);
                if count > 0 {
                    info!(count, "profiles loaded");
                }
            }
            ClientEvent::ArtworksLoaded {
                profile_index,
                count,
            } => {
                if let Some(artwork_index) = self.state.advance_loaded_artwork(profile_index, count)
                {
                    self.publish(ServerEvent::ArtworkSelected {
                        profile_index,
                        artwork_index,
                    });
                }
            }
            ClientEvent::ArtworkSelected {
                profile_index,
                artwork_index,
            } => {
                if self.state.select_artwork(profile_index, artwork_index) {
                    self.publish(ServerEvent::ArtworkSelected {
                        profile_index,
                        artwork_index,
                    });
                }
            }
            ClientEvent::VoteSubmitted(vote) => self.submit_vote(vote),
            ClientEvent::SimulateKnob(direction) => self.turn_knob(direction),
            ClientEvent::SimulateVote => self.toggle_voting(),
            ClientEvent::SimulateArrow => self.press_arrow(),
            ClientEvent::GetCurrentArtwork {
                profile_index,
                artwork_index,
            } => self.publish(ServerEvent::GetCurrentArtwork {
                profile_index,
                artwork_index,
            }),
            ClientEvent::CurrentArtworkIndex {
                profile_index,
                artwork_index,
            } => self.publish(ServerEvent::CurrentArtworkIndex {
                profile_index,
                artwork_index,
            }),
        }
    }

    fn turn_knob(&mut self, direction: KnobDirection) {
        if !self.state.accepts_navigation() {
            debug!(?direction, "knob ignored while voting");
            return;
        }
        let Some(selected_index) = self.state.step_profile(direction) else {
            debug!(?direction, "knob ignored before profiles are loaded");
            return;
        };

        self.publish(ServerEvent::CarouselUpdate { selected_index });
        self.knob_deadline = Some(Instant::now() + self.config.knob_debounce);
    }

    fn settle_knob(&mut self) {
        self.knob_deadline = None;
        let profile_index = self.state.selected_profile_index;
        debug!(profile_index, "knob settled");

        // The knob step already applied the selection; settling only announces it.
        self.publish(ServerEvent::ProfileSelected {
            profile_index,
            profile: None,
        });
    }

    fn press_arrow(&mut self) {
        if !self.state.accepts_navigation() {
            debug!("arrow ignored while voting");
            return;
        }
        self.publish(ServerEvent::NextArtwork {
            profile_index: self.state.selected_profile_index,
            current_artwork_index: Some(self.state.selected_artwork_index),
        });
    }

    fn toggle_voting(&mut self) {
        self.vote_deadline = None;
        if self.state.toggle_voting() {
            self.publish(ServerEvent::EnterVoting {
                profile_index: self.state.selected_profile_index,
            });
        } else {
            self.publish(ServerEvent::ExitVoting);
        }
    }

    fn submit_vote(&mut self, vote: VoteSubmission) {
        info!(
            profile_id = ?vote.profile_id,
            receive_updates = vote.receive_updates,
            "vote submitted"
        );
        self.state.finish_vote();
        self.publish(ServerEvent::VoteConfirmed {
            profile_index: self.state.selected_profile_index,
        });
        self.vote_deadline = Some(Instant::now() + self.config.vote_confirmation);
    }

    fn close_vote_window(&mut self) {
        self.vote_deadline = None;
        self.publish(ServerEvent::ExitVoting);
    }

    fn publish(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            debug!("no clients connected; event dropped");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
