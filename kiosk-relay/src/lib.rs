//! Shared-state relay for a two-screen museum kiosk.
//!
//! A controller screen (driven by a rotary knob and two buttons) and a
//! monitor screen stay in sync through this hub. It keeps the current
//! selection, rebroadcasts every input to all connected screens, debounces
//! knob turns and dismisses the vote confirmation after a short delay.
//!
//! - [`hub`] owns the [`state::SharedState`] in a single worker task and
//!   fans events out over a Tokio `broadcast` channel.
//! - [`state`] holds the selection record and its transition rules.
//! - [`message`] defines the event catalog and the JSON line framing.
//! - [`server`] serves the line protocol over TCP; [`web`] serves the same
//!   frames over WebSocket for the browser screens.
//! - [`input`] reads the hardware controller's serial output.
//! - [`client`] is a terminal simulator that stands in for the hardware.
//! - [`cli`] and [`config`] describe how the binary is started.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod input;
pub mod message;
pub mod server;
pub mod state;
pub mod web;
