//! The bidirectional channel to the remote voice agent.
//!
//! The engine never talks to a transport directly: it goes through the
//! [`AgentChannel`] trait, which decouples the session state machine from
//! any particular implementation and lets tests drive it with a fake
//! channel.

pub mod protocol;
pub mod ws;

use async_trait::async_trait;

use crate::error::Result;

pub use protocol::{
    AgentEvent, AudioPayload, ClientMessage, OutboundAudio, SetupMessage, parse_server_message,
};
pub use ws::WsConnector;

/// An open bidirectional channel.
#[async_trait]
pub trait AgentChannel: Send {
    /// Send one message to the agent.
    ///
    /// # Errors
    /// `SessionError::Transport` when the channel is gone.
    async fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Next inbound event.
    ///
    /// `None` means the channel is finished. `Some(Err(_))` is a non-fatal
    /// `Protocol` error for one malformed message; the caller drops it and
    /// keeps reading. A transport-level failure is reported as
    /// `AgentEvent::Closed` so the close reason travels with it.
    async fn next_event(&mut self) -> Option<Result<AgentEvent>>;

    /// Close the channel. Idempotent.
    async fn close(&mut self);
}

/// Opens channels to the agent service.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Open a channel and deliver `setup` as the first message.
    ///
    /// # Errors
    /// `SessionError::Transport` when the handshake fails.
    async fn connect(&self, setup: SetupMessage) -> Result<Box<dyn AgentChannel>>;
}
