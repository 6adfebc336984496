//! Dispatcher error types

use thiserror::Error;

/// Transport failures reported by a channel
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Channel misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}

/// Dispatcher errors
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Delivery sink error: {0}")]
    Sink(String),

    #[error("Invalid dispatcher config: {0}")]
    Config(String),
}
