use std::time::Duration;

use thiserror::Error;

/// Errors produced by the network core.
///
/// Transient I/O and protocol errors are returned to the immediate caller;
/// retry policy belongs to the layer above. Malformed inbound traffic is
/// dropped and logged, never surfaced through this type.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    #[error("send failed: {0}")]
    SendFailure(#[from] std::io::Error),

    #[error("packet serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request cancelled before a response arrived")]
    Cancelled,

    #[error("no route to host {0}")]
    UnknownDestination(String),

    #[error("selection count {count} exceeds candidate pool of {pool}")]
    SelectionSize { count: usize, pool: usize },

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("channel already taken or closed")]
    ChannelClosed,
}
