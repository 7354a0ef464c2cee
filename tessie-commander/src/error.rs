//! Error types for the commander
//!
//! Each failure class has its own type so the scheduler can branch on the
//! kind of failure instead of on control flow:
//! - transport failures talking to a node
//! - submission failures tagged with the protocol step that broke
//! - fan-out input errors
//! - discovery startup errors
//! - output collection errors

use std::net::SocketAddr;
use thiserror::Error;

/// One request/response exchange with a node failed.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The exchange could not be completed (connect, timeout, body read)
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The node answered with a non-success status
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },

    /// The node answered but the body was not what the endpoint promises
    #[error("could not decode response from {endpoint}: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

impl TransportError {
    pub fn request(endpoint: &'static str, source: reqwest::Error) -> Self {
        TransportError::Request { endpoint, source }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, TransportError::Status { .. })
    }
}

/// Position in the ordered submission sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStep {
    UploadBinary,
    UploadPayload(String),
    SendArgument,
    Execute,
}

impl std::fmt::Display for SubmitStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitStep::UploadBinary => f.write_str("binary upload"),
            SubmitStep::UploadPayload(name) => write!(f, "payload upload '{}'", name),
            SubmitStep::SendArgument => f.write_str("argument"),
            SubmitStep::Execute => f.write_str("execute"),
        }
    }
}

/// A task handoff aborted at `step`; later steps were not attempted.
#[derive(Error, Debug)]
#[error("submission failed at {step}: {source}")]
pub struct SubmitError {
    pub step: SubmitStep,
    #[source]
    pub source: TransportError,
}

/// Payload and argument lists cannot be paired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanOutError {
    #[error(
        "mismatched number of payloads ({payloads}) and arguments ({arguments}); provide equal numbers of each"
    )]
    Mismatched { payloads: usize, arguments: usize },
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The discovery socket could not be opened; fatal for the discovery phase
    #[error("failed to bind discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to write output artifact: {0}")]
    Io(#[from] std::io::Error),
}
