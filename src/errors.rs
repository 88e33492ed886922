// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Publisher
//!
//! This module provides the error taxonomy of the publishing layer.
//! Channel, declaration and send failures are recovered inside the publisher
//! by discarding the channel and retrying; callers only ever observe
//! `PublishRetriesExhausted`, or an interruption of their own context.

use thiserror::Error;

/// Represents errors that can occur while publishing to RabbitMQ.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// A usable channel could not be obtained from the connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// The broker rejected the message or the connection dropped mid-send
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Every attempt failed; `source` is the error of the last one
    #[error("publish failed after {attempts} attempts")]
    PublishRetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AmqpError>,
    },

    /// The caller cancelled the publish
    #[error("publish cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the publish completed
    #[error("publish deadline exceeded")]
    DeadlineExceeded,
}

impl AmqpError {
    /// Name of the failure class, as reported in the attempt logs.
    pub fn classification(&self) -> &'static str {
        match self {
            AmqpError::InternalError => "Internal",
            AmqpError::ConnectionError | AmqpError::ChannelError => "ChannelUnavailable",
            AmqpError::DeclareExchangeError(_) | AmqpError::DeclareQueueError(_) => {
                "TopologyDeclarationFailed"
            }
            AmqpError::PublishingError(_) => "SendFailed",
            AmqpError::PublishRetriesExhausted { .. } => "PublishExhausted",
            AmqpError::Cancelled => "Cancelled",
            AmqpError::DeadlineExceeded => "DeadlineExceeded",
        }
    }

    /// Whether another attempt on a fresh channel may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AmqpError::ConnectionError
                | AmqpError::ChannelError
                | AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::PublishingError(_)
        )
    }
}
