// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Context
//!
//! Per-call context handed to the publisher: the OpenTelemetry context to
//! propagate, plus the caller's cancellation token and optional deadline.
//! Broker calls and retry delays abort as soon as the context is done.

use crate::errors::AmqpError;
use opentelemetry::Context;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PublishContext {
    pub(crate) trace: Context,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl PublishContext {
    pub fn new(trace: Context) -> Self {
        PublishContext {
            trace,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context carrying the currently active OpenTelemetry context.
    pub fn current() -> Self {
        PublishContext::new(Context::current())
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_done(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves once the caller cancelled or the deadline elapsed.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancellation.cancelled().await,
        }
    }

    /// Error describing why the context is done.
    pub fn interruption(&self) -> AmqpError {
        if self.cancellation.is_cancelled() {
            AmqpError::Cancelled
        } else {
            AmqpError::DeadlineExceeded
        }
    }
}

impl Default for PublishContext {
    fn default() -> Self {
        PublishContext::new(Context::new())
    }
}
