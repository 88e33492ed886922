// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Resilient RabbitMQ Publisher
//!
//! This module provides the publisher applications use to send messages to
//! RabbitMQ. Each publish is retried on a fresh channel when the broker
//! restarts, a channel goes stale or the network drops, and only reports an
//! error once every attempt has failed.
//!
//! One attempt runs these steps while holding the channel slot lock:
//! 1. acquire the cached channel, or a new one from the connection manager
//! 2. declare the queue or topic exchange of the target
//! 3. derive the envelope: message id, timestamp and trace headers
//! 4. send the message as persistent JSON
//!
//! A failure in step 2 or 4 discards the channel. The lock is released
//! between attempts, so the retry delay never blocks other callers.

use crate::{
    channel::{ChannelFactory, ChannelSlot},
    configs::Configs,
    context::PublishContext,
    envelope::{Envelope, EnvelopeMetadata, MonotonicTimestamps},
    errors::AmqpError,
    otel,
    retry::{RetryPolicy, Sleeper, TokioSleeper},
    topology::PublishTarget,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Publishing operations exposed to application code.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `payload` to `exchange` with `routing_key`.
    ///
    /// An empty `exchange` publishes straight to the queue named `routing_key`;
    /// any other value publishes to that topic exchange.
    async fn publish(
        &self,
        ctx: &PublishContext,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError>;

    /// Publishes `payload` to the queue `queue` through the default exchange.
    async fn publish_to_queue(
        &self,
        ctx: &PublishContext,
        queue: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError> {
        self.publish(ctx, "", queue, payload).await
    }

    /// Releases the publisher's channel. The connection stays open.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Publisher trait.
pub struct RabbitMQPublisher {
    channels: Arc<dyn ChannelFactory>,
    slot: Mutex<ChannelSlot>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    timestamps: MonotonicTimestamps,
}

impl RabbitMQPublisher {
    /// Creates a publisher with the default retry policy: three attempts,
    /// one second apart.
    ///
    /// No channel is opened until the first publish, so the publisher can be
    /// built while the broker is still unreachable.
    pub fn new(channels: Arc<dyn ChannelFactory>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher::builder(channels).build())
    }

    /// Creates a publisher retrying as described by the `publisher` settings.
    pub fn with_configs(
        channels: Arc<dyn ChannelFactory>,
        cfg: &Configs,
    ) -> Arc<RabbitMQPublisher> {
        Arc::new(
            RabbitMQPublisher::builder(channels)
                .retry_policy(cfg.publisher.retry_policy())
                .build(),
        )
    }

    /// Starts building a publisher with custom retry, sleep or clock behavior.
    ///
    /// # Parameters
    /// * `channels` - Source of channels, usually the `ConnectionManager`
    ///
    /// # Returns
    /// A builder preset with the default retry policy, the tokio timer and the system clock
    pub fn builder(channels: Arc<dyn ChannelFactory>) -> RabbitMQPublisherBuilder {
        RabbitMQPublisherBuilder {
            channels,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            timestamps: MonotonicTimestamps::default(),
        }
    }

    /// The policy every publish of this publisher retries with.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(
        &self,
        ctx: &PublishContext,
        target: PublishTarget<'_>,
        payload: &[u8],
        metadata: &EnvelopeMetadata,
        attempt: u32,
    ) -> Result<(), AmqpError> {
        let message_id = metadata.message_id().unwrap_or_default();
        let mut slot = self.slot.lock().await;

        let channel = slot.acquire(self.channels.as_ref()).await.map_err(|err| {
            warn!(
                destination = %target,
                message_id,
                attempt,
                classification = err.classification(),
                error = err.to_string(),
                "publisher channel unavailable"
            );
            err
        })?;

        if let Err(err) = target.declare(channel.as_ref()).await {
            warn!(
                destination = %target,
                message_id,
                attempt,
                classification = err.classification(),
                error = err.to_string(),
                "failure to declare topology, discarding channel"
            );
            slot.discard().await;
            return Err(err);
        }

        let envelope = Envelope::new(metadata, self.timestamps.next());
        let properties = envelope.properties(otel::trace_headers(&ctx.trace));

        if let Err(err) = channel
            .publish(target.exchange(), target.routing_key(), payload, properties)
            .await
        {
            warn!(
                destination = %target,
                message_id,
                attempt,
                classification = err.classification(),
                error = err.to_string(),
                "failure to publish message, discarding channel"
            );
            slot.discard().await;
            return Err(err);
        }

        info!(destination = %target, message_id, attempt, "message published");
        Ok(())
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(
        &self,
        ctx: &PublishContext,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError> {
        let target = PublishTarget::new(exchange, routing_key);
        let metadata = EnvelopeMetadata::decode(payload);

        self.policy
            .run(ctx, self.sleeper.as_ref(), |n| {
                self.attempt(ctx, target, payload, &metadata, n)
            })
            .await
            .map_err(|err| {
                error!(
                    destination = %target,
                    message_id = metadata.message_id().unwrap_or_default(),
                    classification = err.classification(),
                    error = err.to_string(),
                    cause = ?std::error::Error::source(&err).map(|s| s.to_string()),
                    "error publishing message"
                );
                err
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing publisher channel");
        self.slot.lock().await.release().await.map_err(|err| {
            error!(error = err.to_string(), "error closing publisher channel");
            err
        })
    }
}

/// Builder for a publisher with a custom retry policy, sleeper or clock.
pub struct RabbitMQPublisherBuilder {
    channels: Arc<dyn ChannelFactory>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    timestamps: MonotonicTimestamps,
}

impl RabbitMQPublisherBuilder {
    /// Sets the policy deciding how often and how far apart attempts are made.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how the publisher waits between attempts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the source of the `x-timestamp` header.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn timestamps(mut self, timestamps: MonotonicTimestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Creates the publisher, without opening any channel yet.
    pub fn build(self) -> RabbitMQPublisher {
        RabbitMQPublisher {
            channels: self.channels,
            slot: Mutex::new(ChannelSlot::new()),
            policy: self.policy,
            sleeper: self.sleeper,
            timestamps: self.timestamps,
        }
    }
}
