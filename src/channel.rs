// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module defines the channel operations the publisher relies on, their
//! implementation on top of `lapin`, and the slot the publisher keeps its
//! cached channel in.
//!
//! A channel is either open and usable or dead. Once a declaration or a send
//! fails on it, it is discarded and never handed out again.

use crate::{errors::AmqpError, exchange::ExchangeDefinition, queue::QueueDefinition};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions, publisher_confirm::Confirmation, types::FieldTable,
    BasicProperties, Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Reply code sent to the broker when the publisher closes a channel.
const AMQP_REPLY_SUCCESS: u16 = 200;

/// Operations the publisher performs on a broker channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Reports whether the channel can no longer be used.
    fn is_closed(&self) -> bool;

    /// Declares an exchange. Declaring an existing exchange with the same flags is a no-op.
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue. Declaring an existing queue with the same flags is a no-op.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    /// Sends one message with `mandatory` and `immediate` unset.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Closes the channel on the broker side.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Source of fresh channels, implemented by the connection manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Opens a new channel, independent from every channel opened before.
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;
}

#[async_trait]
impl AmqpChannel for Channel {
    fn is_closed(&self) -> bool {
        !self.status().connected()
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("declaring exchange: {}", def.name);

        match self
            .exchange_declare(
                &def.name,
                def.kind(),
                def.declare_options(),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("declaring queue: {}", def.name);

        match self
            .queue_declare(&def.name, def.declare_options(), FieldTable::default())
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let confirm = self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?;

        confirmation_outcome(confirmation)
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Channel::close(self, AMQP_REPLY_SUCCESS, "publisher channel closed")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close the channel");
                AmqpError::ChannelError
            })
    }
}

/// Maps a publisher confirmation to the send outcome.
///
/// Without publisher confirms enabled on the channel, lapin reports
/// `NotRequested`, which counts as sent. A broker `Nack` is a send failure.
///
/// # Parameters
/// * `confirmation` - The confirmation resolved for one `basic_publish`
///
/// # Returns
/// Ok(()) when the message was accepted, or `PublishingError` on a nack
pub(crate) fn confirmation_outcome(confirmation: Confirmation) -> Result<(), AmqpError> {
    match confirmation {
        Confirmation::Nack(_) => {
            error!("message was nacked by the broker");
            Err(AmqpError::PublishingError("message nacked by the broker".to_owned()))
        }
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
    }
}

/// The publisher's cached channel.
///
/// The slot is meant to be kept behind a lock: whoever holds the guard owns
/// the decision to reuse, replace or drop the channel.
#[derive(Default)]
pub struct ChannelSlot {
    channel: Option<Arc<dyn AmqpChannel>>,
}

impl ChannelSlot {
    /// Creates an empty slot; the first `acquire` opens the channel.
    pub fn new() -> Self {
        ChannelSlot::default()
    }

    /// Returns the cached channel if it is still open, otherwise asks `factory`
    /// for a new one and caches it.
    ///
    /// # Parameters
    /// * `factory` - Source of a fresh channel when none is usable
    ///
    /// # Returns
    /// The channel to use for this attempt, or `ChannelError` when none could be opened
    pub async fn acquire(
        &mut self,
        factory: &dyn ChannelFactory,
    ) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if let Some(channel) = &self.channel {
            if !channel.is_closed() {
                return Ok(channel.clone());
            }
            debug!("cached channel is closed, requesting a new one");
        }

        self.channel = None;
        let channel = factory.create_channel().await?;
        self.channel = Some(channel.clone());

        Ok(channel)
    }

    /// Drops the cached channel, closing it on a best-effort basis.
    pub async fn discard(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close().await {
                debug!(error = err.to_string(), "ignoring close error on a discarded channel");
            }
        }
    }

    /// Closes the cached channel, if any, reporting a close failure.
    pub async fn release(&mut self) -> Result<(), AmqpError> {
        match self.channel.take() {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }

    /// Whether no channel is cached.
    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
    }
}
