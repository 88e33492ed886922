// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Targets and Their Topology
//!
//! A publish names an exchange and a routing key. An empty exchange means the
//! broker's default exchange, where the routing key is a queue name: the
//! publisher then declares that queue. A named exchange is declared as a
//! durable topic exchange instead. The two paths never mix.
//!
//! Declarations are idempotent and run before every send, so a queue or
//! exchange removed behind the publisher's back is recreated on the next
//! publish.

use crate::{
    channel::AmqpChannel, errors::AmqpError, exchange::ExchangeDefinition, queue::QueueDefinition,
};
use std::fmt;

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTarget<'t> {
    /// Default exchange, routed straight to the queue `name`.
    Queue { name: &'t str },
    /// Named topic exchange with a topic routing key.
    Exchange { name: &'t str, routing_key: &'t str },
}

impl<'t> PublishTarget<'t> {
    /// Resolves the target of a publish.
    ///
    /// # Parameters
    /// * `exchange` - Exchange name, empty for the default exchange
    /// * `routing_key` - Queue name on the default exchange, topic key otherwise
    pub fn new(exchange: &'t str, routing_key: &'t str) -> PublishTarget<'t> {
        if exchange.is_empty() {
            PublishTarget::Queue { name: routing_key }
        } else {
            PublishTarget::Exchange {
                name: exchange,
                routing_key,
            }
        }
    }

    /// Exchange name as sent on the wire; empty for the default exchange.
    pub fn exchange(&self) -> &'t str {
        match *self {
            PublishTarget::Queue { .. } => "",
            PublishTarget::Exchange { name, .. } => name,
        }
    }

    pub fn routing_key(&self) -> &'t str {
        match *self {
            PublishTarget::Queue { name } => name,
            PublishTarget::Exchange { routing_key, .. } => routing_key,
        }
    }

    /// Declares the topology this target needs on `channel`: a durable,
    /// non-exclusive queue, or a durable, non-auto-deleted, non-internal topic
    /// exchange.
    pub async fn declare(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        match *self {
            PublishTarget::Queue { name } => {
                channel
                    .declare_queue(&QueueDefinition::new(name).durable())
                    .await
            }
            PublishTarget::Exchange { name, .. } => {
                channel
                    .declare_exchange(&ExchangeDefinition::topic(name).durable())
                    .await
            }
        }
    }
}

impl fmt::Display for PublishTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishTarget::Queue { name } => write!(f, "queue `{}`", name),
            PublishTarget::Exchange { name, routing_key } => {
                write!(f, "exchange `{}` with key `{}`", name, routing_key)
            }
        }
    }
}
