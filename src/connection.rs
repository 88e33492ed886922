// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! The connection manager owns the single process-wide connection to
//! RabbitMQ and hands out fresh channels on demand. It performs no
//! reconnection of its own: a broken connection surfaces as a channel
//! creation failure, which the publisher treats as a failed attempt.

use crate::{
    channel::{AmqpChannel, ChannelFactory},
    configs::Configs,
    errors::AmqpError,
};
use async_trait::async_trait;
use lapin::{types::LongString, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Owner of the connection to the RabbitMQ server.
pub struct ConnectionManager {
    conn: Connection,
}

impl ConnectionManager {
    /// Connects to RabbitMQ using the broker settings in `cfg`.
    ///
    /// The connection is named after the application so it can be told apart
    /// in the broker's management tools.
    pub async fn connect(cfg: &Configs) -> Result<Arc<ConnectionManager>, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.app.name.clone()));

        let conn = match Connection::connect(&cfg.rabbitmq.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
        }?;
        debug!("amqp connected");

        Ok(Arc::new(ConnectionManager { conn }))
    }

    /// Reports whether the underlying AMQP connection is still open.
    ///
    /// # Returns
    /// `false` once the broker or the network dropped the connection
    pub fn is_connected(&self) -> bool {
        self.conn.status().connected()
    }

    /// Closes the connection, and with it every channel opened on it.
    pub async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing amqp connection...");
        self.conn
            .close(200, "connection manager shutdown")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close the connection");
                AmqpError::ConnectionError
            })
    }
}

#[async_trait]
impl ChannelFactory for ConnectionManager {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if !self.is_connected() {
            error!("amqp connection is not available");
            return Err(AmqpError::ChannelError);
        }

        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!(id = c.id(), "channel created");
                Ok(Arc::new(c))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }
}
