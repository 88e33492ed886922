// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Resilient RabbitMQ publishing: a connection manager that hands out
//! channels, and a publisher that declares its topology, derives
//! deduplication headers and retries on fresh channels.

mod otel;

pub mod channel;
pub mod configs;
pub mod connection;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod topology;

pub use connection::ConnectionManager;
pub use context::PublishContext;
pub use errors::AmqpError;
pub use publisher::{Publisher, RabbitMQPublisher};
