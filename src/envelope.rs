// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! Derives the broker metadata of a message from its payload.
//!
//! If the payload is a JSON object with a string `messageId` field, that value
//! becomes both the AMQP `message-id` property and the `x-message-id` header,
//! since not every broker-side deduplication path reads the same field.
//! Any other payload simply carries no identifier. The `message-id` property
//! is an AMQP short string, so identifiers longer than 255 bytes are only sent
//! in the header.
//!
//! Every message also carries an `x-timestamp` header with the Unix time in
//! seconds. Consumers may use it as an ordering hint only.

use lapin::{
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::warn;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode for messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
/// Header duplicating the message identifier
pub const AMQP_HEADERS_MESSAGE_ID: &str = "x-message-id";
/// Header carrying the publish time in Unix seconds
pub const AMQP_HEADERS_TIMESTAMP: &str = "x-timestamp";
/// Longest value an AMQP short string can encode
pub const AMQP_SHORT_STRING_MAX_LEN: usize = 255;

/// Metadata read from the payload itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvelopeMetadata {
    #[serde(rename = "messageId", default)]
    message_id: Option<Value>,
}

impl EnvelopeMetadata {
    /// Reads the metadata of `payload`; anything that is not a JSON object
    /// decodes to empty metadata.
    pub fn decode(payload: &[u8]) -> EnvelopeMetadata {
        match serde_json::from_slice::<Value>(payload) {
            Ok(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
            _ => EnvelopeMetadata::default(),
        }
    }

    /// The non-empty string `messageId`, if the payload had one.
    pub fn message_id(&self) -> Option<&str> {
        match &self.message_id {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Broker metadata of one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    message_id: Option<String>,
    timestamp: i64,
}

impl Envelope {
    /// Builds the envelope of an already decoded payload.
    ///
    /// # Parameters
    /// * `metadata` - Metadata decoded from the payload
    /// * `timestamp` - Publish time in Unix seconds
    ///
    /// # Returns
    /// The envelope to attach to the message
    pub fn new(metadata: &EnvelopeMetadata, timestamp: i64) -> Envelope {
        Envelope {
            message_id: metadata.message_id().map(str::to_owned),
            timestamp,
        }
    }

    /// Decodes `payload` and builds its envelope.
    ///
    /// # Parameters
    /// * `payload` - The raw message body; anything but a JSON object yields no id
    /// * `timestamp` - Publish time in Unix seconds
    ///
    /// # Returns
    /// The envelope to attach to the message
    pub fn derive(payload: &[u8], timestamp: i64) -> Envelope {
        Envelope::new(&EnvelopeMetadata::decode(payload), timestamp)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// AMQP properties for this envelope. `headers` may already hold entries,
    /// such as trace propagation fields; the envelope headers are added to them.
    pub fn properties(&self, mut headers: BTreeMap<ShortString, AMQPValue>) -> BasicProperties {
        if let Some(id) = &self.message_id {
            headers.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_ID),
                AMQPValue::LongString(LongString::from(id.as_str())),
            );
        }
        headers.insert(
            ShortString::from(AMQP_HEADERS_TIMESTAMP),
            AMQPValue::LongLongInt(self.timestamp),
        );

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_headers(FieldTable::from(headers));

        match &self.message_id {
            Some(id) if id.len() <= AMQP_SHORT_STRING_MAX_LEN => {
                properties.with_message_id(ShortString::from(id.as_str()))
            }
            Some(id) => {
                warn!(
                    length = id.len(),
                    "message id too long for the message-id property, sent as header only"
                );
                properties
            }
            None => properties,
        }
    }
}

/// Wall clock in Unix seconds.
pub trait Clock: Send + Sync {
    fn unix_now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// Timestamps that never go backwards, even if the underlying clock does.
pub struct MonotonicTimestamps {
    clock: Box<dyn Clock>,
    last: AtomicI64,
}

impl MonotonicTimestamps {
    /// # Parameters
    /// * `clock` - Wall clock the timestamps are read from
    pub fn new(clock: Box<dyn Clock>) -> Self {
        MonotonicTimestamps {
            clock,
            last: AtomicI64::new(i64::MIN),
        }
    }

    /// Current Unix time, or the last returned value if the clock went back.
    pub fn next(&self) -> i64 {
        let now = self.clock.unix_now();
        let previous = self.last.fetch_max(now, Ordering::AcqRel);
        previous.max(now)
    }
}

impl Default for MonotonicTimestamps {
    fn default() -> Self {
        MonotonicTimestamps::new(Box::new(SystemClock))
    }
}
