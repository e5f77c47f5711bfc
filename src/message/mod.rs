//! Envelope types exchanged with push server, and their text wire format.
//!
//! Every envelope is a json object with a `channel` tag and an optional
//! `payload` field:
//!
//! ```json
//! {"channel": "clientRegister", "payload": {"userId": "u1", "userToken": "t1"}}
//! ```

mod types;

pub use types::{Payload, Registration};

use enum_as_inner::EnumAsInner;
use snafu::prelude::*;

/// Error when parse text data as envelope
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)), module(error), context(suffix(false)))]
pub enum ParseEnvelopeError {
    /// data is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed envelope is not object: {json}"))]
    NotObject {
        /// json string
        json: String,
    },

    /// data json has no channel field
    #[snafu(display("envelope has no channel field: {json}"))]
    NoChannel {
        /// json string
        json: String,
    },

    /// channel field is not string
    #[snafu(display("envelope has non-string channel field: {json}"))]
    ChannelNotString {
        /// json string
        json: String,
    },

    /// payload field exists but is not an object
    #[snafu(display("envelope of channel {channel} has non-object payload"))]
    PayloadNotObject {
        /// channel tag
        channel: String,
    },

    /// payload can't be parsed as the channel's payload type
    #[snafu(display("parse payload of channel {channel} failed: {source}"))]
    ParsePayloadFailed {
        /// channel tag
        channel: String,
        /// source error
        source: serde_json::Error,
    },

    /// channel tag is not known
    #[snafu(display("envelope has unknown channel {channel}"))]
    UnknownChannel {
        /// channel tag
        channel: String,
    },
}

/// Error when encode envelope to text
#[derive(Debug, Snafu)]
#[snafu(display("encode envelope of channel {channel} failed: {source}"))]
pub struct EncodeEnvelopeError {
    /// channel tag
    pub channel: String,
    /// source error
    pub source: serde_json::Error,
}

static CLIENT_REGISTER: &str = "clientRegister";
static REGISTER_OK: &str = "registerOk";
static REGISTER_FAIL: &str = "registerFail";
static SERVER_MESSAGE: &str = "serverMessage";
static SERVER_AGGREGATION: &str = "serverAggregation";

/// Push protocol envelope
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Envelope {
    /// Registration request, client -> server
    ClientRegister(Registration),
    /// Registration accepted, server -> client
    RegisterOk,
    /// Registration rejected, server -> client
    RegisterFail,
    /// Single record message, server -> client
    ServerMessage(Payload),
    /// Aggregated record message, server -> client
    ServerAggregation(Payload),
    /// Application defined envelope with channel tag and payload, client -> server
    Custom(String, Payload),
}

impl Envelope {
    /// Build a registration envelope
    pub fn register<I, C>(identity: I, credential: C) -> Self
    where
        I: Into<String>,
        C: Into<String>,
    {
        Self::ClientRegister(Registration {
            user_id: identity.into(),
            user_token: credential.into(),
        })
    }

    /// channel tag of this envelope
    pub fn channel(&self) -> &str {
        match self {
            Self::ClientRegister(_) => CLIENT_REGISTER,
            Self::RegisterOk => REGISTER_OK,
            Self::RegisterFail => REGISTER_FAIL,
            Self::ServerMessage(_) => SERVER_MESSAGE,
            Self::ServerAggregation(_) => SERVER_AGGREGATION,
            Self::Custom(channel, _) => channel.as_str(),
        }
    }

    /// Decode text data to an envelope.
    ///
    /// Missing or null payload is treated as an empty one.
    /// [`Envelope::Custom`] is outbound only, so unknown tags are errors here.
    pub fn decode(text: &str) -> Result<Self, ParseEnvelopeError> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).context(error::ParseJSONFailed)?;

        let obj = value
            .as_object_mut()
            .with_context(|| error::NotObject { json: text })?;

        let channel = obj
            .get("channel")
            .with_context(|| error::NoChannel { json: text })?
            .as_str()
            .with_context(|| error::ChannelNotString { json: text })?
            .to_string();

        let payload = match obj.remove("payload") {
            None | Some(serde_json::Value::Null) => Payload::new(),
            Some(serde_json::Value::Object(map)) => map,
            Some(_) => return error::PayloadNotObject { channel }.fail(),
        };

        log::trace!("Decoded envelope tag {}", channel);

        match channel.as_str() {
            c if c == REGISTER_OK => Ok(Self::RegisterOk),
            c if c == REGISTER_FAIL => Ok(Self::RegisterFail),
            c if c == SERVER_MESSAGE => Ok(Self::ServerMessage(payload)),
            c if c == SERVER_AGGREGATION => Ok(Self::ServerAggregation(payload)),
            c if c == CLIENT_REGISTER => {
                serde_json::from_value(serde_json::Value::Object(payload))
                    .map(Self::ClientRegister)
                    .context(error::ParsePayloadFailed { channel: &channel })
            }
            _ => error::UnknownChannel { channel: &channel }.fail(),
        }
    }

    /// Encode envelope to text data
    pub fn encode(&self) -> Result<String, EncodeEnvelopeError> {
        let payload = match self {
            Self::ClientRegister(registration) => Some(
                serde_json::to_value(registration)
                    .context(EncodeEnvelopeSnafu { channel: self.channel() })?,
            ),
            Self::ServerMessage(payload)
            | Self::ServerAggregation(payload)
            | Self::Custom(_, payload) => Some(serde_json::Value::Object(payload.clone())),
            Self::RegisterOk | Self::RegisterFail => None,
        };

        let mut obj = serde_json::Map::new();
        obj.insert(
            "channel".to_string(),
            serde_json::Value::String(self.channel().to_string()),
        );
        if let Some(payload) = payload {
            obj.insert("payload".to_string(), payload);
        }

        serde_json::to_string(&obj).context(EncodeEnvelopeSnafu { channel: self.channel() })
    }
}
