//! Transport seams between the bridge core and the robot.
//!
//! The supervisor and the command multiplexer never talk to gRPC directly.
//! They go through the traits below, which the [`grpc`][crate::grpc] module
//! implements with tonic and the tests implement with in-memory channels.
//!
//! - [`FeedConnector`] – opens one server-streaming state call.
//! - [`CommandConnector`] / [`CommandSink`] – opens one client-streaming
//!   command call and writes to it without waiting.
//! - [`TaskCommander`] – sends a single unary task command.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use ponyka_proto::Any;
use ponyka_proto::robot_msgs::RobotCommandTimeStamped;
use ponyka_proto::service::CommandAck;
use ponyka_types::BridgeError;

/// Type-tagged opaque payload carried by every state response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl Envelope {
    pub fn new(type_url: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

impl From<Any> for Envelope {
    fn from(any: Any) -> Self {
        Self {
            type_url: any.type_url,
            value: any.value,
        }
    }
}

/// Live inbound feed. `Err` items and the end of the stream both mean the
/// connection is gone.
pub type EnvelopeStream = BoxStream<'static, Result<Envelope, BridgeError>>;

/// Opens server-streaming state feeds.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open one `PublishState` call against `endpoint` (`host:port`).
    async fn open(&self, endpoint: &str) -> Result<EnvelopeStream, BridgeError>;
}

/// Write half of an open client-streaming command call.
pub trait CommandSink: Send {
    /// Queue `command` for the transport without waiting for it to be sent.
    ///
    /// Returns [`BridgeError::CommandWrite`] once the underlying call is gone.
    /// A momentarily full buffer is not an error; the command is dropped.
    fn write(&mut self, command: RobotCommandTimeStamped) -> Result<(), BridgeError>;

    /// Half-close the call: no more commands follow.
    fn close(self: Box<Self>);
}

/// Opens client-streaming command calls.
pub trait CommandConnector: Send + Sync {
    /// Open one `SubscribeRobotCommand` call against `endpoint`.
    ///
    /// The connection may be established lazily; transport failures surface
    /// through later [`CommandSink::write`] calls.
    fn open(&self, endpoint: &str) -> Result<Box<dyn CommandSink>, BridgeError>;
}

/// Sends one-shot task commands.
#[async_trait]
pub trait TaskCommander: Send + Sync {
    async fn send(&self, command: RobotCommandTimeStamped) -> Result<CommandAck, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_from_any_keeps_type_and_bytes() {
        let any = Any {
            type_url: "type.googleapis.com/x.Y".to_string(),
            value: vec![1, 2, 3],
        };
        let envelope = Envelope::from(any);
        assert_eq!(envelope, Envelope::new("type.googleapis.com/x.Y", vec![1, 2, 3]));
    }
}
