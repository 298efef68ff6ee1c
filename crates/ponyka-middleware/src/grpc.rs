//! tonic implementations of the transport seams.
//!
//! The robot's services are called through `tonic::client::Grpc` directly,
//! with the method paths from [`ponyka_proto::rpc`] and a `prost` codec, so
//! no generated client code is needed. All calls are plaintext HTTP/2; the
//! robot sits on a private network.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, future};
use ponyka_proto::robot_msgs::RobotCommandTimeStamped;
use ponyka_proto::rpc;
use ponyka_proto::service::{CommandAck, StateRequest, StateResponse};
use ponyka_types::BridgeError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tonic_prost::ProstCodec;
use tracing::{debug, error, info};

use crate::transport::{
    CommandConnector, CommandSink, Envelope, EnvelopeStream, FeedConnector, TaskCommander,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UNARY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound command buffer; a tick that finds it full is skipped.
pub const DEFAULT_COMMAND_BUFFER: usize = 8;

/// Parse `host:port` (or a full `http://` URI) into a tonic endpoint.
pub fn endpoint(address: &str) -> Result<Endpoint, BridgeError> {
    let uri = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| BridgeError::Config(format!("invalid gRPC endpoint {address}: {e}")))?;
    Ok(endpoint.connect_timeout(CONNECT_TIMEOUT))
}

fn status_error(call: &str, status: Status) -> BridgeError {
    BridgeError::Connection(format!("{call}: {:?}: {}", status.code(), status.message()))
}

async fn ready_client(channel: Channel, call: &str) -> Result<tonic::client::Grpc<Channel>, BridgeError> {
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| BridgeError::Connection(format!("{call}: service was not ready: {e}")))?;
    Ok(grpc)
}

// ---------------------------------------------------------------------------
// PublishState
// ---------------------------------------------------------------------------

/// Opens `dtService.PublishState` server streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcFeedConnector;

#[async_trait]
impl FeedConnector for GrpcFeedConnector {
    async fn open(&self, address: &str) -> Result<EnvelopeStream, BridgeError> {
        let channel = endpoint(address)?
            .connect()
            .await
            .map_err(|e| BridgeError::Connection(format!("connect {address}: {e}")))?;
        let mut grpc = ready_client(channel, rpc::PUBLISH_STATE).await?;

        let codec: ProstCodec<StateRequest, StateResponse> = ProstCodec::default();
        let response = grpc
            .server_streaming(
                Request::new(StateRequest {}),
                PathAndQuery::from_static(rpc::PUBLISH_STATE),
                codec,
            )
            .await
            .map_err(|status| status_error(rpc::PUBLISH_STATE, status))?;

        debug!(endpoint = %address, "PublishState stream open");
        let stream = response.into_inner().filter_map(|item| {
            future::ready(match item {
                Ok(StateResponse { state: Some(any) }) => Some(Ok(Envelope::from(any))),
                // an empty response carries nothing to route
                Ok(StateResponse { state: None }) => None,
                Err(status) => Some(Err(status_error(rpc::PUBLISH_STATE, status))),
            })
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// SubscribeRobotCommand
// ---------------------------------------------------------------------------

/// Opens `Nav.SubscribeRobotCommand` client streams over a lazily
/// connected channel.
#[derive(Debug, Clone, Copy)]
pub struct GrpcCommandConnector {
    buffer: usize,
}

impl GrpcCommandConnector {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }
}

impl Default for GrpcCommandConnector {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_BUFFER)
    }
}

impl CommandConnector for GrpcCommandConnector {
    fn open(&self, address: &str) -> Result<Box<dyn CommandSink>, BridgeError> {
        let channel = endpoint(address)?.connect_lazy();
        let (tx, rx) = mpsc::channel(self.buffer);
        let address = address.to_string();

        tokio::spawn(async move {
            let mut grpc = match ready_client(channel, rpc::SUBSCRIBE_ROBOT_COMMAND).await {
                Ok(grpc) => grpc,
                Err(e) => {
                    error!(endpoint = %address, error = %e, "command stream could not start");
                    return;
                }
            };
            let codec: ProstCodec<RobotCommandTimeStamped, CommandAck> = ProstCodec::default();
            let result = grpc
                .client_streaming(
                    Request::new(ReceiverStream::new(rx)),
                    PathAndQuery::from_static(rpc::SUBSCRIBE_ROBOT_COMMAND),
                    codec,
                )
                .await;
            match result {
                Ok(response) => {
                    let ack = response.into_inner();
                    info!(endpoint = %address, success = ack.success, message = %ack.message, "command stream closed by robot");
                }
                Err(status) => {
                    error!(endpoint = %address, error = %status_error(rpc::SUBSCRIBE_ROBOT_COMMAND, status), "command stream failed");
                }
            }
        });

        Ok(Box::new(GrpcCommandSink { tx }))
    }
}

/// Write half of a `SubscribeRobotCommand` call. Dropping it ends the
/// request stream.
#[derive(Debug)]
pub struct GrpcCommandSink {
    tx: mpsc::Sender<RobotCommandTimeStamped>,
}

impl CommandSink for GrpcCommandSink {
    fn write(&mut self, command: RobotCommandTimeStamped) -> Result<(), BridgeError> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("command buffer full; tick skipped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(BridgeError::CommandWrite("command stream is closed".to_string()))
            }
        }
    }

    fn close(self: Box<Self>) {}
}

// ---------------------------------------------------------------------------
// RobotCommand
// ---------------------------------------------------------------------------

/// Sends unary `dtService.RobotCommand` task commands.
#[derive(Debug, Clone)]
pub struct GrpcTaskCommander {
    address: String,
}

impl GrpcTaskCommander {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TaskCommander for GrpcTaskCommander {
    async fn send(&self, command: RobotCommandTimeStamped) -> Result<CommandAck, BridgeError> {
        let channel = endpoint(&self.address)?
            .timeout(UNARY_TIMEOUT)
            .connect()
            .await
            .map_err(|e| BridgeError::Connection(format!("connect {}: {e}", self.address)))?;
        let mut grpc = ready_client(channel, rpc::ROBOT_COMMAND).await?;

        let codec: ProstCodec<RobotCommandTimeStamped, CommandAck> = ProstCodec::default();
        let response = grpc
            .unary(
                Request::new(command),
                PathAndQuery::from_static(rpc::ROBOT_COMMAND),
                codec,
            )
            .await
            .map_err(|status| status_error(rpc::ROBOT_COMMAND, status))?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_gets_http_scheme() {
        let ep = endpoint("192.168.10.9:50053").unwrap();
        assert_eq!(ep.uri().scheme_str(), Some("http"));
        assert_eq!(ep.uri().host(), Some("192.168.10.9"));
        assert_eq!(ep.uri().port_u16(), Some(50053));

        let ep = endpoint("http://robot.local:50056").unwrap();
        assert_eq!(ep.uri().host(), Some("robot.local"));
    }

    #[test]
    fn malformed_address_is_a_config_error() {
        assert!(matches!(endpoint("bad host:port"), Err(BridgeError::Config(_))));
    }

    #[test]
    fn sink_reports_closed_stream() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = GrpcCommandSink { tx };
        assert!(sink.write(RobotCommandTimeStamped::default()).is_ok());

        drop(rx);
        assert!(matches!(
            sink.write(RobotCommandTimeStamped::default()),
            Err(BridgeError::CommandWrite(_))
        ));
    }

    #[test]
    fn full_sink_skips_instead_of_failing() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = GrpcCommandSink { tx };
        sink.write(RobotCommandTimeStamped::default()).unwrap();
        sink.write(RobotCommandTimeStamped::default()).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_the_sink_ends_the_request_stream() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink: Box<dyn CommandSink> = Box::new(GrpcCommandSink { tx });
        sink.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_feed_is_a_connection_error() {
        // nothing listens on the discard port locally
        let result = GrpcFeedConnector.open("127.0.0.1:9").await;
        assert!(matches!(result, Err(BridgeError::Connection(_))));
    }
}
