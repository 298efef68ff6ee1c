//! `ponyka-middleware` – the telemetry bridge and command multiplexer.
//!
//! Sits between the robot's gRPC services and browser clients. State flows
//! one way (robot → browsers), velocity commands the other.
//!
//! # Modules
//!
//! | Module | Role |
//! |---|---|
//! | [`decoder`] | `Any` type URL → [`DecodedState`][ponyka_types::DecodedState] registry |
//! | [`registry`] | live WebSocket subscribers, non-blocking fan-out |
//! | [`supervisor`] | one self-healing `PublishState` subscription per feed, throttled broadcast |
//! | [`command`] | single `SubscribeRobotCommand` stream re-asserting the setpoint at 20 Hz |
//! | [`transport`] | connector traits the core is written against |
//! | [`grpc`] | tonic implementations of those traits |
//! | [`ws_server`] | WebSocket push endpoint |

pub mod command;
pub mod decoder;
pub mod grpc;
pub mod registry;
pub mod supervisor;
pub mod transport;
pub mod ws_server;

pub use command::CommandMultiplexer;
pub use decoder::PayloadDecoder;
pub use grpc::{GrpcCommandConnector, GrpcFeedConnector, GrpcTaskCommander};
pub use registry::{Subscriber, SubscriberReceiver, SubscriberRegistry};
pub use supervisor::{FeedDescriptor, SessionState, StreamSupervisor};
pub use transport::{CommandConnector, CommandSink, Envelope, FeedConnector, TaskCommander};
pub use ws_server::PushServer;
