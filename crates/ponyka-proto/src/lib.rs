//! `ponyka-proto` – wire schema of the robot's gRPC services.
//!
//! These are the `dtproto` messages the robot speaks, written out as `prost`
//! derives so the workspace builds without `protoc`. Module layout follows
//! the proto packages:
//!
//! | Module | Proto package | Contents |
//! |---|---|---|
//! | [`std_msgs`] | `dtproto.std_msgs` | ROS-style `Header` / `Time` |
//! | [`geometry_msgs`] | `dtproto.geometry_msgs` | `Point`, `Quaternion`, `Pose`, SE(2) velocity |
//! | [`robot_msgs`] | `dtproto.robot_msgs` | robot state, robot command, `ControlCmd` |
//! | [`dualarm`] | `dtproto.dualarm` | operation state |
//! | [`service`] | `dtproto` | `PublishState` request/response, command ack |
//!
//! [`rpc`] holds the method paths used by the hand-rolled tonic clients and
//! [`type_url`] the `google.protobuf.Any` identifiers carried in state feeds.

pub use prost_types::{Any, Timestamp};

/// `google.protobuf.Any` type identifiers of the state feeds.
pub mod type_url {
    pub const ROBOT_STATE: &str = "type.googleapis.com/dtproto.robot_msgs.RobotStateTimeStamped";
    pub const OPERATION_STATE: &str =
        "type.googleapis.com/dtproto.dualarm.OperationStateTimeStamped";
}

/// Fully-qualified gRPC method paths.
pub mod rpc {
    /// `dtService.PublishState` – server-streaming state feed.
    pub const PUBLISH_STATE: &str = "/dtproto.dtService/PublishState";
    /// `dtService.RobotCommand` – unary task command.
    pub const ROBOT_COMMAND: &str = "/dtproto.dtService/RobotCommand";
    /// `quadruped.Nav.SubscribeRobotCommand` – client-streaming nav commands.
    pub const SUBSCRIBE_ROBOT_COMMAND: &str = "/dtproto.quadruped.Nav/SubscribeRobotCommand";
}

pub mod std_msgs {
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Time {
        #[prost(int32, tag = "1")]
        pub sec: i32,
        #[prost(uint32, tag = "2")]
        pub nanosec: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Header {
        #[prost(message, optional, tag = "1")]
        pub stamp: ::core::option::Option<Time>,
        #[prost(string, tag = "2")]
        pub frame_id: ::prost::alloc::string::String,
    }
}

pub mod geometry_msgs {
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Point {
        #[prost(double, tag = "1")]
        pub x: f64,
        #[prost(double, tag = "2")]
        pub y: f64,
        #[prost(double, tag = "3")]
        pub z: f64,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Quaternion {
        #[prost(double, tag = "1")]
        pub x: f64,
        #[prost(double, tag = "2")]
        pub y: f64,
        #[prost(double, tag = "3")]
        pub z: f64,
        #[prost(double, tag = "4")]
        pub w: f64,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Pose {
        #[prost(message, optional, tag = "1")]
        pub position: ::core::option::Option<Point>,
        #[prost(message, optional, tag = "2")]
        pub orientation: ::core::option::Option<Quaternion>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Vector2 {
        #[prost(double, tag = "1")]
        pub x: f64,
        #[prost(double, tag = "2")]
        pub y: f64,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Se2Velocity {
        #[prost(message, optional, tag = "1")]
        pub linear: ::core::option::Option<Vector2>,
        #[prost(double, tag = "2")]
        pub angular: f64,
    }
}

pub mod robot_msgs {
    use super::geometry_msgs::{Pose, Se2Velocity};
    use super::std_msgs::Header;

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct RobotState {
        #[prost(message, optional, tag = "1")]
        pub base_pose: ::core::option::Option<Pose>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RobotStateTimeStamped {
        #[prost(message, optional, tag = "1")]
        pub header: ::core::option::Option<Header>,
        #[prost(message, optional, tag = "2")]
        pub state: ::core::option::Option<RobotState>,
    }

    /// Velocity target that expires at `end_time` unless re-asserted.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Se2TargetVelocity {
        #[prost(message, optional, tag = "1")]
        pub vel: ::core::option::Option<Se2Velocity>,
        #[prost(message, optional, tag = "2")]
        pub end_time: ::core::option::Option<::prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NavCommand {
        #[prost(message, optional, tag = "1")]
        pub se2_target_velocity: ::core::option::Option<Se2TargetVelocity>,
    }

    /// Generic task-level command addressed to the robot's task server.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ControlCmd {
        #[prost(int32, tag = "1")]
        pub cmd_mode: i32,
        #[prost(string, tag = "2")]
        pub arg: ::prost::alloc::string::String,
        #[prost(int32, repeated, tag = "3")]
        pub arg_n: ::prost::alloc::vec::Vec<i32>,
        #[prost(double, repeated, tag = "4")]
        pub arg_f: ::prost::alloc::vec::Vec<f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RobotCommand {
        #[prost(message, optional, tag = "1")]
        pub nav: ::core::option::Option<NavCommand>,
        #[prost(message, optional, tag = "2")]
        pub cmd: ::core::option::Option<ControlCmd>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RobotCommandTimeStamped {
        #[prost(message, optional, tag = "1")]
        pub header: ::core::option::Option<Header>,
        #[prost(message, optional, tag = "2")]
        pub command: ::core::option::Option<RobotCommand>,
    }
}

pub mod dualarm {
    use super::std_msgs::Header;

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct OperationState {
        #[prost(uint32, tag = "1")]
        pub op_mode: u32,
        #[prost(uint32, tag = "2")]
        pub op_status: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct OperationStateTimeStamped {
        #[prost(message, optional, tag = "1")]
        pub header: ::core::option::Option<Header>,
        #[prost(message, optional, tag = "2")]
        pub state: ::core::option::Option<OperationState>,
    }
}

pub mod service {
    /// `PublishState` takes no parameters.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct StateRequest {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StateResponse {
        #[prost(message, optional, tag = "1")]
        pub state: ::core::option::Option<::prost_types::Any>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CommandAck {
        #[prost(bool, tag = "1")]
        pub success: bool,
        #[prost(string, tag = "2")]
        pub message: ::prost::alloc::string::String,
    }
}

/// Wrap `msg` into a `google.protobuf.Any` tagged with `type_url`.
pub fn pack_any<M: prost::Message>(type_url: &str, msg: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: msg.encode_to_vec(),
    }
}
