use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Planar robot pose derived from a `RobotStateTimeStamped` sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Yaw in radians.
    pub theta: f64,
}

/// Operation mode/status pair reported by the dual-arm controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    pub op_mode: u32,
    pub op_status: u32,
}

/// Typed value produced by the payload decoder.
///
/// Serialises as the bare inner object so the browser sees
/// `{"x":..,"y":..,"theta":..}` or `{"op_mode":..,"op_status":..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedState {
    Pose(Pose),
    OperationState(OperationState),
}

impl fmt::Display for DecodedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedState::Pose(p) => write!(f, "x={:.3} y={:.3} theta={:.3}", p.x, p.y, p.theta),
            // op_mode is a bit field, hex reads better in logs
            DecodedState::OperationState(s) => {
                write!(f, "op_mode={:#x} op_status={}", s.op_mode, s.op_status)
            }
        }
    }
}

/// Frame pushed to every WebSocket subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: DecodedState,
}

impl PushMessage {
    pub fn new(kind: impl Into<String>, data: DecodedState) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Planar linear velocity component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

/// The velocity the command stream keeps re-asserting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSetpoint {
    pub linear: Vec2,
    pub angular: f64,
}

impl CommandSetpoint {
    pub const ZERO: CommandSetpoint = CommandSetpoint {
        linear: Vec2 { x: 0.0, y: 0.0 },
        angular: 0.0,
    };

    pub fn new(linear: Vec2, angular: f64) -> Self {
        Self { linear, angular }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Discrete teleop direction sent by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    RotateLeft,
    RotateRight,
}

impl Direction {
    /// Map the direction onto a signed unit vector scaled by `speed_percent / 100`.
    pub fn to_setpoint(self, speed_percent: f64) -> CommandSetpoint {
        let s = speed_percent / 100.0;
        let (x, y, angular) = match self {
            Direction::Forward => (s, 0.0, 0.0),
            Direction::Backward => (-s, 0.0, 0.0),
            Direction::Left => (0.0, s, 0.0),
            Direction::Right => (0.0, -s, 0.0),
            Direction::RotateLeft => (0.0, 0.0, s),
            Direction::RotateRight => (0.0, 0.0, -s),
        };
        CommandSetpoint::new(Vec2 { x, y }, angular)
    }
}

impl FromStr for Direction {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "rotate_left" => Ok(Direction::RotateLeft),
            "rotate_right" => Ok(Direction::RotateRight),
            other => Err(BridgeError::InvalidRequest(format!("unknown direction '{other}'"))),
        }
    }
}

/// One-shot task command forwarded to the robot's task server.
///
/// Dashboard form fields arrive as strings once edited, so every numeric
/// field also accepts a numeric string (`"3"`, `"0.5"`). An empty string in
/// `arg_n`/`arg_f` reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCommand {
    #[serde(deserialize_with = "lenient::int")]
    pub cmd_mode: i32,
    #[serde(default)]
    pub arg: String,
    #[serde(default, deserialize_with = "lenient::ints")]
    pub arg_n: Vec<i32>,
    #[serde(default, deserialize_with = "lenient::floats")]
    pub arg_f: Vec<f64>,
}

mod lenient {
    use super::*;
    use serde::de::Error as _;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Int(i64),
        Float(f64),
        Text(String),
    }

    impl Numeric {
        fn to_f64(&self, blank_is_zero: bool) -> Result<f64, String> {
            match self {
                Numeric::Int(n) => Ok(*n as f64),
                Numeric::Float(f) => Ok(*f),
                Numeric::Text(t) if blank_is_zero && t.trim().is_empty() => Ok(0.0),
                Numeric::Text(t) => t
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .ok_or_else(|| format!("'{t}' is not a number")),
            }
        }

        fn to_i32(&self, blank_is_zero: bool) -> Result<i32, String> {
            if let Numeric::Int(n) = self {
                return i32::try_from(*n).map_err(|_| format!("{n} is out of range"));
            }
            let f = self.to_f64(blank_is_zero)?;
            if f.fract() != 0.0 || f < i32::MIN as f64 || f > i32::MAX as f64 {
                return Err(format!("{f} is not a 32-bit integer"));
            }
            Ok(f as i32)
        }
    }

    pub fn int<'de, D: Deserializer<'de>>(de: D) -> Result<i32, D::Error> {
        Numeric::deserialize(de)?.to_i32(false).map_err(D::Error::custom)
    }

    pub fn ints<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<i32>, D::Error> {
        Vec::<Numeric>::deserialize(de)?
            .iter()
            .map(|n| n.to_i32(true))
            .collect::<Result<_, _>>()
            .map_err(D::Error::custom)
    }

    pub fn floats<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Numeric>::deserialize(de)?
            .iter()
            .map(|n| n.to_f64(true))
            .collect::<Result<_, _>>()
            .map_err(D::Error::custom)
    }
}

impl TaskCommand {
    /// Number of numeric arguments the task server always expects.
    pub const ARG_SLOTS: usize = 3;

    /// Zero-pad `arg_n` and `arg_f` up to [`Self::ARG_SLOTS`] entries.
    pub fn padded(mut self) -> Self {
        if self.arg_n.len() < Self::ARG_SLOTS {
            self.arg_n.resize(Self::ARG_SLOTS, 0);
        }
        if self.arg_f.len() < Self::ARG_SLOTS {
            self.arg_f.resize(Self::ARG_SLOTS, 0.0);
        }
        self
    }
}

/// Failure to turn a registered payload into a [`DecodedState`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed {type_url} payload: {reason}")]
    Malformed { type_url: String, reason: String },

    #[error("{type_url} payload has no `{field}`")]
    MissingField {
        type_url: String,
        field: &'static str,
    },
}

/// Error type shared by every bridge component.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Stream ended by remote")]
    StreamEnded,

    #[error("Decode Error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Command Write Error: {0}")]
    CommandWrite(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("Payload Too Large: {size} bytes exceeds {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl BridgeError {
    /// Whether a feed supervisor should treat this as a reason to reconnect.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BridgeError::Connection(_) | BridgeError::StreamEnded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_push_message_matches_dashboard_shape() {
        let msg = PushMessage::new(
            "robotstate-update",
            DecodedState::Pose(Pose {
                x: 1.0,
                y: 2.0,
                theta: 0.0,
            }),
        );
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "robotstate-update", "data": {"x": 1.0, "y": 2.0, "theta": 0.0}})
        );
    }

    #[test]
    fn opstate_push_message_matches_dashboard_shape() {
        let msg = PushMessage::new(
            "opstate-update",
            DecodedState::OperationState(OperationState {
                op_mode: 0x21,
                op_status: 3,
            }),
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"opstate-update","data":{"op_mode":33,"op_status":3}}"#);
    }

    #[test]
    fn operation_state_display_uses_hex_mode() {
        let state = DecodedState::OperationState(OperationState {
            op_mode: 255,
            op_status: 1,
        });
        assert_eq!(state.to_string(), "op_mode=0xff op_status=1");
    }

    #[test]
    fn direction_maps_to_signed_unit_vectors() {
        let sp = Direction::Forward.to_setpoint(50.0);
        assert_eq!(sp, CommandSetpoint::new(Vec2 { x: 0.5, y: 0.0 }, 0.0));

        let sp = Direction::Right.to_setpoint(100.0);
        assert_eq!(sp, CommandSetpoint::new(Vec2 { x: 0.0, y: -1.0 }, 0.0));

        let sp = Direction::RotateRight.to_setpoint(25.0);
        assert_eq!(sp, CommandSetpoint::new(Vec2::default(), -0.25));
    }

    #[test]
    fn direction_parses_dashboard_names() {
        assert_eq!("rotate_left".parse::<Direction>().unwrap(), Direction::RotateLeft);
        assert_eq!("backward".parse::<Direction>().unwrap(), Direction::Backward);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(BridgeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn zero_setpoint_is_default() {
        assert!(CommandSetpoint::default().is_zero());
        assert!(!Direction::Left.to_setpoint(10.0).is_zero());
    }

    #[test]
    fn task_command_pads_to_three_args() {
        let cmd: TaskCommand = serde_json::from_str(r#"{"cmd_mode":4,"arg":"dock","arg_n":[7]}"#).unwrap();
        let cmd = cmd.padded();
        assert_eq!(cmd.arg_n, vec![7, 0, 0]);
        assert_eq!(cmd.arg_f, vec![0.0, 0.0, 0.0]);

        let long = TaskCommand {
            arg_n: vec![1, 2, 3, 4],
            ..TaskCommand::default()
        }
        .padded();
        assert_eq!(long.arg_n.len(), 4);
    }

    #[test]
    fn task_command_accepts_numeric_strings() {
        let cmd: TaskCommand = serde_json::from_str(
            r#"{"cmd_mode":"3","arg":"dock","arg_n":[0,"5",""],"arg_f":["0.5",1,"-2.25"]}"#,
        )
        .unwrap();
        assert_eq!(cmd.cmd_mode, 3);
        assert_eq!(cmd.arg_n, vec![0, 5, 0]);
        assert_eq!(cmd.arg_f, vec![0.5, 1.0, -2.25]);
    }

    #[test]
    fn task_command_rejects_non_numeric_strings() {
        for body in [
            r#"{"cmd_mode":"dock"}"#,
            r#"{"cmd_mode":""}"#,
            r#"{"cmd_mode":1,"arg_n":["x"]}"#,
            r#"{"cmd_mode":1,"arg_n":["1.5"]}"#,
            r#"{"cmd_mode":1,"arg_f":["NaN"]}"#,
        ] {
            assert!(serde_json::from_str::<TaskCommand>(body).is_err(), "{body}");
        }
    }

    #[test]
    fn disconnect_classification() {
        assert!(BridgeError::StreamEnded.is_disconnect());
        assert!(BridgeError::Connection("reset".into()).is_disconnect());
        assert!(!BridgeError::CommandWrite("closed".into()).is_disconnect());
    }
}
