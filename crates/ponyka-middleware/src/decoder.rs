//! Payload decoder: type URL → typed [`DecodedState`].
//!
//! State feeds carry their payload as a `google.protobuf.Any`. The
//! [`PayloadDecoder`] registry maps each known type URL to a plain decode
//! function; unknown type URLs are not an error here, the caller simply
//! gets `Ok(None)`.

use std::collections::HashMap;

use ponyka_proto::dualarm::OperationStateTimeStamped;
use ponyka_proto::geometry_msgs::Quaternion;
use ponyka_proto::robot_msgs::RobotStateTimeStamped;
use ponyka_proto::type_url;
use ponyka_types::{DecodeError, DecodedState, OperationState, Pose};
use prost::Message;

/// Decode function for one registered payload type.
pub type DecodeFn = fn(&[u8]) -> Result<DecodedState, DecodeError>;

/// Registry of payload decoders keyed by `Any` type URL.
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    decoders: HashMap<String, DecodeFn>,
}

impl PayloadDecoder {
    /// An empty registry. Use [`PayloadDecoder::default`] for the robot's
    /// built-in feeds.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register (or replace) the decoder for `type_url`.
    pub fn register(&mut self, type_url: impl Into<String>, decode: DecodeFn) {
        self.decoders.insert(type_url.into(), decode);
    }

    /// The decode function registered for `type_url`, if any.
    pub fn lookup(&self, type_url: &str) -> Option<DecodeFn> {
        self.decoders.get(type_url).copied()
    }

    /// Decode `bytes` according to `type_url`.
    ///
    /// * `Ok(Some(state))` – registered type, well-formed payload.
    /// * `Ok(None)` – nobody registered `type_url`.
    /// * `Err(_)` – registered type, malformed payload.
    pub fn decode(&self, type_url: &str, bytes: &[u8]) -> Result<Option<DecodedState>, DecodeError> {
        match self.lookup(type_url) {
            Some(decode) => decode(bytes).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(type_url::ROBOT_STATE, decode_robot_state);
        registry.register(type_url::OPERATION_STATE, decode_operation_state);
        registry
    }
}

/// Yaw (rotation about z) of a unit quaternion.
pub fn yaw_from_quaternion(q: &Quaternion) -> f64 {
    let siny_cosp = 2.0 * (q.w * q.z + q.x * q.y);
    let cosy_cosp = 1.0 - 2.0 * (q.y * q.y + q.z * q.z);
    siny_cosp.atan2(cosy_cosp)
}

/// Decode a `RobotStateTimeStamped` into a planar [`Pose`].
///
/// A missing position reads as the origin and a missing orientation as the
/// identity rotation; a missing `state` body is an error.
pub fn decode_robot_state(bytes: &[u8]) -> Result<DecodedState, DecodeError> {
    let msg = RobotStateTimeStamped::decode(bytes).map_err(|e| DecodeError::Malformed {
        type_url: type_url::ROBOT_STATE.to_string(),
        reason: e.to_string(),
    })?;
    let state = msg.state.ok_or_else(|| DecodeError::MissingField {
        type_url: type_url::ROBOT_STATE.to_string(),
        field: "state",
    })?;
    let base_pose = state.base_pose.unwrap_or_default();
    let position = base_pose.position.unwrap_or_default();
    let orientation = base_pose.orientation.unwrap_or(Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    });

    Ok(DecodedState::Pose(Pose {
        x: position.x,
        y: position.y,
        theta: yaw_from_quaternion(&orientation),
    }))
}

/// Decode an `OperationStateTimeStamped` into an [`OperationState`].
pub fn decode_operation_state(bytes: &[u8]) -> Result<DecodedState, DecodeError> {
    let msg = OperationStateTimeStamped::decode(bytes).map_err(|e| DecodeError::Malformed {
        type_url: type_url::OPERATION_STATE.to_string(),
        reason: e.to_string(),
    })?;
    let state = msg.state.ok_or_else(|| DecodeError::MissingField {
        type_url: type_url::OPERATION_STATE.to_string(),
        field: "state",
    })?;

    Ok(DecodedState::OperationState(OperationState {
        op_mode: state.op_mode,
        op_status: state.op_status,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ponyka_proto::dualarm;
    use ponyka_proto::geometry_msgs::{self, Point};
    use ponyka_proto::robot_msgs;

    pub(crate) fn robot_state_bytes(position: (f64, f64, f64), orientation: (f64, f64, f64, f64)) -> Vec<u8> {
        robot_msgs::RobotStateTimeStamped {
            header: None,
            state: Some(robot_msgs::RobotState {
                base_pose: Some(geometry_msgs::Pose {
                    position: Some(Point {
                        x: position.0,
                        y: position.1,
                        z: position.2,
                    }),
                    orientation: Some(Quaternion {
                        x: orientation.0,
                        y: orientation.1,
                        z: orientation.2,
                        w: orientation.3,
                    }),
                }),
            }),
        }
        .encode_to_vec()
    }

    pub(crate) fn operation_state_bytes(op_mode: u32, op_status: u32) -> Vec<u8> {
        dualarm::OperationStateTimeStamped {
            header: None,
            state: Some(dualarm::OperationState { op_mode, op_status }),
        }
        .encode_to_vec()
    }

    fn quat_from_yaw(yaw: f64) -> Quaternion {
        Quaternion {
            x: 0.0,
            y: 0.0,
            z: (yaw / 2.0).sin(),
            w: (yaw / 2.0).cos(),
        }
    }

    #[test]
    fn identity_pose_scenario() {
        let decoder = PayloadDecoder::default();
        let bytes = robot_state_bytes((1.0, 2.0, 0.0), (0.0, 0.0, 0.0, 1.0));
        let state = decoder.decode(type_url::ROBOT_STATE, &bytes).unwrap();
        assert_eq!(
            state,
            Some(DecodedState::Pose(Pose {
                x: 1.0,
                y: 2.0,
                theta: 0.0
            }))
        );
    }

    #[test]
    fn yaw_matches_closed_form_for_arbitrary_quaternions() {
        let samples: [(f64, f64, f64, f64); 5] = [
            (0.1, -0.2, 0.3, 0.9),
            (0.5, 0.5, 0.5, 0.5),
            (-0.3, 0.1, -0.7, 0.2),
            (0.0, 0.0, 1.0, 0.0),
            (0.02, 0.7, 0.01, 0.71),
        ];
        for (x, y, z, w) in samples {
            // normalise so the sample is a valid rotation
            let n = (x * x + y * y + z * z + w * w).sqrt();
            let q = Quaternion {
                x: x / n,
                y: y / n,
                z: z / n,
                w: w / n,
            };
            let expected = (2.0 * (q.w * q.z + q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z));
            assert!((yaw_from_quaternion(&q) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn yaw_recovers_planar_rotation() {
        for yaw in [-3.0, -1.2, 0.0, 0.4, std::f64::consts::FRAC_PI_2, 3.1] {
            let theta = yaw_from_quaternion(&quat_from_yaw(yaw));
            assert!((theta - yaw).abs() < 1e-9, "yaw {yaw} decoded as {theta}");
        }
    }

    #[test]
    fn yaw_is_not_the_raw_z_component() {
        let q = quat_from_yaw(1.0);
        let theta = yaw_from_quaternion(&q);
        assert!((theta - 1.0).abs() < 1e-9);
        assert!((theta - q.z).abs() > 0.1);
    }

    #[test]
    fn operation_state_decodes() {
        let decoder = PayloadDecoder::default();
        let state = decoder
            .decode(type_url::OPERATION_STATE, &operation_state_bytes(0x1f, 2))
            .unwrap();
        assert_eq!(
            state,
            Some(DecodedState::OperationState(OperationState {
                op_mode: 0x1f,
                op_status: 2
            }))
        );
    }

    #[test]
    fn unregistered_type_is_not_an_error() {
        let decoder = PayloadDecoder::default();
        let result = decoder.decode("type.googleapis.com/dtproto.Unknown", &[0xff, 0xff]);
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn malformed_bytes_yield_decode_error() {
        let decoder = PayloadDecoder::default();
        // field 1, length-delimited, claims 16 bytes but carries one
        let result = decoder.decode(type_url::ROBOT_STATE, &[0x0a, 0x10, 0x01]);
        assert!(matches!(result, Err(DecodeError::Malformed { .. })), "got {result:?}");
    }

    #[test]
    fn missing_state_body_is_reported() {
        let decoder = PayloadDecoder::default();
        let result = decoder.decode(type_url::OPERATION_STATE, &[]);
        assert!(matches!(
            result,
            Err(DecodeError::MissingField { field: "state", .. })
        ));
    }

    #[test]
    fn missing_orientation_reads_as_identity() {
        let bytes = robot_msgs::RobotStateTimeStamped {
            header: None,
            state: Some(robot_msgs::RobotState {
                base_pose: Some(geometry_msgs::Pose {
                    position: Some(Point { x: 3.0, y: 4.0, z: 0.0 }),
                    orientation: None,
                }),
            }),
        }
        .encode_to_vec();
        let state = decode_robot_state(&bytes).unwrap();
        assert_eq!(state, DecodedState::Pose(Pose { x: 3.0, y: 4.0, theta: 0.0 }));
    }

    #[test]
    fn registry_accepts_custom_decoders() {
        fn always_zero(_: &[u8]) -> Result<DecodedState, DecodeError> {
            Ok(DecodedState::OperationState(OperationState {
                op_mode: 0,
                op_status: 0,
            }))
        }
        let mut decoder = PayloadDecoder::empty();
        assert!(decoder.lookup("custom").is_none());
        decoder.register("custom", always_zero);
        assert!(decoder.decode("custom", b"anything").unwrap().is_some());
    }
}
