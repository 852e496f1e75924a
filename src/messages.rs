// Message types exchanged with the runtime over Zenoh

use serde::{Deserialize, Serialize};

use crate::mpc325::{DeviceStatus, MoveOutcome, Position};

// Command from UI/scripts -> runtime, tagged by "op", e.g.
// {"op": "move", "x": 100.0, "z": 20.0} or {"op": "stop"}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MotionCommand {
    Move {
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default)]
        z: Option<f64>,
    },
    QuickMove {
        x: f64,
        y: f64,
        z: f64,
    },
    SlowMove {
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        speed: Option<u8>,
    },
    Stop,
    Calibrate,
    SelectDevice {
        device: u8,
    },
    Configure {
        #[serde(default)]
        quick_move: Option<bool>,
        #[serde(default)]
        speed: Option<u8>,
    },
    QueryPosition,
    QueryDevices,
}

impl MotionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            MotionCommand::Move { .. } => "move",
            MotionCommand::QuickMove { .. } => "quick_move",
            MotionCommand::SlowMove { .. } => "slow_move",
            MotionCommand::Stop => "stop",
            MotionCommand::Calibrate => "calibrate",
            MotionCommand::SelectDevice { .. } => "select_device",
            MotionCommand::Configure { .. } => "configure",
            MotionCommand::QueryPosition => "query_position",
            MotionCommand::QueryDevices => "query_devices",
        }
    }
}

// Result of one command, runtime -> subscribers
// Optional fields are only filled in by the commands that produce them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub op: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MoveOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<DeviceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_device: Option<u8>,
}

impl CommandReport {
    pub fn ok(op: &str) -> Self {
        Self {
            op: op.to_string(),
            ok: true,
            error: None,
            outcome: None,
            position: None,
            devices: None,
            active_device: None,
        }
    }

    pub fn failed(op: &str, error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::ok(op)
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    Busy,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cmd: MotionCommand = serde_json::from_str(r#"{"op":"move","x":100.0,"z":20.0}"#).unwrap();
        assert_eq!(
            cmd,
            MotionCommand::Move {
                x: Some(100.0),
                y: None,
                z: Some(20.0)
            }
        );

        let cmd: MotionCommand = serde_json::from_str(r#"{"op":"stop"}"#).unwrap();
        assert_eq!(cmd, MotionCommand::Stop);

        let cmd: MotionCommand =
            serde_json::from_str(r#"{"op":"slow_move","x":1.0,"y":2.0,"z":3.0}"#).unwrap();
        assert_eq!(cmd.name(), "slow_move");
    }

    #[test]
    fn test_rejects_negative_device() {
        assert!(serde_json::from_str::<MotionCommand>(r#"{"op":"select_device","device":-1}"#).is_err());
    }

    #[test]
    fn test_report_skips_empty_fields() {
        let json = serde_json::to_string(&CommandReport::failed("calibrate", "Serial link is not open")).unwrap();
        assert_eq!(
            json,
            r#"{"op":"calibrate","ok":false,"error":"Serial link is not open"}"#
        );

        let mut report = CommandReport::ok("move");
        report.outcome = Some(MoveOutcome::AlreadyThere);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"op":"move","ok":true,"outcome":"already_there"}"#);
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Busy).unwrap(), r#""busy""#);
    }
}
