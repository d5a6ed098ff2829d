//! Command names and parameter shapes understood by the hub.

use serde::{Deserialize, Serialize};

/// Requests the full hub configuration (activities, devices, sequences).
pub const SYNC_CONFIGURATION: &str = "vnd.logitech.harmony/vnd.logitech.harmony.engine?config";
/// Requests the state digest.
pub const GET_STATE_DIGEST: &str = "connect.statedigest?get";
/// Tunes the current activity to a channel.
pub const CHANGE_CHANNEL: &str = "harmony.engine?changeChannel";
/// Starts or ends an activity.
pub const RUN_ACTIVITY: &str = "harmony.activityengine?runactivity";
/// Presses or keeps holding a function.
pub const HOLD_ACTION: &str = "vnd.logitech.harmony/vnd.logitech.harmony.engine?holdAction";
/// Fixes the power or input state of one device.
pub const HELP_SYNC: &str = "vnd.logitech.harmony/vnd.logitech.harmony.engine?helpSync";

/// Activity start/end progress (code 100) or home-automation state (code 200.2).
pub const START_ACTIVITY_NOTIFY: &str = "harmony.engine?startActivity";
/// Per-device activity progress.
pub const HELP_DISCRETES_NOTIFY: &str = "harmony.engine?helpdiscretes";
/// Terminal activity notification.
pub const START_ACTIVITY_FINISHED_NOTIFY: &str = "harmony.engine?startActivityFinished";

/// Parameters for commands that take none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyParams {}

/// `{"format": "json"}` for the state digest request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatParams {
    pub format: String,
}

impl FormatParams {
    pub fn json() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeChannelParams {
    pub channel: String,
    pub timestamp: u64,
}

/// Whether a run-activity command starts or ends the activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityRule {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunActivityArgs {
    pub rule: ActivityRule,
}

/// Parameters for [`RUN_ACTIVITY`].
///
/// The hub wants the timestamp as a string here, unlike every other command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunActivityParams {
    #[serde(rename = "activityId")]
    pub activity_id: String,
    pub args: RunActivityArgs,
    #[serde(rename = "async")]
    pub asynchronous: bool,
    pub timestamp: String,
}

impl RunActivityParams {
    pub fn new(activity_id: impl Into<String>, rule: ActivityRule, timestamp_ms: u64) -> Self {
        Self {
            activity_id: activity_id.into(),
            args: RunActivityArgs { rule },
            asynchronous: true,
            timestamp: timestamp_ms.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    /// A single press.
    Press,
    /// "Still holding", repeated while a function is held down.
    Hold,
}

/// Parameters for [`HOLD_ACTION`].  `action` is the function's own JSON
/// action string, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldActionParams {
    pub action: String,
    pub status: HoldStatus,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixState {
    Power,
    Input,
}

/// Parameters for [`HELP_SYNC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixActivityParams {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub state: FixState,
    pub timestamp: u64,
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn test_run_activity_params_wire_shape() {
        let params = RunActivityParams::new("12345", ActivityRule::Start, 1500);

        let value = to_value(&params).expect("serialize");

        assert_eq!(
            value,
            json!({
                "activityId": "12345",
                "args": {"rule": "start"},
                "async": true,
                "timestamp": "1500"
            })
        );
    }

    #[test]
    fn test_end_rule_is_lowercase() {
        let value = to_value(RunActivityArgs {
            rule: ActivityRule::End,
        })
        .expect("serialize");
        assert_eq!(value, json!({"rule": "end"}));
    }

    #[test]
    fn test_hold_action_params_wire_shape() {
        let params = HoldActionParams {
            action: r#"{"command":"VolumeUp"}"#.to_string(),
            status: HoldStatus::Hold,
            timestamp: 42,
        };

        let value = to_value(&params).expect("serialize");

        assert_eq!(value["status"], "hold");
        assert_eq!(value["action"], r#"{"command":"VolumeUp"}"#);
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn test_fix_activity_params_wire_shape() {
        let params = FixActivityParams {
            device_id: "dev-1".into(),
            state: FixState::Power,
            timestamp: 7,
            value: Some("On".into()),
        };

        let value = to_value(&params).expect("serialize");

        assert_eq!(
            value,
            json!({"deviceId": "dev-1", "state": "Power", "timestamp": 7, "value": "On"})
        );
    }

    #[test]
    fn test_empty_and_format_params() {
        assert_eq!(to_value(EmptyParams {}).expect("serialize"), json!({}));
        assert_eq!(
            to_value(FormatParams::json()).expect("serialize"),
            json!({"format": "json"})
        );
    }
}
