//! Typed views of the hub payloads the session layer inspects.
//!
//! The hub's configuration document is large and mostly irrelevant here; only
//! the fields needed to look up activities, devices and functions are
//! modelled.  Unknown fields are ignored and every field has a default, so a
//! partial document still decodes.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::functions::StandardFunction;
use crate::protocol::commands::{FixActivityParams, FixState};
use crate::protocol::StatusCode;

/// `activityId` the hub reports when nothing is running.
pub const NO_ACTIVITY_ID: &str = "-1";

/// Reply payload of the configuration sync command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfiguration {
    #[serde(rename = "activity")]
    pub activities: Vec<Activity>,
    #[serde(rename = "device")]
    pub devices: Vec<Device>,
    #[serde(rename = "sequence")]
    pub sequences: Vec<Sequence>,
}

impl HubConfiguration {
    /// Serializes the configuration so a later run can skip the sync.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores a configuration written by [`to_json`](Self::to_json), or any
    /// sync payload.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn activity_by_id(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    /// Labels are matched case-insensitively.
    pub fn activity_by_label(&self, label: &str) -> Option<&Activity> {
        self.activities
            .iter()
            .find(|a| a.label.eq_ignore_ascii_case(label))
    }

    /// Tries the id first, then the label.
    pub fn find_activity(&self, id_or_label: &str) -> Option<&Activity> {
        self.activity_by_id(id_or_label)
            .or_else(|| self.activity_by_label(id_or_label))
    }

    pub fn device_by_id(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn device_by_label(&self, label: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.label.eq_ignore_ascii_case(label))
    }

    pub fn device_by_model(&self, model: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.model.eq_ignore_ascii_case(model))
    }

    /// Tries id, label, then model.
    pub fn find_device(&self, key: &str) -> Option<&Device> {
        self.device_by_id(key)
            .or_else(|| self.device_by_label(key))
            .or_else(|| self.device_by_model(key))
    }

    pub fn sequence_by_name(&self, name: &str) -> Option<&Sequence> {
        self.sequences
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Anything with control groups of functions: activities and devices.
pub trait Controllable {
    fn control_groups(&self) -> &[ControlGroup];

    /// Finds a function by its `name` across all control groups.
    fn function(&self, name: &str) -> Option<&Function> {
        self.control_groups()
            .iter()
            .flat_map(|group| group.functions.iter())
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Finds one of the well-known functions, e.g. `StandardFunction::Play`.
    fn standard_function(&self, function: StandardFunction) -> Option<&Function> {
        self.function(function.name())
    }

    /// The `Number0`..`Number9` functions spelling `digits`, in order, for
    /// keying in a channel one press at a time.  `None` if a character is not
    /// a digit or the device lacks the matching function.
    fn digit_functions(&self, digits: &str) -> Option<Vec<Function>> {
        digits
            .chars()
            .map(|c| {
                let digit = c.to_digit(10)?;
                self.standard_function(StandardFunction::number(digit)?)
                    .cloned()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    pub id: String,
    pub label: String,
    #[serde(rename = "isAVActivity")]
    pub is_av_activity: bool,
    #[serde(rename = "controlGroup")]
    pub control_groups: Vec<ControlGroup>,
    /// Fix actions keyed by device id.
    #[serde(rename = "fixit")]
    pub fix_actions: HashMap<String, FixActivityAction>,
}

impl Controllable for Activity {
    fn control_groups(&self) -> &[ControlGroup] {
        &self.control_groups
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(rename = "controlGroup")]
    pub control_groups: Vec<ControlGroup>,
}

impl Controllable for Device {
    fn control_groups(&self) -> &[ControlGroup] {
        &self.control_groups
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlGroup {
    pub name: String,
    #[serde(rename = "function")]
    pub functions: Vec<Function>,
}

/// One button.  `action` is a JSON document serialized as a string; it is
/// sent back to the hub verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Function {
    pub action: String,
    pub label: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sequence {
    pub id: String,
    pub name: String,
}

/// Corrects one device whose power or input drifted from the activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixActivityAction {
    pub id: String,
    #[serde(rename = "Input", skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(rename = "isAlwaysOn")]
    pub is_always_on: bool,
    #[serde(rename = "isRelativePower")]
    pub is_relative_power: bool,
    #[serde(rename = "Power", skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
}

impl FixActivityAction {
    /// Power takes precedence over input when both are present.
    pub fn params(&self, timestamp: u64) -> FixActivityParams {
        let (state, value) = match &self.power {
            Some(power) => (FixState::Power, Some(power.clone())),
            None => (FixState::Input, self.input.clone()),
        };
        FixActivityParams {
            device_id: self.id.clone(),
            state,
            timestamp,
            value,
        }
    }
}

/// Reply payload of the state digest command (subset).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StateDigest {
    #[serde(rename = "activityId")]
    pub activity_id: String,
    #[serde(rename = "activityStatus")]
    pub activity_status: Option<i64>,
    #[serde(rename = "configVersion")]
    pub config_version: Option<i64>,
    #[serde(rename = "hubSwVersion")]
    pub hub_sw_version: Option<String>,
    #[serde(rename = "syncStatus")]
    pub sync_status: Option<i64>,
}

impl StateDigest {
    /// The running activity, `None` when the hub reports `-1` or nothing.
    pub fn running_activity_id(&self) -> Option<&str> {
        match self.activity_id.as_str() {
            "" | NO_ACTIVITY_ID => None,
            id => Some(id),
        }
    }
}

/// Data of a progress notification (code 100).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActivityProgress {
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    pub done: u32,
    pub total: u32,
}

impl ActivityProgress {
    /// `done / total`, clamped to `[0, 1]`; `0` when `total` is zero.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (f64::from(self.done) / f64::from(self.total)).clamp(0.0, 1.0)
    }
}

/// Data of the terminal activity notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivityFinished {
    #[serde(rename = "activityId", default)]
    pub activity_id: String,
    #[serde(rename = "errorCode", deserialize_with = "status_from_number_or_string")]
    pub error_code: StatusCode,
    #[serde(rename = "errorString", default)]
    pub error_string: String,
}

fn status_from_number_or_string<'de, D>(deserializer: D) -> Result<StatusCode, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(StatusCode(n)),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(StatusCode)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> HubConfiguration {
        serde_json::from_str(
            r#"{
                "activity": [
                    {"id": "-1", "label": "PowerOff", "controlGroup": []},
                    {"id": "100", "label": "Watch TV", "isAVActivity": true,
                     "controlGroup": [{"name": "Volume", "function": [
                        {"name": "VolumeUp", "label": "Volume Up", "action": "{\"command\":\"VolumeUp\"}"}
                     ]}],
                     "fixit": {"dev-1": {"id": "dev-1", "Power": "On"}},
                     "unknownField": 3}
                ],
                "device": [
                    {"id": "dev-1", "label": "TV", "model": "KD-55", "manufacturer": "Sony",
                     "controlGroup": [{"name": "Power", "function": [
                        {"name": "PowerOn", "label": "Power On", "action": "{\"command\":\"PowerOn\"}"}
                     ]}]}
                ],
                "sequence": [{"id": "7", "name": "Movie Night"}],
                "global": {"locale": "en-US"}
            }"#,
        )
        .expect("sample config decodes")
    }

    #[test]
    fn test_configuration_tolerates_unknown_fields() {
        let config = sample_config();

        assert_eq!(config.activities.len(), 2);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.sequences[0].id, "7");
    }

    #[test]
    fn test_find_activity_by_id_or_label() {
        let config = sample_config();

        assert_eq!(config.find_activity("100").map(|a| a.label.as_str()), Some("Watch TV"));
        assert_eq!(config.find_activity("watch tv").map(|a| a.id.as_str()), Some("100"));
        assert!(config.find_activity("Listen").is_none());
    }

    #[test]
    fn test_find_device_by_id_label_or_model() {
        let config = sample_config();

        assert!(config.find_device("dev-1").is_some());
        assert!(config.find_device("tv").is_some());
        assert!(config.find_device("KD-55").is_some());
        assert!(config.find_device("Xbox").is_none());
    }

    #[test]
    fn test_function_lookup_spans_control_groups() {
        let config = sample_config();
        let tv = config.find_device("TV").expect("device");

        let function = tv.function("poweron").expect("function");

        assert_eq!(function.action, r#"{"command":"PowerOn"}"#);
    }

    #[test]
    fn test_standard_function_lookup() {
        let config = sample_config();
        let tv = config.find_device("TV").expect("device");
        let activity = config.find_activity("100").expect("activity");

        assert_eq!(
            tv.standard_function(StandardFunction::PowerOn).map(|f| f.label.as_str()),
            Some("Power On")
        );
        assert!(activity.standard_function(StandardFunction::VolumeUp).is_some());
        assert!(tv.standard_function(StandardFunction::Play).is_none());
    }

    #[test]
    fn test_digit_functions_spell_channel() {
        let digit = |n: u32| Function {
            name: format!("Number{n}"),
            label: n.to_string(),
            action: format!(r#"{{"command":"{n}"}}"#),
        };
        let tuner = Device {
            id: "dev-2".into(),
            control_groups: vec![ControlGroup {
                name: "NumericBasic".into(),
                functions: (0..10).map(digit).collect(),
            }],
            ..Default::default()
        };

        let labels: Option<Vec<String>> = tuner
            .digit_functions("407")
            .map(|fs| fs.into_iter().map(|f| f.label).collect());

        assert_eq!(labels, Some(vec!["4".into(), "0".into(), "7".into()]));
        assert!(tuner.digit_functions("4-7").is_none());
    }

    #[test]
    fn test_digit_functions_need_every_digit() {
        let config = sample_config();
        let tv = config.find_device("TV").expect("device");

        assert!(tv.digit_functions("1").is_none());
        assert_eq!(tv.digit_functions(""), Some(Vec::new()));
    }

    #[test]
    fn test_configuration_json_round_trip() {
        let config = sample_config();

        let json = config.to_json().expect("serialize");
        let restored = HubConfiguration::from_json(&json).expect("deserialize");

        assert_eq!(restored, config);
        assert!(json.contains(r#""activity":"#));
        assert!(json.contains(r#""isAVActivity":true"#));
    }

    #[test]
    fn test_fix_action_omits_absent_options() {
        let action = FixActivityAction {
            id: "dev-1".into(),
            power: Some("On".into()),
            ..Default::default()
        };

        let json = serde_json::to_string(&action).expect("serialize");

        assert!(json.contains(r#""Power":"On""#));
        assert!(!json.contains("Input"));
    }

    #[test]
    fn test_fix_action_prefers_power() {
        let config = sample_config();
        let action = &config.find_activity("100").expect("activity").fix_actions["dev-1"];

        let params = action.params(12);

        assert_eq!(params.state, FixState::Power);
        assert_eq!(params.value.as_deref(), Some("On"));
        assert_eq!(params.device_id, "dev-1");
    }

    #[test]
    fn test_fix_action_without_power_uses_input() {
        let action = FixActivityAction {
            id: "dev-2".into(),
            input: Some("HDMI1".into()),
            ..Default::default()
        };

        let params = action.params(0);

        assert_eq!(params.state, FixState::Input);
        assert_eq!(params.value.as_deref(), Some("HDMI1"));
    }

    #[test]
    fn test_state_digest_minus_one_means_no_activity() {
        let digest: StateDigest =
            serde_json::from_str(r#"{"activityId":"-1","hubSwVersion":"4.15.250"}"#).expect("decode");

        assert_eq!(digest.running_activity_id(), None);
        assert_eq!(digest.hub_sw_version.as_deref(), Some("4.15.250"));
    }

    #[test]
    fn test_progress_fraction_is_clamped() {
        let progress = ActivityProgress {
            device_id: None,
            done: 5,
            total: 4,
        };
        assert_eq!(progress.fraction(), 1.0);
        assert_eq!(ActivityProgress::default().fraction(), 0.0);
    }

    #[test]
    fn test_activity_finished_accepts_string_error_code() {
        let finished: ActivityFinished = serde_json::from_str(
            r#"{"activityId":"100","errorCode":"200","errorString":"OK"}"#,
        )
        .expect("decode");

        assert!(finished.error_code.is_success());
        assert_eq!(finished.activity_id, "100");
    }
}
