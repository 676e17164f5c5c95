//! The normalized per-machine snapshot produced on every poll tick.
//!
//! Field names and the `"UNAVAILABLE"` defaults reproduce the wire shape that
//! downstream consumers already parse; a snapshot is rebuilt from scratch each
//! tick and replaces the previous one atomically in the store.

use serde::Serialize;
use std::collections::BTreeMap;

use super::reported::Reported;

/// Sentinel for fields with no observed stream value yet.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

fn unavailable() -> String {
    UNAVAILABLE.to_string()
}

/// Live state of one machine axis or spindle, keyed by the data keys derived
/// from the probe (e.g. `position`, `load`, `rotary_velocity`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisReading {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: BTreeMap<String, String>,
}

/// The program currently loaded on the controller. Allocated lazily on the
/// first program-related event; keys mirror the MTConnect event types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurrentProgram {
    #[serde(rename = "BLOCK", skip_serializing_if = "String::is_empty")]
    pub block: String,
    #[serde(rename = "PROGRAM", skip_serializing_if = "String::is_empty")]
    pub program: String,
    #[serde(rename = "PROGRAM_COMMENT", skip_serializing_if = "String::is_empty")]
    pub program_comment: String,
    #[serde(rename = "PROGRAM_HEADER", skip_serializing_if = "String::is_empty")]
    pub program_header: String,
    #[serde(rename = "LINE", skip_serializing_if = "String::is_empty")]
    pub line: String,
    #[serde(rename = "LINE_NUMBER", skip_serializing_if = "String::is_empty")]
    pub line_number: String,
    #[serde(rename = "LINE_LABEL", skip_serializing_if = "String::is_empty")]
    pub line_label: String,
}

/// Flat per-machine state assembled from one `/current` document joined with
/// the probe-derived metadata indexes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    #[serde(rename = "MachineId")]
    pub machine_id: String,

    /// Device uuid from the stream.
    #[serde(rename = "Id")]
    pub id: String,

    /// Latest timestamp observed across all merged values (ISO-8601,
    /// lexicographic max).
    #[serde(rename = "Timestamp")]
    pub timestamp: String,

    /// True iff AVAILABILITY reported `AVAILABLE`.
    #[serde(rename = "IsEnabled")]
    pub is_enabled: Reported<bool>,

    /// True iff EMERGENCY_STOP reported `TRIGGERED`.
    #[serde(rename = "IsInEmergency")]
    pub is_in_emergency: Reported<bool>,

    /// EXECUTION value.
    #[serde(rename = "MachineState")]
    pub machine_state: String,

    /// CONTROLLER_MODE value.
    #[serde(rename = "ProgramMode")]
    pub program_mode: String,

    /// Reserved placeholder.
    #[serde(rename = "TmMode")]
    pub tm_mode: String,

    /// True iff CONTROLLER_MODE is `MANUAL`.
    #[serde(rename = "HandleRetraceStatus")]
    pub handle_retrace_status: Reported<bool>,

    /// Component name → AXIS_STATE value.
    #[serde(rename = "AxisMovementStatus")]
    pub axis_movement_status: Reported<BTreeMap<String, String>>,

    /// Reserved placeholder.
    #[serde(rename = "MstbStatus")]
    pub mstb_status: String,

    /// Raw EMERGENCY_STOP value.
    #[serde(rename = "EmergencyStatus")]
    pub emergency_status: String,

    /// `FAULT` / `NORMAL`, or `UNAVAILABLE` before any condition stream.
    #[serde(rename = "AlarmStatus")]
    pub alarm_status: String,

    /// PROGRAM_EDIT value, with a READY/NOT_READY fallback from ProgramMode.
    #[serde(rename = "EditStatus")]
    pub edit_status: String,

    /// True iff CONTROLLER_MODE is `MANUAL` or `MANUAL_DATA_INPUT`.
    #[serde(rename = "ManualMode")]
    pub manual_mode: Reported<bool>,

    #[serde(rename = "WriteStatus")]
    pub write_status: String,

    /// Reserved placeholder.
    #[serde(rename = "LabelSkipStatus")]
    pub label_skip_status: String,

    /// `WARNING` / `NORMAL`, or `UNAVAILABLE` before any condition stream.
    #[serde(rename = "WarningStatus")]
    pub warning_status: String,

    /// POWER_STATE value.
    #[serde(rename = "BatteryStatus")]
    pub battery_status: String,

    #[serde(rename = "activeToolNumber")]
    pub active_tool_number: String,

    #[serde(rename = "toolOffsetNumber")]
    pub tool_offset_number: String,

    /// Per-axis readings, sorted ascending by component id.
    #[serde(rename = "AxisInfos")]
    pub axis_infos: Vec<AxisReading>,

    /// PATH_FEEDRATE values keyed by sub-type (fallback `VALUE`).
    #[serde(rename = "FeedRate")]
    pub feed_rate: BTreeMap<String, String>,

    /// PATH_FEEDRATE_OVERRIDE values keyed by sub-type (fallback `VALUE`).
    #[serde(rename = "FeedOverride")]
    pub feed_override: BTreeMap<String, String>,

    /// One record per FAULT or WARNING condition entry.
    #[serde(rename = "Alarms")]
    pub alarms: Vec<BTreeMap<String, String>>,

    /// AlarmStatus==FAULT or WarningStatus==WARNING, once conditions were seen.
    #[serde(rename = "hasAlarms")]
    pub has_alarms: Reported<bool>,

    /// PART_COUNT values keyed by sub-type (fallback `ALL`).
    #[serde(rename = "PartsCount")]
    pub parts_count: BTreeMap<String, String>,

    /// ACCUMULATED_TIME values keyed by sub-type (fallback `VALUE`),
    /// formatted HH:MM:SS.
    #[serde(rename = "AccumulatedTime")]
    pub accumulated_time: BTreeMap<String, String>,

    #[serde(rename = "CurrentProgram", skip_serializing_if = "Option::is_none")]
    pub current_program: Option<CurrentProgram>,

    /// Per-spindle readings, sorted ascending by component id.
    #[serde(rename = "SpindleInfos")]
    pub spindle_infos: Vec<AxisReading>,

    /// Reserved placeholder.
    #[serde(rename = "ContourFeedRate")]
    pub contour_feed_rate: String,

    /// Reserved placeholder.
    #[serde(rename = "JogOverride")]
    pub jog_override: String,
}

impl MachineSnapshot {
    /// A snapshot with every field at its not-yet-observed default.
    pub fn new(machine_id: impl Into<String>, device_uuid: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            id: device_uuid.into(),
            timestamp: String::new(),
            is_enabled: Reported::Unavailable,
            is_in_emergency: Reported::Unavailable,
            machine_state: unavailable(),
            program_mode: unavailable(),
            tm_mode: unavailable(),
            handle_retrace_status: Reported::Unavailable,
            axis_movement_status: Reported::Unavailable,
            mstb_status: unavailable(),
            emergency_status: unavailable(),
            alarm_status: unavailable(),
            edit_status: unavailable(),
            manual_mode: Reported::Unavailable,
            write_status: unavailable(),
            label_skip_status: unavailable(),
            warning_status: unavailable(),
            battery_status: unavailable(),
            active_tool_number: unavailable(),
            tool_offset_number: unavailable(),
            axis_infos: Vec::new(),
            feed_rate: BTreeMap::new(),
            feed_override: BTreeMap::new(),
            alarms: Vec::new(),
            has_alarms: Reported::Unavailable,
            parts_count: BTreeMap::new(),
            accumulated_time: BTreeMap::new(),
            current_program: None,
            spindle_infos: Vec::new(),
            contour_feed_rate: unavailable(),
            jog_override: unavailable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_wire_shape() {
        let snapshot = MachineSnapshot::new("M1", "uuid-1");
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["MachineId"], "M1");
        assert_eq!(json["Id"], "uuid-1");
        assert_eq!(json["IsEnabled"], "UNAVAILABLE");
        assert_eq!(json["hasAlarms"], "UNAVAILABLE");
        assert_eq!(json["AxisMovementStatus"], "UNAVAILABLE");
        assert_eq!(json["activeToolNumber"], "UNAVAILABLE");
        assert!(json["AxisInfos"].as_array().unwrap().is_empty());
        assert!(json["FeedRate"].as_object().unwrap().is_empty());
        // CurrentProgram is omitted entirely until a program event arrives.
        assert!(json.get("CurrentProgram").is_none());
    }

    #[test]
    fn test_current_program_omits_empty_fields() {
        let program = CurrentProgram {
            program: "O1234".to_string(),
            ..CurrentProgram::default()
        };
        let json = serde_json::to_value(&program).unwrap();
        assert_eq!(json["PROGRAM"], "O1234");
        assert!(json.get("BLOCK").is_none());
        assert!(json.get("LINE_NUMBER").is_none());
    }
}
