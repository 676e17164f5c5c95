//! Snapshot mapper.
//!
//! Joins a parsed `/current` document against the probe-derived indexes and
//! reconstructs one [`MachineSnapshot`] per device stream. This is a pure
//! function of its inputs: identical streams and indexes produce identical
//! snapshots (axis and spindle lists are flattened in component-id order, and
//! every value map is ordered).
//!
//! Per value the mapper tries axis routing first, then spindle routing, then
//! the general type dispatch; buckets are processed Samples → Events →
//! Conditions, so later buckets win on duplicate data items within one tick.

use std::collections::{BTreeMap, HashMap};

use crate::metadata::MetadataBundle;
use crate::mtconnect::{ComponentStream, CurrentStreams, Observation};
use crate::types::{AxisReading, CurrentProgram, MachineSnapshot, Reported, UNAVAILABLE};

/// Format a seconds count as `HH:MM:SS`, rounding to the nearest whole
/// second. Non-numeric input passes through unchanged.
pub fn format_accumulated_time(seconds: &str) -> String {
    let Ok(seconds_float) = seconds.parse::<f64>() else {
        return seconds.to_string();
    };
    let total = seconds_float.round() as i64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Working state for one mapping pass.
struct MappingPass<'a> {
    bundle: &'a MetadataBundle,
    /// Machine id → snapshot index, preserving first-seen order.
    order: HashMap<String, usize>,
    snapshots: Vec<MachineSnapshot>,
    /// Machine id → component id → axis bucket.
    axis_buckets: HashMap<String, BTreeMap<String, AxisReading>>,
    spindle_buckets: HashMap<String, BTreeMap<String, AxisReading>>,
}

/// Map a `/current` document to one snapshot per device stream.
pub fn map_streams(streams: &CurrentStreams, bundle: &MetadataBundle) -> Vec<MachineSnapshot> {
    let mut pass = MappingPass {
        bundle,
        order: HashMap::new(),
        snapshots: Vec::new(),
        axis_buckets: HashMap::new(),
        spindle_buckets: HashMap::new(),
    };

    for stream in &streams.streams {
        let machine_id = stream.machine_id().to_string();
        let index = pass.snapshot_index(&machine_id, &stream.uuid);

        // Conditions reset alarm state once per device stream.
        let mut conditions_seen = false;

        for component_stream in &stream.component_streams {
            for sample in &component_stream.samples {
                pass.process_value(index, sample);
            }
            for event in &component_stream.events {
                pass.process_value(index, event);
            }
            if !component_stream.conditions.is_empty() {
                if !conditions_seen {
                    let snapshot = &mut pass.snapshots[index];
                    snapshot.alarm_status = "NORMAL".to_string();
                    snapshot.warning_status = "NORMAL".to_string();
                    snapshot.alarms.clear();
                    conditions_seen = true;
                }
                pass.process_conditions(index, component_stream);
            }
        }
    }

    pass.finish()
}

impl MappingPass<'_> {
    /// Index of the snapshot for this machine id, creating a defaulted one on
    /// first sight.
    fn snapshot_index(&mut self, machine_id: &str, device_uuid: &str) -> usize {
        if let Some(&index) = self.order.get(machine_id) {
            return index;
        }
        let index = self.snapshots.len();
        self.snapshots
            .push(MachineSnapshot::new(machine_id, device_uuid));
        self.order.insert(machine_id.to_string(), index);
        index
    }

    /// Axis routing, then spindle routing, then the general dispatch.
    fn process_value(&mut self, index: usize, observation: &Observation) {
        if self.route_axis(index, observation) {
            return;
        }
        if self.route_spindle(index, observation) {
            return;
        }
        self.process_general(index, observation);
    }

    fn route_axis(&mut self, index: usize, observation: &Observation) -> bool {
        let key = observation.data_item_id.to_lowercase();
        let Some(link) = self.bundle.axis_links.get(&key) else {
            return false;
        };
        let snapshot = &mut self.snapshots[index];
        if link.machine_id != snapshot.machine_id {
            return false;
        }
        advance_timestamp(snapshot, &observation.timestamp);

        let bucket = self
            .axis_buckets
            .entry(snapshot.machine_id.clone())
            .or_default()
            .entry(link.component_id.clone())
            .or_insert_with(|| AxisReading {
                id: link.component_id.clone(),
                name: link.component_name.clone(),
                kind: link.kind.clone(),
                data: BTreeMap::new(),
            });
        bucket
            .data
            .insert(link.data_key.clone(), observation.value.clone());
        true
    }

    fn route_spindle(&mut self, index: usize, observation: &Observation) -> bool {
        let key = observation.data_item_id.to_lowercase();
        let Some(link) = self.bundle.spindle_links.get(&key) else {
            return false;
        };
        let snapshot = &mut self.snapshots[index];
        if link.machine_id != snapshot.machine_id {
            return false;
        }
        advance_timestamp(snapshot, &observation.timestamp);

        let bucket = self
            .spindle_buckets
            .entry(snapshot.machine_id.clone())
            .or_default()
            .entry(link.component_id.clone())
            .or_insert_with(|| AxisReading {
                id: link.component_id.clone(),
                name: link.component_name.clone(),
                kind: link.kind.clone(),
                data: BTreeMap::new(),
            });
        bucket
            .data
            .insert(link.data_key.clone(), observation.value.clone());
        true
    }

    /// The general dispatch on the data item's semantic type. Items with no
    /// metadata record and unknown types are silently dropped.
    fn process_general(&mut self, index: usize, observation: &Observation) {
        let Some(meta) = self
            .bundle
            .metadata
            .get(&observation.data_item_id.to_lowercase())
        else {
            return;
        };
        let snapshot = &mut self.snapshots[index];
        advance_timestamp(snapshot, &observation.timestamp);

        let value = observation.value.clone();
        match meta.item_type.as_str() {
            "AVAILABILITY" => {
                snapshot.is_enabled = Reported::Known(value == "AVAILABLE");
            }
            "EMERGENCY_STOP" => {
                snapshot.is_in_emergency = Reported::Known(value == "TRIGGERED");
                snapshot.emergency_status = value;
            }
            "EXECUTION" => {
                snapshot.machine_state = value;
            }
            "CONTROLLER_MODE" => {
                snapshot.handle_retrace_status = Reported::Known(value == "MANUAL");
                snapshot.manual_mode =
                    Reported::Known(value == "MANUAL" || value == "MANUAL_DATA_INPUT");
                snapshot.program_mode = value;
            }
            "AXIS_STATE" => {
                if !meta.component_name.is_empty() {
                    snapshot
                        .axis_movement_status
                        .known_or_default()
                        .insert(meta.component_name.clone(), value);
                }
            }
            "PROGRAM_EDIT" => {
                snapshot.edit_status = value.clone();
                snapshot.write_status = value;
            }
            "POWER_STATE" => {
                snapshot.battery_status = value;
            }
            "TOOL_NUMBER" => {
                snapshot.active_tool_number = value;
            }
            "TOOL_OFFSET" => {
                snapshot.tool_offset_number = value;
            }
            "PATH_FEEDRATE" => {
                snapshot
                    .feed_rate
                    .insert(sub_type_key(&meta.sub_type, "VALUE"), value);
            }
            "PATH_FEEDRATE_OVERRIDE" => {
                snapshot
                    .feed_override
                    .insert(sub_type_key(&meta.sub_type, "VALUE"), value);
            }
            "PART_COUNT" => {
                snapshot
                    .parts_count
                    .insert(sub_type_key(&meta.sub_type, "ALL"), value);
            }
            "ACCUMULATED_TIME" => {
                snapshot.accumulated_time.insert(
                    sub_type_key(&meta.sub_type, "VALUE"),
                    format_accumulated_time(&value),
                );
            }
            "BLOCK" => program(snapshot).block = value,
            "PROGRAM" => program(snapshot).program = value,
            "PROGRAM_COMMENT" => program(snapshot).program_comment = value,
            "PROGRAM_HEADER" => program(snapshot).program_header = value,
            "LINE" => program(snapshot).line = value,
            "LINE_NUMBER" => program(snapshot).line_number = value,
            "LINE_LABEL" => program(snapshot).line_label = value,
            _ => {}
        }
    }

    /// Append FAULT/WARNING entries and raise the two condition statuses.
    /// The statuses are independent: a WARNING never masks a FAULT.
    fn process_conditions(&mut self, index: usize, component_stream: &ComponentStream) {
        for condition in &component_stream.conditions {
            let severity = condition.severity.to_uppercase();
            if severity == "FAULT" || severity == "WARNING" {
                let mut alarm = BTreeMap::new();
                alarm.insert("level".to_string(), severity.clone());

                let meta = self
                    .bundle
                    .metadata
                    .get(&condition.data_item_id.to_lowercase());
                let (component_name, component_id) = match meta {
                    Some(meta) => (meta.component_name.clone(), meta.component_id.clone()),
                    None => (
                        component_stream.name.clone(),
                        component_stream.component_id.clone(),
                    ),
                };
                alarm.insert("componentName".to_string(), component_name);
                alarm.insert("componentId".to_string(), component_id);

                if !condition.condition_type.is_empty() {
                    alarm.insert("type".to_string(), condition.condition_type.clone());
                }
                if !condition.native_code.is_empty() {
                    alarm.insert("nativeCode".to_string(), condition.native_code.clone());
                }
                let message = condition.message.trim();
                if !message.is_empty() {
                    alarm.insert("message".to_string(), message.to_string());
                }
                if !condition.data_item_id.is_empty() {
                    alarm.insert("dataItemId".to_string(), condition.data_item_id.clone());
                }
                if !condition.timestamp.is_empty() {
                    alarm.insert("timestamp".to_string(), condition.timestamp.clone());
                }
                self.snapshots[index].alarms.push(alarm);
            }

            if severity == "FAULT" {
                self.snapshots[index].alarm_status = "FAULT".to_string();
            }
            if severity == "WARNING" {
                self.snapshots[index].warning_status = "WARNING".to_string();
            }
        }
    }

    /// Flatten axis/spindle buckets in component-id order and apply the
    /// derived-field fallbacks.
    fn finish(mut self) -> Vec<MachineSnapshot> {
        for snapshot in &mut self.snapshots {
            if let Some(buckets) = self.axis_buckets.remove(&snapshot.machine_id) {
                snapshot.axis_infos = buckets.into_values().collect();
            }
            if let Some(buckets) = self.spindle_buckets.remove(&snapshot.machine_id) {
                snapshot.spindle_infos = buckets.into_values().collect();
            }

            if snapshot.alarm_status != UNAVAILABLE || snapshot.warning_status != UNAVAILABLE {
                snapshot.has_alarms = Reported::Known(
                    snapshot.alarm_status == "FAULT" || snapshot.warning_status == "WARNING",
                );
            }

            if snapshot.edit_status == UNAVAILABLE && snapshot.program_mode != UNAVAILABLE {
                snapshot.edit_status = if snapshot.program_mode == "EDIT" {
                    "READY".to_string()
                } else {
                    "NOT_READY".to_string()
                };
            }
            if snapshot.write_status == UNAVAILABLE && snapshot.program_mode != UNAVAILABLE {
                snapshot.write_status = if snapshot.program_mode == "EDIT" {
                    "READY".to_string()
                } else {
                    "NOT_READY".to_string()
                };
            }
        }
        self.snapshots
    }
}

/// Lexicographic max over ISO-8601 strings.
fn advance_timestamp(snapshot: &mut MachineSnapshot, timestamp: &str) {
    if snapshot.timestamp.as_str() < timestamp {
        snapshot.timestamp = timestamp.to_string();
    }
}

fn sub_type_key(sub_type: &str, fallback: &str) -> String {
    if sub_type.is_empty() {
        fallback.to_string()
    } else {
        sub_type.to_string()
    }
}

fn program(snapshot: &mut MachineSnapshot) -> &mut CurrentProgram {
    snapshot
        .current_program
        .get_or_insert_with(CurrentProgram::default)
}
