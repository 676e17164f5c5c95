//! Probe-derived metadata indexes.
//!
//! One pass over a parsed probe document yields three tables, all keyed by
//! the data-item id lowercased:
//!
//! - the metadata index — one record per data item (display name, owning
//!   component, semantic type, sub-type);
//! - the axis index — items owned by a `Linear` component, routed into
//!   per-axis buckets by the mapper;
//! - the spindle index — the same for `Rotary` components.
//!
//! Probes from multiple endpoints merge into the same bundle; last write wins
//! on id collisions, which is acceptable as long as ids are globally unique
//! per deployment. After load the bundle is read-hot and write-rare, so the
//! three tables live behind a single reader/writer lock acquired once per
//! mapping pass.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::mtconnect::{ProbeComponent, ProbeDataItem, ProbeDevice, ProbeDocument};

/// Component kind recorded for items attached directly to the device root.
const DEVICE_COMPONENT_TYPE: &str = "Device";

/// Axis kind recorded in [`AxisLink`] entries.
pub const AXIS_KIND_LINEAR: &str = "LINEAR";
/// Axis kind recorded in [`SpindleLink`] entries.
pub const AXIS_KIND_ROTARY: &str = "ROTARY";

/// Per-data-item metadata from the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataItemMetadata {
    pub id: String,
    pub name: String,
    pub component_id: String,
    pub component_name: String,
    /// Owning component kind, lowercased (`"Device"` for root items).
    pub component_type: String,
    pub category: String,
    pub item_type: String,
    pub sub_type: String,
}

/// Routes one data item into a per-axis bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisLink {
    pub machine_id: String,
    pub component_id: String,
    pub component_name: String,
    /// Always [`AXIS_KIND_LINEAR`].
    pub kind: String,
    /// Data-item type lowercased; the key inside the axis data map.
    pub data_key: String,
}

/// Routes one data item into a per-spindle bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpindleLink {
    pub machine_id: String,
    pub component_id: String,
    pub component_name: String,
    /// Always [`AXIS_KIND_ROTARY`].
    pub kind: String,
    pub data_key: String,
}

/// The three index tables, built together from probe passes and read together
/// by every mapping pass.
#[derive(Debug, Default)]
pub struct MetadataBundle {
    pub metadata: HashMap<String, DataItemMetadata>,
    pub axis_links: HashMap<String, AxisLink>,
    pub spindle_links: HashMap<String, SpindleLink>,
}

impl MetadataBundle {
    /// Merge one parsed probe document into the bundle.
    pub fn index_probe(&mut self, document: &ProbeDocument) {
        for device in &document.devices {
            self.index_device(device);
        }
    }

    fn index_device(&mut self, device: &ProbeDevice) {
        let machine_id = device.machine_id().to_string();

        for item in &device.data_items {
            self.metadata.insert(
                item.id.to_lowercase(),
                DataItemMetadata {
                    id: item.id.clone(),
                    name: item.name.clone(),
                    component_id: device.id.clone(),
                    component_name: device.name.clone(),
                    component_type: DEVICE_COMPONENT_TYPE.to_string(),
                    category: item.category.clone(),
                    item_type: item.item_type.clone(),
                    sub_type: item.sub_type.clone(),
                },
            );
        }

        for component in &device.components {
            self.index_component(component, &machine_id);
        }
    }

    fn index_component(&mut self, component: &ProbeComponent, machine_id: &str) {
        let kind_upper = component.kind.to_uppercase();

        for item in &component.data_items {
            let key = item.id.to_lowercase();
            self.metadata.insert(
                key.clone(),
                DataItemMetadata {
                    id: item.id.clone(),
                    name: item.name.clone(),
                    component_id: component.id.clone(),
                    component_name: component.name.clone(),
                    component_type: component.kind.to_lowercase(),
                    category: item.category.clone(),
                    item_type: item.item_type.clone(),
                    sub_type: item.sub_type.clone(),
                },
            );

            if !routable(item) {
                continue;
            }
            match kind_upper.as_str() {
                AXIS_KIND_LINEAR => {
                    self.axis_links.insert(
                        key,
                        AxisLink {
                            machine_id: machine_id.to_string(),
                            component_id: component.id.clone(),
                            component_name: component.name.clone(),
                            kind: AXIS_KIND_LINEAR.to_string(),
                            data_key: item.item_type.to_lowercase(),
                        },
                    );
                }
                AXIS_KIND_ROTARY => {
                    self.spindle_links.insert(
                        key,
                        SpindleLink {
                            machine_id: machine_id.to_string(),
                            component_id: component.id.clone(),
                            component_name: component.name.clone(),
                            kind: AXIS_KIND_ROTARY.to_string(),
                            data_key: item.item_type.to_lowercase(),
                        },
                    );
                }
                _ => {}
            }
        }

        for child in &component.components {
            self.index_component(child, machine_id);
        }
    }
}

/// AXIS_STATE feeds the per-machine movement map instead of an axis bucket;
/// untyped items carry nothing routable.
fn routable(item: &ProbeDataItem) -> bool {
    !item.item_type.is_empty() && item.item_type != "AXIS_STATE"
}

/// Shared, lock-guarded bundle. Writers are probe loads; readers are mapping
/// passes holding the guard for their whole pass.
#[derive(Debug, Default)]
pub struct MetadataStore {
    bundle: RwLock<MetadataBundle>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a parsed probe into the shared bundle.
    pub fn index_probe(&self, document: &ProbeDocument) {
        let mut bundle = self.bundle.write().unwrap_or_else(|e| {
            warn!("Metadata bundle lock poisoned on write, recovering");
            e.into_inner()
        });
        bundle.index_probe(document);
        debug!(
            data_items = bundle.metadata.len(),
            axis_links = bundle.axis_links.len(),
            spindle_links = bundle.spindle_links.len(),
            "Metadata indexes updated"
        );
    }

    /// Read guard over the bundle for the duration of a mapping pass.
    pub fn read(&self) -> RwLockReadGuard<'_, MetadataBundle> {
        self.bundle.read().unwrap_or_else(|e| {
            warn!("Metadata bundle lock poisoned on read, recovering");
            e.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtconnect::parse_probe;

    const PROBE: &str = r#"<MTConnectDevices><Devices>
<Device id="d1" name="M1" uuid="uuid-m1">
  <DataItems>
    <DataItem id="AVAIL1" category="EVENT" type="AVAILABILITY"/>
  </DataItems>
  <Components>
    <Linear id="x" name="X">
      <DataItems>
        <DataItem id="Xpos" category="SAMPLE" type="POSITION"/>
        <DataItem id="Xstate" category="EVENT" type="AXIS_STATE"/>
        <DataItem id="Xuntyped" category="EVENT" type=""/>
      </DataItems>
    </Linear>
    <Rotary id="c" name="C">
      <DataItems>
        <DataItem id="Cspeed" category="SAMPLE" type="ROTARY_VELOCITY" subType="ACTUAL"/>
      </DataItems>
    </Rotary>
  </Components>
</Device>
</Devices></MTConnectDevices>"#;

    fn indexed() -> MetadataBundle {
        let mut bundle = MetadataBundle::default();
        bundle.index_probe(&parse_probe(PROBE).unwrap());
        bundle
    }

    #[test]
    fn test_metadata_keys_are_lowercased() {
        let bundle = indexed();
        assert!(bundle.metadata.contains_key("avail1"));
        assert!(!bundle.metadata.contains_key("AVAIL1"));
        // The record keeps the original id.
        assert_eq!(bundle.metadata["avail1"].id, "AVAIL1");
    }

    #[test]
    fn test_root_items_record_device_component_type() {
        let bundle = indexed();
        let meta = &bundle.metadata["avail1"];
        assert_eq!(meta.component_type, "Device");
        assert_eq!(meta.component_name, "M1");
        assert_eq!(meta.component_id, "d1");
    }

    #[test]
    fn test_component_type_is_lowercased_kind() {
        let bundle = indexed();
        assert_eq!(bundle.metadata["xpos"].component_type, "linear");
        assert_eq!(bundle.metadata["cspeed"].component_type, "rotary");
    }

    #[test]
    fn test_axis_link_rules() {
        let bundle = indexed();
        // POSITION on a Linear component routes.
        let link = &bundle.axis_links["xpos"];
        assert_eq!(link.machine_id, "M1");
        assert_eq!(link.component_id, "x");
        assert_eq!(link.component_name, "X");
        assert_eq!(link.kind, AXIS_KIND_LINEAR);
        assert_eq!(link.data_key, "position");
        // AXIS_STATE and untyped items do not route, but are still indexed.
        assert!(!bundle.axis_links.contains_key("xstate"));
        assert!(!bundle.axis_links.contains_key("xuntyped"));
        assert!(bundle.metadata.contains_key("xstate"));
        assert!(bundle.metadata.contains_key("xuntyped"));
    }

    #[test]
    fn test_spindle_link_rules() {
        let bundle = indexed();
        let link = &bundle.spindle_links["cspeed"];
        assert_eq!(link.kind, AXIS_KIND_ROTARY);
        assert_eq!(link.data_key, "rotary_velocity");
        assert!(!bundle.spindle_links.contains_key("xpos"));
    }

    #[test]
    fn test_merge_last_write_wins() {
        let mut bundle = indexed();
        let second = r#"<MTConnectDevices><Devices>
<Device id="d2" name="M2" uuid="uuid-m2">
  <DataItems>
    <DataItem id="avail1" category="EVENT" type="AVAILABILITY" name="renamed"/>
  </DataItems>
</Device>
</Devices></MTConnectDevices>"#;
        bundle.index_probe(&parse_probe(second).unwrap());
        // Still exactly one record under the key, now from the second probe.
        assert_eq!(bundle.metadata["avail1"].component_name, "M2");
        assert_eq!(bundle.metadata["avail1"].name, "renamed");
    }

    #[test]
    fn test_machine_id_falls_back_to_uuid() {
        let probe = r#"<MTConnectDevices><Devices>
<Device id="d1" uuid="uuid-only">
  <Components>
    <Linear id="x" name="X">
      <DataItems><DataItem id="xp" type="POSITION"/></DataItems>
    </Linear>
  </Components>
</Device>
</Devices></MTConnectDevices>"#;
        let mut bundle = MetadataBundle::default();
        bundle.index_probe(&parse_probe(probe).unwrap());
        assert_eq!(bundle.axis_links["xp"].machine_id, "uuid-only");
    }
}
