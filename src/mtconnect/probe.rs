//! `/probe` document parser.
//!
//! A probe document is a tree: devices carry a `Description`, a `DataItems`
//! list, and a `Components` container whose children are components of any
//! kind — the element's local tag name *is* the kind (`Linear`, `Rotary`,
//! `Controller`, ...). Components nest arbitrarily. The parser is an event
//! reader rather than a derived deserializer because the component tag names
//! are open-ended.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::CollectorError;

/// Parsed `/probe` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeDocument {
    pub devices: Vec<ProbeDevice>,
}

/// One `<Device>` element with its data items and component tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeDevice {
    pub id: String,
    pub name: String,
    pub uuid: String,
    pub description: Option<DeviceDescription>,
    pub data_items: Vec<ProbeDataItem>,
    pub components: Vec<ProbeComponent>,
}

impl ProbeDevice {
    /// The identifier streams are keyed by: device name, else uuid.
    pub fn machine_id(&self) -> &str {
        if self.name.is_empty() {
            &self.uuid
        } else {
            &self.name
        }
    }
}

/// `<Description>` metadata used by session creation to match a declared
/// model against the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    /// Free-text element body.
    pub text: String,
}

/// Any element under a `Components` container; the local tag name is the
/// component kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeComponent {
    pub kind: String,
    pub id: String,
    pub name: String,
    pub data_items: Vec<ProbeDataItem>,
    pub components: Vec<ProbeComponent>,
}

/// A `<DataItem>` definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeDataItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub item_type: String,
    pub sub_type: String,
}

fn parse_err(e: impl std::fmt::Display) -> CollectorError {
    CollectorError::Parse(format!("malformed probe document: {e}"))
}

fn attr_text(start: &BytesStart<'_>, key: &[u8]) -> Result<String, CollectorError> {
    for attr in start.attributes() {
        let attr = attr.map_err(parse_err)?;
        if attr.key.as_ref() == key {
            return Ok(attr.unescape_value().map_err(parse_err)?.into_owned());
        }
    }
    Ok(String::new())
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Parse a `/probe` document.
pub fn parse_probe(xml: &str) -> Result<ProbeDocument, CollectorError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);

    let mut devices = Vec::new();
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) if e.local_name().as_ref() == b"Device" => {
                devices.push(read_device(&mut reader, &e)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ProbeDocument { devices })
}

fn read_device(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<ProbeDevice, CollectorError> {
    let mut device = ProbeDevice {
        id: attr_text(start, b"id")?,
        name: attr_text(start, b"name")?,
        uuid: attr_text(start, b"uuid")?,
        ..ProbeDevice::default()
    };

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Description" => device.description = Some(read_description(reader, &e)?),
                b"DataItems" => device.data_items = read_data_items(reader)?,
                b"Components" => device.components = read_components(reader)?,
                _ => {
                    reader.read_to_end(e.name()).map_err(parse_err)?;
                }
            },
            Event::Empty(e) if e.local_name().as_ref() == b"Description" => {
                device.description = Some(description_from_attrs(&e)?);
            }
            Event::End(e) if e.local_name().as_ref() == b"Device" => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside <Device>")),
            _ => {}
        }
    }
    Ok(device)
}

fn description_from_attrs(start: &BytesStart<'_>) -> Result<DeviceDescription, CollectorError> {
    Ok(DeviceDescription {
        manufacturer: attr_text(start, b"manufacturer")?,
        model: attr_text(start, b"model")?,
        serial_number: attr_text(start, b"serialNumber")?,
        text: String::new(),
    })
}

fn read_description(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<DeviceDescription, CollectorError> {
    let mut description = description_from_attrs(start)?;
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Text(t) => {
                description.text.push_str(&t.unescape().map_err(parse_err)?);
            }
            Event::CData(t) => {
                description
                    .text
                    .push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Event::End(e) if e.local_name().as_ref() == b"Description" => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside <Description>")),
            _ => {}
        }
    }
    Ok(description)
}

fn data_item_from_attrs(start: &BytesStart<'_>) -> Result<ProbeDataItem, CollectorError> {
    Ok(ProbeDataItem {
        id: attr_text(start, b"id")?,
        name: attr_text(start, b"name")?,
        category: attr_text(start, b"category")?,
        item_type: attr_text(start, b"type")?,
        sub_type: attr_text(start, b"subType")?,
    })
}

fn read_data_items(reader: &mut Reader<&[u8]>) -> Result<Vec<ProbeDataItem>, CollectorError> {
    let mut items = Vec::new();
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Empty(e) if e.local_name().as_ref() == b"DataItem" => {
                items.push(data_item_from_attrs(&e)?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"DataItem" => {
                items.push(data_item_from_attrs(&e)?);
                // Constraints and other children are not indexed.
                reader.read_to_end(e.name()).map_err(parse_err)?;
            }
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(parse_err)?;
            }
            Event::End(e) if e.local_name().as_ref() == b"DataItems" => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside <DataItems>")),
            _ => {}
        }
    }
    Ok(items)
}

fn read_components(reader: &mut Reader<&[u8]>) -> Result<Vec<ProbeComponent>, CollectorError> {
    let mut components = Vec::new();
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => {
                components.push(read_component(reader, &e)?);
            }
            Event::Empty(e) => {
                components.push(ProbeComponent {
                    kind: local_name(&e),
                    id: attr_text(&e, b"id")?,
                    name: attr_text(&e, b"name")?,
                    ..ProbeComponent::default()
                });
            }
            Event::End(e) if e.local_name().as_ref() == b"Components" => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside <Components>")),
            _ => {}
        }
    }
    Ok(components)
}

fn read_component(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<ProbeComponent, CollectorError> {
    let kind = local_name(start);
    let mut component = ProbeComponent {
        id: attr_text(start, b"id")?,
        name: attr_text(start, b"name")?,
        kind,
        ..ProbeComponent::default()
    };

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"DataItems" => component.data_items = read_data_items(reader)?,
                b"Components" => component.components = read_components(reader)?,
                _ => {
                    reader.read_to_end(e.name()).map_err(parse_err)?;
                }
            },
            Event::End(e) if e.local_name() == start.local_name() => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside component")),
            _ => {}
        }
    }
    Ok(component)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectDevices>
  <Devices>
    <Device id="d1" name="M1" uuid="uuid-m1">
      <Description manufacturer="Haas" model="VF-2" serialNumber="123">
        Haas VF-2
        vertical mill
      </Description>
      <DataItems>
        <DataItem id="avail1" category="EVENT" type="AVAILABILITY"/>
      </DataItems>
      <Components>
        <Controller id="ctrl" name="controller">
          <DataItems>
            <DataItem id="exec1" category="EVENT" type="EXECUTION"/>
          </DataItems>
        </Controller>
        <Axes id="axes" name="axes">
          <Components>
            <Linear id="x" name="X">
              <DataItems>
                <DataItem id="Xpos" category="SAMPLE" type="POSITION" subType="ACTUAL"/>
                <DataItem id="Xstate" category="EVENT" type="AXIS_STATE"/>
              </DataItems>
            </Linear>
            <Rotary id="c" name="C">
              <DataItems>
                <DataItem id="Cspeed" category="SAMPLE" type="ROTARY_VELOCITY"/>
              </DataItems>
            </Rotary>
          </Components>
        </Axes>
      </Components>
    </Device>
  </Devices>
</MTConnectDevices>"#;

    #[test]
    fn test_parse_probe_device_attrs() {
        let doc = parse_probe(PROBE).unwrap();
        assert_eq!(doc.devices.len(), 1);
        let device = &doc.devices[0];
        assert_eq!(device.name, "M1");
        assert_eq!(device.uuid, "uuid-m1");
        assert_eq!(device.machine_id(), "M1");
        assert_eq!(device.data_items.len(), 1);
        assert_eq!(device.data_items[0].item_type, "AVAILABILITY");
    }

    #[test]
    fn test_parse_probe_description() {
        let doc = parse_probe(PROBE).unwrap();
        let description = doc.devices[0].description.as_ref().unwrap();
        assert_eq!(description.manufacturer, "Haas");
        assert_eq!(description.model, "VF-2");
        assert_eq!(description.serial_number, "123");
        assert!(description.text.contains("VF-2"));
    }

    #[test]
    fn test_parse_probe_nested_components() {
        let doc = parse_probe(PROBE).unwrap();
        let components = &doc.devices[0].components;
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].kind, "Controller");

        let axes = &components[1];
        assert_eq!(axes.kind, "Axes");
        assert_eq!(axes.components.len(), 2);
        assert_eq!(axes.components[0].kind, "Linear");
        assert_eq!(axes.components[0].name, "X");
        assert_eq!(axes.components[0].data_items.len(), 2);
        assert_eq!(axes.components[1].kind, "Rotary");
    }

    #[test]
    fn test_machine_id_falls_back_to_uuid() {
        let device = ProbeDevice {
            uuid: "uuid-only".to_string(),
            ..ProbeDevice::default()
        };
        assert_eq!(device.machine_id(), "uuid-only");
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(parse_probe("<MTConnectDevices><Devices><Device id=").is_err());
    }

    #[test]
    fn test_empty_document_yields_no_devices() {
        let doc = parse_probe("<MTConnectDevices><Devices/></MTConnectDevices>").unwrap();
        assert!(doc.devices.is_empty());
    }
}
