//! `/current` document parser.
//!
//! A current document is flat: device streams contain component streams, and
//! each component stream holds up to three buckets — `Samples`, `Events`,
//! `Condition`. The element tag names inside the buckets are open-ended
//! (`Position`, `Execution`, vendor extensions, ...), so unknown tags must
//! parse. For conditions the local tag name carries the severity
//! (`Normal` / `Warning` / `Fault` / `Unavailable`).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::CollectorError;

/// Parsed `/current` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentStreams {
    pub streams: Vec<DeviceStream>,
}

/// One `<DeviceStream>` with its component streams in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStream {
    pub name: String,
    pub uuid: String,
    pub component_streams: Vec<ComponentStream>,
}

impl DeviceStream {
    /// The identifier snapshots are keyed by: device name, else uuid.
    pub fn machine_id(&self) -> &str {
        if self.name.is_empty() {
            &self.uuid
        } else {
            &self.name
        }
    }
}

/// One `<ComponentStream>` with its value buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentStream {
    pub component: String,
    pub name: String,
    pub component_id: String,
    pub samples: Vec<Observation>,
    pub events: Vec<Observation>,
    pub conditions: Vec<ConditionObservation>,
}

/// A sample or event value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Element local tag name (e.g. `Position`, `Execution`).
    pub tag: String,
    pub data_item_id: String,
    pub timestamp: String,
    pub name: String,
    pub sub_type: String,
    /// Character data of the element.
    pub value: String,
}

/// A condition entry; severity comes from the element's local tag name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionObservation {
    /// Local tag name: `Normal`, `Warning`, `Fault`, `Unavailable`, ...
    pub severity: String,
    pub data_item_id: String,
    pub timestamp: String,
    pub name: String,
    pub condition_type: String,
    pub native_code: String,
    /// Character data — the condition message.
    pub message: String,
}

fn parse_err(e: impl std::fmt::Display) -> CollectorError {
    CollectorError::Parse(format!("malformed current document: {e}"))
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

/// Parse a `/current` document.
pub fn parse_current(xml: &str) -> Result<CurrentStreams, CollectorError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);

    let mut streams = Vec::new();
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) if e.local_name().as_ref() == b"DeviceStream" => {
                streams.push(read_device_stream(&mut reader, &e)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"DeviceStream" => {
                streams.push(DeviceStream {
                    name: attr_text(&e, b"name")?,
                    uuid: attr_text(&e, b"uuid")?,
                    component_streams: Vec::new(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(CurrentStreams { streams })
}

fn read_device_stream(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<DeviceStream, CollectorError> {
    let mut stream = DeviceStream {
        name: attr_text(start, b"name")?,
        uuid: attr_text(start, b"uuid")?,
        component_streams: Vec::new(),
    };

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) if e.local_name().as_ref() == b"ComponentStream" => {
                stream.component_streams.push(read_component_stream(reader, &e)?);
            }
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(parse_err)?;
            }
            Event::End(e) if e.local_name().as_ref() == b"DeviceStream" => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside <DeviceStream>")),
            _ => {}
        }
    }
    Ok(stream)
}

fn read_component_stream(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<ComponentStream, CollectorError> {
    let mut stream = ComponentStream {
        component: attr_text(start, b"component")?,
        name: attr_text(start, b"name")?,
        component_id: attr_text(start, b"componentId")?,
        ..ComponentStream::default()
    };

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Samples" => read_observations(reader, b"Samples", &mut stream.samples)?,
                b"Events" => read_observations(reader, b"Events", &mut stream.events)?,
                b"Condition" | b"Conditions" => {
                    let end = e.local_name().as_ref().to_vec();
                    read_conditions(reader, &end, &mut stream.conditions)?;
                }
                _ => {
                    reader.read_to_end(e.name()).map_err(parse_err)?;
                }
            },
            Event::End(e) if e.local_name().as_ref() == b"ComponentStream" => break,
            Event::Eof => {
                return Err(parse_err("unexpected end of input inside <ComponentStream>"))
            }
            _ => {}
        }
    }
    Ok(stream)
}

/// Read every element of a Samples/Events bucket; any tag name is accepted.
fn read_observations(
    reader: &mut Reader<&[u8]>,
    bucket: &[u8],
    out: &mut Vec<Observation>,
) -> Result<(), CollectorError> {
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => {
                let mut observation = observation_from_attrs(&e)?;
                observation.value = read_element_text(reader, &e)?;
                out.push(observation);
            }
            Event::Empty(e) => {
                out.push(observation_from_attrs(&e)?);
            }
            Event::End(e) if e.local_name().as_ref() == bucket => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside value bucket")),
            _ => {}
        }
    }
    Ok(())
}

fn observation_from_attrs(start: &BytesStart<'_>) -> Result<Observation, CollectorError> {
    Ok(Observation {
        tag: local_name(start),
        data_item_id: attr_text(start, b"dataItemId")?,
        timestamp: attr_text(start, b"timestamp")?,
        name: attr_text(start, b"name")?,
        sub_type: attr_text(start, b"subType")?,
        value: String::new(),
    })
}

fn read_conditions(
    reader: &mut Reader<&[u8]>,
    bucket: &[u8],
    out: &mut Vec<ConditionObservation>,
) -> Result<(), CollectorError> {
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => {
                let mut condition = condition_from_attrs(&e)?;
                condition.message = read_element_text(reader, &e)?;
                out.push(condition);
            }
            Event::Empty(e) => {
                out.push(condition_from_attrs(&e)?);
            }
            Event::End(e) if e.local_name().as_ref() == bucket => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside <Condition>")),
            _ => {}
        }
    }
    Ok(())
}

fn condition_from_attrs(start: &BytesStart<'_>) -> Result<ConditionObservation, CollectorError> {
    Ok(ConditionObservation {
        severity: local_name(start),
        data_item_id: attr_text(start, b"dataItemId")?,
        timestamp: attr_text(start, b"timestamp")?,
        name: attr_text(start, b"name")?,
        condition_type: attr_text(start, b"type")?,
        native_code: attr_text(start, b"nativeCode")?,
        message: String::new(),
    })
}

/// Collect character data until the matching end tag, skipping any nested
/// elements.
fn read_element_text(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<String, CollectorError> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(parse_err)?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(parse_err)?;
            }
            Event::End(e) if e.local_name() == start.local_name() => break,
            Event::Eof => return Err(parse_err("unexpected end of input inside value element")),
            _ => {}
        }
    }
    Ok(text)
}
