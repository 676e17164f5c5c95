//! MTConnect protocol layer.
//!
//! An MTConnect agent exposes two XML documents over HTTP: `/probe` describes
//! the device component tree and its data-item definitions, `/current` carries
//! the latest observed value for each data item. This module owns the fetch
//! primitive and the parsers for both documents; joining the two is the
//! mapper's job.

pub mod client;
pub mod current;
pub mod probe;

pub use client::{current_url, fetch_xml, probe_url};
pub use current::{
    parse_current, ComponentStream, ConditionObservation, CurrentStreams, DeviceStream, Observation,
};
pub use probe::{
    parse_probe, DeviceDescription, ProbeComponent, ProbeDataItem, ProbeDevice, ProbeDocument,
};
