//! Data model for process flowsheets.
//!
//! This module defines the live model objects the rest of the crate works on:
//! - `Flowsheet` - a named collection of unit operations and streams
//! - `UnitOperation` - one piece of process equipment (mixer, flash, pump, ...)
//! - `Stream` - a material or energy connection between two unit ports
//! - `VariableValue` - a numeric value with an optional unit of measure
//!
//! A flowsheet is typically built up by the hosting script (or deserialized
//! from a JSON model document) and then handed to
//! [`visualize`](crate::visualize::visualize). The model carries current
//! values only; solving it is the business of an external toolkit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::{Error, Result};

/// Kind of process equipment a unit operation represents.
///
/// The catalogue covers the standard unit operations a flowsheet editor needs
/// to pick icons and default port names for; anything else goes through
/// `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// External feed into the flowsheet
    Feed,
    /// Product leaving the flowsheet
    Product,
    Mixer,
    Splitter,
    Heater,
    Cooler,
    HeatExchanger,
    /// Vapor-liquid flash separator
    Flash,
    Pump,
    Compressor,
    Turbine,
    /// Stirred-tank reactor
    Reactor,
    Valve,
    /// Anything not covered by the built-in catalogue
    Custom(String),
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feed => write!(f, "feed"),
            Self::Product => write!(f, "product"),
            Self::Mixer => write!(f, "mixer"),
            Self::Splitter => write!(f, "splitter"),
            Self::Heater => write!(f, "heater"),
            Self::Cooler => write!(f, "cooler"),
            Self::HeatExchanger => write!(f, "heat_exchanger"),
            Self::Flash => write!(f, "flash"),
            Self::Pump => write!(f, "pump"),
            Self::Compressor => write!(f, "compressor"),
            Self::Turbine => write!(f, "turbine"),
            Self::Reactor => write!(f, "reactor"),
            Self::Valve => write!(f, "valve"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// What a stream carries between two units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    #[default]
    Material,
    Energy,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Material => write!(f, "material"),
            Self::Energy => write!(f, "energy"),
        }
    }
}

/// A numeric value with an optional unit of measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub value: f64,

    /// Unit-of-measure string (e.g. "kg/s", "K"). None for dimensionless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl VariableValue {
    pub fn new(value: f64) -> Self {
        Self { value, units: None }
    }

    pub fn with_units(value: f64, units: impl Into<String>) -> Self {
        Self {
            value,
            units: Some(units.into()),
        }
    }
}

/// One end of a stream: a unit id plus the name of the port on that unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Id of the unit operation this endpoint attaches to
    pub unit: String,
    /// Port name on the unit (e.g. "outlet", "vapor_outlet")
    pub port: String,
}

impl Endpoint {
    pub fn new(unit: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            port: port.into(),
        }
    }
}

/// One piece of process equipment in a flowsheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOperation {
    /// Unique identifier within the flowsheet (e.g. "M101")
    pub id: String,

    /// Display label shown in the diagram; defaults to the id
    pub label: String,

    /// Equipment kind
    pub unit_type: UnitType,

    /// Current variable values keyed by name (sorted for stable output)
    #[serde(default)]
    pub variables: BTreeMap<String, VariableValue>,
}

impl UnitOperation {
    /// Create a new unit operation with the label defaulting to the id.
    pub fn new(id: impl Into<String>, unit_type: UnitType) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            unit_type,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: VariableValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// A material or energy connection between two unit ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// Unique identifier within the flowsheet (e.g. "S01")
    pub id: String,

    #[serde(default)]
    pub stream_type: StreamType,

    /// Upstream end (an outlet port)
    pub source: Endpoint,

    /// Downstream end (an inlet port)
    pub target: Endpoint,

    /// Current stream variable values keyed by name
    #[serde(default)]
    pub variables: BTreeMap<String, VariableValue>,
}

impl Stream {
    /// Create a material stream between the default outlet/inlet ports.
    pub fn material(
        id: impl Into<String>,
        source_unit: impl Into<String>,
        target_unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            stream_type: StreamType::Material,
            source: Endpoint::new(source_unit, "outlet"),
            target: Endpoint::new(target_unit, "inlet"),
            variables: BTreeMap::new(),
        }
    }

    /// Create an energy stream between the default outlet/inlet ports.
    pub fn energy(
        id: impl Into<String>,
        source_unit: impl Into<String>,
        target_unit: impl Into<String>,
    ) -> Self {
        Self {
            stream_type: StreamType::Energy,
            ..Self::material(id, source_unit, target_unit)
        }
    }

    pub fn with_ports(mut self, source_port: impl Into<String>, target_port: impl Into<String>) -> Self {
        self.source.port = source_port.into();
        self.target.port = target_port.into();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: VariableValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// A live flowsheet model: unit operations connected by streams.
///
/// Units and streams keep insertion order; ids must be unique within their
/// kind. Streams may only be added between units that already exist, so a
/// flowsheet built through this API always has a well-formed connection
/// graph. A flowsheet deserialized from JSON is validated on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flowsheet {
    /// Model name; shown as the diagram title
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub units: Vec<UnitOperation>,

    #[serde(default)]
    pub streams: Vec<Stream>,
}

impl Flowsheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            units: Vec::new(),
            streams: Vec::new(),
        }
    }

    /// Add a unit operation. Fails if a unit with the same id exists.
    pub fn add_unit(&mut self, unit: UnitOperation) -> Result<()> {
        if self.unit(&unit.id).is_some() {
            return Err(Error::InvalidInput(format!(
                "Duplicate unit id: {}",
                unit.id
            )));
        }
        self.units.push(unit);
        Ok(())
    }

    /// Add a stream. Both endpoints must reference existing units.
    pub fn add_stream(&mut self, stream: Stream) -> Result<()> {
        if self.stream(&stream.id).is_some() {
            return Err(Error::InvalidInput(format!(
                "Duplicate stream id: {}",
                stream.id
            )));
        }
        for endpoint in [&stream.source, &stream.target] {
            if self.unit(&endpoint.unit).is_none() {
                return Err(Error::InvalidInput(format!(
                    "Stream '{}' references unknown unit '{}'",
                    stream.id, endpoint.unit
                )));
            }
        }
        self.streams.push(stream);
        Ok(())
    }

    /// Look up a unit by id.
    pub fn unit(&self, id: &str) -> Option<&UnitOperation> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Look up a stream by id.
    pub fn stream(&self, id: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Set (or overwrite) a variable on a unit.
    pub fn set_unit_variable(
        &mut self,
        unit_id: &str,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<()> {
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.id == unit_id)
            .ok_or_else(|| Error::NotFound(format!("unit '{}'", unit_id)))?;
        unit.variables.insert(name.into(), value);
        Ok(())
    }

    /// Set (or overwrite) a variable on a stream.
    pub fn set_stream_variable(
        &mut self,
        stream_id: &str,
        name: impl Into<String>,
        value: VariableValue,
    ) -> Result<()> {
        let stream = self
            .streams
            .iter_mut()
            .find(|s| s.id == stream_id)
            .ok_or_else(|| Error::NotFound(format!("stream '{}'", stream_id)))?;
        stream.variables.insert(name.into(), value);
        Ok(())
    }

    /// Remove a unit and every stream attached to it.
    ///
    /// Returns the number of streams dropped, or NotFound if the unit does
    /// not exist.
    pub fn remove_unit(&mut self, unit_id: &str) -> Result<usize> {
        let before = self.units.len();
        self.units.retain(|u| u.id != unit_id);
        if self.units.len() == before {
            return Err(Error::NotFound(format!("unit '{}'", unit_id)));
        }
        let streams_before = self.streams.len();
        self.streams
            .retain(|s| s.source.unit != unit_id && s.target.unit != unit_id);
        Ok(streams_before - self.streams.len())
    }

    /// Parse and validate a flowsheet from a JSON model document.
    pub fn from_json(json: &str) -> Result<Self> {
        let fs: Flowsheet = serde_json::from_str(json)?;
        fs.validate()?;
        Ok(fs)
    }

    /// Load a flowsheet from a JSON model document on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check id uniqueness and stream endpoint integrity.
    ///
    /// Flowsheets built through `add_unit`/`add_stream` are valid by
    /// construction; this exists for deserialized documents.
    pub fn validate(&self) -> Result<()> {
        let mut unit_ids = std::collections::HashSet::new();
        for unit in &self.units {
            if !unit_ids.insert(unit.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate unit id: {}",
                    unit.id
                )));
            }
        }
        let mut stream_ids = std::collections::HashSet::new();
        for stream in &self.streams {
            if !stream_ids.insert(stream.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate stream id: {}",
                    stream.id
                )));
            }
            for endpoint in [&stream.source, &stream.target] {
                if !unit_ids.contains(endpoint.unit.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "Stream '{}' references unknown unit '{}'",
                        stream.id, endpoint.unit
                    )));
                }
            }
        }
        Ok(())
    }
}
