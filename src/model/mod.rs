//! Entity graph model: the closed set of entity types, identifiers,
//! tri-state request fields and the change descriptors handed to the
//! notification collaborator.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{StaError, StaResult};

mod entities;
mod values;

pub use entities::{
    Datastream, Entity, FeatureOfInterest, HistoricalLocation, Location, MultiDatastream,
    Observation, ObservedProperty, Sensor, Thing,
};
pub use values::{TimeInterval, TimeValue, UnitOfMeasurement};

// ---

/// The fixed set of entity types in the sensing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Thing,
    Location,
    HistoricalLocation,
    Sensor,
    ObservedProperty,
    Datastream,
    MultiDatastream,
    Observation,
    FeatureOfInterest,
}

impl EntityType {
    // ---
    pub const ALL: [EntityType; 9] = [
        EntityType::Thing,
        EntityType::Location,
        EntityType::HistoricalLocation,
        EntityType::Sensor,
        EntityType::ObservedProperty,
        EntityType::Datastream,
        EntityType::MultiDatastream,
        EntityType::Observation,
        EntityType::FeatureOfInterest,
    ];

    /// Relational table backing this entity type.
    pub fn table(self) -> &'static str {
        match self {
            EntityType::Thing => "things",
            EntityType::Location => "locations",
            EntityType::HistoricalLocation => "hist_locations",
            EntityType::Sensor => "sensors",
            EntityType::ObservedProperty => "obs_properties",
            EntityType::Datastream => "datastreams",
            EntityType::MultiDatastream => "multi_datastreams",
            EntityType::Observation => "observations",
            EntityType::FeatureOfInterest => "features",
        }
    }

    /// Entity set name as it appears in resource paths.
    pub fn set_name(self) -> &'static str {
        match self {
            EntityType::Thing => "Things",
            EntityType::Location => "Locations",
            EntityType::HistoricalLocation => "HistoricalLocations",
            EntityType::Sensor => "Sensors",
            EntityType::ObservedProperty => "ObservedProperties",
            EntityType::Datastream => "Datastreams",
            EntityType::MultiDatastream => "MultiDatastreams",
            EntityType::Observation => "Observations",
            EntityType::FeatureOfInterest => "FeaturesOfInterest",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Thing => "Thing",
            EntityType::Location => "Location",
            EntityType::HistoricalLocation => "HistoricalLocation",
            EntityType::Sensor => "Sensor",
            EntityType::ObservedProperty => "ObservedProperty",
            EntityType::Datastream => "Datastream",
            EntityType::MultiDatastream => "MultiDatastream",
            EntityType::Observation => "Observation",
            EntityType::FeatureOfInterest => "FeatureOfInterest",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityType {
    type Err = StaError;

    /// Accepts both the singular type name and the entity set name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        EntityType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s) || t.set_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StaError::illegal_argument(format!("unknown entity type '{s}'")))
    }
}

// ---

/// Identifier as produced by the path resolver or carried in a payload.
///
/// The store keys every table by `BIGINT`; text identifiers only survive
/// when they parse as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Long(i64),
    Text(String),
}

impl Id {
    /// Native key for this identifier, if it has one.
    pub fn as_key(&self) -> Option<i64> {
        match self {
            Id::Long(v) => Some(*v),
            Id::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Long(v)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Long(v) => write!(f, "{v}"),
            Id::Text(s) => write!(f, "'{s}'"),
        }
    }
}

// ---

/// A request field that distinguishes "not mentioned" from "explicitly null".
///
/// Absent leaves the stored value untouched; `Null` on a required field is
/// an incomplete entity; `Set` carries the new value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Absent,
    Null,
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Field::Set(value)
    }
}

impl<T> Field<T> {
    // ---
    pub fn is_set(&self) -> bool {
        !matches!(self, Field::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Set(v) => Some(v),
            _ => None,
        }
    }

    /// Update-side view of a field that may not be nulled.
    pub fn non_null(&self, name: &str) -> StaResult<Option<&T>> {
        match self {
            Field::Absent => Ok(None),
            Field::Null => Err(StaError::incomplete(format!("{name} can not be null."))),
            Field::Set(v) => Ok(Some(v)),
        }
    }

    /// Insert-side view of a field that must carry a value.
    pub fn required(&self, name: &str) -> StaResult<&T> {
        self.value()
            .ok_or_else(|| StaError::incomplete(format!("{name} is required.")))
    }
}

impl<'de, T> Deserialize<'de> for Field<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Absence is handled by `#[serde(default)]` on the containing struct.
        Option::<T>::deserialize(deserializer).map(|v| match v {
            Some(v) => Field::Set(v),
            None => Field::Null,
        })
    }
}

// ---

/// Data properties addressable in paths, filters and change descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    Id,
    Name,
    Description,
    Definition,
    EncodingType,
    Metadata,
    ObservationType,
    UnitOfMeasurement,
    UnitOfMeasurements,
    MultiObservationDataTypes,
    Properties,
    Location,
    Feature,
    Time,
    PhenomenonTime,
    ResultTime,
    ValidTime,
    Result,
    ResultQuality,
    Parameters,
}

/// Navigation properties, named the way they appear in payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Navigation {
    Thing,
    Things,
    Locations,
    HistoricalLocations,
    Sensor,
    ObservedProperty,
    ObservedProperties,
    Datastream,
    Datastreams,
    MultiDatastream,
    MultiDatastreams,
    Observations,
    FeatureOfInterest,
}

/// Identity of a changed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ChangedField {
    Property(Property),
    Navigation(Navigation),
}

impl From<Property> for ChangedField {
    fn from(p: Property) -> Self {
        ChangedField::Property(p)
    }
}

impl From<Navigation> for ChangedField {
    fn from(n: Navigation) -> Self {
        ChangedField::Navigation(n)
    }
}

/// What happened to an entity, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated { fields: BTreeSet<ChangedField> },
}

/// Change descriptor produced by every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub entity_type: EntityType,
    pub id: i64,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl EntityChange {
    // ---
    pub fn created(entity_type: EntityType, id: i64) -> Self {
        Self {
            entity_type,
            id,
            kind: ChangeKind::Created,
        }
    }

    pub fn updated(entity_type: EntityType, id: i64) -> Self {
        Self {
            entity_type,
            id,
            kind: ChangeKind::Updated {
                fields: BTreeSet::new(),
            },
        }
    }

    /// Record a touched field. No-op on a creation descriptor.
    pub fn add_field(&mut self, field: impl Into<ChangedField>) {
        if let ChangeKind::Updated { fields } = &mut self.kind {
            fields.insert(field.into());
        }
    }

    pub fn fields(&self) -> Option<&BTreeSet<ChangedField>> {
        match &self.kind {
            ChangeKind::Created => None,
            ChangeKind::Updated { fields } => Some(fields),
        }
    }

    pub fn is_empty_update(&self) -> bool {
        self.fields().is_some_and(|f| f.is_empty())
    }
}
