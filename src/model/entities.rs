//! Decoded entity payloads.
//!
//! Every data field is a [`Field`] so the same struct serves both creation
//! (completeness-checked) and partial update (touch only what is set).
//! Related entities are either full nested payloads or bare references
//! carrying only `@iot.id`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{EntityType, Field, Id, TimeInterval, TimeValue, UnitOfMeasurement};
use crate::error::{StaError, StaResult};

// ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Thing {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub description: Field<String>,
    pub properties: Field<Value>,
    #[serde(rename = "Locations")]
    pub locations: Vec<Location>,
    #[serde(rename = "HistoricalLocations")]
    pub historical_locations: Vec<HistoricalLocation>,
    #[serde(rename = "Datastreams")]
    pub datastreams: Vec<Datastream>,
    #[serde(rename = "MultiDatastreams")]
    pub multi_datastreams: Vec<MultiDatastream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub description: Field<String>,
    pub encoding_type: Field<String>,
    pub location: Field<Value>,
    pub properties: Field<Value>,
    #[serde(rename = "Things")]
    pub things: Vec<Thing>,
    #[serde(rename = "HistoricalLocations")]
    pub historical_locations: Vec<HistoricalLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoricalLocation {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub time: Field<DateTime<Utc>>,
    #[serde(rename = "Thing")]
    pub thing: Field<Box<Thing>>,
    #[serde(rename = "Locations")]
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sensor {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub description: Field<String>,
    pub encoding_type: Field<String>,
    pub metadata: Field<Value>,
    pub properties: Field<Value>,
    #[serde(rename = "Datastreams")]
    pub datastreams: Vec<Datastream>,
    #[serde(rename = "MultiDatastreams")]
    pub multi_datastreams: Vec<MultiDatastream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservedProperty {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub definition: Field<String>,
    pub description: Field<String>,
    pub properties: Field<Value>,
    #[serde(rename = "Datastreams")]
    pub datastreams: Vec<Datastream>,
    #[serde(rename = "MultiDatastreams")]
    pub multi_datastreams: Vec<MultiDatastream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Datastream {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub description: Field<String>,
    pub observation_type: Field<String>,
    pub unit_of_measurement: Field<UnitOfMeasurement>,
    pub properties: Field<Value>,
    #[serde(rename = "ObservedProperty")]
    pub observed_property: Field<Box<ObservedProperty>>,
    #[serde(rename = "Sensor")]
    pub sensor: Field<Box<Sensor>>,
    #[serde(rename = "Thing")]
    pub thing: Field<Box<Thing>>,
    #[serde(rename = "Observations")]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiDatastream {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub description: Field<String>,
    pub multi_observation_data_types: Field<Vec<String>>,
    pub unit_of_measurements: Field<Vec<UnitOfMeasurement>>,
    pub properties: Field<Value>,
    #[serde(rename = "Sensor")]
    pub sensor: Field<Box<Sensor>>,
    #[serde(rename = "Thing")]
    pub thing: Field<Box<Thing>>,
    #[serde(rename = "ObservedProperties")]
    pub observed_properties: Vec<ObservedProperty>,
    #[serde(rename = "Observations")]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Observation {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub phenomenon_time: Field<TimeValue>,
    pub result_time: Field<DateTime<Utc>>,
    pub valid_time: Field<TimeInterval>,
    pub result: Field<Value>,
    pub result_quality: Field<Value>,
    pub parameters: Field<Value>,
    #[serde(rename = "Datastream")]
    pub datastream: Field<Box<Datastream>>,
    #[serde(rename = "MultiDatastream")]
    pub multi_datastream: Field<Box<MultiDatastream>>,
    #[serde(rename = "FeatureOfInterest")]
    pub feature_of_interest: Field<Box<FeatureOfInterest>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureOfInterest {
    #[serde(rename = "@iot.id")]
    pub id: Option<Id>,
    pub name: Field<String>,
    pub description: Field<String>,
    pub encoding_type: Field<String>,
    pub feature: Field<Value>,
    pub properties: Field<Value>,
    #[serde(rename = "Observations")]
    pub observations: Vec<Observation>,
}

// ---

macro_rules! reference_ctor {
    ($($ty:ident),* $(,)?) => {
        $(
            impl $ty {
                /// A payload that only points at an existing row.
                pub fn reference(id: i64) -> Self {
                    Self {
                        id: Some(Id::Long(id)),
                        ..Default::default()
                    }
                }
            }
        )*
    };
}

reference_ctor!(
    Thing,
    Location,
    HistoricalLocation,
    Sensor,
    ObservedProperty,
    Datastream,
    MultiDatastream,
    Observation,
    FeatureOfInterest,
);

macro_rules! entity_from {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for Entity {
                fn from(e: $ty) -> Self {
                    Entity::$ty(e)
                }
            }

            impl From<Box<$ty>> for Entity {
                fn from(e: Box<$ty>) -> Self {
                    Entity::$ty(*e)
                }
            }
        )*
    };
}

entity_from!(
    Thing,
    Location,
    HistoricalLocation,
    Sensor,
    ObservedProperty,
    Datastream,
    MultiDatastream,
    Observation,
    FeatureOfInterest,
);

/// Any entity payload, tagged by its type.
#[derive(Debug, Clone)]
pub enum Entity {
    Thing(Thing),
    Location(Location),
    HistoricalLocation(HistoricalLocation),
    Sensor(Sensor),
    ObservedProperty(ObservedProperty),
    Datastream(Datastream),
    MultiDatastream(MultiDatastream),
    Observation(Observation),
    FeatureOfInterest(FeatureOfInterest),
}

impl Entity {
    // ---
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Thing(_) => EntityType::Thing,
            Entity::Location(_) => EntityType::Location,
            Entity::HistoricalLocation(_) => EntityType::HistoricalLocation,
            Entity::Sensor(_) => EntityType::Sensor,
            Entity::ObservedProperty(_) => EntityType::ObservedProperty,
            Entity::Datastream(_) => EntityType::Datastream,
            Entity::MultiDatastream(_) => EntityType::MultiDatastream,
            Entity::Observation(_) => EntityType::Observation,
            Entity::FeatureOfInterest(_) => EntityType::FeatureOfInterest,
        }
    }

    pub fn id(&self) -> Option<&Id> {
        match self {
            Entity::Thing(e) => e.id.as_ref(),
            Entity::Location(e) => e.id.as_ref(),
            Entity::HistoricalLocation(e) => e.id.as_ref(),
            Entity::Sensor(e) => e.id.as_ref(),
            Entity::ObservedProperty(e) => e.id.as_ref(),
            Entity::Datastream(e) => e.id.as_ref(),
            Entity::MultiDatastream(e) => e.id.as_ref(),
            Entity::Observation(e) => e.id.as_ref(),
            Entity::FeatureOfInterest(e) => e.id.as_ref(),
        }
    }

    /// Check that every field needed to create the entity is present.
    pub fn complete(&self) -> StaResult<()> {
        match self {
            Entity::Thing(e) => e.complete(),
            Entity::Location(e) => e.complete(),
            Entity::HistoricalLocation(e) => e.complete(),
            Entity::Sensor(e) => e.complete(),
            Entity::ObservedProperty(e) => e.complete(),
            Entity::Datastream(e) => e.complete(),
            Entity::MultiDatastream(e) => e.complete(),
            Entity::Observation(e) => e.complete(),
            Entity::FeatureOfInterest(e) => e.complete(),
        }
    }

    /// Decode a payload of the given type from its JSON form.
    pub fn from_json(entity_type: EntityType, value: Value) -> StaResult<Self> {
        // ---
        Ok(match entity_type {
            EntityType::Thing => Entity::Thing(serde_json::from_value(value)?),
            EntityType::Location => Entity::Location(serde_json::from_value(value)?),
            EntityType::HistoricalLocation => {
                Entity::HistoricalLocation(serde_json::from_value(value)?)
            }
            EntityType::Sensor => Entity::Sensor(serde_json::from_value(value)?),
            EntityType::ObservedProperty => {
                Entity::ObservedProperty(serde_json::from_value(value)?)
            }
            EntityType::Datastream => Entity::Datastream(serde_json::from_value(value)?),
            EntityType::MultiDatastream => Entity::MultiDatastream(serde_json::from_value(value)?),
            EntityType::Observation => Entity::Observation(serde_json::from_value(value)?),
            EntityType::FeatureOfInterest => {
                Entity::FeatureOfInterest(serde_json::from_value(value)?)
            }
        })
    }
}

// ---
// Completeness: the fields an entity must carry before it can be created.

fn nav_required<T>(field: &Field<T>, entity: EntityType, nav: &str) -> StaResult<()> {
    match field {
        Field::Set(_) => Ok(()),
        _ => Err(StaError::incomplete(format!("{entity} requires a {nav}."))),
    }
}

impl Thing {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.description.required("description")?;
        Ok(())
    }
}

impl Location {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.description.required("description")?;
        self.encoding_type.required("encodingType")?;
        self.location.required("location")?;
        Ok(())
    }
}

impl HistoricalLocation {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.time.required("time")?;
        nav_required(&self.thing, EntityType::HistoricalLocation, "Thing")
    }
}

impl Sensor {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.description.required("description")?;
        self.encoding_type.required("encodingType")?;
        self.metadata.required("metadata")?;
        Ok(())
    }
}

impl ObservedProperty {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.definition.required("definition")?;
        self.description.required("description")?;
        Ok(())
    }
}

impl Datastream {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.description.required("description")?;
        self.observation_type.required("observationType")?;
        self.unit_of_measurement.required("unitOfMeasurement")?;
        nav_required(&self.observed_property, EntityType::Datastream, "ObservedProperty")?;
        nav_required(&self.sensor, EntityType::Datastream, "Sensor")?;
        nav_required(&self.thing, EntityType::Datastream, "Thing")
    }
}

impl MultiDatastream {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.description.required("description")?;
        self.multi_observation_data_types
            .required("multiObservationDataTypes")?;
        self.unit_of_measurements.required("unitOfMeasurements")?;
        nav_required(&self.sensor, EntityType::MultiDatastream, "Sensor")?;
        nav_required(&self.thing, EntityType::MultiDatastream, "Thing")
    }
}

impl Observation {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.result.required("result")?;
        Self::stream_exclusive(
            self.datastream.value().is_some(),
            self.multi_datastream.value().is_some(),
        )
    }

    /// Exactly one of Datastream or MultiDatastream.
    pub fn stream_exclusive(has_datastream: bool, has_multi: bool) -> StaResult<()> {
        // ---
        match (has_datastream, has_multi) {
            (true, false) | (false, true) => Ok(()),
            (true, true) => Err(StaError::illegal_argument(
                "Observation can not have both a Datastream and a MultiDatastream.",
            )),
            (false, false) => Err(StaError::illegal_argument(
                "Observation must have either a Datastream or a MultiDatastream.",
            )),
        }
    }
}

impl FeatureOfInterest {
    pub fn complete(&self) -> StaResult<()> {
        // ---
        self.name.required("name")?;
        self.description.required("description")?;
        self.encoding_type.required("encodingType")?;
        self.feature.required("feature")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_payload_decodes_with_references() {
        // ---
        let value = json!({
            "name": "Temp",
            "description": "Air temperature",
            "observationType": "OM_Measurement",
            "unitOfMeasurement": { "name": "Celsius", "symbol": "°C", "definition": "ucum:Cel" },
            "ObservedProperty": { "@iot.id": 4 },
            "Sensor": { "@iot.id": "9" },
            "Thing": { "name": "Station", "description": "Roof" },
        });
        let Entity::Datastream(ds) = Entity::from_json(EntityType::Datastream, value).unwrap() else {
            panic!("expected a datastream");
        };

        assert!(ds.complete().is_ok());
        assert_eq!(
            ds.observed_property.value().and_then(|op| op.id.clone()),
            Some(Id::Long(4))
        );
        assert_eq!(
            ds.sensor.value().and_then(|s| s.id.as_ref()).and_then(Id::as_key),
            Some(9)
        );
        assert!(ds.thing.value().is_some_and(|t| t.id.is_none()));
    }

    #[test]
    fn missing_navigation_is_incomplete() {
        // ---
        let ds = Datastream {
            name: "a".to_string().into(),
            description: "b".to_string().into(),
            observation_type: "c".to_string().into(),
            unit_of_measurement: UnitOfMeasurement::default().into(),
            ..Default::default()
        };
        assert!(matches!(ds.complete(), Err(StaError::IncompleteEntity(_))));
    }

    #[test]
    fn observation_requires_exactly_one_stream() {
        // ---
        let mut obs = Observation {
            result: json!(1.5).into(),
            ..Default::default()
        };
        assert!(matches!(obs.complete(), Err(StaError::IllegalArgument(_))));

        obs.datastream = Field::Set(Box::new(Datastream::reference(1)));
        assert!(obs.complete().is_ok());

        obs.multi_datastream = Field::Set(Box::new(MultiDatastream::reference(2)));
        assert!(matches!(obs.complete(), Err(StaError::IllegalArgument(_))));
    }

    #[test]
    fn explicit_null_name_is_not_complete() {
        // ---
        let thing: Thing =
            serde_json::from_value(json!({ "name": null, "description": "x" })).unwrap();
        assert!(matches!(thing.complete(), Err(StaError::IncompleteEntity(_))));
    }
}
