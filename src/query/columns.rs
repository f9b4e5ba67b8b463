//! Column mapping for each entity table.

use crate::model::{EntityType, Property};

/// Columns projected when a path selects no particular property.
pub fn default_projection(entity_type: EntityType) -> &'static [&'static str] {
    // ---
    match entity_type {
        EntityType::Thing => &["id", "name", "description", "properties"],
        EntityType::Location => &[
            "id",
            "name",
            "description",
            "encoding_type",
            "location",
            "properties",
        ],
        EntityType::HistoricalLocation => &["id", "time", "thing_id"],
        EntityType::Sensor => &[
            "id",
            "name",
            "description",
            "encoding_type",
            "metadata",
            "properties",
        ],
        EntityType::ObservedProperty => &["id", "name", "definition", "description", "properties"],
        EntityType::Datastream => &[
            "id",
            "name",
            "description",
            "observation_type",
            "unit_name",
            "unit_symbol",
            "unit_definition",
            "properties",
            "phenomenon_time_start",
            "phenomenon_time_end",
            "result_time_start",
            "result_time_end",
            "thing_id",
            "sensor_id",
            "obs_property_id",
        ],
        EntityType::MultiDatastream => &[
            "id",
            "name",
            "description",
            "observation_types",
            "unit_of_measurements",
            "properties",
            "phenomenon_time_start",
            "phenomenon_time_end",
            "result_time_start",
            "result_time_end",
            "thing_id",
            "sensor_id",
        ],
        EntityType::Observation => &[
            "id",
            "phenomenon_time_start",
            "phenomenon_time_end",
            "result_time",
            "valid_time_start",
            "valid_time_end",
            "result_type",
            "result_string",
            "result_number",
            "result_boolean",
            "result_json",
            "result_quality",
            "parameters",
            "datastream_id",
            "multi_datastream_id",
            "feature_id",
        ],
        EntityType::FeatureOfInterest => &[
            "id",
            "name",
            "description",
            "encoding_type",
            "feature",
            "properties",
        ],
    }
}

/// Columns backing one property, or `None` if the entity has no such property.
pub fn property_columns(entity_type: EntityType, property: Property) -> Option<&'static [&'static str]> {
    // ---
    use EntityType as E;
    use Property as P;

    let cols: &'static [&'static str] = match (entity_type, property) {
        (_, P::Id) => &["id"],
        (E::Observation | E::HistoricalLocation, P::Name | P::Description | P::Properties) => {
            return None
        }
        (_, P::Name) => &["name"],
        (_, P::Description) => &["description"],
        (_, P::Properties) => &["properties"],
        (E::ObservedProperty, P::Definition) => &["definition"],
        (E::Location | E::Sensor | E::FeatureOfInterest, P::EncodingType) => &["encoding_type"],
        (E::Sensor, P::Metadata) => &["metadata"],
        (E::Location, P::Location) => &["location"],
        (E::FeatureOfInterest, P::Feature) => &["feature"],
        (E::HistoricalLocation, P::Time) => &["time"],
        (E::Datastream, P::ObservationType) => &["observation_type"],
        (E::Datastream, P::UnitOfMeasurement) => &["unit_name", "unit_symbol", "unit_definition"],
        (E::MultiDatastream, P::MultiObservationDataTypes) => &["observation_types"],
        (E::MultiDatastream, P::UnitOfMeasurements) => &["unit_of_measurements"],
        (E::Datastream | E::MultiDatastream | E::Observation, P::PhenomenonTime) => {
            &["phenomenon_time_start", "phenomenon_time_end"]
        }
        (E::Datastream | E::MultiDatastream, P::ResultTime) => {
            &["result_time_start", "result_time_end"]
        }
        (E::Observation, P::ResultTime) => &["result_time"],
        (E::Observation, P::ValidTime) => &["valid_time_start", "valid_time_end"],
        (E::Observation, P::Result) => &[
            "result_type",
            "result_string",
            "result_number",
            "result_boolean",
            "result_json",
        ],
        (E::Observation, P::ResultQuality) => &["result_quality"],
        (E::Observation, P::Parameters) => &["parameters"],
        _ => return None,
    };
    Some(cols)
}

/// Projection for a path: the id first, then the selected properties'
/// columns, or every mapped column when nothing was selected.
pub fn projection(entity_type: EntityType, selected: &[Property]) -> Vec<&'static str> {
    // ---
    if selected.is_empty() {
        return default_projection(entity_type).to_vec();
    }
    let mut cols = vec!["id"];
    for col in selected
        .iter()
        .filter_map(|p| property_columns(entity_type, *p))
        .flatten()
    {
        if !cols.contains(col) {
            cols.push(*col);
        }
    }
    cols
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn selected_property_projects_id_and_its_columns() {
        // ---
        assert_eq!(
            projection(EntityType::Datastream, &[Property::UnitOfMeasurement]),
            vec!["id", "unit_name", "unit_symbol", "unit_definition"]
        );
        assert_eq!(projection(EntityType::Thing, &[Property::Id]), vec!["id"]);
    }

    #[test]
    fn empty_selection_projects_everything() {
        // ---
        assert_eq!(
            projection(EntityType::Thing, &[]),
            vec!["id", "name", "description", "properties"]
        );
    }

    #[test]
    fn foreign_properties_are_unmapped() {
        // ---
        assert!(property_columns(EntityType::Thing, Property::Result).is_none());
        assert!(property_columns(EntityType::Observation, Property::Name).is_none());
        assert!(property_columns(EntityType::Sensor, Property::Metadata).is_some());
    }
}
