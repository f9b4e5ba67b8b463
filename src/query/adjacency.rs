//! Static join table of the entity graph.
//!
//! Keyed by (entity being joined, entity already in the query). A pair
//! missing from this table is a resolver/compiler mismatch, never user
//! error.

use crate::model::EntityType;
use crate::model::EntityType::*;

/// How a newly visited table attaches to the previously visited one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    /// `new.<new_column> = prev.<prev_column>`
    Direct {
        new_column: &'static str,
        prev_column: &'static str,
    },
    /// Through a link table: `link.<prev_key> = prev.id`, then
    /// `new.id = link.<new_key>`.
    Link {
        table: &'static str,
        prev_key: &'static str,
        new_key: &'static str,
    },
}

const fn direct(new_column: &'static str, prev_column: &'static str) -> Join {
    Join::Direct {
        new_column,
        prev_column,
    }
}

const fn link(table: &'static str, prev_key: &'static str, new_key: &'static str) -> Join {
    Join::Link {
        table,
        prev_key,
        new_key,
    }
}

/// (new, previous, join)
pub static ADJACENCY: &[(EntityType, EntityType, Join)] = &[
    // Datastream
    (Datastream, Thing, direct("thing_id", "id")),
    (Datastream, Sensor, direct("sensor_id", "id")),
    (Datastream, ObservedProperty, direct("obs_property_id", "id")),
    (Datastream, Observation, direct("id", "datastream_id")),
    // MultiDatastream
    (MultiDatastream, Thing, direct("thing_id", "id")),
    (MultiDatastream, Sensor, direct("sensor_id", "id")),
    (MultiDatastream, Observation, direct("id", "multi_datastream_id")),
    (
        MultiDatastream,
        ObservedProperty,
        link("multi_datastreams_obs_properties", "obs_property_id", "multi_datastream_id"),
    ),
    // Thing
    (Thing, Datastream, direct("id", "thing_id")),
    (Thing, MultiDatastream, direct("id", "thing_id")),
    (Thing, HistoricalLocation, direct("id", "thing_id")),
    (Thing, Location, link("things_locations", "location_id", "thing_id")),
    // Location
    (Location, Thing, link("things_locations", "thing_id", "location_id")),
    (
        Location,
        HistoricalLocation,
        link("locations_hist_locations", "hist_location_id", "location_id"),
    ),
    // HistoricalLocation
    (HistoricalLocation, Thing, direct("thing_id", "id")),
    (
        HistoricalLocation,
        Location,
        link("locations_hist_locations", "location_id", "hist_location_id"),
    ),
    // Sensor
    (Sensor, Datastream, direct("id", "sensor_id")),
    (Sensor, MultiDatastream, direct("id", "sensor_id")),
    // ObservedProperty
    (ObservedProperty, Datastream, direct("id", "obs_property_id")),
    (
        ObservedProperty,
        MultiDatastream,
        link("multi_datastreams_obs_properties", "multi_datastream_id", "obs_property_id"),
    ),
    // Observation
    (Observation, Datastream, direct("datastream_id", "id")),
    (Observation, MultiDatastream, direct("multi_datastream_id", "id")),
    (Observation, FeatureOfInterest, direct("feature_id", "id")),
    // FeatureOfInterest
    (FeatureOfInterest, Observation, direct("id", "feature_id")),
];

/// Join for attaching `new` onto `prev`.
pub fn lookup(new: EntityType, prev: EntityType) -> Option<&'static Join> {
    ADJACENCY
        .iter()
        .find(|(n, p, _)| *n == new && *p == prev)
        .map(|(_, _, join)| join)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::model::EntityType::*;

    #[test]
    fn every_edge_is_navigable_both_ways() {
        // ---
        for (new, prev, _) in ADJACENCY {
            assert!(
                lookup(*prev, *new).is_some(),
                "{prev} can be reached from {new} but not the other way round"
            );
        }
    }

    #[test]
    fn reverse_edges_mirror_each_other() {
        // ---
        for (new, prev, join) in ADJACENCY {
            let back = lookup(*prev, *new).copied();
            match (join, back) {
                (
                    Join::Direct {
                        new_column,
                        prev_column,
                    },
                    Some(Join::Direct {
                        new_column: bn,
                        prev_column: bp,
                    }),
                ) => {
                    assert_eq!((*new_column, *prev_column), (bp, bn));
                }
                (
                    Join::Link {
                        table,
                        prev_key,
                        new_key,
                    },
                    Some(Join::Link {
                        table: bt,
                        prev_key: bpk,
                        new_key: bnk,
                    }),
                ) => {
                    assert_eq!(*table, bt);
                    assert_eq!((*prev_key, *new_key), (bnk, bpk));
                }
                other => panic!("mismatched join kinds for {new}/{prev}: {other:?}"),
            }
        }
    }

    #[test]
    fn no_duplicate_keys() {
        // ---
        for (i, (n, p, _)) in ADJACENCY.iter().enumerate() {
            assert!(
                ADJACENCY[i + 1..].iter().all(|(n2, p2, _)| (n, p) != (n2, p2)),
                "duplicate adjacency {n}/{p}"
            );
        }
    }

    #[test]
    fn unrelated_types_have_no_join() {
        // ---
        assert!(lookup(Sensor, Thing).is_none());
        assert!(lookup(FeatureOfInterest, Datastream).is_none());
        assert!(lookup(Location, Observation).is_none());
    }
}
