use std::mem;

use chrono::Utc;
use serde_json::Value;
use sqlx::PgConnection;
use tracing::debug;

use super::statement::{Assignments, InsertStatement, UpdateStatement};
use super::{json_field, MutationEngine};
use crate::error::{StaError, StaResult};
use crate::model::{
    Entity, EntityChange, EntityType, Field, Navigation, Observation, Property, TimeInterval,
    TimeValue,
};
use crate::query::SqlValue;

// ---

/// Storage discriminator for an Observation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Number = 0,
    Boolean = 1,
    String = 2,
    ObjectArray = 3,
}

/// The full set of result columns for one result value. Every shape
/// writes all of them, so a shape change leaves nothing stale behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumns {
    pub result_type: ResultType,
    pub string: Option<String>,
    pub number: Option<f64>,
    pub boolean: Option<bool>,
    pub json: Option<Value>,
}

impl ResultColumns {
    // ---
    pub fn from_value(result: &Value) -> StaResult<Self> {
        // ---
        let empty = |result_type| ResultColumns {
            result_type,
            string: None,
            number: None,
            boolean: None,
            json: None,
        };
        Ok(match result {
            Value::Null => return Err(StaError::incomplete("result can not be null.")),
            Value::Number(n) => ResultColumns {
                string: Some(n.to_string()),
                number: n.as_f64(),
                ..empty(ResultType::Number)
            },
            Value::Bool(b) => ResultColumns {
                string: Some(b.to_string()),
                boolean: Some(*b),
                ..empty(ResultType::Boolean)
            },
            Value::String(s) => ResultColumns {
                string: Some(s.clone()),
                ..empty(ResultType::String)
            },
            Value::Array(_) | Value::Object(_) => ResultColumns {
                json: Some(result.clone()),
                ..empty(ResultType::ObjectArray)
            },
        })
    }

    fn assign(self, statement: &mut impl Assignments) {
        // ---
        statement.set("result_type", SqlValue::Long(self.result_type as i64));
        statement.set_opt("result_string", self.string.map(SqlValue::Text));
        statement.set_opt("result_number", self.number.map(SqlValue::Double));
        statement.set_opt("result_boolean", self.boolean.map(SqlValue::Bool));
        statement.set_opt("result_json", self.json.map(SqlValue::Json));
    }
}

fn set_phenomenon_time(statement: &mut impl Assignments, time: &TimeValue) {
    let (start, end) = time.bounds();
    statement.set("phenomenon_time_start", SqlValue::Timestamp(start));
    statement.set("phenomenon_time_end", SqlValue::Timestamp(end));
}

fn set_valid_time(statement: &mut impl Assignments, time: Option<&TimeInterval>) {
    statement.set_opt("valid_time_start", time.map(|t| SqlValue::Timestamp(t.start)));
    statement.set_opt("valid_time_end", time.map(|t| SqlValue::Timestamp(t.end)));
}

impl MutationEngine {
    // ---
    pub(super) async fn insert_observation(
        &self,
        conn: &mut PgConnection,
        mut obs: Observation,
    ) -> StaResult<i64> {
        // ---
        let result = obs.result.required("result")?.clone();
        let columns = ResultColumns::from_value(&result)?;

        let datastream_id = match mem::take(&mut obs.datastream) {
            Field::Set(ds) => Some(self.ensure(conn, Entity::from(ds)).await?),
            _ => None,
        };
        let multi_datastream_id = match mem::take(&mut obs.multi_datastream) {
            Field::Set(mds) => Some(self.ensure(conn, Entity::from(mds)).await?),
            _ => None,
        };
        Observation::stream_exclusive(datastream_id.is_some(), multi_datastream_id.is_some())?;
        if let Some(mds_id) = multi_datastream_id {
            self.check_result_length(conn, mds_id, Some(&result)).await?;
        }

        let feature_id = match mem::take(&mut obs.feature_of_interest) {
            Field::Set(foi) => self.ensure(conn, Entity::from(foi)).await?,
            _ => {
                self.generate_feature_of_interest(conn, datastream_id, multi_datastream_id)
                    .await?
            }
        };

        let mut insert = InsertStatement::new(EntityType::Observation.table());
        insert.id(self.ids.assign(obs.id.as_ref()));
        match obs.phenomenon_time.value() {
            Some(time) => set_phenomenon_time(&mut insert, time),
            None => set_phenomenon_time(&mut insert, &TimeValue::Instant(Utc::now())),
        }
        insert.set_opt("result_time", obs.result_time.value().map(|t| SqlValue::Timestamp(*t)));
        set_valid_time(&mut insert, obs.valid_time.value());
        columns.assign(&mut insert);
        insert.set_opt("result_quality", json_field(&obs.result_quality));
        insert.set_opt("parameters", json_field(&obs.parameters));
        insert.set_opt("datastream_id", datastream_id.map(SqlValue::Long));
        insert.set_opt("multi_datastream_id", multi_datastream_id.map(SqlValue::Long));
        insert.set("feature_id", SqlValue::Long(feature_id));
        let obs_id = insert.execute(conn).await?;
        debug!(obs_id, ?datastream_id, ?multi_datastream_id, feature_id, "inserted Observation");
        Ok(obs_id)
    }

    pub(super) async fn update_observation(
        &self,
        conn: &mut PgConnection,
        obs_id: i64,
        obs: Observation,
    ) -> StaResult<EntityChange> {
        // ---
        let mut change = EntityChange::updated(EntityType::Observation, obs_id);
        let mut update = UpdateStatement::new(EntityType::Observation.table(), obs_id);

        let (old_datastream, old_multi): (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT datastream_id, multi_datastream_id FROM observations WHERE id = $1",
        )
        .bind(obs_id)
        .fetch_one(&mut *conn)
        .await?;

        let mut datastream_id = old_datastream;
        match &obs.datastream {
            Field::Absent => {}
            Field::Null => datastream_id = None,
            Field::Set(ds) => {
                datastream_id = Some(
                    self.require_existing(conn, EntityType::Datastream, ds.id.as_ref())
                        .await?,
                )
            }
        }
        let mut multi_datastream_id = old_multi;
        match &obs.multi_datastream {
            Field::Absent => {}
            Field::Null => multi_datastream_id = None,
            Field::Set(mds) => {
                multi_datastream_id = Some(
                    self.require_existing(conn, EntityType::MultiDatastream, mds.id.as_ref())
                        .await?,
                )
            }
        }
        // Checked on the state after the change, before any write.
        Observation::stream_exclusive(datastream_id.is_some(), multi_datastream_id.is_some())?;

        let new_result = obs.result.non_null("result")?;
        if let Some(mds_id) = multi_datastream_id {
            if new_result.is_some() || obs.multi_datastream.is_set() {
                let stored;
                let result = match new_result {
                    Some(result) => Some(result),
                    None => {
                        stored = sqlx::query_scalar::<_, Option<Value>>(
                            "SELECT result_json FROM observations WHERE id = $1",
                        )
                        .bind(obs_id)
                        .fetch_one(&mut *conn)
                        .await?;
                        stored.as_ref()
                    }
                };
                self.check_result_length(conn, mds_id, result).await?;
            }
        }

        if obs.datastream.is_set() {
            update.set_opt("datastream_id", datastream_id.map(SqlValue::Long));
            change.add_field(Navigation::Datastream);
        }
        if obs.multi_datastream.is_set() {
            update.set_opt("multi_datastream_id", multi_datastream_id.map(SqlValue::Long));
            change.add_field(Navigation::MultiDatastream);
        }
        if let Some(foi) = obs.feature_of_interest.non_null("FeatureOfInterest")? {
            let feature_id = self
                .require_existing(conn, EntityType::FeatureOfInterest, foi.id.as_ref())
                .await?;
            update.set("feature_id", SqlValue::Long(feature_id));
            change.add_field(Navigation::FeatureOfInterest);
        }
        if let Some(time) = obs.phenomenon_time.non_null("phenomenonTime")? {
            set_phenomenon_time(&mut update, time);
            change.add_field(Property::PhenomenonTime);
        }
        if obs.result_time.is_set() {
            update.set_opt("result_time", obs.result_time.value().map(|t| SqlValue::Timestamp(*t)));
            change.add_field(Property::ResultTime);
        }
        if obs.valid_time.is_set() {
            set_valid_time(&mut update, obs.valid_time.value());
            change.add_field(Property::ValidTime);
        }
        if let Some(result) = new_result {
            ResultColumns::from_value(result)?.assign(&mut update);
            change.add_field(Property::Result);
        }
        if obs.result_quality.is_set() {
            update.set_opt("result_quality", json_field(&obs.result_quality));
            change.add_field(Property::ResultQuality);
        }
        if obs.parameters.is_set() {
            update.set_opt("parameters", json_field(&obs.parameters));
            change.add_field(Property::Parameters);
        }
        update.execute(conn).await?;
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_keep_their_text_form() {
        // ---
        let cols = ResultColumns::from_value(&json!(21.5)).unwrap();
        assert_eq!(cols.result_type, ResultType::Number);
        assert_eq!(cols.number, Some(21.5));
        assert_eq!(cols.string.as_deref(), Some("21.5"));
        assert!(cols.boolean.is_none() && cols.json.is_none());
    }

    #[test]
    fn each_shape_uses_its_own_columns() {
        // ---
        let boolean = ResultColumns::from_value(&json!(true)).unwrap();
        assert_eq!(boolean.result_type, ResultType::Boolean);
        assert_eq!(boolean.boolean, Some(true));
        assert_eq!(boolean.string.as_deref(), Some("true"));
        assert!(boolean.number.is_none());

        let text = ResultColumns::from_value(&json!("cloudy")).unwrap();
        assert_eq!(text.result_type, ResultType::String);
        assert_eq!(text.string.as_deref(), Some("cloudy"));
        assert!(text.number.is_none());

        let list = ResultColumns::from_value(&json!([1, "a", false])).unwrap();
        assert_eq!(list.result_type, ResultType::ObjectArray);
        assert_eq!(list.json, Some(json!([1, "a", false])));
        assert!(list.string.is_none() && list.number.is_none() && list.boolean.is_none());
    }

    #[test]
    fn null_result_is_incomplete() {
        // ---
        assert!(matches!(
            ResultColumns::from_value(&Value::Null),
            Err(StaError::IncompleteEntity(_))
        ));
    }

    #[test]
    fn shape_change_clears_previous_columns() {
        // ---
        let mut update = UpdateStatement::new("observations", 9);
        ResultColumns::from_value(&json!("high")).unwrap().assign(&mut update);
        assert_eq!(
            update.render().sql,
            "UPDATE observations SET result_type = $1, result_string = $2, result_number = NULL, \
             result_boolean = NULL, result_json = NULL WHERE id = $3"
        );
    }
}
