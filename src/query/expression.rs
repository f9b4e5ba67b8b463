//! Filter/order sub-compiler.
//!
//! Translates a parsed filter or order expression, whose leaves name
//! properties of the path's terminal entity type, into SQL against that
//! table's alias.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::columns::property_columns;
use super::sql::{SqlFragment, SqlValue};
use crate::error::{StaError, StaResult};
use crate::model::{EntityType, Property};

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Time(DateTime<Utc>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Function {
    Substringof,
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Round,
    Floor,
    Ceiling,
}

/// Parsed filter/order expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expression {
    Property {
        name: Property,
    },
    /// `properties/a/b`: a key path inside a JSON document property.
    Custom {
        root: Property,
        path: Vec<String>,
    },
    Literal {
        value: Literal,
    },
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Function {
        function: Function,
        args: Vec<Expression>,
    },
}

impl Expression {
    // ---
    pub fn property(name: Property) -> Self {
        Expression::Property { name }
    }

    pub fn literal(value: Literal) -> Self {
        Expression::Literal { value }
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub expression: Expression,
    #[serde(default)]
    pub direction: Direction,
}

/// Query options attached to a path: filter, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub filter: Option<Expression>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub top: Option<i64>,
    #[serde(default)]
    pub skip: Option<i64>,
}

// ---

/// Static type of a translated sub-expression, used to pick typed columns
/// and casts for JSON document keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Boolean,
    Number,
    Text,
    Time,
    /// Text extracted from a JSON document, castable to anything.
    JsonText,
    Null,
    /// `result` before the other operand decided which column to use.
    Result,
    Opaque,
}

struct Typed {
    sql: SqlFragment,
    kind: Kind,
}

/// Translation context: the main table of the compiled path.
pub struct ExpressionTranslator<'a> {
    entity_type: EntityType,
    alias: &'a str,
}

impl<'a> ExpressionTranslator<'a> {
    // ---
    pub fn new(entity_type: EntityType, alias: &'a str) -> Self {
        Self { entity_type, alias }
    }

    /// Translate a boolean filter into a `WHERE` predicate.
    pub fn filter(&self, expr: &Expression) -> StaResult<SqlFragment> {
        // ---
        let typed = self.translate(expr)?;
        match typed.kind {
            Kind::Boolean => Ok(typed.sql),
            Kind::JsonText => Ok(typed.sql.grouped().sql("::boolean")),
            _ => Err(StaError::illegal_argument("filter is not a boolean expression")),
        }
    }

    /// Translate an order term into one or more `ORDER BY` expressions.
    pub fn order_terms(&self, expr: &Expression) -> StaResult<Vec<SqlFragment>> {
        // ---
        if let Expression::Property {
            name: Property::Result,
        } = expr
        {
            self.column(Property::Result)?;
            return Ok(vec![
                SqlFragment::raw(format!("{}.result_number", self.alias)),
                SqlFragment::raw(format!("{}.result_string", self.alias)),
            ]);
        }
        Ok(vec![self.translate(expr)?.sql])
    }

    fn column(&self, property: Property) -> StaResult<&'static [&'static str]> {
        property_columns(self.entity_type, property).ok_or_else(|| {
            StaError::illegal_argument(format!(
                "{} has no property {property:?}",
                self.entity_type
            ))
        })
    }

    fn translate(&self, expr: &Expression) -> StaResult<Typed> {
        // ---
        match expr {
            Expression::Property { name } => self.translate_property(*name),
            Expression::Custom { root, path } => {
                if !matches!(root, Property::Properties | Property::Parameters | Property::ResultQuality) {
                    return Err(StaError::illegal_argument(format!(
                        "{root:?} is not a JSON document property"
                    )));
                }
                let col = self.column(*root)?[0];
                Ok(Typed {
                    sql: SqlFragment::raw(format!("{}.{col} #>> ", self.alias))
                        .bind(SqlValue::TextArray(path.clone()))
                        .grouped(),
                    kind: Kind::JsonText,
                })
            }
            Expression::Literal { value } => Ok(translate_literal(value)),
            Expression::Compare { op, left, right } => self.translate_compare(*op, left, right),
            Expression::And { left, right } => self.logical("AND", left, right),
            Expression::Or { left, right } => self.logical("OR", left, right),
            Expression::Not { operand } => {
                let inner = self.filter(operand)?;
                Ok(Typed {
                    sql: SqlFragment::raw("NOT ").append(inner.grouped()),
                    kind: Kind::Boolean,
                })
            }
            Expression::Arithmetic { op, left, right } => {
                let l = coerce(self.resolve(self.translate(left)?, Kind::Number), Kind::Number);
                let r = coerce(self.resolve(self.translate(right)?, Kind::Number), Kind::Number);
                let sql = match op {
                    ArithmeticOp::Add => l.append(SqlFragment::raw(" + ")).append(r).grouped(),
                    ArithmeticOp::Sub => l.append(SqlFragment::raw(" - ")).append(r).grouped(),
                    ArithmeticOp::Mul => l.append(SqlFragment::raw(" * ")).append(r).grouped(),
                    ArithmeticOp::Div => l.append(SqlFragment::raw(" / ")).append(r).grouped(),
                    ArithmeticOp::Mod => SqlFragment::raw("mod(")
                        .append(l)
                        .sql("::numeric, ")
                        .append(r)
                        .sql("::numeric)"),
                };
                Ok(Typed {
                    sql,
                    kind: Kind::Number,
                })
            }
            Expression::Function { function, args } => self.translate_function(*function, args),
        }
    }

    fn translate_property(&self, property: Property) -> StaResult<Typed> {
        // ---
        let cols = self.column(property)?;
        let a = self.alias;
        let (sql, kind) = match property {
            Property::Id => (format!("{a}.id"), Kind::Number),
            Property::Result => (format!("{a}.result_number"), Kind::Result),
            Property::PhenomenonTime | Property::ValidTime | Property::ResultTime | Property::Time => {
                (format!("{a}.{}", cols[0]), Kind::Time)
            }
            Property::Properties
            | Property::Parameters
            | Property::ResultQuality
            | Property::Metadata
            | Property::Location
            | Property::Feature
            | Property::UnitOfMeasurements
            | Property::MultiObservationDataTypes
            | Property::UnitOfMeasurement => (format!("{a}.{}", cols[0]), Kind::Opaque),
            _ => (format!("{a}.{}", cols[0]), Kind::Text),
        };
        Ok(Typed {
            sql: SqlFragment::raw(sql),
            kind,
        })
    }

    /// Pick the typed result column once the partner operand's kind is known.
    fn resolve(&self, typed: Typed, partner: Kind) -> Typed {
        // ---
        if typed.kind != Kind::Result {
            return typed;
        }
        let (col, kind) = match partner {
            Kind::Text => ("result_string", Kind::Text),
            Kind::Boolean => ("result_boolean", Kind::Boolean),
            _ => ("result_number", Kind::Number),
        };
        Typed {
            sql: SqlFragment::raw(format!("{}.{col}", self.alias)),
            kind,
        }
    }

    fn translate_compare(&self, op: CompareOp, left: &Expression, right: &Expression) -> StaResult<Typed> {
        // ---
        let l = self.translate(left)?;
        let r = self.translate(right)?;
        let (l_kind, r_kind) = (l.kind, r.kind);
        let l = self.resolve(l, r_kind);
        let r = self.resolve(r, l.kind);

        // `x eq null` / `x ne null`
        if r_kind == Kind::Null || l_kind == Kind::Null {
            let operand = if r_kind == Kind::Null { l.sql } else { r.sql };
            let sql = match op {
                CompareOp::Eq => operand.sql(" IS NULL"),
                CompareOp::Ne => operand.sql(" IS NOT NULL"),
                _ => {
                    return Err(StaError::illegal_argument(
                        "null only supports eq and ne comparisons",
                    ))
                }
            };
            return Ok(Typed {
                sql,
                kind: Kind::Boolean,
            });
        }

        if l.kind == Kind::Opaque || r.kind == Kind::Opaque {
            return Err(StaError::illegal_argument(
                "structured properties can not be compared directly",
            ));
        }

        let (l_sql, r_sql) = match (l.kind, r.kind) {
            (Kind::JsonText, other) if other != Kind::JsonText => (coerce(l, other), r.sql),
            (other, Kind::JsonText) if other != Kind::JsonText => (l.sql, coerce(r, other)),
            _ => (l.sql, r.sql),
        };
        let symbol = match op {
            CompareOp::Eq => " = ",
            CompareOp::Ne => " <> ",
            CompareOp::Gt => " > ",
            CompareOp::Ge => " >= ",
            CompareOp::Lt => " < ",
            CompareOp::Le => " <= ",
        };
        Ok(Typed {
            sql: l_sql.sql(symbol).append(r_sql),
            kind: Kind::Boolean,
        })
    }

    fn logical(&self, keyword: &str, left: &Expression, right: &Expression) -> StaResult<Typed> {
        // ---
        let l = self.filter(left)?;
        let r = self.filter(right)?;
        Ok(Typed {
            sql: l.sql(format!(" {keyword} ")).append(r).grouped(),
            kind: Kind::Boolean,
        })
    }

    fn translate_function(&self, function: Function, args: &[Expression]) -> StaResult<Typed> {
        // ---
        let arity = match function {
            Function::Substringof
            | Function::Contains
            | Function::StartsWith
            | Function::EndsWith
            | Function::IndexOf
            | Function::Concat => 2..=2,
            Function::Substring => 2..=3,
            _ => 1..=1,
        };
        if !arity.contains(&args.len()) {
            return Err(StaError::illegal_argument(format!(
                "{function:?} takes {}..={} argument(s), got {}",
                arity.start(),
                arity.end(),
                args.len()
            )));
        }

        let text = |e: &Expression| -> StaResult<SqlFragment> {
            Ok(coerce(self.resolve(self.translate(e)?, Kind::Text), Kind::Text))
        };
        let number = |e: &Expression| -> StaResult<SqlFragment> {
            Ok(coerce(self.resolve(self.translate(e)?, Kind::Number), Kind::Number))
        };
        let time = |e: &Expression| -> StaResult<SqlFragment> {
            Ok(coerce(self.translate(e)?, Kind::Time))
        };
        let call = |name: &str, inner: SqlFragment| SqlFragment::raw(format!("{name}(")).append(inner).sql(")");
        let extract = |field: &str, inner: SqlFragment| {
            SqlFragment::raw(format!("EXTRACT({field} FROM ")).append(inner).sql(")")
        };

        let (sql, kind) = match function {
            Function::Substringof => (
                call("strpos", text(&args[1])?.sql(", ").append(text(&args[0])?)).sql(" > 0"),
                Kind::Boolean,
            ),
            Function::Contains => (
                call("strpos", text(&args[0])?.sql(", ").append(text(&args[1])?)).sql(" > 0"),
                Kind::Boolean,
            ),
            Function::StartsWith => (
                call("starts_with", text(&args[0])?.sql(", ").append(text(&args[1])?)),
                Kind::Boolean,
            ),
            Function::EndsWith => {
                let suffix = text(&args[1])?;
                (
                    call(
                        "right",
                        text(&args[0])?.sql(", ").append(call("length", suffix.clone())),
                    )
                    .sql(" = ")
                    .append(suffix),
                    Kind::Boolean,
                )
            }
            Function::Length => (call("length", text(&args[0])?), Kind::Number),
            Function::IndexOf => (
                call("strpos", text(&args[0])?.sql(", ").append(text(&args[1])?)).sql(" - 1"),
                Kind::Number,
            ),
            Function::Substring => {
                // Zero-based start; the optional third argument is a length.
                let mut inner = text(&args[0])?
                    .sql(", ")
                    .append(number(&args[1])?)
                    .sql("::integer + 1");
                if let Some(length) = args.get(2) {
                    inner = inner.sql(", ").append(number(length)?).sql("::integer");
                }
                (call("substr", inner), Kind::Text)
            }
            Function::ToLower => (call("lower", text(&args[0])?), Kind::Text),
            Function::ToUpper => (call("upper", text(&args[0])?), Kind::Text),
            Function::Trim => (call("trim", text(&args[0])?), Kind::Text),
            Function::Concat => (
                text(&args[0])?.sql(" || ").append(text(&args[1])?).grouped(),
                Kind::Text,
            ),
            Function::Year => (extract("YEAR", time(&args[0])?), Kind::Number),
            Function::Month => (extract("MONTH", time(&args[0])?), Kind::Number),
            Function::Day => (extract("DAY", time(&args[0])?), Kind::Number),
            Function::Hour => (extract("HOUR", time(&args[0])?), Kind::Number),
            Function::Minute => (extract("MINUTE", time(&args[0])?), Kind::Number),
            Function::Second => (extract("SECOND", time(&args[0])?), Kind::Number),
            Function::Round => (call("round", number(&args[0])?), Kind::Number),
            Function::Floor => (call("floor", number(&args[0])?), Kind::Number),
            Function::Ceiling => (call("ceiling", number(&args[0])?), Kind::Number),
        };
        Ok(Typed { sql, kind })
    }
}

fn translate_literal(value: &Literal) -> Typed {
    // ---
    let (sql, kind) = match value {
        Literal::Null => (SqlFragment::raw("NULL"), Kind::Null),
        Literal::Bool(b) => (SqlFragment::value(SqlValue::Bool(*b)), Kind::Boolean),
        Literal::Integer(i) => (SqlFragment::value(SqlValue::Long(*i)), Kind::Number),
        Literal::Number(n) => (SqlFragment::value(SqlValue::Double(*n)), Kind::Number),
        Literal::Time(t) => (SqlFragment::value(SqlValue::Timestamp(*t)), Kind::Time),
        Literal::Text(s) => (SqlFragment::value(SqlValue::Text(s.clone())), Kind::Text),
    };
    Typed { sql, kind }
}

/// Cast JSON-extracted text to the kind it is used as.
fn coerce(typed: Typed, target: Kind) -> SqlFragment {
    // ---
    if typed.kind != Kind::JsonText {
        return typed.sql;
    }
    match target {
        Kind::Number => typed.sql.sql("::double precision"),
        Kind::Boolean => typed.sql.sql("::boolean"),
        Kind::Time => typed.sql.sql("::timestamptz"),
        _ => typed.sql,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::query::sql::SqlValue;

    fn render(fragment: &SqlFragment) -> (String, Vec<SqlValue>) {
        let mut binds = Vec::new();
        let sql = fragment.render(&mut binds);
        (sql, binds)
    }

    fn lit(value: Literal) -> Expression {
        Expression::literal(value)
    }

    #[test]
    fn comparison_against_main_alias() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Thing, "e1");
        let expr = Expression::compare(
            CompareOp::Eq,
            Expression::property(Property::Name),
            lit(Literal::Text("Station".into())),
        );
        let (sql, binds) = render(&t.filter(&expr).unwrap());
        assert_eq!(sql, "e1.name = $1");
        assert_eq!(binds, vec![SqlValue::Text("Station".into())]);
    }

    #[test]
    fn result_column_follows_literal_type() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Observation, "e1");
        let numeric = Expression::compare(
            CompareOp::Gt,
            Expression::property(Property::Result),
            lit(Literal::Number(20.5)),
        );
        let text = Expression::compare(
            CompareOp::Eq,
            lit(Literal::Text("high".into())),
            Expression::property(Property::Result),
        );
        let boolean = Expression::compare(
            CompareOp::Eq,
            Expression::property(Property::Result),
            lit(Literal::Bool(true)),
        );

        assert_eq!(render(&t.filter(&numeric).unwrap()).0, "e1.result_number > $1");
        assert_eq!(render(&t.filter(&text).unwrap()).0, "$1 = e1.result_string");
        assert_eq!(render(&t.filter(&boolean).unwrap()).0, "e1.result_boolean = $1");
    }

    #[test]
    fn null_comparison_becomes_is_null() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Observation, "e1");
        let expr = Expression::compare(
            CompareOp::Ne,
            Expression::property(Property::ResultTime),
            lit(Literal::Null),
        );
        assert_eq!(render(&t.filter(&expr).unwrap()).0, "e1.result_time IS NOT NULL");
    }

    #[test]
    fn custom_property_is_cast_to_partner_type() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Thing, "e3");
        let expr = Expression::compare(
            CompareOp::Ge,
            Expression::Custom {
                root: Property::Properties,
                path: vec!["floor".into(), "level".into()],
            },
            lit(Literal::Integer(2)),
        );
        let (sql, binds) = render(&t.filter(&expr).unwrap());
        assert_eq!(sql, "(e3.properties #>> $1)::double precision >= $2");
        assert_eq!(
            binds,
            vec![
                SqlValue::TextArray(vec!["floor".into(), "level".into()]),
                SqlValue::Long(2)
            ]
        );
    }

    #[test]
    fn logical_and_functions_compose() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Sensor, "e1");
        let expr = Expression::and(
            Expression::Function {
                function: Function::Substringof,
                args: vec![lit(Literal::Text("temp".into())), Expression::property(Property::Name)],
            },
            Expression::Not {
                operand: Box::new(Expression::compare(
                    CompareOp::Eq,
                    Expression::Function {
                        function: Function::ToLower,
                        args: vec![Expression::property(Property::EncodingType)],
                    },
                    lit(Literal::Text("application/pdf".into())),
                )),
            },
        );
        let (sql, _) = render(&t.filter(&expr).unwrap());
        assert_eq!(
            sql,
            "(strpos(e1.name, $1) > 0 AND NOT (lower(e1.encoding_type) = $2))"
        );
    }

    #[test]
    fn substring_takes_an_optional_length() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Thing, "e1");
        let call = |args: Vec<Expression>| Expression::Function {
            function: Function::Substring,
            args,
        };
        let prefix = Expression::compare(
            CompareOp::Eq,
            call(vec![
                Expression::property(Property::Name),
                lit(Literal::Integer(1)),
                lit(Literal::Integer(3)),
            ]),
            lit(Literal::Text("tat".into())),
        );
        let (sql, binds) = render(&t.filter(&prefix).unwrap());
        assert_eq!(sql, "substr(e1.name, $1::integer + 1, $2::integer) = $3");
        assert_eq!(binds[1], SqlValue::Long(3));

        let tail = Expression::compare(
            CompareOp::Eq,
            call(vec![Expression::property(Property::Name), lit(Literal::Integer(1))]),
            lit(Literal::Text("tation".into())),
        );
        let (sql, _) = render(&t.filter(&tail).unwrap());
        assert_eq!(sql, "substr(e1.name, $1::integer + 1) = $2");

        let too_many = Expression::compare(
            CompareOp::Eq,
            call(vec![
                Expression::property(Property::Name),
                lit(Literal::Integer(1)),
                lit(Literal::Integer(2)),
                lit(Literal::Integer(3)),
            ]),
            lit(Literal::Text("x".into())),
        );
        assert!(matches!(t.filter(&too_many), Err(StaError::IllegalArgument(_))));
    }

    #[test]
    fn properties_of_other_types_are_rejected() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Thing, "e1");
        let expr = Expression::compare(
            CompareOp::Eq,
            Expression::property(Property::Result),
            lit(Literal::Integer(1)),
        );
        assert!(matches!(t.filter(&expr), Err(StaError::IllegalArgument(_))));
    }

    #[test]
    fn non_boolean_filter_is_rejected() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Thing, "e1");
        assert!(t.filter(&Expression::property(Property::Name)).is_err());
    }

    #[test]
    fn ordering_by_result_uses_both_typed_columns() {
        // ---
        let t = ExpressionTranslator::new(EntityType::Observation, "e2");
        let terms = t.order_terms(&Expression::property(Property::Result)).unwrap();
        let rendered: Vec<String> = terms.iter().map(|f| render(f).0).collect();
        assert_eq!(rendered, vec!["e2.result_number", "e2.result_string"]);
    }
}
