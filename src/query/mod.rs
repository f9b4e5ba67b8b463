//! Read side: resolved paths and filter/order trees compiled into SQL.

mod adjacency;
mod columns;
mod compiler;
mod expression;
mod path;
mod sql;

pub use adjacency::{lookup as adjacency, Join};
pub use columns::{default_projection, projection, property_columns};
pub use compiler::{CompiledQuery, PathCompiler, TableRef};
pub use expression::{
    ArithmeticOp, CompareOp, Direction, Expression, ExpressionTranslator, Function, Literal,
    OrderBy, QueryOptions,
};
pub use path::{PathElement, ResourcePath};
pub use sql::{RenderedQuery, SelectQuery, SqlFragment, SqlValue};
