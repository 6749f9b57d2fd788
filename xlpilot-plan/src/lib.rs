#![forbid(unsafe_code)]

//! The operation plan language: typed operations over named tables.

pub mod condition;
pub mod expr;
pub mod operation;
pub mod plan;
pub mod refs;
pub mod schema_view;

mod lenient;

pub use condition::{CompareOp, Comparison, Condition};
pub use expr::{BinOp, Expr, Expression};
pub use operation::*;
pub use plan::{
    OperationPlan, PlanError, PlannedOperation, RawOperation, RawPlan, TableBinding,
    PRIMARY_BINDING,
};
pub use refs::{is_wildcard, ColumnList, ReferenceResolver, SourceRef};
pub use schema_view::{disambiguate, SchemaView};
