//! The pure core: type algebra, context-feature ordering, rule value
//! objects, the setting declaration state machine, and the query filter
//! predicate. Nothing in this module touches I/O.

pub mod context_features;
pub mod query;
pub mod rules;
pub mod settings;
pub mod type_algebra;

pub use query::{compute_etag, filter_matches, ContextFilter, FeatureFilter};
pub use rules::Rule;
pub use settings::{AttributeDiff, ClassifyContext, DeclarationOutcome, DeclareRequest, DiffLevel, Setting, Version};
pub use type_algebra::{Comparison, TypeExpr, TypeParseError};
