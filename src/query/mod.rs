//! Query translator: pure functions from a validated search request to an
//! index `ParamMap`. No I/O, no state — kept separate from the
//! coordinator so the translation rules are unit-testable in isolation.

pub mod translate;

pub use translate::{translate_search, translate_suggest, SortOrder};
