//! Raw provider tables, the canonical series, and the normalizer between them.

pub mod canonical;
pub mod cleaning;
pub mod dates;
pub mod normalize;
pub mod raw;

pub use canonical::{CanonicalSeries, Observation};
pub use cleaning::{forward_fill_raw, percent_change};
pub use normalize::Normalizer;
pub use raw::{Cell, RawColumn, RawTable};
