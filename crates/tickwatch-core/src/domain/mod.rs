//! Value types shared by sources, conditions and rules.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated market symbol, case preserved |
//! | [`Identifier`] | Plain SQL table/column name |
//! | [`Timestamp`] | UTC instant with date-first rendering |
//! | [`TimeSeries`] | Chronological window of values for one source |

mod series;
mod symbol;
mod timestamp;

pub use series::TimeSeries;
pub use symbol::{Identifier, Symbol};
pub use timestamp::Timestamp;
