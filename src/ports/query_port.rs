//! Query engine port trait.

use crate::domain::error::ScreenerError;
use crate::domain::row::RawRow;

pub trait QueryPort: Send + Sync {
    /// Run `sql` and return every row. SQL `NULL` columns are left out of the row.
    fn execute(&self, sql: &str) -> Result<Vec<RawRow>, ScreenerError>;
}
