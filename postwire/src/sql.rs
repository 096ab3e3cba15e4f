//! Sql string operation.
use crate::statement::Prepared;

/// Type that represent sql string.
///
/// A [`Prepared`] statement is also accepted, its `Parse` is skipped.
pub trait Sql {
    /// Returns sql string.
    fn sql(&self) -> &str;

    /// Returns the prepared statement to execute, if any.
    fn prepared(&self) -> Option<&Prepared> {
        None
    }
}

impl Sql for &str {
    fn sql(&self) -> &str {
        self
    }
}

impl Sql for String {
    fn sql(&self) -> &str {
        self
    }
}

impl Sql for &String {
    fn sql(&self) -> &str {
        self
    }
}

impl Sql for &Prepared {
    fn sql(&self) -> &str {
        Prepared::sql(self)
    }

    fn prepared(&self) -> Option<&Prepared> {
        Some(self)
    }
}
