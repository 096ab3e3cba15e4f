
/// Postgres data transmission format.
///
/// For specific information, see its variant documentation.
///
/// Parameters are always sent in [`Binary`][b], and extended query results are
/// requested in [`Binary`][b]. Simple query results always arrive in [`Text`][t].
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
///
/// [t]: PgFormat::Text
/// [b]: PgFormat::Binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the [`Text`][t] transmitted representation, there is no trailing null character;
    /// the frontend must add one to received values if it wants to process them as C strings.
    /// (The [`Text`][t] format does not allow embedded nulls, by the way.)
    ///
    /// [t]: PgFormat::Text
    Text,
    /// Binary has format code one.
    ///
    /// [`Binary`][b] representations for integers use network byte order (most significant byte first).
    /// For other data types consult the documentation or source code to learn about the binary representation.
    /// Keep in mind that binary representations for complex data types might change across server versions.
    ///
    /// [b]: PgFormat::Binary
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> u16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Returns format from its format code, `None` for unknown code.
    pub fn from_code(code: u16) -> Option<PgFormat> {
        match code {
            0 => Some(PgFormat::Text),
            1 => Some(PgFormat::Binary),
            _ => None,
        }
    }
}
