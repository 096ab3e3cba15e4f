//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//!
//! Values are decoded lazily, a failing column only fails the access to it.
use bytes::Bytes;
use std::{any::Any, fmt, sync::Arc};

use crate::{
    codec::{CodecRegistry, DecodeError, Decoded, Json, Numeric, PgEnum, PgRange, Point, RangeElement, Scalar, Target},
    common::unit_error,
    ext::FmtExt,
    postgres::{ColumnDescriptor, Oid, PgFormat, ProtocolError},
};

/// Postgres row.
#[derive(Clone)]
pub struct Row {
    columns: Arc<[ColumnDescriptor]>,
    values: Vec<Option<Bytes>>,
    registry: Arc<CodecRegistry>,
}

impl Row {
    /// `DataRow` message of a result described by `columns`.
    pub(crate) fn new(
        columns: Arc<[ColumnDescriptor]>,
        values: Vec<Option<Bytes>>,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self, ProtocolError> {
        if columns.len() != values.len() {
            return Err(ProtocolError::malformed(format!(
                "DataRow has {} values, RowDescription has {} columns",
                values.len(),
                columns.len(),
            )));
        }
        Ok(Self { columns, values, registry })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of fields/column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the column descriptions.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Get column.
    pub fn column<I: Index>(&self, idx: I) -> Result<Column<'_>, DecodeError> {
        let nth = idx.position(&self.columns)?;
        Ok(Column {
            desc: &self.columns[nth],
            value: self.values[nth].as_ref(),
            registry: &self.registry,
        })
    }

    /// Try get and decode column using [`Decode`] implementation.
    ///
    /// Use `Option<T>` for nullable column.
    pub fn try_get<I: Index, T: Decode>(&self, idx: I) -> Result<T, DecodeError> {
        T::decode(self.column(idx)?)
    }

    /// Get and decode column into any type the registry can produce, NULL is [`None`].
    pub fn get<I: Index, T: Any>(&self, idx: I) -> Result<Option<T>, DecodeError> {
        self.column(idx)?.get()
    }

    /// Decode column into the default type of its codec, NULL is [`None`].
    pub fn get_any<I: Index>(&self, idx: I) -> Result<Option<Decoded>, DecodeError> {
        let col = self.column(idx)?;
        self.registry.decode(col.value.cloned(), col.oid(), col.format(), Target::ANY)
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }

    /// Iterate over columns.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Column<'_>> {
        self.columns.iter().zip(&self.values).map(|(desc, value)| Column {
            desc,
            value: value.as_ref(),
            registry: &self.registry,
        })
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (desc, value) in self.columns.iter().zip(&self.values) {
            dbg.key(&desc.name);
            match value {
                Some(value) => dbg.value(&value.lossy()),
                None => dbg.value(&format_args!("NULL")),
            };
        }
        dbg.finish()
    }
}

/// Postgres column.
#[derive(Clone, Copy)]
pub struct Column<'r> {
    desc: &'r ColumnDescriptor,
    value: Option<&'r Bytes>,
    registry: &'r CodecRegistry,
}

impl<'r> Column<'r> {
    /// Returns column name.
    pub fn name(&self) -> &'r str {
        &self.desc.name
    }

    /// Returns column type [`Oid`].
    pub fn oid(&self) -> Oid {
        self.desc.type_oid
    }

    /// Returns column value format.
    pub fn format(&self) -> PgFormat {
        self.desc.format
    }

    /// Returns the column description.
    pub fn descriptor(&self) -> &'r ColumnDescriptor {
        self.desc
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the raw value.
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn value(&self) -> Option<&'r Bytes> {
        self.value
    }

    /// Decode value through the registry, NULL is [`None`].
    pub fn get<T: Any>(&self) -> Result<Option<T>, DecodeError> {
        self.registry.decode_as(self.value.cloned(), self.oid(), self.format())
    }

    /// Decode non NULL value through the registry.
    ///
    /// Return [`DecodeError::Null`] if value is `NULL`.
    pub fn decode_as<T: Any>(&self) -> Result<T, DecodeError> {
        self.get()?.ok_or(DecodeError::Null)
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

impl fmt::Debug for Column<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name())
            .field("oid", &self.oid())
            .field("value", &self.value.map(|v| v.lossy()))
            .finish()
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5, T6 6);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5, T6 6, T7 7);

/// A type that can be constructed from [`Column`].
///
/// Types produced by a custom codec can implement it with
/// [`Column::decode_as`].
pub trait Decode: Sized {
    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => column.decode().map(Some),
        }
    }
}

impl Decode for () {
    fn decode(_: Column) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! decode {
    ($($ty:ty),* $(,)?) => {$(
        impl Decode for $ty {
            fn decode(column: Column) -> Result<Self, DecodeError> {
                column.decode_as()
            }
        }
    )*};
}

decode!(bool, i8, i16, i32, i64, u32, f32, f64, String, Vec<u8>, Bytes, Numeric, Point, Json, PgEnum);

#[cfg(feature = "json")]
decode!(serde_json::Value);

#[cfg(feature = "time")]
decode!(time::Date, time::Time, time::PrimitiveDateTime, time::UtcDateTime);

impl<T: Scalar> Decode for Vec<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.decode_as()
    }
}

impl<T: Scalar> Decode for Vec<Option<T>> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.decode_as()
    }
}

impl<T: RangeElement> Decode for PgRange<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.decode_as()
    }
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the nth column.
    fn position(self, columns: &[ColumnDescriptor]) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, columns: &[ColumnDescriptor]) -> Result<usize, DecodeError> {
        match self < columns.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, columns: &[ColumnDescriptor]) -> Result<usize, DecodeError> {
        columns
            .iter()
            .position(|col| col.name == self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

unit_error! {
    /// An error when try to [`fetch_one`][crate::query::Query::fetch_one] and not returns any row.
    pub struct RowNotFound("row not found");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{common::ByteStr, postgres::oid};

    fn desc(name: &'static str, type_oid: Oid) -> ColumnDescriptor {
        ColumnDescriptor {
            name: ByteStr::from_static(name),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: PgFormat::Binary,
        }
    }

    fn row() -> Row {
        let columns: Arc<[ColumnDescriptor]> = Arc::from([
            desc("id", oid::INT4),
            desc("name", oid::TEXT),
            desc("note", oid::TEXT),
        ]);
        let values = vec![
            Some(Bytes::from_static(&[0, 0, 0, 9])),
            Some(Bytes::from_static(b"deadpool")),
            None,
        ];
        Row::new(columns, values, Arc::new(CodecRegistry::new())).unwrap()
    }

    #[test]
    fn index_by_name_and_position() {
        let row = row();
        assert_eq!(row.try_get::<_, i32>("id").unwrap(), 9);
        assert_eq!(row.try_get::<_, String>(1).unwrap(), "deadpool");
        assert_eq!(row.try_get::<_, Option<String>>("note").unwrap(), None);
        assert!(matches!(row.try_get::<_, String>("note"), Err(DecodeError::Null)));
        assert!(matches!(row.try_get::<_, i32>("nope"), Err(DecodeError::ColumnNotFound(_))));
        assert!(matches!(row.try_get::<_, i32>(3), Err(DecodeError::IndexOutOfBounds(3))));
    }

    #[test]
    fn decode_failure_is_per_column() {
        let row = row();
        assert!(row.try_get::<_, i64>("id").is_err());
        assert_eq!(row.get::<_, i32>("id").unwrap(), Some(9));
        let any = row.get_any(0).unwrap().unwrap();
        assert_eq!(*any.downcast::<i32>().unwrap(), 9);
    }

    #[test]
    fn tuple_from_row() {
        let (id, name, note) = row().decode::<(i32, String, Option<String>)>().unwrap();
        assert_eq!((id, name.as_str(), note), (9, "deadpool", None));
    }

    #[test]
    fn column_count_mismatch() {
        let columns: Arc<[ColumnDescriptor]> = Arc::from([desc("id", oid::INT4)]);
        assert!(Row::new(columns, vec![], Arc::new(CodecRegistry::new())).is_err());
    }
}
