use bytes::{BufMut, Bytes, BytesMut};
use std::{
    any::{Any, type_name},
    marker::PhantomData,
    ops::Bound,
};

use super::{
    Codec, DecodeError, Decoded, EncodeError, Numeric, Scalar, Target,
    put_element, take, take_element,
};
use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;

/// A [`Scalar`] which postgres has a builtin range type of.
pub trait RangeElement: Scalar {
    /// Oid of the range type.
    const RANGE_OID: Oid;
}

impl RangeElement for i32 {
    const RANGE_OID: Oid = oid::INT4RANGE;
}

impl RangeElement for i64 {
    const RANGE_OID: Oid = oid::INT8RANGE;
}

impl RangeElement for Numeric {
    const RANGE_OID: Oid = oid::NUMRANGE;
}

#[cfg(feature = "time")]
impl RangeElement for time::Date {
    const RANGE_OID: Oid = oid::DATERANGE;
}

#[cfg(feature = "time")]
impl RangeElement for time::PrimitiveDateTime {
    const RANGE_OID: Oid = oid::TSRANGE;
}

#[cfg(feature = "time")]
impl RangeElement for time::UtcDateTime {
    const RANGE_OID: Oid = oid::TSTZRANGE;
}

/// Postgres range value.
///
/// Note that postgres normalize discrete ranges, `[1,3]` of `int4range`
/// is returned as `[1,4)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PgRange<T> {
    lower: Bound<T>,
    upper: Bound<T>,
    empty: bool,
}

impl<T> PgRange<T> {
    /// Create range with given bounds.
    pub fn new(lower: Bound<T>, upper: Bound<T>) -> Self {
        Self { lower, upper, empty: false }
    }

    /// The `empty` range.
    pub fn empty() -> Self {
        Self { lower: Bound::Unbounded, upper: Bound::Unbounded, empty: true }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn lower(&self) -> Bound<&T> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&T> {
        self.upper.as_ref()
    }
}

impl<T: RangeElement> PgRange<T> {
    fn from_binary(mut value: &[u8]) -> Result<Self, DecodeError> {
        let [flags] = super::fixed(take(&mut value, 1)?)?;
        if flags & RANGE_EMPTY != 0 {
            return Ok(Self::empty());
        }

        let mut bound = |inf: u8, inc: u8| -> Result<Bound<T>, DecodeError> {
            if flags & inf != 0 {
                return Ok(Bound::Unbounded);
            }
            let Some(value) = take_element(&mut value)? else {
                return Err(DecodeError::invalid("NULL range bound"));
            };
            let value = T::from_binary(value)?;
            match flags & inc != 0 {
                true => Ok(Bound::Included(value)),
                false => Ok(Bound::Excluded(value)),
            }
        };

        let lower = bound(RANGE_LB_INF, RANGE_LB_INC)?;
        let upper = bound(RANGE_UB_INF, RANGE_UB_INC)?;
        Ok(Self::new(lower, upper))
    }

    // empty | [lower,upper) with either bound omitted or quoted
    fn from_text(text: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::invalid(format!("invalid range {text:?}"));
        let text = text.trim();
        if text.eq_ignore_ascii_case("empty") {
            return Ok(Self::empty());
        }

        let lower_inc = match text.as_bytes().first() {
            Some(b'[') => true,
            Some(b'(') => false,
            _ => return Err(invalid()),
        };
        let upper_inc = match text.as_bytes().last() {
            Some(b']') if text.len() > 1 => true,
            Some(b')') if text.len() > 1 => false,
            _ => return Err(invalid()),
        };

        let (lower, upper) = split_bounds(&text[1..text.len() - 1]).ok_or_else(invalid)?;
        let bound = |value: Option<String>, inc: bool| -> Result<Bound<T>, DecodeError> {
            let Some(value) = value else {
                return Ok(Bound::Unbounded);
            };
            let value = T::from_text(&value)?;
            match inc {
                true => Ok(Bound::Included(value)),
                false => Ok(Bound::Excluded(value)),
            }
        };
        Ok(Self::new(bound(lower, lower_inc)?, bound(upper, upper_inc)?))
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if self.empty {
            buf.put_u8(RANGE_EMPTY);
            return Ok(());
        }

        let flags = |bound: &Bound<T>, inf: u8, inc: u8| match bound {
            Bound::Included(_) => inc,
            Bound::Excluded(_) => 0,
            Bound::Unbounded => inf,
        };
        buf.put_u8(
            flags(&self.lower, RANGE_LB_INF, RANGE_LB_INC) | flags(&self.upper, RANGE_UB_INF, RANGE_UB_INC),
        );
        for bound in [&self.lower, &self.upper] {
            if let Bound::Included(value) | Bound::Excluded(value) = bound {
                put_element(buf, |buf| value.to_binary(buf))?;
            }
        }
        Ok(())
    }
}

/// Split the inside of range text at the bound separator, `None` is an omitted bound.
fn split_bounds(body: &str) -> Option<(Option<String>, Option<String>)> {
    let mut bounds = [None, None];
    let mut current = 0;
    let mut chars = body.chars();
    let mut item = String::new();
    let mut quoted = false;

    loop {
        match chars.next() {
            Some('"') if quoted => match chars.clone().next() {
                // doubled quote inside quoted bound
                Some('"') => {
                    chars.next();
                    item.push('"');
                }
                _ => quoted = false,
            },
            Some('"') => {
                quoted = true;
                bounds[current].get_or_insert_with(String::new);
            }
            Some('\\') => item.push(chars.next()?),
            Some(',') if !quoted => {
                if current == 1 {
                    return None;
                }
                if !item.is_empty() {
                    bounds[0] = Some(std::mem::take(&mut item));
                }
                current = 1;
            }
            Some(c) => item.push(c),
            None if quoted || current == 0 => return None,
            None => {
                if !item.is_empty() {
                    bounds[1] = Some(item);
                }
                let [lower, upper] = bounds;
                return Some((lower, upper));
            }
        }
    }
}

/// [`Codec`] for builtin range types into [`PgRange<T>`].
pub struct RangeCodec<T>(PhantomData<fn() -> T>);

impl<T> RangeCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for RangeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RangeElement> Codec for RangeCodec<T> {
    fn name(&self) -> &'static str {
        type_name::<PgRange<T>>()
    }

    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        oid == T::RANGE_OID && target.accepts::<PgRange<T>>()
    }

    fn decode(&self, value: Bytes, _: Oid, format: PgFormat, _: Target) -> Result<Decoded, DecodeError> {
        let range = match format {
            PgFormat::Binary => PgRange::<T>::from_binary(&value)?,
            PgFormat::Text => PgRange::<T>::from_text(super::text(&value)?)?,
        };
        Ok(Box::new(range))
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<PgRange<T>>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        let Some(range) = value.downcast_ref::<PgRange<T>>() else {
            return Err(EncodeError::Unsupported { type_name: type_name::<PgRange<T>>() });
        };
        let mut buf = BytesMut::new();
        range.to_binary(&mut buf)?;
        Ok(Parameter::binary(T::RANGE_OID, buf.freeze()))
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<PgRange<T>>()
    }

    fn encode_null(&self, _: Target) -> Parameter {
        Parameter::null(T::RANGE_OID)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn text_bounds() {
        let range = PgRange::<i32>::from_text("[1,10)").unwrap();
        assert_eq!(range, PgRange::new(Bound::Included(1), Bound::Excluded(10)));

        let range = PgRange::<i64>::from_text("(,5]").unwrap();
        assert_eq!(range, PgRange::new(Bound::Unbounded, Bound::Included(5)));

        assert!(PgRange::<i32>::from_text("empty").unwrap().is_empty());
        assert!(PgRange::<i32>::from_text("[1,2,3)").is_err());
        assert!(PgRange::<i32>::from_text("[").is_err());
    }

    #[test]
    fn quoted_bounds() {
        assert_eq!(
            split_bounds(r#""a""b","#),
            Some((Some("a\"b".to_owned()), None)),
        );
        assert_eq!(
            split_bounds(r#""1","""#),
            Some((Some("1".to_owned()), Some(String::new()))),
        );
        assert_eq!(split_bounds(r#""a,"#), None);
        assert_eq!(
            split_bounds(r#""",x"#),
            Some((Some(String::new()), Some("x".to_owned()))),
        );
    }

    #[test]
    fn binary_round_trip() {
        let codec = RangeCodec::<i32>::new();
        let range = PgRange::new(Bound::Included(3), Bound::Unbounded);
        let param = codec.encode(&range).unwrap();
        assert_eq!(param.oid(), oid::INT4RANGE);

        let value = param.value().cloned().unwrap();
        assert_eq!(&value[..], [RANGE_LB_INC | RANGE_UB_INF, 0, 0, 0, 4, 0, 0, 0, 3]);
        let decoded = codec.decode(value, oid::INT4RANGE, PgFormat::Binary, Target::ANY).unwrap();
        assert_eq!(*decoded.downcast::<PgRange<i32>>().unwrap(), range);

        let empty = codec.encode(&PgRange::<i32>::empty()).unwrap();
        assert_eq!(&empty.value().unwrap()[..], [RANGE_EMPTY]);
    }
}
