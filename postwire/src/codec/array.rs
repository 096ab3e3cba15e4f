use bytes::{BufMut, Bytes, BytesMut};
use std::{
    any::{Any, type_name},
    marker::PhantomData,
};

use super::{
    Codec, DecodeError, Decoded, EncodeError, Scalar, Target,
    put_element, scalar::encode_oid, take_element, take_i32,
};
use crate::{
    encode::Parameter,
    postgres::{Oid, PgFormat, oid},
};

/// [`Codec`] for one dimensional array of [`Scalar`].
///
/// Decodes into `Vec<Option<T>>` by default, or `Vec<T>` which fail with
/// [`DecodeError::Null`] when the array contains NULL. Multi dimensional
/// arrays are rejected.
pub struct ArrayCodec<T>(PhantomData<fn() -> T>);

impl<T> ArrayCodec<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ArrayCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn array_oid<T: Scalar>() -> Oid {
    T::ARRAY_OIDS.first().copied().unwrap_or(oid::UNSPECIFIED)
}

fn decode_binary<T: Scalar>(mut value: &[u8]) -> Result<Vec<Option<T>>, DecodeError> {
    let ndim = take_i32(&mut value)?;
    let _has_null = take_i32(&mut value)?;
    let _elem_oid = take_i32(&mut value)?;
    match ndim {
        0 => return Ok(vec![]),
        1 => {}
        _ => return Err(DecodeError::invalid(format!("unsupported array dimension {ndim}"))),
    }
    let len = take_i32(&mut value)?;
    let _lower_bound = take_i32(&mut value)?;

    let mut items = Vec::with_capacity(len.clamp(0, 1024) as usize);
    for _ in 0..len {
        items.push(take_element(&mut value)?.map(T::from_binary).transpose()?);
    }
    if !value.is_empty() {
        return Err(DecodeError::invalid("trailing bytes after array elements"));
    }
    Ok(items)
}

fn decode_text<T: Scalar>(text: &str) -> Result<Vec<Option<T>>, DecodeError> {
    split_text(text)?
        .into_iter()
        .map(|item| item.as_deref().map(T::from_text).transpose())
        .collect()
}

/// Split array text output, `{1,NULL,"a \"b\""}`, into its elements.
fn split_text(text: &str) -> Result<Vec<Option<String>>, DecodeError> {
    let invalid = || DecodeError::invalid(format!("invalid array {text:?}"));

    let mut body = text.trim();
    // explicit bounds, `[0:1]={1,2}`
    if body.starts_with('[') {
        body = body.split_once('=').ok_or_else(invalid)?.1.trim_start();
    }
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .ok_or_else(invalid)?;

    let mut items = vec![];
    if body.trim().is_empty() {
        return Ok(items);
    }

    let mut chars = body.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() { }

        match chars.peek() {
            Some('{') => return Err(DecodeError::invalid("multi dimensional array is not supported")),
            Some('"') => {
                chars.next();
                let mut item = String::new();
                loop {
                    match chars.next().ok_or_else(invalid)? {
                        '"' => break,
                        '\\' => item.push(chars.next().ok_or_else(invalid)?),
                        c => item.push(c),
                    }
                }
                items.push(Some(item));
                while chars.next_if(|c| c.is_whitespace()).is_some() { }
            }
            _ => {
                let mut item = String::new();
                let mut escaped = false;
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    match c {
                        '\\' => {
                            escaped = true;
                            item.push(chars.next().ok_or_else(invalid)?);
                        }
                        c => item.push(c),
                    }
                }
                let item = item.trim_end();
                match !escaped && item.eq_ignore_ascii_case("NULL") {
                    true => items.push(None),
                    false => items.push(Some(item.to_owned())),
                }
            }
        }

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return Err(invalid()),
        }
    }
    Ok(items)
}

fn encode_array<'a, T: Scalar>(items: impl ExactSizeIterator<Item = Option<&'a T>>) -> Result<Parameter, EncodeError> {
    let Ok(len) = i32::try_from(items.len()) else {
        return Err(EncodeError::invalid("array too large"));
    };
    let mut buf = BytesMut::new();
    buf.put_i32(if len == 0 { 0 } else { 1 });
    let has_null = buf.len();
    buf.put_i32(0);
    buf.put_u32(encode_oid::<T>());
    if len == 0 {
        return Ok(Parameter::binary(array_oid::<T>(), buf.freeze()));
    }
    buf.put_i32(len);
    buf.put_i32(1);

    let mut null = false;
    for item in items {
        match item {
            Some(item) => put_element(&mut buf, |buf| item.to_binary(buf))?,
            None => {
                null = true;
                buf.put_i32(-1);
            }
        }
    }
    if null {
        buf[has_null..has_null + 4].copy_from_slice(&1i32.to_be_bytes());
    }
    Ok(Parameter::binary(array_oid::<T>(), buf.freeze()))
}

impl<T: Scalar> Codec for ArrayCodec<T> {
    fn name(&self) -> &'static str {
        type_name::<Vec<T>>()
    }

    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        T::ARRAY_OIDS.contains(&oid) && (target.accepts::<Vec<Option<T>>>() || target.is::<Vec<T>>())
    }

    fn decode(&self, value: Bytes, _: Oid, format: PgFormat, target: Target) -> Result<Decoded, DecodeError> {
        let items = match format {
            PgFormat::Binary => decode_binary::<T>(&value)?,
            PgFormat::Text => decode_text::<T>(super::text(&value)?)?,
        };
        if target.is::<Vec<T>>() {
            let items = items.into_iter().collect::<Option<Vec<T>>>().ok_or(DecodeError::Null)?;
            return Ok(Box::new(items));
        }
        Ok(Box::new(items))
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<Vec<T>>() || value.is::<Vec<Option<T>>>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        if let Some(items) = value.downcast_ref::<Vec<T>>() {
            return encode_array::<T>(items.iter().map(Some));
        }
        match value.downcast_ref::<Vec<Option<T>>>() {
            Some(items) => encode_array::<T>(items.iter().map(Option::as_ref)),
            None => Err(EncodeError::Unsupported { type_name: type_name::<Vec<T>>() }),
        }
    }

    fn can_encode_null(&self, target: Target) -> bool {
        target.is::<Vec<T>>() || target.is::<Vec<Option<T>>>()
    }

    fn encode_null(&self, _: Target) -> Parameter {
        Parameter::null(array_oid::<T>())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn text_elements() {
        let items = split_text(r#"{1, NULL ,"a \"b\"","NULL",c\,d}"#).unwrap();
        assert_eq!(items, [
            Some("1".to_owned()),
            None,
            Some("a \"b\"".to_owned()),
            Some("NULL".to_owned()),
            Some("c,d".to_owned()),
        ]);
        assert!(split_text("{}").unwrap().is_empty());
        assert_eq!(split_text("[0:1]={7,8}").unwrap().len(), 2);
        assert!(split_text("{{1,2},{3,4}}").is_err());
        assert!(split_text("1,2").is_err());
    }

    #[test]
    fn binary_round_trip() {
        let codec = ArrayCodec::<i32>::new();
        let param = codec.encode(&vec![Some(1i32), None, Some(3)]).unwrap();
        assert_eq!(param.oid(), oid::INT4_ARRAY);

        let value = param.value().cloned().unwrap();
        let decoded = codec.decode(value.clone(), oid::INT4_ARRAY, PgFormat::Binary, Target::ANY).unwrap();
        assert_eq!(*decoded.downcast::<Vec<Option<i32>>>().unwrap(), [Some(1), None, Some(3)]);

        let result = codec.decode(value, oid::INT4_ARRAY, PgFormat::Binary, Target::of::<Vec<i32>>());
        assert!(matches!(result, Err(DecodeError::Null)));
    }

    #[test]
    fn empty_array() {
        let codec = ArrayCodec::<String>::new();
        let param = codec.encode(&Vec::<String>::new()).unwrap();
        let value = param.value().cloned().unwrap();
        assert_eq!(value.len(), 12);
        let decoded = codec.decode(value, oid::TEXT_ARRAY, PgFormat::Binary, Target::of::<Vec<String>>()).unwrap();
        assert!(decoded.downcast::<Vec<String>>().unwrap().is_empty());
    }

    #[test]
    fn text_format() {
        let codec = ArrayCodec::<bool>::new();
        let decoded = codec
            .decode(Bytes::from_static(b"{t,f}"), oid::BOOL_ARRAY, PgFormat::Text, Target::of::<Vec<bool>>())
            .unwrap();
        assert_eq!(*decoded.downcast::<Vec<bool>>().unwrap(), [true, false]);
    }
}
