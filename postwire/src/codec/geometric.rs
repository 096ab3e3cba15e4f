use bytes::{BufMut, BytesMut};

use super::{DecodeError, EncodeError, Scalar, fixed};
use crate::postgres::{Oid, oid};

/// Geometric `point`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Point {
        Point { x, y }
    }
}

impl Scalar for Point {
    const OIDS: &'static [Oid] = &[oid::POINT];
    const ARRAY_OIDS: &'static [Oid] = &[oid::POINT_ARRAY];

    // (x,y)
    fn from_text(text: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::invalid(format!("invalid point {text:?}"));
        let inner = text
            .trim()
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let (x, y) = inner.split_once(',').ok_or_else(invalid)?;
        Ok(Point {
            x: x.trim().parse().map_err(|_| invalid())?,
            y: y.trim().parse().map_err(|_| invalid())?,
        })
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; 16] = fixed(value)?;
        let (x, y) = bytes.split_at(8);
        Ok(Point {
            x: f64::from_be_bytes(fixed(x)?),
            y: f64::from_be_bytes(fixed(y)?),
        })
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_f64(self.x);
        buf.put_f64(self.y);
        Ok(())
    }
}
