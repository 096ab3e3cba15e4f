use bytes::{BufMut, BytesMut};
use std::{fmt, fmt::Write, str::FromStr};

use super::{DecodeError, EncodeError, Scalar, fixed};
use crate::postgres::{Oid, oid};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Arbitrary precision `numeric`, kept in its decimal text form.
///
/// Parse it into a decimal library of choice, or use [`to_f64`][Numeric::to_f64]
/// for a lossy conversion.
///
/// ```
/// use postwire::codec::Numeric;
///
/// let n: Numeric = "-12.3400".parse().unwrap();
/// assert_eq!(n.as_str(), "-12.3400");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Numeric(String);

impl Numeric {
    /// Returns the decimal text representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for `NaN`.
    pub fn is_nan(&self) -> bool {
        self.0 == "NaN"
    }

    /// Lossy conversion into [`f64`].
    pub fn to_f64(&self) -> f64 {
        self.0.parse().unwrap_or(f64::NAN)
    }
}

/// Split `[-+]digits[.digits]`, rejecting anything else.
fn split_decimal(s: &str) -> Option<(bool, &str, &str)> {
    let (negative, unsigned) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int.is_empty() && frac.is_empty()) || !digits(int) || !digits(frac) {
        return None;
    }
    Some((negative, int, frac))
}

/// Text form postgres outputs: no `+`, no redundant leading zero, no bare
/// decimal point, and no sign on zero. Fraction scale is kept.
fn canonical(negative: bool, int: &str, frac: &str) -> String {
    let int = match int.trim_start_matches('0') {
        "" => "0",
        int => int,
    };
    let zero = int == "0" && frac.bytes().all(|b| b == b'0');

    let mut out = String::with_capacity(int.len() + frac.len() + 2);
    if negative && !zero {
        out.push('-');
    }
    out.push_str(int);
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

impl FromStr for Numeric {
    type Err = EncodeError;

    /// Parse decimal text, normalized into the form the server returns.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NaN" | "Infinity" | "-Infinity" => Ok(Self(s.to_owned())),
            _ => match split_decimal(s) {
                Some((negative, int, frac)) => Ok(Self(canonical(negative, int, frac))),
                None => Err(EncodeError::invalid(format!("invalid numeric {s:?}"))),
            },
        }
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Numeric {
            fn from(value: $ty) -> Self {
                Self(itoa::Buffer::new().format(value).to_owned())
            }
        }
    )*};
}

from_int!(i16, i32, i64, u32, u64);

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Numeric({})", self.0)
    }
}

// <https://github.com/postgres/postgres/blob/master/src/backend/utils/adt/numeric.c>
//
// binary format: ndigits i16, weight i16, sign u16, dscale u16, then ndigits
// base 10000 digits, where weight is the exponent of the first digit
impl Scalar for Numeric {
    const OIDS: &'static [Oid] = &[oid::NUMERIC];
    const ARRAY_OIDS: &'static [Oid] = &[oid::NUMERIC_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        text.parse().map_err(|_| DecodeError::invalid(format!("invalid numeric {text:?}")))
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let header: [u8; 8] = fixed(value.get(..8).unwrap_or(value))?;
        let ndigits = i16::from_be_bytes([header[0], header[1]]);
        let weight = i16::from_be_bytes([header[2], header[3]]) as i32;
        let sign = u16::from_be_bytes([header[4], header[5]]);
        let dscale = u16::from_be_bytes([header[6], header[7]]) as usize;

        match sign {
            NUMERIC_NAN => return Ok(Self("NaN".into())),
            NUMERIC_PINF => return Ok(Self("Infinity".into())),
            NUMERIC_NINF => return Ok(Self("-Infinity".into())),
            NUMERIC_POS | NUMERIC_NEG => {}
            _ => return Err(DecodeError::invalid("invalid numeric sign")),
        }

        let body = &value[8..];
        if ndigits < 0 || body.len() != ndigits as usize * 2 {
            return Err(DecodeError::invalid("invalid numeric digit count"));
        }
        let digits: Vec<u16> = body
            .chunks_exact(2)
            .map(|d| u16::from_be_bytes([d[0], d[1]]))
            .collect();
        if digits.iter().any(|d| *d >= 10000) {
            return Err(DecodeError::invalid("invalid numeric digit"));
        }
        let digit = |i: i32| match usize::try_from(i) {
            Ok(i) => digits.get(i).copied().unwrap_or(0),
            Err(_) => 0,
        };

        let mut out = String::with_capacity(digits.len() * 4 + dscale + 2);
        if sign == NUMERIC_NEG {
            out.push('-');
        }

        if weight < 0 {
            out.push('0');
        } else {
            for i in 0..=weight {
                let _ = match i {
                    0 => write!(out, "{}", digit(i)),
                    _ => write!(out, "{:04}", digit(i)),
                };
            }
        }

        if dscale > 0 {
            out.push('.');
            let start = out.len();
            let mut i = weight + 1;
            while out.len() - start < dscale {
                let _ = write!(out, "{:04}", digit(i));
                i += 1;
            }
            out.truncate(start + dscale);
        }

        Ok(Self(out))
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let special = match self.0.as_str() {
            "NaN" => Some(NUMERIC_NAN),
            "Infinity" => Some(NUMERIC_PINF),
            "-Infinity" => Some(NUMERIC_NINF),
            _ => None,
        };
        if let Some(sign) = special {
            buf.put_i16(0);
            buf.put_i16(0);
            buf.put_u16(sign);
            buf.put_u16(0);
            return Ok(());
        }

        let Some((negative, int, frac)) = split_decimal(&self.0) else {
            return Err(EncodeError::invalid(format!("invalid numeric {:?}", self.0)));
        };

        // group decimal digits by 4, aligned on the decimal point
        let int_pad = (4 - int.len() % 4) % 4;
        let frac_pad = (4 - frac.len() % 4) % 4;
        let aligned: Vec<u8> = std::iter::repeat_n(b'0', int_pad)
            .chain(int.bytes())
            .chain(frac.bytes())
            .chain(std::iter::repeat_n(b'0', frac_pad))
            .collect();
        let mut groups: Vec<u16> = aligned
            .chunks_exact(4)
            .map(|g| g.iter().fold(0u16, |acc, d| acc * 10 + (d - b'0') as u16))
            .collect();

        let mut weight = ((int.len() + int_pad) / 4) as i32 - 1;
        let leading = groups.iter().take_while(|g| **g == 0).count();
        groups.drain(..leading);
        weight -= leading as i32;
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        let too_large = || EncodeError::invalid("numeric out of range");
        let ndigits = i16::try_from(groups.len()).map_err(|_| too_large())?;
        let weight = i16::try_from(weight).map_err(|_| too_large())?;
        let dscale = u16::try_from(frac.len()).map_err(|_| too_large())?;
        let sign = match negative && !groups.is_empty() {
            true => NUMERIC_NEG,
            false => NUMERIC_POS,
        };

        buf.put_i16(ndigits);
        buf.put_i16(weight);
        buf.put_u16(sign);
        buf.put_u16(dscale);
        for group in groups {
            buf.put_u16(group);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(text: &str) -> String {
        let numeric: Numeric = text.parse().unwrap();
        let mut buf = BytesMut::new();
        numeric.to_binary(&mut buf).unwrap();
        Numeric::from_binary(&buf).unwrap().0
    }

    #[test]
    fn binary_round_trip() {
        for text in ["0", "1", "12345", "123.4500", "-0.0001", "0.5", "10000", "99999999999999999999.123", "NaN", "-Infinity"] {
            assert_eq!(round_trip(text), text);
        }
    }

    #[test]
    fn parse_normalizes() {
        for (text, expected) in [
            ("+5", "5"),
            ("007", "7"),
            ("5.", "5"),
            (".5", "0.5"),
            ("-0", "0"),
            ("-0.00", "0.00"),
            ("-007.10", "-7.10"),
        ] {
            let numeric: Numeric = text.parse().unwrap();
            assert_eq!(numeric.as_str(), expected);
            assert_eq!(round_trip(text), expected);
        }
    }

    #[test]
    fn binary_layout() {
        // 12345.6 = [1, 2345, 6000] weight 1 dscale 1
        let mut buf = BytesMut::new();
        "12345.6".parse::<Numeric>().unwrap().to_binary(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 3, 0, 1, 0, 0, 0, 1, 0, 1, 0x09, 0x29, 0x17, 0x70]);
    }

    #[test]
    fn decode_negative_weight() {
        // 0.00012 = [1, 2000] weight -1 dscale 5
        let value = [0, 2, 0xff, 0xff, 0, 0, 0, 5, 0, 1, 0x07, 0xd0];
        assert_eq!(Numeric::from_binary(&value).unwrap().as_str(), "0.00012");
    }

    #[test]
    fn reject_invalid() {
        assert!("1e5".parse::<Numeric>().is_err());
        assert!("-".parse::<Numeric>().is_err());
        assert!("1.2.3".parse::<Numeric>().is_err());
        assert!(Numeric::from_binary(&[0, 1, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
