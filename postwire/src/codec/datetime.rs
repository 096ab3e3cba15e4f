use bytes::{BufMut, BytesMut};
use time::{
    Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcDateTime, UtcOffset,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
};

use super::{DecodeError, EncodeError, Scalar, fixed};
use crate::postgres::{Oid, oid};

const PG_EPOCH_DATE: Date = {
    // source: `from_julian_day` docs
    match Date::from_julian_day(2_451_545) {
        Ok(ok) => ok,
        Err(_) => panic!("postgres epoch is a valid date"),
    }
};

const PG_EPOCH: PrimitiveDateTime = PrimitiveDateTime::new(PG_EPOCH_DATE, Time::MIDNIGHT);

const PG_EPOCH_UTC: UtcDateTime = UtcDateTime::new(PG_EPOCH_DATE, Time::MIDNIGHT);

const MICROS_PER_DAY: i64 = 86_400_000_000;

const DATE: &[I<'_>] = &[
    I::Component(C::Year(modifier::Year::default())),
    I::Literal(b"-"),
    I::Component(C::Month(modifier::Month::default())),
    I::Literal(b"-"),
    I::Component(C::Day(modifier::Day::default())),
];

const SUBSECOND: &[I<'_>] = &[
    I::Literal(b"."),
    I::Component(C::Subsecond(modifier::Subsecond::default())),
];

const TIME: &[I<'_>] = &[
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
    I::Optional(&I::Compound(SUBSECOND)),
];

const DATETIME: &[I<'_>] = &[
    I::Compound(DATE),
    I::Literal(b" "),
    I::Compound(TIME),
];

fn invalid(kind: &str, text: &str, error: impl std::fmt::Display) -> DecodeError {
    DecodeError::invalid(format!("invalid {kind} {text:?}: {error}"))
}

fn out_of_range(kind: &str) -> DecodeError {
    DecodeError::invalid(format!("{kind} out of range"))
}

fn micros(duration: Duration) -> Result<i64, EncodeError> {
    i64::try_from(duration.whole_microseconds())
        .map_err(|_| EncodeError::invalid("timestamp out of range"))
}

impl Scalar for Date {
    const OIDS: &'static [Oid] = &[oid::DATE];
    const ARRAY_OIDS: &'static [Oid] = &[oid::DATE_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        Date::parse(text, DATE).map_err(|e| invalid("date", text, e))
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let days = i32::from_be_bytes(fixed(value)?);
        PG_EPOCH_DATE
            .checked_add(Duration::days(days.into()))
            .ok_or_else(|| out_of_range("date"))
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let days = (*self - PG_EPOCH_DATE).whole_days();
        let days = i32::try_from(days).map_err(|_| EncodeError::invalid("date out of range"))?;
        buf.put_i32(days);
        Ok(())
    }
}

impl Scalar for Time {
    const OIDS: &'static [Oid] = &[oid::TIME];
    const ARRAY_OIDS: &'static [Oid] = &[oid::TIME_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        Time::parse(text, TIME).map_err(|e| invalid("time", text, e))
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        match i64::from_be_bytes(fixed(value)?) {
            // `24:00:00` has no representation
            us @ 0..MICROS_PER_DAY => Ok(Time::MIDNIGHT + Duration::microseconds(us)),
            _ => Err(out_of_range("time")),
        }
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_i64(micros(*self - Time::MIDNIGHT)?);
        Ok(())
    }
}

impl Scalar for PrimitiveDateTime {
    const OIDS: &'static [Oid] = &[oid::TIMESTAMP];
    const ARRAY_OIDS: &'static [Oid] = &[oid::TIMESTAMP_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        PrimitiveDateTime::parse(text, DATETIME).map_err(|e| invalid("timestamp", text, e))
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let us = i64::from_be_bytes(fixed(value)?);
        PG_EPOCH
            .checked_add(Duration::microseconds(us))
            .ok_or_else(|| out_of_range("timestamp"))
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_i64(micros(*self - PG_EPOCH)?);
        Ok(())
    }
}

/// Split `2024-01-02 03:04:05+05:30` into datetime and offset.
fn split_offset(text: &str) -> Option<(&str, UtcOffset)> {
    // skip the date part which contains `-`
    let at = 11 + text.get(11..)?.rfind(['+', '-'])?;
    let (datetime, offset) = text.split_at(at);
    let sign: i8 = if offset.starts_with('-') { -1 } else { 1 };

    let mut parts = offset[1..].split(':').map(|p| p.parse::<i8>().ok());
    let h = parts.next()??;
    let m = parts.next().unwrap_or(Some(0))?;
    let s = parts.next().unwrap_or(Some(0))?;
    if parts.next().is_some() {
        return None;
    }
    let offset = UtcOffset::from_hms(sign * h, sign * m, sign * s).ok()?;
    Some((datetime, offset))
}

impl Scalar for UtcDateTime {
    const OIDS: &'static [Oid] = &[oid::TIMESTAMPTZ];
    const ARRAY_OIDS: &'static [Oid] = &[oid::TIMESTAMPTZ_ARRAY];

    fn from_text(text: &str) -> Result<Self, DecodeError> {
        let (datetime, offset) = split_offset(text)
            .ok_or_else(|| invalid("timestamptz", text, "missing utc offset"))?;
        let datetime = PrimitiveDateTime::parse(datetime, DATETIME)
            .map_err(|e| invalid("timestamptz", text, e))?;
        let datetime: OffsetDateTime = datetime.assume_offset(offset);
        Ok(UtcDateTime::from(datetime))
    }

    fn from_binary(value: &[u8]) -> Result<Self, DecodeError> {
        let us = i64::from_be_bytes(fixed(value)?);
        PG_EPOCH_UTC
            .checked_add(Duration::microseconds(us))
            .ok_or_else(|| out_of_range("timestamptz"))
    }

    fn to_binary(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_i64(micros(*self - PG_EPOCH_UTC)?);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::{date, datetime, time};

    #[test]
    fn text_format() {
        assert_eq!(Date::from_text("2024-02-29").unwrap(), date!(2024-02-29));
        assert_eq!(Time::from_text("13:01:02").unwrap(), time!(13:01:02));
        assert_eq!(Time::from_text("13:01:02.5").unwrap(), time!(13:01:02.5));
        assert_eq!(
            PrimitiveDateTime::from_text("2000-01-01 00:00:00.000001").unwrap(),
            datetime!(2000-01-01 00:00:00.000001),
        );
        assert!(Date::from_text("infinity").is_err());
    }

    #[test]
    fn timestamptz_offset() {
        let utc = UtcDateTime::from_text("2024-01-02 08:04:05+05:30").unwrap();
        assert_eq!(utc, UtcDateTime::from(datetime!(2024-01-02 02:34:05 UTC)));
        let utc = UtcDateTime::from_text("2024-01-02 08:04:05.25-08").unwrap();
        assert_eq!(utc, UtcDateTime::from(datetime!(2024-01-02 16:04:05.25 UTC)));
        assert!(UtcDateTime::from_text("2024-01-02 08:04:05").is_err());
    }

    #[test]
    fn binary_epoch() {
        assert_eq!(Date::from_binary(&[0, 0, 0, 1]).unwrap(), date!(2000-01-02));
        assert_eq!(PrimitiveDateTime::from_binary(&(-1i64).to_be_bytes()).unwrap(), datetime!(1999-12-31 23:59:59.999999));
        assert!(Time::from_binary(&MICROS_PER_DAY.to_be_bytes()).is_err());

        let mut buf = BytesMut::new();
        datetime!(2000-01-01 00:00:01).to_binary(&mut buf).unwrap();
        assert_eq!(&buf[..], 1_000_000i64.to_be_bytes());
    }
}
