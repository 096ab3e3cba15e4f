
/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Builtin type oids, as listed in `pg_type.dat`.
///
/// Extension and user defined types does not have stable oid, query
/// `pg_type` at runtime for those.
pub mod oid {
    use super::Oid;

    macro_rules! oids {
        ($($name:ident = $oid:literal $(, $doc:literal)?;)*) => {
            $(
                $(#[doc = $doc])?
                pub const $name: Oid = $oid;
            )*
        };
    }

    oids! {
        UNSPECIFIED = 0, "0 means type unspecified, server infer it from context";
        BOOL = 16, "boolean, 'true'/'false'";
        BYTEA = 17, "variable-length string, binary values escaped";
        CHAR = 18, "single character";
        NAME = 19, "63-byte type for storing system identifiers";
        INT8 = 20, "~18 digit integer, 8-byte storage";
        INT2 = 21, "-32 thousand to 32 thousand, 2-byte storage";
        INT4 = 23, "-2 billion to 2 billion integer, 4-byte storage";
        TEXT = 25, "variable-length string, no limit specified";
        OID = 26, "object identifier(oid), maximum 4 billion";
        JSON = 114, "JSON stored as text";
        POINT = 600, "geometric point '(x, y)'";
        FLOAT4 = 700, "single-precision floating point number, 4-byte storage";
        FLOAT8 = 701, "double-precision floating point number, 8-byte storage";
        UNKNOWN = 705, "pseudo-type representing an undetermined type";
        BOOL_ARRAY = 1000;
        BYTEA_ARRAY = 1001;
        CHAR_ARRAY = 1002;
        NAME_ARRAY = 1003;
        INT2_ARRAY = 1005;
        INT4_ARRAY = 1007;
        TEXT_ARRAY = 1009;
        BPCHAR_ARRAY = 1014;
        VARCHAR_ARRAY = 1015;
        INT8_ARRAY = 1016;
        POINT_ARRAY = 1017;
        FLOAT4_ARRAY = 1021;
        FLOAT8_ARRAY = 1022;
        OID_ARRAY = 1028;
        BPCHAR = 1042, "'char(length)' blank-padded string, fixed storage length";
        VARCHAR = 1043, "'varchar(length)' non-blank-padded string, variable storage length";
        DATE = 1082, "date";
        TIME = 1083, "time of day";
        TIMESTAMP = 1114, "date and time";
        TIMESTAMP_ARRAY = 1115;
        DATE_ARRAY = 1182;
        TIME_ARRAY = 1183;
        TIMESTAMPTZ = 1184, "date and time with time zone";
        TIMESTAMPTZ_ARRAY = 1185;
        NUMERIC_ARRAY = 1231;
        NUMERIC = 1700, "'numeric(precision, scale)' arbitrary precision number";
        RECORD = 2249, "pseudo-type representing any composite type";
        JSONB = 3802, "Binary JSON";
        JSONB_ARRAY = 3807;
        INT4RANGE = 3904, "range of integers";
        NUMRANGE = 3906, "range of numerics";
        TSRANGE = 3908, "range of timestamps without time zone";
        TSTZRANGE = 3910, "range of timestamps with time zone";
        DATERANGE = 3912, "range of dates";
        INT8RANGE = 3926, "range of bigints";
    }
}
