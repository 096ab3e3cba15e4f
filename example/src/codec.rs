use bytes::Bytes;
use std::any::Any;

use postwire::{
    Config, Connection, Encode, Result, execute, query_scalar,
    codec::{
        Codec, CodecRegistry, DecodeError, Decoded, EncodeError, EnumRegistrar, PgEnum, Target,
        registrar_fn,
    },
    encode::{Argument, Parameter},
    postgres::{Oid, PgFormat, oid},
    row::{Column, Decode},
};

/// `json` column kept as its text.
#[derive(Debug, PartialEq, Eq)]
struct JsonText(String);

struct JsonTextCodec;

impl Codec for JsonTextCodec {
    fn can_decode(&self, oid: Oid, _: PgFormat, target: Target) -> bool {
        oid == oid::JSON && target.accepts::<JsonText>()
    }

    fn decode(&self, value: Bytes, _: Oid, _: PgFormat, _: Target) -> Result<Decoded, DecodeError> {
        let text = String::from_utf8(value.to_vec()).map_err(DecodeError::custom)?;
        Ok(Box::new(JsonText(text)))
    }

    fn can_encode(&self, value: &dyn Any) -> bool {
        value.is::<JsonText>()
    }

    fn encode(&self, value: &dyn Any) -> Result<Parameter, EncodeError> {
        let Some(JsonText(text)) = value.downcast_ref() else {
            return Err(EncodeError::custom("expected JsonText"));
        };
        Ok(Parameter::text(oid::JSON, Bytes::copy_from_slice(text.as_bytes())))
    }
}

impl Decode for JsonText {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.decode_as()
    }
}

impl Encode for JsonText {
    fn into_argument(self) -> Argument {
        Argument::value(self)
    }

    fn null_target() -> Target {
        Target::of::<JsonText>()
    }
}

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;
    execute("DROP TYPE IF EXISTS mood", &mut conn).await?;
    execute("CREATE TYPE mood AS ENUM ('sad', 'ok', 'happy')", &mut conn).await?;
    conn.close().await?;

    let config = Config::from_env()
        .registrar(registrar_fn(|registry: &mut CodecRegistry| {
            registry.add_first(JsonTextCodec);
        }))
        .registrar(EnumRegistrar::new(["mood"]));
    let mut conn = Connection::connect_with(config).await?;

    let json = query_scalar::<_, _, JsonText>("SELECT $1::json", &mut conn)
        .bind(JsonText(String::from(r#"{"id": 4}"#)))
        .fetch_one()
        .await?;

    assert_eq!(json.0, r#"{"id": 4}"#);

    let value = query_scalar::<_, _, serde_json::Value>("SELECT '[1, 2]'::jsonb", &mut conn)
        .fetch_one()
        .await?;

    assert_eq!(value, serde_json::json!([1, 2]));

    let mood = query_scalar::<_, _, PgEnum>("SELECT 'happy'::mood", &mut conn)
        .fetch_one()
        .await?;

    assert_eq!(mood.0, "happy");

    execute("DROP TYPE mood", &mut conn).await?;
    conn.close().await
}
