use std::{fmt, pin::Pin};

use super::{CodecRegistry, EnumCodec};
use crate::{Connection, Result, common::verbose};

/// An owned dynamically typed [`Future`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Register codecs for a connection right after startup.
///
/// The registrar receive the connected [`Connection`], so it may query the
/// server, e.g. to look up the oid of a user defined type. Codecs registered
/// here only apply to that connection.
///
/// Registrars are added with [`Config::registrar`][crate::Config::registrar]
/// and run in the order they were added.
pub trait CodecRegistrar: Send + Sync {
    fn register<'a>(
        &'a self,
        conn: &'a mut Connection,
        registry: &'a mut CodecRegistry,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A [`CodecRegistrar`] from a function, see [`registrar_fn`].
#[derive(Clone)]
pub struct FnRegistrar<F>(F);

/// Create a [`CodecRegistrar`] which does not query the server.
///
/// ```
/// use postwire::codec::{registrar_fn, CodecRegistry, JsonCodec};
///
/// let registrar = registrar_fn(|registry: &mut CodecRegistry| {
///     registry.add_first(JsonCodec);
/// });
/// # let _ = registrar;
/// ```
pub fn registrar_fn<F>(f: F) -> FnRegistrar<F>
where
    F: Fn(&mut CodecRegistry) + Send + Sync + 'static,
{
    FnRegistrar(f)
}

impl<F> CodecRegistrar for FnRegistrar<F>
where
    F: Fn(&mut CodecRegistry) + Send + Sync + 'static,
{
    fn register<'a>(
        &'a self,
        _: &'a mut Connection,
        registry: &'a mut CodecRegistry,
    ) -> BoxFuture<'a, Result<()>> {
        (self.0)(registry);
        Box::pin(std::future::ready(Ok(())))
    }
}

impl<F> fmt::Debug for FnRegistrar<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRegistrar")
    }
}

/// Register an [`EnumCodec`] for each named enum type.
///
/// Type oids are looked up from `pg_type`, an unknown name fails the connection.
#[derive(Debug, Clone)]
pub struct EnumRegistrar {
    types: Vec<String>,
}

impl EnumRegistrar {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { types: types.into_iter().map(Into::into).collect() }
    }
}

impl CodecRegistrar for EnumRegistrar {
    fn register<'a>(
        &'a self,
        conn: &'a mut Connection,
        registry: &'a mut CodecRegistry,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for name in &self.types {
                let oid = crate::query::query_scalar::<_, _, u32>(
                    "SELECT oid FROM pg_type WHERE typname = $1 AND typtype = 'e'",
                    &mut *conn,
                )
                .bind(name.as_str())
                .fetch_one()
                .await
                .map_err(|err| err.context(format!("enum type {name:?}")))?;

                verbose!(name = name.as_str(), oid, "enum registered");
                registry.add_last(EnumCodec::new(oid));
            }
            Ok(())
        })
    }
}
