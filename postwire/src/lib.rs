//! Non-blocking Postgres driver
//!
//! The protocol is implemented as a sans-io [`Session`][session::Session],
//! driven over tokio by [`Connection`]. Values are translated by an
//! extensible [`CodecRegistry`][codec::CodecRegistry].
//!
//! # Examples
//!
//! ```no_run
//! use postwire::Connection;
//!
//! # async fn app() -> postwire::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let res = postwire::query_as::<_, _, (i32, String)>("SELECT 420, $1", &mut conn)
//!     .bind("Foo")
//!     .fetch_one()
//!     .await?;
//!
//! assert_eq!(res.0, 420);
//! assert_eq!(res.1.as_str(), "Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Streaming with backpressure:
//!
//! ```no_run
//! use futures::StreamExt;
//!
//! # async fn app(mut conn: postwire::Connection) -> postwire::Result<()> {
//! let mut rows = postwire::query("SELECT * FROM generate_series(1, 100000)", &mut conn)
//!     .fetch_size(256)
//!     .fetch();
//!
//! while let Some(row) = rows.next().await {
//!     let n: i32 = row?.try_get(0)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Custom codec for a single connection:
//!
//! ```no_run
//! use postwire::{Config, Connection, codec::{CodecRegistry, JsonCodec, registrar_fn}};
//!
//! # async fn app() -> postwire::Result<()> {
//! let config = Config::parse("postgres://postgres@localhost/postgres")?
//!     .registrar(registrar_fn(|registry: &mut CodecRegistry| {
//!         registry.add_first(JsonCodec);
//!     }));
//! let conn = Connection::connect_with(config).await?;
//! # Ok(())
//! # }
//! ```

extern crate self as postwire;

pub mod common;
mod io;
pub mod net;
mod ext;

// Protocol
pub mod postgres;
pub mod auth;
pub mod session;

// Encoding
pub mod codec;
pub mod encode;

// Component
mod statement;
pub mod sql;
pub mod row;

// Operation
pub mod transport;
pub mod query;
pub mod transaction;

// Connection
pub mod connection;

mod error;


pub use encode::Encode;
pub use row::{Row, FromRow, Decode};
pub use statement::Prepared;

pub use connection::{Connection, Config, Subscription, CancelToken};
pub use transaction::Transaction;
#[doc(inline)]
pub use query::{
    query, query_as, query_scalar, execute, simple, pipeline, prepare, copy_in, copy_out, begin,
};
pub use error::{Error, ErrorKind, Result, Aborted, Closed, EmptyQuery, Timeout};

#[cfg(feature = "macros")]
pub use postwire_macros::FromRow;
