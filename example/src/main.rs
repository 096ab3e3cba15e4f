use tracing::{Instrument, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use postwire::Result;

mod connection;
mod query;
mod from_row;
mod codec;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    connection::main().instrument(trace_span!("connection")).await?;
    query::main().instrument(trace_span!("query")).await?;
    from_row::main().instrument(trace_span!("from_row")).await?;
    codec::main().instrument(trace_span!("codec")).await?;

    Ok(())
}
