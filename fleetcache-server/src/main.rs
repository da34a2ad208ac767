//! CLI entry point: parse configuration, initialize structured logging,
//! then hand off to the reactor.

use clap::Parser;
use fleetcache_server::config::{LogFormat, Options};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    init_logging(&options);
    fleetcache_server::eventloop::run(options)?;
    Ok(())
}

fn init_logging(options: &Options) {
    let filter = options
        .log_filter
        .clone()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match options.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
