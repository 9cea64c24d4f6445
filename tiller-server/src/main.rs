use anyhow::Result;
use clap::Parser;
use tiller_server::settings::Settings;
use tiller_server::{bus, pipeline, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();
    log::info!("tiller-server {}", tiller_server::VERSION);

    // Configuration problems abort here, before any message is read.
    let settings = Settings::load(&cli.settings)?;
    let mapper = settings.build_mapper()?;
    let aggregate = settings.build_aggregate()?;

    let receiver = bus::subscribe(&settings.subscribe_address).await?;
    let publisher = bus::Publisher::bind(&settings.publish_address).await?;

    pipeline::run(mapper, aggregate, receiver, publisher).await
}
