use argh::FromArgs;
use std::path::PathBuf;
use std::sync::Arc;

use tahmo_connector::config::ConnectorConfig;
use tahmo_connector::provider::TahmoClientFactory;
use tahmo_connector::sink::SensorsApiClient;
use tahmo_connector::state::SqliteStateStore;
use tahmo_connector::PullObservations;

/// Pull new TAHMO station readings and forward them as observations.
#[derive(FromArgs)]
struct Args {
    /// path to the connector configuration file
    #[argh(option, short = 'c', default = "PathBuf::from(\"config.yaml\")")]
    config: PathBuf,

    /// override the watermark state database path
    #[argh(option)]
    state: Option<PathBuf>,

    /// fetch and transform only; print the observations without submitting
    #[argh(switch)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    log::info!("Loading config from: {}", args.config.display());
    let config = ConnectorConfig::from_file(&args.config)?;
    let state_path = args.state.unwrap_or_else(|| config.state_path());
    log::info!(
        "Integration: {}, state: {}",
        config.integration.id,
        state_path.display()
    );

    let store = Arc::new(SqliteStateStore::open(&state_path)?);
    let sink = Arc::new(SensorsApiClient::new(&config.sink)?);
    let sources = Arc::new(TahmoClientFactory {
        timeout: config.fetch_timeout(),
    });
    let action = PullObservations::new(sources, sink, store)
        .with_retry(config.retry.fetch.into(), config.retry.delivery.into());

    let output = if args.dry_run {
        log::info!("Dry run: nothing will be submitted");
        let previews = action
            .preview(&config.integration, chrono::Utc::now())
            .await?;
        serde_json::to_string_pretty(&previews)?
    } else {
        let entries = action.run(&config.integration).await?;
        serde_json::to_string_pretty(&entries)?
    };
    println!("{output}");

    Ok(())
}
