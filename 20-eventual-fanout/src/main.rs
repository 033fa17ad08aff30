use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use eventual_fanout::{
    broker::Broker,
    cli::{Cli, Command},
    config::{BrokerConfig, PaperClientConfig, PaperServerConfig, ReplicaConfig},
    paper_client, paper_server, replica,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Replica(args) => replica::run(ReplicaConfig::try_from(args)?).await?,
        Command::PaperServer(args) => {
            if let Err(err) = paper_server::run(PaperServerConfig::try_from(args)?).await {
                warn!("paper server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::PaperClient(args) => paper_client::run(PaperClientConfig::from(args)).await?,
        Command::Broker(args) => {
            let config = BrokerConfig::from(args);
            let listener = TcpListener::bind(config.listen).await?;
            let broker = Broker::new(listener);
            let addr = broker.local_addr()?;
            info!("broker listening on {}", addr);
            if let Err(err) = broker.run_until_ctrl_c().await {
                warn!("broker exited with error: {err:?}");
                return Err(err);
            }
        }
    }

    Ok(())
}
