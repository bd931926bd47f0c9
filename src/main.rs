use std::{path::PathBuf, sync::Arc};

use tokio::{net::TcpListener, sync::broadcast};

mod barrier;
mod client;
mod draw;
mod protocol;
mod server;
mod store;

struct Config {
    port: u16,
    /// Number of agencies participating in each draw cycle. Must match the
    /// real number of connecting agencies or the draw never fires.
    agencies: usize,
    bets_file: PathBuf,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: env_or("LOTTERY_PORT", 3600)?,
            agencies: env_or("LOTTERY_AGENCIES", 5)?,
            bets_file: env_or("LOTTERY_BETS_FILE", PathBuf::from("bets.csv"))?,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {name}: {raw:?}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(anyhow::anyhow!("reading {name}: {err}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // connect tracing to stdout
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let store = store::Store::new(config.bets_file);
    let ctx = server::Shared {
        store: store.clone(),
        draw: Arc::new(draw::DrawGate::new(config.agencies, store)),
    };

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(
        agencies = config.agencies,
        "Server listening on: {}",
        listener.local_addr()?
    );

    let (shutdown, _) = broadcast::channel(1);

    tokio::select! {
        result = server::run(listener, ctx, shutdown.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, force-closing open connections");
            let _ = shutdown.send(());
        }
    }

    Ok(())
}
