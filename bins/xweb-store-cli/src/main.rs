use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xweb_store::{Persisted, Store, StoreConfig};

/// Read and write an xweb document store file
#[derive(Parser, Debug)]
#[command(name = "xweb-store")]
#[command(version, about)]
struct Cli {
    /// Backing file of the store
    file: PathBuf,

    /// JSON store configuration; the backing file above always wins
    #[arg(long, env = "XWEB_STORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored at a path
    Get { path: String },

    /// Merge a JSON value at a path, print the change records and save
    Post {
        path: String,
        #[arg(value_parser = parse_json)]
        data: Value,
    },

    /// Print the whole tree
    Dump,
}

fn parse_json(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

impl Cli {
    /// Store configuration from `--config`, with the backing file applied.
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                StoreConfig::from_json(&text).context("parsing store config")?
            }
            None => StoreConfig::default(),
        };
        config.backing_path = Some(self.file.clone());

        if !config.load_on_open && matches!(self.command, Command::Post { .. }) {
            bail!(
                "post with loadOnOpen disabled would replace {} with only the posted value",
                self.file.display()
            );
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,xweb_store=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.store_config()?;
    tracing::debug!("Opening store with {:?}", config);
    let store = Store::open(config);

    match cli.command {
        Command::Get { path } => match store.get(path.as_str()).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("nothing stored at {path}"),
        },
        Command::Post { path, data } => {
            let batch = store.post_now_with_save(true, path.as_str(), data).await?;
            for change in &batch.changes {
                println!("{}", serde_json::to_string(change)?);
            }
            for failure in &batch.delivery_failures {
                tracing::warn!(
                    "{} failed on {}: {}",
                    failure.subscription,
                    failure.path,
                    failure.message
                );
            }
            if let Persisted::Failed(reason) = batch.persisted {
                bail!("changes applied but not saved: {reason}");
            }
            tracing::info!("{} change(s) written", batch.len());
        }
        Command::Dump => {
            println!("{}", serde_json::to_string_pretty(&store.snapshot().await)?)
        }
    }

    Ok(())
}
