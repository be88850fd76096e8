//! Command line interface for the stacforge ingestion pipeline.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use stacforge::{Activities, OrchestrationContext, Orchestrator};
use stacforge_catalog::CatalogClient;
use stacforge_engine::{Environment, StoreFetcher, validate_template};
use stacforge_server::{AppState, router};
use stacforge_store::{
    AzureStoreProvider, ClientSecretProvider, Cloud, StoreProvider, TokenCache,
};
use std::{io::Read, sync::Arc};
use tracing::metadata::Level;

/// stacforge: bulk-transform remote scenes into STAC items and hand them
/// to a catalog.
#[derive(Debug, Parser)]
pub struct Stacforge {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease log verbosity (-q for warnings only, -qq for errors).
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose"
    )]
    quiet: u8,
}

/// A stacforge subcommand.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serves the orchestration trigger and status endpoints.
    Serve {
        /// The address to bind.
        #[arg(long, default_value = "127.0.0.1:7071")]
        addr: String,
    },

    /// Runs one orchestration locally and prints its result.
    Run {
        /// A file holding the orchestration input as JSON, or `-` for
        /// standard input.
        infile: String,
    },

    /// Statically validates a GeoTemplate.
    ValidateTemplate {
        /// The template file, or `-` for standard input.
        infile: String,
    },

    /// Registers a collection with the catalog for bulk ingestion.
    Ingest {
        /// The catalog URL.
        #[arg(long)]
        catalog_url: String,

        /// The target collection id.
        #[arg(long)]
        collection_id: String,

        /// The collection document's blob URL.
        #[arg(long)]
        collection_url: String,
    },
}

impl Stacforge {
    /// The log level selected by the verbosity flags.
    pub fn log_level(&self) -> Option<Level> {
        match 1 + i16::from(self.verbose) - i16::from(self.quiet) {
            i16::MIN..=-1 => None,
            0 => Some(Level::ERROR),
            1 => Some(Level::INFO),
            2 => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        }
    }

    /// Runs the selected subcommand.
    pub async fn run(self) -> Result<()> {
        let cloud = Cloud::from_env()?;
        match self.command {
            Command::Serve { addr } => {
                let tokens = tokens(cloud)?;
                let provider: Arc<dyn StoreProvider> =
                    Arc::new(AzureStoreProvider::new(cloud, tokens.clone()));
                let fetcher = StoreFetcher::new(provider.clone(), Some(tokens.clone()), cloud);
                let environment = Arc::new(Environment::new(provider.clone(), Arc::new(fetcher)));
                let orchestrator = Orchestrator::new(Activities::new(provider.clone(), environment));
                let state = AppState::new(
                    orchestrator,
                    provider,
                    tokens,
                    cloud.catalog_scope().ok().map(String::from),
                );
                let listener = tokio::net::TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("could not bind {addr}"))?;
                tracing::info!("serving on {addr}");
                axum::serve(listener, router(state)).await?;
                Ok(())
            }
            Command::Run { infile } => {
                let input: serde_json::Value = serde_json::from_str(&read_input(&infile)?)
                    .context("the orchestration input is not JSON")?;
                let tokens = tokens(cloud)?;
                let provider: Arc<dyn StoreProvider> =
                    Arc::new(AzureStoreProvider::new(cloud, tokens.clone()));
                let fetcher = StoreFetcher::new(provider.clone(), Some(tokens), cloud);
                let environment = Arc::new(Environment::new(provider.clone(), Arc::new(fetcher)));
                let orchestrator = Orchestrator::new(Activities::new(provider, environment));
                let context = OrchestrationContext::new(uuid());
                let output = orchestrator.run(&context, Some(input)).await;
                println!("{}", serde_json::to_string_pretty(&output)?);
                Ok(())
            }
            Command::ValidateTemplate { infile } => {
                let source = read_input(&infile)?;
                let (valid, errors) = validate_template(&source, None)?;
                for error in &errors {
                    match error.line {
                        Some(line) => eprintln!("{}: {} (line {line})", error.kind, error.message),
                        None => eprintln!("{}: {}", error.kind, error.message),
                    }
                }
                if valid {
                    println!("template is valid");
                    Ok(())
                } else {
                    Err(anyhow!("template is invalid: {} errors found", errors.len()))
                }
            }
            Command::Ingest {
                catalog_url,
                collection_id,
                collection_url,
            } => {
                let tokens = tokens(cloud)?;
                let provider = AzureStoreProvider::new(cloud, tokens.clone());
                let client = CatalogClient::new(&catalog_url, cloud.catalog_scope()?, tokens)?;
                let (ingestion_id, run_id) = client
                    .bulk_ingest(&collection_id, &collection_url, &provider)
                    .await?;
                println!("ingestion {ingestion_id} running with id {run_id}");
                Ok(())
            }
        }
    }
}

fn tokens(cloud: Cloud) -> Result<TokenCache> {
    let provider = ClientSecretProvider::from_env(cloud)
        .context("no identity configured, set AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET")?;
    Ok(TokenCache::new(Arc::new(provider)))
}

fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn read_input(infile: &str) -> Result<String> {
    if infile == "-" {
        let mut buffer = String::new();
        let _ = std::io::stdin()
            .read_to_string(&mut buffer)
            .context("could not read standard input")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(infile).with_context(|| format!("could not read {infile}"))
    }
}

#[cfg(test)]
mod tests {
    use super::Stacforge;
    use clap::Parser;
    use tracing::metadata::Level;

    #[test]
    fn verbosity_levels() {
        let parse = |args: &[&str]| {
            Stacforge::parse_from(
                std::iter::once("stacforge")
                    .chain(args.iter().copied())
                    .chain(["validate-template", "-"]),
            )
        };
        assert_eq!(parse(&[]).log_level(), Some(Level::INFO));
        assert_eq!(parse(&["-v"]).log_level(), Some(Level::DEBUG));
        assert_eq!(parse(&["-vv"]).log_level(), Some(Level::TRACE));
        assert_eq!(parse(&["-q"]).log_level(), Some(Level::ERROR));
        assert_eq!(parse(&["-qq"]).log_level(), None);
    }
}
