//! Command line inspector for OPeNDAP datasets.
//!
//! Opens DAP2 and DAP4 datasets lazily, prints their structure and
//! metadata, and fetches subsets through constraint expressions.

mod summary;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dap_client::{
    apply_dimension_subsets, resolve_url, ClientConfig, DapClient, Dap4Constraint, Dataset, Filter, Protocol,
    Selection,
};
use dap_model::Variable;

use crate::summary::{format_record, ArraySummary, DatasetSummary};

#[derive(Parser)]
#[command(name = "dap-inspect")]
#[command(about = "Inspect and subset DAP2/DAP4 datasets", long_about = None)]
struct Args {
    /// Client configuration file (YAML); environment variables otherwise
    #[arg(long, env = "DAP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the variable tree of a dataset
    Tree {
        url: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the metadata documents (DDS and DAS, or DMR) of a dataset
    Metadata { url: String },

    /// Fetch a slice of an array, grid or sequence
    Slice {
        url: String,

        /// Fully qualified variable name
        variable: String,

        /// Per-axis selections, e.g. "0,10:14,::2"
        #[arg(short, long, default_value = "")]
        index: String,

        /// Sequence columns to keep
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Sequence filters, e.g. "depth>10"
        #[arg(long)]
        filter: Vec<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply a DAP4 constraint expression to the metadata, optionally
    /// fetching the result
    Subset {
        url: String,

        /// DAP4 constraint expression
        #[arg(long)]
        ce: String,

        /// Fetch the constrained data
        #[arg(long)]
        fetch: bool,
    },

    /// Open the metadata of many granules and sum a concatenation dimension
    Consolidate {
        urls: Vec<String>,

        /// Dimension to concatenate along
        #[arg(long, default_value = "time")]
        dim: String,
    },

    /// Decode a saved response or metadata document
    File {
        path: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = match &args.config {
        Some(path) => ClientConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ClientConfig::from_env(),
    };
    info!(
        timeout_secs = config.timeout_secs,
        max_concurrency = config.max_concurrency,
        "Starting dap-inspect"
    );
    let client = DapClient::new(config)?;

    match args.command {
        Commands::Tree { url, json } => {
            let dataset = client.open_url(&url).await?;
            print_dataset(&dataset, json)?;
        }
        Commands::Metadata { url } => {
            let dataset = client.open_url(&url).await?;
            match dataset.protocol() {
                Protocol::Dap2 => {
                    println!("{}", dap2_parser::to_dds(&dataset)?);
                    println!("{}", dap2_parser::to_das(&dataset));
                }
                Protocol::Dap4 => println!("{}", dap4_parser::to_dmr(&dataset)),
            }
        }
        Commands::Slice {
            url,
            variable,
            index,
            columns,
            filter,
            json,
        } => {
            let dataset = client.open_url(&url).await?;
            let selections = if index.trim().is_empty() {
                Vec::new()
            } else {
                Selection::parse_list(&index)?
            };
            slice(&client, &dataset, &variable, &selections, &columns, &filter, json).await?;
        }
        Commands::Subset { url, ce, fetch } => {
            let (base, protocol) = resolve_url(&url, client.config().default_protocol);
            if protocol != Protocol::Dap4 {
                bail!("constraint subsets need a DAP4 dataset, {} speaks DAP2", base);
            }
            let constraint = Dap4Constraint::parse(&ce)?;
            let dataset = client.open_dap4(&base).await?;
            let narrowed = apply_dimension_subsets(&dataset, &constraint)?;
            println!("{}", constraint.url(&base, "dap"));
            if fetch {
                let data = client.fetch_dap(&base, &constraint).await?;
                print_dataset(&data, false)?;
            } else {
                print_dataset(&narrowed, false)?;
            }
        }
        Commands::Consolidate { urls, dim } => {
            if urls.is_empty() {
                bail!("no granule URLs given");
            }
            let consolidated = client.consolidate_metadata(&urls, &dim).await;
            for (url, dataset) in consolidated.successes() {
                println!("ok\t{}\t{}", url, dap_client::dimension_length(dataset, &dim).unwrap_or(0));
            }
            for (url, error) in consolidated.failures() {
                println!("failed\t{}\t{}", url, error);
            }
            println!("total {} = {}", consolidated.concat_dim, consolidated.total_length);
        }
        Commands::File { path, json } => {
            let dataset = client.open_file(&path).await?;
            print_dataset(&dataset, json)?;
        }
    }

    Ok(())
}

fn print_dataset(dataset: &Dataset, json: bool) -> anyhow::Result<()> {
    let summary = DatasetSummary::new(dataset);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.to_text());
    }
    Ok(())
}

async fn slice(
    client: &DapClient,
    dataset: &Dataset,
    fqn: &str,
    selections: &[Selection],
    columns: &[String],
    filters: &[String],
    json: bool,
) -> anyhow::Result<()> {
    if dataset.grid(fqn).is_some() {
        let grid = client.grid(dataset, fqn)?.slice(selections).await?;
        let mut summaries = vec![ArraySummary::new(grid.array())];
        summaries.extend(grid.maps().iter().map(ArraySummary::new));
        return print_arrays(&summaries, json);
    }

    if dataset.leaf(fqn).is_some() {
        let leaf = client.array(dataset, fqn)?.slice(selections).await?;
        return print_arrays(&[ArraySummary::new(&leaf)], json);
    }

    if dataset.sequence(fqn).is_some() {
        let mut proxy = client.sequence(dataset, fqn)?;
        if !columns.is_empty() {
            let names: Vec<&str> = columns.iter().map(String::as_str).collect();
            proxy = proxy.select(&names)?;
        }
        for text in filters {
            proxy = proxy.filter(Filter::parse(text)?)?;
        }
        let records = proxy.records().await?;
        println!("{}", records.columns().join("\t"));
        for record in records {
            println!("{}", format_record(&record?));
        }
        return Ok(());
    }

    match dataset.find(fqn) {
        Some(var) => bail!("{} is a {:?} and cannot be sliced", fqn, var.kind()),
        None => bail!("dataset has no variable {}", fqn),
    }
}

fn print_arrays(summaries: &[ArraySummary], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summaries)?);
        return Ok(());
    }
    for s in summaries {
        println!("{} {} {:?} ({} values)", s.dtype, s.fqn, s.shape, s.count);
        if let (Some(min), Some(max)) = (s.min, s.max) {
            println!("  min {} max {}", min, max);
        }
        println!("  {}", s.head.join(", "));
    }
    Ok(())
}
