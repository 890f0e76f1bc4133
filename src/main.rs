use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use smushit_client::config::MAX_CONCURRENCY;
use smushit_client::{Config, ImageRecord, Smusher};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "smushit")]
#[command(about = "Optimize images with the Smush.it service")]
struct CliArgs {
    /// Image URLs or local file paths.
    #[arg(value_name = "SOURCE", required = true)]
    sources: Vec<String>,

    /// Build a ZIP of the optimized images and write it to this path.
    #[arg(long, value_name = "PATH")]
    zip: Option<PathBuf>,

    /// Do not download source and optimized image bytes.
    #[arg(long)]
    no_binary: bool,

    /// Number of images submitted at once.
    #[arg(long, value_name = "N", value_parser = parse_concurrency)]
    concurrency: Option<usize>,
}

fn parse_concurrency(input: &str) -> std::result::Result<usize, String> {
    match input.parse::<usize>() {
        Ok(n) if (1..=MAX_CONCURRENCY).contains(&n) => Ok(n),
        _ => Err(format!(
            "Invalid concurrency '{}'. Expected a positive integer up to {}",
            input, MAX_CONCURRENCY
        )),
    }
}

#[derive(Serialize)]
struct Report<'a> {
    task: &'a str,
    subtask: &'a str,
    optimized: usize,
    failed: usize,
    bytes_saved: u64,
    archive: Option<String>,
    records: &'a [ImageRecord],
}

async fn run(args: CliArgs) -> Result<()> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    if args.no_binary {
        config.request_binary_data = false;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    let mut smusher = Smusher::new(config)?;
    smusher.optimize(&args.sources, args.zip.is_some()).await?;

    let archive = match &args.zip {
        Some(path) => {
            let bytes = smusher.archive(None, None).await?;
            tokio::fs::write(path, &bytes)
                .await
                .with_context(|| format!("Failed to write archive to {}", path.display()))?;
            info!("Wrote archive ({} bytes) to {}", bytes.len(), path.display());
            Some(path.display().to_string())
        }
        None => None,
    };

    let records = smusher.records()?;
    let failed = records.iter().filter(|r| r.has_error()).count();
    let report = Report {
        task: smusher.task(),
        subtask: smusher.subtask(),
        optimized: records.len() - failed,
        failed,
        bytes_saved: records.iter().map(ImageRecord::savings).sum(),
        archive,
        records,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smushit_client=info,smushit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    info!("Optimizing {} images", args.sources.len());

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Optimization failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_concurrency_valid() {
        assert_eq!(parse_concurrency("4").unwrap(), 4);
    }

    #[test]
    fn test_parse_concurrency_rejects_zero() {
        let err = parse_concurrency("0").unwrap_err();
        assert!(err.contains("positive integer"));
    }

    #[test]
    fn test_parse_concurrency_rejects_values_above_limit() {
        let err = parse_concurrency(&usize::MAX.to_string()).unwrap_err();
        assert!(err.contains("up to"));
    }

    #[test]
    fn test_cli_requires_sources() {
        assert!(CliArgs::try_parse_from(["smushit"]).is_err());

        let args =
            CliArgs::try_parse_from(["smushit", "--zip", "out.zip", "a.png", "b.png"]).unwrap();
        assert_eq!(args.sources, vec!["a.png", "b.png"]);
        assert_eq!(args.zip, Some(PathBuf::from("out.zip")));
        assert!(!args.no_binary);
    }
}
