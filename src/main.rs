//! CLI entry point for pagewalk.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pagewalk_core::{Client, CookieEntry, Params};
use serde_json::json;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let client = Client::try_new().context("failed to create HTTP client")?;
    client.set("timeout", &json!(args.timeout), false);
    if let Some(browser) = &args.browser
        && !client.set("browser", &json!(browser), false)
    {
        bail!("unknown browser preset: {browser}");
    }

    if let Some(path) = &args.cookies {
        let imported = load_cookies(&client, path)?;
        info!(imported, path = %path.display(), "cookies loaded");
    }

    let page = match client
        .fetch_with(&args.url, &Params::new(), args.encoding.as_deref())
        .await
    {
        Ok(page) => page,
        Err(e) => {
            let message = e.to_string();
            match e.into_page() {
                Some(page) => {
                    warn!(error = %message, "server answered with an error status");
                    page
                }
                None => bail!("failed to fetch {}: {message}", args.url),
            }
        }
    };

    info!(
        url = %page.url(),
        status = page.status(),
        encoding = page.document.context().detected_encoding.as_deref().unwrap_or("utf-8"),
        redirects = page.response.redirects,
        "page fetched"
    );

    let selection = page.select(&args.selector)?;
    for index in 0..selection.len() {
        println!("{}", selection.eq(index).text().trim());
    }
    if selection.is_empty() {
        warn!(selector = %args.selector, "selector matched nothing");
    }

    if let Some(path) = &args.cookies {
        save_cookies(&client, path)?;
    }

    Ok(())
}

fn load_cookies(client: &Client, path: &Path) -> Result<usize> {
    if !path.exists() {
        debug!(path = %path.display(), "cookie file does not exist yet");
        return Ok(0);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cookie file {}", path.display()))?;
    let entries: Vec<CookieEntry> = serde_json::from_str(&text)
        .with_context(|| format!("invalid cookie JSON in {}", path.display()))?;
    Ok(client.import_cookies(&entries))
}

fn save_cookies(client: &Client, path: &Path) -> Result<()> {
    let entries = client.export_cookies();
    let text = serde_json::to_string_pretty(&entries)?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write cookie file {}", path.display()))?;
    info!(cookies = entries.len(), path = %path.display(), "cookies saved");
    Ok(())
}
