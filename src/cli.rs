//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch a page and print what a CSS selector matches.
///
/// Pagewalk decodes the page to UTF-8 whatever its charset, so the selected
/// text is printed correctly even for legacy-encoded sites.
#[derive(Parser, Debug)]
#[command(name = "pagewalk")]
#[command(author, version, about)]
pub struct Args {
    /// Page to fetch
    pub url: String,

    /// CSS selector whose matches are printed (default: the page title)
    #[arg(short, long, default_value = "title")]
    pub selector: String,

    /// Force the response charset instead of detecting it
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// Cookie JSON file, loaded before the request and rewritten after it
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// User-Agent preset (chrome, firefox, edge, safari, ie, iphone, android, googlebot)
    #[arg(short, long)]
    pub browser: Option<String>,

    /// Request timeout in milliseconds (0 to disable, max 600000)
    #[arg(short, long, default_value_t = 30_000, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub timeout: u64,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
