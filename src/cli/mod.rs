pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::cli::config::InteractLevel;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log debug output of the fetcher
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch pages in real browser tabs, one tab per url
    Fetch {
        /// Urls to fetch
        #[arg(required = true)]
        urls: Vec<String>,

        /// Site profile to use, the default configuration otherwise
        #[arg(short, long)]
        profile: Option<String>,

        /// Interaction preset, overrides the profile's interact settings
        #[arg(short, long, value_enum)]
        level: Option<InteractLevel>,

        /// Load the urls as single resources, without rendering
        #[arg(short, long)]
        resource: bool,

        /// Comma separated selectors to wait for before the page is steady
        #[arg(short, long)]
        wait_selector: Option<String>,

        /// Referrer to send with every url
        #[arg(long)]
        referrer: Option<String>,

        /// Write the results as JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fetch { urls, profile, level, resource, wait_selector, referrer, output } => {
            info!("Fetching {} urls", urls.len());
            let request = commands::FetchRequest {
                urls,
                profile,
                level,
                resource,
                wait_selector,
                referrer,
                output,
            };
            commands::fetch(request).await
        },
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "fetcher", "-v", "fetch", "https://a.com", "https://b.com",
            "--level", "good-data", "--wait-selector", "#price,.title",
        ]).unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Fetch { urls, level, wait_selector, resource, .. } => {
                assert_eq!(urls, vec!["https://a.com", "https://b.com"]);
                assert_eq!(level, Some(InteractLevel::GoodData));
                assert_eq!(wait_selector.as_deref(), Some("#price,.title"));
                assert!(!resource);
            }
            _ => panic!("expected fetch command"),
        }
    }
}
