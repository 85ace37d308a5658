//! Command-line interface parsing for the `cosmic` binary
//!
//! Each lookup subcommand maps onto a [`FetchIntent`]; `download` and `watch`
//! are handled separately by the binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CredentialScope;
use crate::data::{ApodError, FetchIntent, DEFAULT_RECENT_DAYS, MAX_RECENT_DAYS};

/// Cosmic Timeline - browse NASA's Astronomy Picture of the Day
#[derive(Parser, Debug)]
#[command(name = "cosmic")]
#[command(about = "Browse NASA's Astronomy Picture of the Day from the terminal")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the XDG config directory)
    #[arg(long, global = true, value_name = "PATH", env = "COSMIC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Use the public (browser-facing) API key instead of the server key
    #[arg(long, global = true)]
    pub public: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Today's picture
    Today,
    /// The picture for a date (YYYY-MM-DD)
    Date { date: String },
    /// All pictures between two dates, newest first
    Range { start: String, end: String },
    /// All pictures of a calendar month
    Month {
        year: i32,
        /// Month number (1-12)
        #[arg(value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,
    },
    /// Pictures from the last N days, newest first
    Recent {
        #[arg(long, default_value_t = DEFAULT_RECENT_DAYS, value_parser = clap::value_parser!(i64).range(1..=MAX_RECENT_DAYS))]
        days: i64,
    },
    /// Download a picture's media file
    ///
    /// Only apod.nasa.gov, nasa.gov and i.ytimg.com (and their subdomains) are
    /// allowed. If the download fails, the original URL is opened instead.
    Download {
        url: String,
        /// Date used to name the file (apod-<DATE>.<ext>)
        #[arg(long)]
        date: Option<String>,
        /// Output directory
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Show today's picture and keep it up to date until interrupted
    Watch {
        /// Seconds between refreshes
        #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
}

impl Cli {
    pub fn credential_scope(&self) -> CredentialScope {
        if self.public {
            CredentialScope::Public
        } else {
            CredentialScope::Server
        }
    }
}

impl Command {
    /// The fetch intent behind a lookup subcommand (`None` for `download`)
    pub fn intent(&self) -> Result<Option<FetchIntent>, ApodError> {
        let intent = match self {
            Command::Today | Command::Watch { .. } => FetchIntent::Today,
            Command::Date { date } => FetchIntent::Date(date.clone()),
            Command::Range { start, end } => FetchIntent::Range {
                start: start.clone(),
                end: end.clone(),
            },
            Command::Month { year, month } => FetchIntent::Month {
                year: *year,
                month: *month,
            },
            Command::Recent { days } => FetchIntent::recent(*days)?,
            Command::Download { .. } => return Ok(None),
        };
        Ok(Some(intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_today() {
        let cli = Cli::parse_from(["cosmic", "today"]);
        assert_eq!(cli.command, Command::Today);
        assert!(!cli.json);
        assert_eq!(cli.credential_scope(), CredentialScope::Server);
        assert_eq!(cli.command.intent(), Ok(Some(FetchIntent::Today)));
    }

    #[test]
    fn test_cli_parse_date_forwards_as_is() {
        let cli = Cli::parse_from(["cosmic", "date", "2026-2-10"]);
        assert_eq!(
            cli.command.intent(),
            Ok(Some(FetchIntent::Date("2026-2-10".to_string())))
        );
    }

    #[test]
    fn test_cli_parse_month() {
        let cli = Cli::parse_from(["cosmic", "--json", "month", "2026", "2"]);
        assert!(cli.json);
        assert_eq!(
            cli.command.intent(),
            Ok(Some(FetchIntent::Month { year: 2026, month: 2 }))
        );
    }

    #[test]
    fn test_cli_rejects_month_out_of_range() {
        assert!(Cli::try_parse_from(["cosmic", "month", "2026", "13"]).is_err());
        assert!(Cli::try_parse_from(["cosmic", "month", "2026", "0"]).is_err());
    }

    #[test]
    fn test_cli_recent_defaults_to_ninety_days() {
        let cli = Cli::parse_from(["cosmic", "recent"]);
        assert_eq!(cli.command, Command::Recent { days: 90 });
        assert!(matches!(cli.command.intent(), Ok(Some(FetchIntent::Range { .. }))));
        assert!(Cli::try_parse_from(["cosmic", "recent", "--days", "0"]).is_err());
    }

    #[test]
    fn test_cli_recent_rejects_huge_windows() {
        let cli = Cli::parse_from(["cosmic", "recent", "--days", "36500"]);
        assert!(matches!(cli.command.intent(), Ok(Some(FetchIntent::Range { .. }))));
        assert!(Cli::try_parse_from(["cosmic", "recent", "--days", "36501"]).is_err());
        assert!(Cli::try_parse_from(["cosmic", "recent", "--days", "100000000"]).is_err());

        let unchecked = Command::Recent { days: 100_000_000 };
        assert!(matches!(unchecked.intent(), Err(ApodError::InvalidRequest(_))));
    }

    #[test]
    fn test_cli_parse_download() {
        let cli = Cli::parse_from([
            "cosmic",
            "download",
            "https://apod.nasa.gov/apod/image/2602/galaxy.jpg",
            "--date",
            "2026-02-10",
            "-o",
            "/tmp/apod",
        ]);
        assert_eq!(
            cli.command,
            Command::Download {
                url: "https://apod.nasa.gov/apod/image/2602/galaxy.jpg".to_string(),
                date: Some("2026-02-10".to_string()),
                out: Some(PathBuf::from("/tmp/apod")),
            }
        );
        assert_eq!(cli.command.intent(), Ok(None));
    }

    #[test]
    fn test_cli_public_flag_is_global() {
        let cli = Cli::parse_from(["cosmic", "today", "--public"]);
        assert_eq!(cli.credential_scope(), CredentialScope::Public);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["cosmic"]).is_err());
    }
}
