//! Cosmic Timeline - NASA's Astronomy Picture of the Day in the terminal
//!
//! Looks up pictures through the caching APOD client, downloads media from
//! allow-listed hosts, and can keep today's picture up to date in the
//! foreground.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cosmic_timeline::cache::{CacheManager, Lookup};
use cosmic_timeline::cli::{Cli, Command};
use cosmic_timeline::config::{Config, CredentialScope};
use cosmic_timeline::data::{ApodClient, ApodError, FetchIntent, Fetched, MediaDownloader};
use cosmic_timeline::refresh::{RefreshConfig, RefreshHandle, RefreshMessage};
use cosmic_timeline::render;

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Only show warnings and errors by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = Config::load(cli.config.as_deref())?.with_env();
    let scope = cli.credential_scope();

    match &cli.command {
        Command::Download { url, date, out } => {
            let dir = out.clone().unwrap_or_else(|| config.download_dir());
            let downloader = MediaDownloader::new().with_timeout(config.retry_policy().attempt_timeout);
            download(&downloader, url, date.as_deref(), &dir).await
        }
        command => {
            let client = ApodClient::new(config.credential(scope))
                .with_base_url(config.api_base.clone())
                .with_policy(config.retry_policy());
            let cache = CacheManager::new(client);

            if let Command::Watch { interval } = command {
                return watch(&cache, Duration::from_secs(*interval), cli.json, scope).await;
            }

            let intent = command.intent()?.ok_or("nothing to look up")?;
            let lookup = cache.get(&intent).await;
            print_lookup(&lookup, cli.json, scope)
        }
    }
}

/// Prints a lookup, or turns it into an error if there is nothing to show
fn print_lookup(lookup: &Lookup, json: bool, scope: CredentialScope) -> AppResult<()> {
    let Some(value) = &lookup.value else {
        return Err(match lookup.error.clone() {
            Some(ApodError::Configuration(message)) => {
                format!("{} (set {} or add it to config.toml)", message, scope.env_var()).into()
            }
            Some(err) => err.into(),
            None => "no data available".into(),
        });
    };

    if let Some(note) = render::staleness_note(lookup) {
        eprintln!("warning: {}", note);
    }
    print_value(value, json)
}

fn print_value(value: &Fetched, json: bool) -> AppResult<()> {
    if json {
        println!("{}", render::render_json(value)?);
    } else {
        print!("{}", render::render_fetched(value));
    }
    Ok(())
}

/// Downloads media into `dir`, falling back to opening the original URL
async fn download(
    downloader: &MediaDownloader,
    url: &str,
    date: Option<&str>,
    dir: &Path,
) -> AppResult<()> {
    match downloader.download(url, date).await {
        Ok(media) => {
            let path = media.save_to(dir)?;
            println!("saved {} ({})", path.display(), media.content_type);
            Ok(())
        }
        Err(err @ (ApodError::DisallowedHost(_) | ApodError::InvalidRequest(_))) => Err(err.into()),
        Err(err) => {
            warn!(error = %err, "media download failed, opening the original instead");
            open::that(url)?;
            println!("download failed ({}); opened {} instead", err, url);
            Ok(())
        }
    }
}

/// Prints today's picture, then re-prints it whenever a refresh changes it
async fn watch(
    cache: &CacheManager,
    interval: Duration,
    json: bool,
    scope: CredentialScope,
) -> AppResult<()> {
    let lookup = cache.get(&FetchIntent::Today).await;
    print_lookup(&lookup, json, scope)?;
    let mut last = lookup.value;

    let config = RefreshConfig {
        interval,
        ..RefreshConfig::default()
    };
    let mut handle = RefreshHandle::spawn(cache.clone(), config);

    loop {
        tokio::select! {
            message = handle.receiver.recv() => match message {
                Some(RefreshMessage::Updated { value, .. }) => {
                    if last.as_ref() != Some(&value) {
                        print_value(&value, json)?;
                        last = Some(value);
                    }
                }
                Some(RefreshMessage::RefreshError { intent, error }) => {
                    eprintln!("warning: refreshing {} failed: {}", intent, error);
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}
