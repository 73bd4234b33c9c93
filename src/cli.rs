//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use harvester_core::{ConfigError, CrawlConfig, FileConfig};
use url::Url;

/// Crawl linked pages and harvest media files.
///
/// Harvester follows links from the seed pages, picks out media references
/// whose estimated duration meets the minimum, and downloads them with
/// resumable, retrying transfers. Progress is kept in
/// `<output-dir>/download_progress.json` so interrupted runs pick up where
/// they stopped.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Seed page URLs (http or https)
    #[arg(value_parser = parse_seed)]
    pub seeds: Vec<Url>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// JSON config file supplying defaults; explicit flags override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for downloaded files and the progress record [default: .]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Minimum estimated duration in seconds for an item to be downloaded [default: 300]
    #[arg(short, long, value_name = "SECS")]
    pub min_duration: Option<u64>,

    /// Maximum link depth below a seed page [default: 2]
    #[arg(short = 'd', long)]
    pub max_depth: Option<u32>,

    /// Maximum pages crawled in this run [default: 20]
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u64).range(1..=100_000))]
    pub max_pages: Option<u64>,

    /// Concurrent page fetches (1-100) [default: 3]
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub crawl_concurrency: Option<u8>,

    /// Concurrent transfers (1-100) [default: 2]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub transfer_concurrency: Option<u8>,

    /// Maximum attempts per media file, counted across runs (1-20) [default: 5]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=20))]
    pub max_attempts: Option<u8>,

    /// Backoff unit in seconds; attempt N waits N times this [default: 10]
    #[arg(long, value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Fixed delay between requests to the same host in milliseconds (max 60000) [default: 1000]
    #[arg(short = 'l', long, value_name = "MS", value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub page_delay: Option<u64>,

    /// Upper bound of random jitter added to the page delay in milliseconds [default: 2000]
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub page_jitter: Option<u64>,

    /// Forget pages visited in earlier runs before crawling
    #[arg(long)]
    pub reset_visited: bool,

    /// Persist progress only at the end of the run
    #[arg(long)]
    pub no_intermediate_flush: bool,
}

fn parse_seed(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|e| format!("invalid URL '{value}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme '{other}' in '{value}'")),
    }
}

impl Args {
    /// Builds the run configuration: defaults, then the config file, then flags.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be loaded or the
    /// result fails validation.
    pub fn to_config(&self) -> Result<CrawlConfig, ConfigError> {
        let mut config = CrawlConfig::default();
        if let Some(path) = &self.config {
            FileConfig::load(path)?.apply_to(&mut config);
        }

        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(secs) = self.min_duration {
            config.min_duration_secs = secs;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(pages) = self.max_pages {
            config.max_pages = usize::try_from(pages).unwrap_or(usize::MAX);
        }
        if let Some(n) = self.crawl_concurrency {
            config.crawl_concurrency = usize::from(n);
        }
        if let Some(n) = self.transfer_concurrency {
            config.transfer_concurrency = usize::from(n);
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = u32::from(n);
        }
        if let Some(secs) = self.retry_delay {
            config.retry_base_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = self.page_delay {
            config.page_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.page_jitter {
            config.page_jitter = Duration::from_millis(ms);
        }
        if self.no_intermediate_flush {
            config.flush_after_each_transfer = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["harvester"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.seeds.is_empty());
        assert!(!args.reset_visited);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["harvester", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["harvester", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["harvester", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["harvester", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["harvester", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_seeds_must_be_http() {
        let args =
            Args::try_parse_from(["harvester", "https://a.test/", "http://b.test/x"]).unwrap();
        assert_eq!(args.seeds.len(), 2);

        let err = Args::try_parse_from(["harvester", "ftp://a.test/"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert!(Args::try_parse_from(["harvester", "not a url"]).is_err());
    }

    #[test]
    fn test_cli_transfer_concurrency_bounds() {
        let args = Args::try_parse_from(["harvester", "-c", "100"]).unwrap();
        assert_eq!(args.transfer_concurrency, Some(100));

        let err = Args::try_parse_from(["harvester", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = Args::try_parse_from(["harvester", "--crawl-concurrency", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_attempts_bounds() {
        let args = Args::try_parse_from(["harvester", "-r", "20"]).unwrap();
        assert_eq!(args.max_attempts, Some(20));
        assert!(Args::try_parse_from(["harvester", "-r", "0"]).is_err());
        assert!(Args::try_parse_from(["harvester", "-r", "21"]).is_err());
    }

    #[test]
    fn test_cli_page_delay_over_max_rejected() {
        let err = Args::try_parse_from(["harvester", "-l", "60001"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_to_config_without_flags_is_default() {
        let args = Args::try_parse_from(["harvester"]).unwrap();
        let config = args.to_config().unwrap();
        let default = CrawlConfig::default();
        assert_eq!(config.min_duration_secs, default.min_duration_secs);
        assert_eq!(config.max_pages, default.max_pages);
        assert_eq!(config.transfer_concurrency, default.transfer_concurrency);
        assert!(config.flush_after_each_transfer);
    }

    #[test]
    fn test_to_config_applies_flags() {
        let args = Args::try_parse_from([
            "harvester",
            "-o",
            "/tmp/media",
            "-m",
            "120",
            "-d",
            "4",
            "-p",
            "50",
            "-c",
            "3",
            "--crawl-concurrency",
            "6",
            "-r",
            "2",
            "--retry-delay",
            "1",
            "-l",
            "0",
            "--page-jitter",
            "0",
            "--no-intermediate-flush",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/media"));
        assert_eq!(config.min_duration_secs, 120);
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.max_pages, 50);
        assert_eq!(config.transfer_concurrency, 3);
        assert_eq!(config.crawl_concurrency, 6);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert!(config.page_delay.is_zero());
        assert!(config.page_jitter.is_zero());
        assert!(!config.flush_after_each_transfer);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_duration_secs": 60, "max_depth": 5}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::try_parse_from(["harvester", "--config", &path, "-m", "90"]).unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.min_duration_secs, 90);
        assert_eq!(config.max_depth, 5);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args =
            Args::try_parse_from(["harvester", "--config", "/nonexistent/harvester.json"]).unwrap();
        assert!(matches!(args.to_config(), Err(ConfigError::Read { .. })));
    }
}
