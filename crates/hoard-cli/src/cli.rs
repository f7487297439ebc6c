use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "hoard",
    about = "hoard: incremental, deduplicated directory backups",
    version
)]
pub struct Cli {
    /// Directory to back up (prompted for when omitted)
    pub source: Option<PathBuf>,

    /// Backup destination (prompted for when omitted)
    pub destination: Option<PathBuf>,

    /// Copy every file, ignoring the previous manifest
    #[arg(short, long)]
    pub full: bool,

    /// Only mirror and track changes; keep no content store
    #[arg(long)]
    pub no_dedup: bool,

    /// Files hashed and copied in parallel per directory
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// TOML file with backup settings; flags override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Print only errors and the final statistics
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn positional_paths_and_full_flag() {
        let cli = Cli::try_parse_from(["hoard", "/data", "/backup", "-f"]).unwrap();
        assert_eq!(cli.source, Some(PathBuf::from("/data")));
        assert_eq!(cli.destination, Some(PathBuf::from("/backup")));
        assert!(cli.full);
        assert!(!cli.no_dedup);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn paths_are_optional() {
        let cli = Cli::try_parse_from(["hoard"]).unwrap();
        assert!(cli.source.is_none());
        assert!(cli.destination.is_none());
    }

    #[test]
    fn options() {
        let cli = Cli::try_parse_from([
            "hoard",
            "a",
            "b",
            "--no-dedup",
            "--workers",
            "4",
            "--format",
            "json",
            "--config",
            "hoard.toml",
        ])
        .unwrap();
        assert!(cli.no_dedup);
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("hoard.toml")));
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["hoard", "-q", "-v"]).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(Cli::try_parse_from(["hoard", "a", "b", "--fast"]).is_err());
    }
}
