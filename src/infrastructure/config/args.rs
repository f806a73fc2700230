use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "clipthumb",
    version,
    about = "Thumbnail rendition loader with memory and disk caching",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache budget in bytes.
    #[arg(long, global = true)]
    pub memory_budget: Option<u64>,

    /// Disk cache budget in bytes.
    #[arg(long, global = true)]
    pub disk_budget: Option<u64>,

    /// Growth in points tolerated before a disk rendition is regenerated.
    #[arg(long, global = true)]
    pub invalidation_margin: Option<f64>,

    /// Maximum decodes running at once.
    #[arg(long, global = true)]
    pub max_concurrent_decodes: Option<usize>,

    /// HTTP request timeout in seconds.
    #[arg(long, global = true)]
    pub http_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load renditions and print where each came from.
    Load {
        /// File paths (relative to --root) or http(s) URLs.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Display width in points.
        #[arg(long)]
        width: f64,

        /// Display height in points.
        #[arg(long)]
        height: f64,

        /// Display scale (pixels per point).
        #[arg(long, default_value_t = 1.0)]
        scale: f64,

        /// Directory relative file sources resolve under.
        #[arg(long, value_name = "PATH", default_value = ".")]
        root: PathBuf,
    },
    /// Delete every rendition stored on disk.
    ClearDisk,
    /// Print cache statistics as JSON.
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_command() {
        let args = CliArgs::parse_from([
            "clipthumb",
            "load",
            "a.png",
            "https://example.com/b.jpg",
            "--width",
            "120",
            "--height",
            "80",
            "--scale",
            "2",
        ]);

        let Command::Load {
            sources,
            width,
            scale,
            root,
            ..
        } = args.command
        else {
            panic!("expected load command");
        };
        assert_eq!(sources.len(), 2);
        assert!((width - 120.0).abs() < f64::EPSILON);
        assert!((scale - 2.0).abs() < f64::EPSILON);
        assert_eq!(root, PathBuf::from("."));
    }

    #[test]
    fn test_load_requires_sources_and_size() {
        assert!(CliArgs::try_parse_from(["clipthumb", "load", "--width", "1", "--height", "1"]).is_err());
        assert!(CliArgs::try_parse_from(["clipthumb", "load", "a.png"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["clipthumb", "clear-disk", "--cache-dir", "/tmp/c"]);
        assert!(matches!(args.command, Command::ClearDisk));
        assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/c")));
    }
}
