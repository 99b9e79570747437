use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "IPTV playlist aggregator",
    long_about = "Collects M3U playlists from many sources, removes duplicate streams,\n\
                  probes every stream URL and publishes tiered playlists.\n\
                  \n\
                  Settings come from the environment (or a .env file); flags override paths."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the pipeline once and exit; non-zero exit code if the run failed
    Run(PathArgs),

    /// Run the pipeline on a schedule and serve status endpoints
    Serve {
        #[command(flatten)]
        paths: PathArgs,

        /// HTTP port (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds between runs (overrides SCHEDULE_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct PathArgs {
    /// Playlist file or directory of playlists (overrides INPUT_PATH)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// JSON sources manifest (overrides SOURCES_MANIFEST)
    #[arg(short, long)]
    pub sources: Option<PathBuf>,

    /// Directory for published playlists (overrides PUBLISH_DIR)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Working directory for per-run staging files (overrides WORK_DIR)
    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,
}

impl PathArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref input) = self.input {
            config.input_path = input.to_string_lossy().into_owned();
            // An explicit input replaces any manifest from the environment
            if self.sources.is_none() {
                config.sources_manifest = None;
            }
        }
        if let Some(ref sources) = self.sources {
            config.sources_manifest = Some(sources.to_string_lossy().into_owned());
        }
        if let Some(ref output_dir) = self.output_dir {
            config.publish_dir = output_dir.to_string_lossy().into_owned();
        }
        if let Some(ref work_dir) = self.work_dir {
            config.work_dir = work_dir.to_string_lossy().into_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let args = CliArgs::parse_from(["iptv-aggregator", "run", "-i", "lists", "-o", "out"]);
        let Command::Run(paths) = args.command else {
            panic!("expected run command");
        };

        let mut config = Config::default();
        config.sources_manifest = Some("sources.json".to_string());
        paths.apply(&mut config);
        assert_eq!(config.input_path, "lists");
        assert_eq!(config.publish_dir, "out");
        assert!(config.sources_manifest.is_none());
    }

    #[test]
    fn test_parse_serve_command() {
        let args = CliArgs::parse_from(["iptv-aggregator", "serve", "--port", "8080", "-v"]);
        assert!(args.verbose);
        match args.command {
            Command::Serve { port, interval, .. } => {
                assert_eq!(port, Some(8080));
                assert_eq!(interval, None);
            }
            Command::Run(_) => panic!("expected serve command"),
        }
    }
}
