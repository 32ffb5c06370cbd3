//! Configuration and CLI argument handling

use std::path::PathBuf;

use clap::Parser;

/// CLI argument parsing structure
#[derive(Parser, Debug, Clone)]
#[command(name = "blocktimer")]
#[command(about = "Block-based timers with sounds and notifications, served over HTTP")]
#[command(version)]
pub struct Config {
    /// Port to bind the server to
    #[arg(short, long, default_value = "20554")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// JSON file the timers are kept in
    #[arg(long, default_value = "timers.json")]
    pub timers_file: PathBuf,

    /// Player command; the sound URL is appended as the last argument
    #[arg(long, default_value = "ffplay -nodisp -autoexit -loglevel quiet")]
    pub player: String,

    /// Sound played by steps that use the default sound
    #[arg(long, default_value = "/usr/share/sounds/freedesktop/stereo/complete.oga")]
    pub default_sound: String,

    /// Never play sounds
    #[arg(long)]
    pub no_audio: bool,

    /// Never show desktop notifications
    #[arg(long)]
    pub no_notifications: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["blocktimer"]).unwrap();
        assert_eq!(config.address(), "127.0.0.1:20554");
        assert_eq!(config.timers_file, PathBuf::from("timers.json"));
        assert_eq!(config.log_level(), "info");
        assert!(!config.no_audio);
    }

    #[test]
    fn flags() {
        let config =
            Config::try_parse_from(["blocktimer", "-p", "9000", "--no-audio", "--player", "mpv --no-video", "-v"])
                .unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.no_audio);
        assert_eq!(config.player, "mpv --no-video");
        assert_eq!(config.log_level(), "debug");
    }
}
