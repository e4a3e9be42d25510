//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use romstore_store::BootstrapConfig;

/// Default TCP listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3020";

/// Default bound on the final flush at shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// romstore: hands out exclusive ROM leases to client sessions and keeps
/// their latest save states.
#[derive(Debug, Clone, Parser)]
#[command(name = "romstore", version, about)]
pub struct Cli {
    /// Directory scanned for ROM images.
    #[arg(long, env = "ROMSTORE_ROM_DIR", default_value = "data/rom")]
    pub rom_dir: PathBuf,

    /// Directory holding persisted snapshots.
    #[arg(long, env = "ROMSTORE_STATE_DIR", default_value = "data/state")]
    pub state_dir: PathBuf,

    /// Basename of the ROM handed out first.
    #[arg(long, env = "ROMSTORE_DEFAULT_ROM", default_value = "default")]
    pub default_rom: String,

    /// Accepted ROM file extensions.
    #[arg(
        long,
        env = "ROMSTORE_EXTENSIONS",
        default_value = "gb,gbc,nes",
        value_delimiter = ','
    )]
    pub extensions: Vec<String>,

    /// Address the TCP transport listens on.
    #[arg(long, env = "ROMSTORE_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Seconds allowed for the final flush at shutdown.
    #[arg(long, env = "ROMSTORE_SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,

    /// Log directive used when RUST_LOG is unset.
    #[arg(long, env = "ROMSTORE_LOG", default_value = "info")]
    pub log: String,
}

/// Plain configuration consumed by the library.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub rom_dir: PathBuf,
    pub state_dir: PathBuf,
    pub default_rom: String,
    pub extensions: Vec<String>,
    pub bind: SocketAddr,
    pub shutdown_timeout: Duration,
}

impl ServiceConfig {
    /// Inputs for the catalog bootstrap.
    pub fn bootstrap(&self) -> BootstrapConfig {
        BootstrapConfig::new(&self.rom_dir, &self.default_rom).with_extensions(&self.extensions)
    }
}

impl From<Cli> for ServiceConfig {
    fn from(cli: Cli) -> Self {
        Self {
            rom_dir: cli.rom_dir,
            state_dir: cli.state_dir,
            default_rom: cli.default_rom,
            extensions: cli.extensions,
            bind: cli.bind,
            shutdown_timeout: Duration::from_secs(cli.shutdown_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["romstore"]).unwrap();
        let config = ServiceConfig::from(cli);

        assert_eq!(config.rom_dir, PathBuf::from("data/rom"));
        assert_eq!(config.state_dir, PathBuf::from("data/state"));
        assert_eq!(config.default_rom, "default");
        assert_eq!(config.extensions, ["gb", "gbc", "nes"]);
        assert_eq!(config.bind, DEFAULT_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "romstore",
            "--rom-dir",
            "/srv/roms",
            "--extensions",
            "sms,gg",
            "--bind",
            "0.0.0.0:4000",
            "--shutdown-timeout",
            "1",
        ])
        .unwrap();
        let config = ServiceConfig::from(cli);

        assert_eq!(config.rom_dir, PathBuf::from("/srv/roms"));
        assert_eq!(config.bootstrap().extensions, ["sms", "gg"]);
        assert_eq!(config.bind.port(), 4000);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }
}
