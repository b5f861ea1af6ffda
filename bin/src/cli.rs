//! Parse from either cli or env var
use std::{net::IpAddr, path::PathBuf};

pub use clap::Parser;
use clap::{Subcommand, ValueEnum};

/// default log level. Can use this argument or IPAM_LOG env var
pub const DEFAULT_IPAM_LOG: &str = "info";
/// the default path to config
pub static DEFAULT_CONFIG_PATH: &str = "/etc/cni/net.d/neutron.conf";
/// address the simulated host instance is given
pub static DEFAULT_SIM_HOST: &str = "10.0.0.4";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "ipam-ctl", bin_name = "ipam-ctl", version, about, long_about = None)]
/// operator tool for the neutron ipam backend
pub struct Config {
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env, value_parser, default_value = DEFAULT_IPAM_LOG)]
    pub ipam_log: String,
    /// log output format
    #[clap(long, env, value_enum, default_value_t = LogFormat::Standard)]
    pub log_format: LogFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Standard,
    Json,
    Pretty,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// parse a config and print the internal form
    Check {
        #[clap(short, long, env = "IPAM_CONFIG", value_parser, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// inspect or prune the local address ledger. Only local files are
    /// touched, never the cloud.
    Ledger {
        #[clap(subcommand)]
        command: LedgerCommand,
    },
    /// read a password from stdin and print its hex ciphertext
    Encrypt {
        /// 32 byte aes key as 64 hex chars
        #[clap(long, env = "IPAM_CREDENTIAL_KEY", value_parser)]
        key: String,
    },
    /// run reserve/release cycles against an in-memory cloud seeded for the
    /// configured mode
    Simulate {
        #[clap(short, long, env = "IPAM_CONFIG", value_parser, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// number of containers to reserve before releasing them all
        #[clap(long, value_parser, default_value_t = 3)]
        ops: usize,
        /// ledger and lock directory, instead of the configured one
        #[clap(long, value_parser)]
        data_dir: Option<PathBuf>,
        #[clap(long, value_parser, default_value = DEFAULT_SIM_HOST)]
        host_addr: IpAddr,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    /// print every address with its owning container
    List {
        #[clap(short, long, value_parser)]
        data_dir: PathBuf,
    },
    /// remove entries whose container is not in the keep list
    Prune {
        #[clap(short, long, value_parser)]
        data_dir: PathBuf,
        /// container ids still alive
        #[clap(long = "keep", value_parser)]
        keep: Vec<String>,
        /// only print what would be removed
        #[clap(long)]
        dry_run: bool,
    },
}
