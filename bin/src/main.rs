#![allow(clippy::cognitive_complexity)]
use std::io::{self, BufRead};

use anyhow::{Context, Result, bail};
use config::{CredentialCipher, IpamConfig};
use tokio::runtime::Builder;
use tracing::{debug, error};

mod cli;
mod ledger;
mod simulate;
mod trace;

use cli::{Command, LedgerCommand, Parser};

fn main() -> Result<()> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    trace::init(&config.ipam_log, config.log_format)?;
    debug!(?config);

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async move {
        let res = run(config.command).await;
        if let Err(err) = &res {
            error!(?err, "command failed");
        }
        res
    })
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Check { config } => {
            let cfg = IpamConfig::parse(&config)?;
            println!("found config at path = {}", config.display());
            println!("{cfg:#?}");
            if let Some(dns) = cfg.dns()? {
                println!("{dns:#?}");
            }
            // surfaces a bad key or ciphertext without printing the password
            cfg.auth_options()
                .context("failed to resolve openstack credentials")?;
            println!("credentials resolved");
        }
        Command::Ledger {
            command: LedgerCommand::List { data_dir },
        } => {
            for entry in ledger::list(&data_dir)? {
                println!("{}\t{}", entry.address, entry.container_id);
            }
        }
        Command::Ledger {
            command:
                LedgerCommand::Prune {
                    data_dir,
                    keep,
                    dry_run,
                },
        } => {
            let stale = ledger::prune(&data_dir, &keep, dry_run).await?;
            let verb = if dry_run { "would remove" } else { "removed" };
            for entry in stale {
                println!("{verb}\t{}\t{}", entry.address, entry.container_id);
            }
        }
        Command::Encrypt { key } => {
            let cipher = CredentialCipher::from_hex_key(&key)?;
            let mut password = String::new();
            io::stdin()
                .lock()
                .read_line(&mut password)
                .context("failed to read password from stdin")?;
            let password = password.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                bail!("empty password");
            }
            println!("{}", cipher.encrypt(password)?);
        }
        Command::Simulate {
            config,
            ops,
            data_dir,
            host_addr,
        } => {
            let mut cfg = IpamConfig::parse(&config)?;
            if let Some(dir) = data_dir {
                cfg = cfg.with_data_dir(dir);
            }
            let report = simulate::run(cfg, ops, host_addr).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
