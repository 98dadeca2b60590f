#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use pfs_harness::{run_scenario, RealSystem, Scenario, SessionConfig};
use pfs_types::{EncryptionMode, LaunchMode};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("list") => {
            for name in Scenario::known_names() {
                println!("{name}");
            }
            Ok(())
        }
        Some("run") => run_cmd(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn run_cmd(args: &[String]) -> Result<()> {
    let Some(name) = args.first() else {
        bail!("usage: pfs-harness run <scenario> [options]");
    };

    let mut config = SessionConfig::default();
    let mut scale = 1_u32;
    let mut kib = 262_144_u64;
    let mut artifact_dir: Option<PathBuf> = None;

    let mut index = 1_usize;
    while index < args.len() {
        match args[index].as_str() {
            "--seed" => {
                let raw = args.get(index + 1).context("--seed requires a value")?;
                config.seed = raw.parse().context("invalid --seed value")?;
                index += 2;
            }
            "--base-dir" => {
                let raw = args.get(index + 1).context("--base-dir requires a value")?;
                config.base_dir = PathBuf::from(raw);
                index += 2;
            }
            "--repo" => {
                let raw = args.get(index + 1).context("--repo requires a value")?;
                config.repo_base = raw.parse().context("invalid --repo locator")?;
                index += 2;
            }
            "--encryption" => {
                let raw = args.get(index + 1).context("--encryption requires a value")?;
                config.encryption = raw
                    .parse::<EncryptionMode>()
                    .map_err(|err| anyhow::anyhow!("{err}"))?;
                index += 2;
            }
            "--passphrase" => {
                let raw = args.get(index + 1).context("--passphrase requires a value")?;
                config.passphrase = Some(raw.clone());
                index += 2;
            }
            "--init-cmd" => {
                let raw = args.get(index + 1).context("--init-cmd requires a value")?;
                config.service.init_program = raw.clone();
                index += 2;
            }
            "--mount-cmd" => {
                let raw = args.get(index + 1).context("--mount-cmd requires a value")?;
                config.service.mount_program = raw.clone();
                index += 2;
            }
            "--checked" => {
                config.launch = LaunchMode::Checked;
                index += 1;
            }
            "--debug" => {
                config.launch = LaunchMode::Debug;
                index += 1;
            }
            "--mount-timeout-secs" => {
                let raw = args
                    .get(index + 1)
                    .context("--mount-timeout-secs requires a value")?;
                // 0 restores the original unbounded wait, for interactive
                // debugging of a service that is slow to come up.
                let secs: u64 = raw.parse().context("invalid --mount-timeout-secs value")?;
                config.mount_timeout = if secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(secs))
                };
                index += 2;
            }
            "--settle-secs" => {
                let raw = args.get(index + 1).context("--settle-secs requires a value")?;
                let secs: u64 = raw.parse().context("invalid --settle-secs value")?;
                config.settle = Duration::from_secs(secs);
                index += 2;
            }
            "--scale" => {
                let raw = args.get(index + 1).context("--scale requires a value")?;
                scale = raw.parse().context("invalid --scale value")?;
                index += 2;
            }
            "--kib" => {
                let raw = args.get(index + 1).context("--kib requires a value")?;
                kib = raw.parse().context("invalid --kib value")?;
                index += 2;
            }
            "--artifacts" => {
                let raw = args.get(index + 1).context("--artifacts requires a value")?;
                artifact_dir = Some(PathBuf::from(raw));
                index += 2;
            }
            other => bail!("unknown option: {other}"),
        }
    }

    let scenario = match name.as_str() {
        "random-tree" => Scenario::RandomTree { scale },
        "large-copy" => Scenario::LargeCopy { kib },
        "block-copy" => Scenario::BlockCopy { kib },
        "sparse-truncate" => Scenario::SparseTruncate,
        "create-then-move" => Scenario::CreateThenMove,
        "rename-matrix" => Scenario::RenameMatrix,
        "fault-surfacing" => Scenario::FaultSurfacing {
            artifact_dir: artifact_dir
                .context("fault-surfacing requires --artifacts <dir>")?,
        },
        other => bail!("unknown scenario: {other} (try `pfs-harness list`)"),
    };

    run_scenario(config, &RealSystem, &scenario)
        .with_context(|| format!("scenario `{name}` failed"))
}

fn print_usage() {
    eprintln!("pfs-harness - differential tester for a mountable filesystem service");
    eprintln!();
    eprintln!("usage:");
    eprintln!("  pfs-harness list");
    eprintln!("  pfs-harness run <scenario> [options]");
    eprintln!();
    eprintln!("options:");
    eprintln!("  --seed <u64>               workload seed (replayable)");
    eprintln!("  --base-dir <path>          where session directories are created");
    eprintln!("  --repo <locator>           repository base: path or scheme://host[:port]/path");
    eprintln!("  --encryption <none|aes>    repository encryption mode");
    eprintln!("  --passphrase <string>      repository passphrase");
    eprintln!("  --init-cmd <path>          service repository-init command");
    eprintln!("  --mount-cmd <path>         service mount command");
    eprintln!("  --checked                  wrap the mount in the memory checker");
    eprintln!("  --debug                    print the mount command and wait for the operator");
    eprintln!("  --mount-timeout-secs <n>   bound the mount wait (0 = wait forever)");
    eprintln!("  --settle-secs <n>          settle delay after fault injection");
    eprintln!("  --scale <n>                workload multiplier for random-tree");
    eprintln!("  --kib <n>                  fixture size for large-copy/block-copy");
    eprintln!("  --artifacts <dir>          fault artifact directory for fault-surfacing");
}
