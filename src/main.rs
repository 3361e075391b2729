use clap::Parser;
use colored::*;
use hostcheck::cli::{Cli, Commands};
use hostcheck::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(cli.log_filter())
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(timeout) = cli.timeout {
        config.manager.test_timeout_secs = timeout;
    }

    match cli.command {
        Commands::Test {
            public_key,
            addresses,
            explorer,
            explorer_password,
        } => {
            if let Some(address) = explorer {
                config.explorer.address = address;
            }
            if explorer_password.is_some() {
                config.explorer.password = explorer_password;
            }
            let host = Host {
                public_key,
                net_addresses: addresses,
            };
            handle_test(&config, host, cli.json).await
        }
        Commands::Resolve {
            hostname,
            server,
            direct,
        } => {
            if let Some(server) = server {
                config.dns.fallback_server = server;
            }
            handle_resolve(&config, &hostname, direct, cli.json).await
        }
        Commands::Version { current, latest } => handle_version(&current, &latest, cli.json),
    }
}

/// A token cancelled by Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, canceling");
            token.cancel();
        }
    });
    cancel
}

fn spinner(message: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

async fn handle_test(config: &Config, host: Host, json: bool) -> Result<i32> {
    let manager_config = config.manager_config();
    let protocols = ProtocolTable::dial_only(manager_config.dial_timeout);
    let explorer = ExplorerClient::new(config.explorer.address.clone())?
        .with_password(config.explorer.password.clone());
    let releases = GithubReleases::new()?;

    let pb = spinner("Fetching chain state and latest release...", json);
    let manager = Manager::new(
        manager_config,
        protocols,
        config.resolver(),
        Arc::new(explorer),
        Arc::new(releases),
    )
    .await;
    let manager = match manager {
        Ok(manager) => manager,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e.into());
        }
    };

    pb.set_message(format!("Testing {}...", host.public_key));
    let cancel = interrupt_token();
    let result = manager.test_host(&cancel, &host).await;
    pb.finish_and_clear();
    manager.close().await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_report(&result);
    }
    Ok(if result.has_errors() { 1 } else { 0 })
}

fn print_report(result: &AggregateResult) {
    println!("\n{}", "=".repeat(80).blue());
    println!("{}", "Host Test Results".bold().blue());
    println!("{}", "=".repeat(80).blue());
    println!("Public key: {}", result.public_key);
    let version = if result.version.is_empty() {
        "unknown".yellow()
    } else {
        result.version.normal()
    };
    println!("Version:    {}\n", version);

    let mut failed = 0;
    for probe in result.all_results() {
        let status = if probe.has_errors() {
            failed += 1;
            "FAIL".red().bold()
        } else if !probe.warnings.is_empty() {
            "WARN".yellow().bold()
        } else {
            "PASS".green().bold()
        };
        println!("{} {}", status, probe.net_address);

        if !probe.resolved_addresses.is_empty() {
            let ips: Vec<String> = probe
                .resolved_addresses
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("  resolved: {}", ips.join(", "));
        }
        let stages = [
            ("dial", probe.connected, probe.dial_time),
            ("handshake", probe.handshake, probe.handshake_time),
            ("scan", probe.scanned, probe.scan_time),
        ];
        let timings: Vec<String> = stages
            .iter()
            .filter(|(_, ok, _)| *ok)
            .map(|(name, _, elapsed)| format!("{} {}", name, utils::format_duration(*elapsed)))
            .collect();
        if !timings.is_empty() {
            println!("  {}", timings.join("  ").cyan());
        }
        for error in &probe.errors {
            println!("  ✗ {}", error.red());
        }
        for warning in &probe.warnings {
            println!("  ! {}", warning.yellow());
        }
        println!();
    }

    let total = result.all_results().count();
    println!("{}", "-".repeat(80).blue());
    println!(
        "Summary: {} passed, {} failed, {} total",
        (total - failed).to_string().green().bold(),
        failed.to_string().red().bold(),
        total.to_string().blue().bold()
    );
}

async fn handle_resolve(config: &Config, hostname: &str, direct: bool, json: bool) -> Result<i32> {
    let resolver = config.resolver();
    let cancel = interrupt_token();

    let (elapsed, ips) = utils::measure_time(|| async {
        if direct {
            resolver.lookup(&cancel, hostname).await
        } else {
            resolver.resolve(&cancel, hostname).await
        }
    })
    .await;
    let ips = ips?;

    if json {
        let out = serde_json::json!({
            "hostname": hostname,
            "addresses": ips,
            "elapsedMs": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "{} {} ({})",
            "RESOLVED".green().bold(),
            hostname,
            utils::format_duration(elapsed).cyan()
        );
        for ip in &ips {
            println!("  {}", ip);
        }
    }
    Ok(0)
}

fn handle_version(current: &str, latest: &str, json: bool) -> Result<i32> {
    let current = parse_release(current)?;
    let latest = parse_release(latest)?;
    let verdict = match current.cmp(&latest) {
        Ordering::Less => "older than",
        Ordering::Equal => "equivalent to",
        Ordering::Greater => "newer than",
    };

    if json {
        let out = serde_json::json!({
            "current": current,
            "latest": latest,
            "outdated": current < latest,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if current < latest {
        println!("{} {} is {} {}", "OUTDATED".yellow().bold(), current, verdict, latest);
    } else {
        println!("{} {} is {} {}", "OK".green().bold(), current, verdict, latest);
    }
    Ok(0)
}
