//! scatter-ctl — local tooling for Scatter messages and identities.

use anyhow::{Context, Result};

use scatter_core::ScatterConfig;

mod cmd;

fn print_usage() {
    println!("Usage: scatter-ctl <command> [options]");
    println!();
    println!("Commands:");
    println!("  hash <file> [--block-size N]              Print the chunk hash list and content key");
    println!("  pack <file> <out> [--app A] [--mime M]    Write a file as a framed session batch");
    println!("  unpack <in> <dir>                         Verify and store every session in a batch");
    println!("  identity <name> <keystore.json>           Generate a signed identity");
    println!();
    println!("Environment:");
    println!("  SCATTER_CONFIG    Config file path (default: $XDG_CONFIG_HOME/scatter/config.toml)");
    println!("  RUST_LOG          Log filter, e.g. scatter_services=debug");
}

/// Flags pulled out of the argument list, plus what remains.
struct Args {
    block_size: Option<u32>,
    app: Option<String>,
    mime: Option<String>,
    positional: Vec<String>,
}

fn parse_args(args: Vec<String>) -> Result<Args> {
    let mut parsed = Args {
        block_size: None,
        app: None,
        mime: None,
        positional: Vec::new(),
    };
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--block-size" => {
                parsed.block_size = Some(
                    iter.next()
                        .context("--block-size requires a value")?
                        .parse()
                        .context("--block-size must be a number")?,
                );
            }
            "--app" => parsed.app = Some(iter.next().context("--app requires a value")?),
            "--mime" => parsed.mime = Some(iter.next().context("--mime requires a value")?),
            _ => parsed.positional.push(arg),
        }
    }
    Ok(parsed)
}

fn load_config() -> ScatterConfig {
    let path = ScatterConfig::file_path();
    if let Err(e) = ScatterConfig::write_default_if_missing(&path) {
        tracing::warn!(error = %e, "failed to write default config");
    }
    ScatterConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ScatterConfig::default()
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1).collect())?;
    let positional: Vec<&str> = args.positional.iter().map(String::as_str).collect();

    match positional.as_slice() {
        ["hash", file] => {
            let config = load_config();
            let block_size = args.block_size.unwrap_or(config.transfer.block_size);
            cmd::hash::cmd_hash(file, block_size)
        }
        ["pack", file, out] => {
            let config = load_config();
            cmd::pack::cmd_pack(
                &config,
                file,
                out,
                args.app.as_deref(),
                args.mime.as_deref(),
                args.block_size,
            )
        }
        ["unpack", input, dir] => cmd::pack::cmd_unpack(&load_config(), input, dir),
        ["identity", name, keystore] => cmd::identity::cmd_identity(name, keystore),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
