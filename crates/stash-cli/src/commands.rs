use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use stash_engine::{open_data_dir, EngineConfig, StorageEngine};
use stash_server::{ServerConfig, StashServer};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let open = || {
        open_data_dir(&cli.data_dir, EngineConfig::default())
            .with_context(|| format!("opening data directory {}", cli.data_dir.display()))
    };
    match cli.command {
        Command::Account(args) => cmd_account(&open()?, args, format),
        Command::Upload(args) => cmd_upload(&open()?, args, format),
        Command::Replace(args) => cmd_replace(&open()?, args, format),
        Command::Rename(args) => {
            open()?.rename(&args.file, &args.owner.account, &args.name)?;
            println!("{} Renamed {} to {}", "✓".green(), args.file.short_id().yellow(), args.name.bold());
            Ok(())
        }
        Command::Ls(args) => cmd_ls(&open()?, args, format),
        Command::Versions(args) => cmd_versions(&open()?, args, format),
        Command::Get(args) => cmd_get(&open()?, args),
        Command::Rm(args) => cmd_rm(&open()?, args, format),
        Command::Sweep(args) => cmd_sweep(&open()?, args, format),
        Command::Serve(args) => cmd_serve(args, cli.data_dir.clone()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render a byte count with a binary unit.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn cmd_account(engine: &StorageEngine, args: AccountArgs, format: OutputFormat) -> anyhow::Result<()> {
    match args.action {
        AccountAction::Create { limit } => {
            let account = engine.provision_account(limit)?;
            match format {
                OutputFormat::Json => print_json(&account)?,
                OutputFormat::Text => {
                    println!("{} Created account {}", "✓".green().bold(), account.id.to_string().cyan());
                    println!("  Limit: {}", human_size(account.storage_limit).bold());
                }
            }
        }
        AccountAction::Status { owner } => {
            let status = engine.storage_status(&owner.account)?;
            match format {
                OutputFormat::Json => print_json(&status)?,
                OutputFormat::Text => println!(
                    "{} used of {} ({} remaining)",
                    human_size(status.used).bold(),
                    human_size(status.limit),
                    human_size(status.remaining).green()
                ),
            }
        }
    }
    Ok(())
}

fn file_name(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn cmd_upload(engine: &StorageEngine, args: UploadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let data = std::fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    let name = match args.name {
        Some(name) => name,
        None => file_name(&args.path)?,
    };
    let receipt = engine.ingest(
        &args.owner.account,
        &name,
        &args.mime,
        &data,
        args.display_name.as_deref(),
    )?;
    match format {
        OutputFormat::Json => print_json(&receipt)?,
        OutputFormat::Text => println!(
            "{} Uploaded {} as {} ({})",
            "✓".green().bold(),
            receipt.version.display_name.bold(),
            receipt.file_id.to_string().cyan(),
            human_size(receipt.version.size)
        ),
    }
    Ok(())
}

fn cmd_replace(engine: &StorageEngine, args: ReplaceArgs, format: OutputFormat) -> anyhow::Result<()> {
    let data = std::fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    let name = file_name(&args.path)?;
    let version = engine.ingest_new_version(&args.file, &args.owner.account, &name, &args.mime, &data)?;
    match format {
        OutputFormat::Json => print_json(&version)?,
        OutputFormat::Text => println!(
            "{} New version {} of {} ({})",
            "✓".green().bold(),
            version.id.short_id().yellow(),
            version.display_name.bold(),
            human_size(version.size)
        ),
    }
    Ok(())
}

fn cmd_ls(engine: &StorageEngine, args: LsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let files = engine.list(&args.owner.account)?;
    if format == OutputFormat::Json {
        return print_json(&files);
    }
    if files.is_empty() {
        println!("No files.");
        return Ok(());
    }
    for f in &files {
        println!(
            "{}  {:>10}  {}  {}  {}",
            f.id.to_string().cyan(),
            human_size(f.size),
            f.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            f.display_name.bold(),
            f.mime_type.dimmed()
        );
    }
    Ok(())
}

fn cmd_versions(engine: &StorageEngine, args: VersionsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let versions = engine.versions(&args.file, &args.owner.account)?;
    if format == OutputFormat::Json {
        return print_json(&versions);
    }
    for v in &versions {
        let marker = if v.is_current { "*".green().bold() } else { " ".normal() };
        println!(
            "{} {}  {:>10}  {}  {}",
            marker,
            v.id.short_id().yellow(),
            human_size(v.size),
            v.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            v.original_name
        );
    }
    Ok(())
}

fn cmd_get(engine: &StorageEngine, args: GetArgs) -> anyhow::Result<()> {
    let (target, location) = engine.open_download(&args.file, &args.owner.account)?;
    let mut reader = location.reader().context("opening blob")?;
    match args.output {
        Some(path) => {
            let mut out = std::fs::File::create(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            std::io::copy(&mut reader, &mut out).with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "{} Wrote {} to {} ({})",
                "✓".green(),
                target.display_name.bold(),
                path.display(),
                human_size(target.size)
            );
        }
        None => {
            std::io::copy(&mut reader, &mut std::io::stdout().lock())?;
        }
    }
    Ok(())
}

fn cmd_rm(engine: &StorageEngine, args: RmArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = match args.files.as_slice() {
        [single] => engine.delete(single, &args.owner.account)?,
        many => engine.bulk_delete(many, &args.owner.account)?,
    };
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    for id in &report.deleted_ids {
        println!("  {} {}", "deleted:".red(), id);
    }
    for id in args.files.iter().filter(|id| !report.deleted_ids.contains(*id)) {
        println!("  {} {}", "skipped:".dimmed(), id);
    }
    for key in &report.blob_failures {
        println!("  {} blob {} left for sweep", "warning:".yellow(), key);
    }
    println!("{} Freed {}", "✓".green().bold(), human_size(report.bytes_freed).bold());
    Ok(())
}

fn cmd_sweep(engine: &StorageEngine, args: SweepArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = engine.sweep_orphans(args.dry_run)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    for key in &report.orphans {
        println!("  {} {}", "orphan:".yellow(), key);
    }
    if report.dry_run {
        println!("Scanned {} blobs, {} orphaned (dry run).", report.scanned, report.orphans.len());
    } else {
        println!(
            "{} Sweep: {} of {} blobs removed.",
            "✓".green(),
            report.removed.to_string().bold(),
            report.scanned
        );
    }
    Ok(())
}

fn cmd_serve(args: ServeArgs, data_dir: std::path::PathBuf) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig {
            data_dir,
            ..ServerConfig::default()
        },
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    println!("Stash server on {} (data: {})", config.bind_addr.to_string().bold(), config.data_dir.display());

    let server = StashServer::open(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}
