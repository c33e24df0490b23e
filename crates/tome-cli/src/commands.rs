use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use serde_json::json;
use tome_db::{CodecKind, Database, DatabaseConfig, DirectoryContext, Group, Guid};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Init(args) => cmd_init(args),
        Command::Info(args) => cmd_info(args, &format),
        Command::Ls(args) => cmd_ls(args),
        Command::Cat(args) => cmd_cat(args),
        Command::Put(args) => cmd_put(args),
        Command::Rm(args) => cmd_rm(args),
        Command::Check(args) => cmd_check(args, &format),
    }
}

fn open(file: &Path, config: DatabaseConfig) -> anyhow::Result<Database> {
    debug!(path = %file.display(), read_only = config.read_only, "opening database");
    Database::open(file, config).with_context(|| format!("failed to open {}", file.display()))
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Split an instance path into its group segments and instance name.
fn split_instance_path(path: &str) -> anyhow::Result<(Vec<&str>, &str)> {
    let mut parts = segments(path);
    let name = parts
        .pop()
        .ok_or_else(|| anyhow!("path {path:?} does not name an instance"))?;
    Ok((parts, name))
}

fn find_group<'g>(
    root: &'g mut Group,
    ctx: &DirectoryContext<'_>,
    path: &[&str],
) -> anyhow::Result<&'g mut Group> {
    let mut group = root;
    for segment in path {
        group = group
            .child_group(ctx, segment)?
            .ok_or_else(|| anyhow!("no group named {segment:?}"))?;
    }
    Ok(group)
}

fn cmd_init(args: InitArgs) -> anyhow::Result<()> {
    if args.file.exists() && !args.force {
        bail!(
            "{} already exists (use --force to replace it)",
            args.file.display()
        );
    }
    let config = DatabaseConfig {
        object_codec: args.codec,
        root_name: args.root_name.clone(),
        ..Default::default()
    };
    Database::create(&args.file, config)?.close()?;

    println!(
        "{} Initialized Tome database {}",
        "✓".green().bold(),
        args.file.display().to_string().bold()
    );
    println!("  Root: {}", args.root_name.yellow());
    println!("  Codec: {}", args.codec.to_string().cyan());
    Ok(())
}

fn cmd_info(args: InfoArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let db = open(&args.file, DatabaseConfig::read_only())?;
    let stats = db.stats()?;
    match format {
        OutputFormat::Json => {
            let value = json!({
                "path": args.file.display().to_string(),
                "codec": stats.object_codec.to_string(),
                "groups": stats.groups,
                "instances": stats.instances,
                "block_entries": stats.block_entries,
                "registry_hash": stats.registry_hash.to_hex(),
                "store": {
                    "generation": stats.store.generation,
                    "live_blocks": stats.store.live_blocks,
                    "free_ids": stats.store.free_ids,
                    "next_id": stats.store.next_id.get(),
                    "live_bytes": stats.store.live_bytes,
                    "dead_bytes": stats.store.dead_bytes,
                    "end_offset": stats.store.end_offset,
                },
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Database {}", args.file.display().to_string().bold());
            println!("  Codec: {}", stats.object_codec.to_string().cyan());
            println!(
                "  Registry: {} groups, {} instances, {} blocks ({})",
                stats.groups,
                stats.instances,
                stats.block_entries,
                stats.registry_hash.short_hex().dimmed()
            );
            println!(
                "  Store: generation {}, {} live blocks, {} free ids, next {}",
                stats.store.generation,
                stats.store.live_blocks,
                stats.store.free_ids,
                stats.store.next_id
            );
            println!(
                "  Bytes: {} live, {} dead, {} total",
                stats.store.live_bytes,
                stats.store.dead_bytes.to_string().yellow(),
                stats.store.end_offset
            );
        }
    }
    db.close()?;
    Ok(())
}

fn cmd_ls(args: LsArgs) -> anyhow::Result<()> {
    let mut db = open(&args.file, DatabaseConfig::read_only())?;
    let (root, ctx) = db.directory();
    let group = find_group(root, &ctx, &segments(&args.path))?;
    print_tree(group, &ctx, 0)?;
    db.close()?;
    Ok(())
}

fn print_tree(group: &mut Group, ctx: &DirectoryContext<'_>, depth: usize) -> anyhow::Result<()> {
    let indent = "  ".repeat(depth);
    println!("{indent}{}/", group.name(ctx)?.blue().bold());
    let (groups, instances) = group.children(ctx)?;
    for child in groups.iter_mut() {
        print_tree(child, ctx, depth + 1)?;
    }
    for instance in instances.iter() {
        let type_name = match instance.primary_type_name(ctx)? {
            "" => "-",
            name => name,
        };
        let streams = instance.data_names(ctx)?;
        println!(
            "{indent}  {} {} {}{}",
            instance.name(ctx)?.bold(),
            instance.guid(ctx)?.short_id().dimmed(),
            type_name.cyan(),
            if streams.is_empty() {
                String::new()
            } else {
                format!(" [{}]", streams.join(", "))
            }
        );
    }
    Ok(())
}

fn cmd_cat(args: CatArgs) -> anyhow::Result<()> {
    let mut db = open(&args.file, DatabaseConfig::read_only())?;
    let (root, ctx) = db.directory();
    let (parents, name) = split_instance_path(&args.path)?;
    let instance = find_group(root, &ctx, &parents)?
        .child_instance(&ctx, name)?
        .ok_or_else(|| anyhow!("no instance named {name:?}"))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Some(data) = &args.data {
        let mut reader = instance.read_data(&ctx, data)?;
        io::copy(&mut reader, &mut out)?;
        out.flush()?;
        return Ok(());
    }

    match ctx.codec() {
        CodecKind::Json => {
            let value = instance
                .get_object::<serde_json::Value>(&ctx)?
                .ok_or_else(|| anyhow!("instance {name:?} has no object"))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        }
        CodecKind::Bincode => {
            let bytes = instance
                .object_reader(&ctx)?
                .ok_or_else(|| anyhow!("instance {name:?} has no object"))?
                .read_all()?;
            writeln!(
                out,
                "{} ({} bytes, bincode)",
                instance.primary_type_name(&ctx)?.cyan(),
                bytes.len()
            )?;
            for chunk in bytes.chunks(32) {
                writeln!(out, "  {}", hex::encode(chunk))?;
            }
        }
    }
    Ok(())
}

fn cmd_put(args: PutArgs) -> anyhow::Result<()> {
    let config = DatabaseConfig {
        flush_always: args.durable,
        ..Default::default()
    };
    let mut db = open(&args.file, config)?;
    let mut source = File::open(&args.from)
        .with_context(|| format!("failed to read {}", args.from.display()))?;
    let (parents, name) = split_instance_path(&args.path)?;

    let written = {
        let (root, mut ctx) = db.directory();
        let mut group = root;
        for segment in &parents {
            group = group.ensure_group(&mut ctx, segment)?;
        }
        if group.child_instance(&ctx, name)?.is_none() {
            group.create_instance(&mut ctx, name, Guid::new_random())?;
        }
        let instance = group
            .child_instance(&ctx, name)?
            .ok_or_else(|| anyhow!("no instance named {name:?}"))?;
        let mut writer = instance.write_data(&mut ctx, &args.data)?;
        io::copy(&mut source, &mut writer)?;
        writer.finish()?.size
    };
    db.close()?;

    println!(
        "{} Wrote {} bytes to {}:{}",
        "✓".green().bold(),
        written,
        args.path.bold(),
        args.data.yellow()
    );
    Ok(())
}

fn cmd_rm(args: RmArgs) -> anyhow::Result<()> {
    let mut db = open(&args.file, DatabaseConfig::default())?;
    let (parents, name) = split_instance_path(&args.path)?;
    let kind = {
        let (root, mut ctx) = db.directory();
        let parent = find_group(root, &ctx, &parents)?;
        let is_instance = ctx
            .registry()
            .child_instance_named(parent.key(), name)?
            .is_some();
        if is_instance {
            let instance = parent
                .child_instance(&ctx, name)?
                .ok_or_else(|| anyhow!("no instance named {name:?}"))?;
            instance.remove(&mut ctx)?;
            "instance"
        } else {
            let group = parent
                .child_group(&ctx, name)?
                .ok_or_else(|| anyhow!("nothing named {name:?}"))?;
            group.remove(&mut ctx)?;
            "group"
        }
    };
    db.close()?;

    println!("{} Removed {} {}", "✓".green().bold(), kind, args.path.bold());
    Ok(())
}

fn cmd_check(args: CheckArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let db = open(&args.file, DatabaseConfig::read_only())?;
    let report = db.check();
    db.close()?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "live_blocks": report.live_blocks,
                "orphaned_blocks": report.orphaned_blocks.iter().map(|id| id.get()).collect::<Vec<_>>(),
                "dangling_entries": report
                    .dangling_entries
                    .iter()
                    .map(|(key, id)| json!({ "entry": key.to_string(), "block": id.get() }))
                    .collect::<Vec<_>>(),
                "unreachable_groups": report.unreachable.groups.len(),
                "unreachable_instances": report.unreachable.instances.len(),
                "unreachable_blocks": report.unreachable.blocks.len(),
                "registry_error": report.registry_error,
                "clean": report.is_clean(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Checked {} live blocks", report.live_blocks);
            for id in &report.orphaned_blocks {
                println!("  {} orphaned block {}", "!".red().bold(), id);
            }
            for (key, id) in &report.dangling_entries {
                println!("  {} entry {} references missing block {}", "!".red().bold(), key, id);
            }
            for key in &report.unreachable.groups {
                println!("  {} unreachable group {}", "!".yellow().bold(), key);
            }
            for key in &report.unreachable.instances {
                println!("  {} unreachable instance {}", "!".yellow().bold(), key);
            }
            for key in &report.unreachable.blocks {
                println!("  {} unreachable block entry {}", "!".yellow().bold(), key);
            }
            if let Some(error) = &report.registry_error {
                println!("  {} {}", "!".red().bold(), error);
            }
            if report.is_clean() {
                println!("{} No issues.", "✓".green().bold());
            }
        }
    }
    if !report.is_clean() {
        bail!("{} problem(s) found", report.problem_count());
    }
    Ok(())
}
