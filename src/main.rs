use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use safe_edit::config::{load_for_root, EngineConfig};
use safe_edit::impact::Severity;
use safe_edit::index::SearchResponse;
use safe_edit::{discover_files, ApplyEditsResponse, DiffBlock, Engine, TypeFilter};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "safe-edit")]
#[command(about = "Index Python projects and apply line-anchored edits safely", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <root>/safe-edit.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the symbol index and report counts and failed files
    Index {
        /// Project root
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Print the build_index response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Look up definitions by name
    Search {
        identifier: String,

        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// any, function, class, variable or import
        #[arg(short = 't', long = "type", default_value = "any")]
        type_filter: TypeFilter,

        /// Rank definitions in this file first
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Attach indexed calls and references of each match
        #[arg(long)]
        include_usage: bool,

        #[arg(long)]
        json: bool,
    },

    /// List the definitions of one file
    Definitions {
        file: PathBuf,

        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Print names grouped by kind instead of the full list
        #[arg(long)]
        summary: bool,

        #[arg(long)]
        json: bool,
    },

    /// Apply diff blocks from a JSON file to one file
    Apply {
        file: PathBuf,

        /// JSON array of {start_line, end_line?, search_content, replace_content}
        #[arg(short, long)]
        blocks: PathBuf,

        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Validate and analyze without writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        #[arg(long)]
        json: bool,
    },

    /// Index an installed library and optionally search it
    Library {
        name: String,

        #[arg(short, long)]
        query: Option<String>,

        #[arg(short = 't', long = "type", default_value = "any")]
        type_filter: TypeFilter,

        /// Keep names starting with an underscore
        #[arg(long)]
        include_private: bool,

        /// Extra search path (repeatable), tried before configured ones
        #[arg(long = "path")]
        paths: Vec<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Index { root, json } => cmd_index(&root, config_path, json),

        Commands::Search {
            identifier,
            root,
            type_filter,
            context_file,
            include_usage,
            json,
        } => cmd_search(
            &root,
            config_path,
            &identifier,
            type_filter,
            context_file.as_deref(),
            include_usage,
            json,
        ),

        Commands::Definitions {
            file,
            root,
            summary,
            json,
        } => cmd_definitions(&root, config_path, &file, summary, json),

        Commands::Apply {
            file,
            blocks,
            root,
            dry_run,
            diff,
            json,
        } => cmd_apply(&root, config_path, &file, &blocks, dry_run, diff, json),

        Commands::Library {
            name,
            query,
            type_filter,
            include_private,
            paths,
            json,
        } => cmd_library(
            config_path,
            &name,
            query.as_deref(),
            type_filter,
            include_private,
            paths,
            json,
        ),
    }
}

fn load_config(root: &Path, explicit: Option<&Path>) -> Result<EngineConfig> {
    Ok(load_for_root(root, explicit)?)
}

/// Load config, discover files under `root`, and build the index.
fn open_project(root: &Path, config_path: Option<&Path>) -> Result<Engine> {
    let config = load_config(root, config_path)?;
    let files = discover_files(root, &config.index)
        .with_context(|| format!("failed to walk {}", root.display()))?;
    let engine = Engine::new(config);
    engine.setup(root, &files)?;
    Ok(engine)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_index(root: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(root, config_path)?;
    let files = discover_files(root, &config.index)
        .with_context(|| format!("failed to walk {}", root.display()))?;
    let engine = Engine::new(config);
    let response = engine.setup(root, &files)?;

    if json {
        return print_json(&response);
    }

    println!(
        "{} {} files, {} definitions",
        "Indexed".green().bold(),
        response.files_indexed,
        response.definitions.len()
    );
    if !response.failed_files.is_empty() {
        println!(
            "  {} failed to parse:",
            format!("{}", response.failed_files.len()).red()
        );
        for failure in &response.failed_files {
            println!("  {} {}", "✗".red(), failure);
        }
    }
    Ok(())
}

fn print_search(response: &SearchResponse) {
    if !response.found {
        println!("No definitions found for '{}'", response.identifier);
        if !response.suggestions.is_empty() {
            println!("  did you mean: {}", response.suggestions.join(", ").yellow());
        }
        return;
    }

    for found in &response.matches {
        let def = &found.definition;
        let detail = def
            .as_function()
            .map(|f| f.signature.clone())
            .unwrap_or_else(|| def.qualified_name());
        println!(
            "{:>5.2}  {:<8} {}  {}",
            found.relevance_score,
            def.kind().to_string().cyan(),
            detail.bold(),
            format!("{}:{}", def.file.display(), def.line_start).dimmed()
        );
        for usage in found.usages.iter().flatten() {
            let args = usage
                .arg_count
                .map(|n| format!(" ({n} args)"))
                .unwrap_or_default();
            println!(
                "         {} {}:{}{}",
                "↳".dimmed(),
                usage.file.display(),
                usage.line,
                args
            );
        }
    }
    if response.total_matches > response.matches.len() {
        println!(
            "{}",
            format!(
                "... {} more match(es)",
                response.total_matches - response.matches.len()
            )
            .dimmed()
        );
    }
}

fn cmd_search(
    root: &Path,
    config_path: Option<&Path>,
    identifier: &str,
    type_filter: TypeFilter,
    context_file: Option<&Path>,
    include_usage: bool,
    json: bool,
) -> Result<()> {
    let engine = open_project(root, config_path)?;
    let response =
        engine.search_definitions(identifier, type_filter, context_file, include_usage)?;
    if json {
        return print_json(&response);
    }
    print_search(&response);
    Ok(())
}

fn cmd_definitions(
    root: &Path,
    config_path: Option<&Path>,
    file: &Path,
    summary: bool,
    json: bool,
) -> Result<()> {
    let engine = open_project(root, config_path)?;
    if summary {
        let summary = engine.file_summary(file)?;
        if json {
            return print_json(&summary);
        }
        println!(
            "{} {} definitions",
            summary.file.display().to_string().bold(),
            summary.definitions_found
        );
        for (label, names) in [
            ("functions", &summary.functions),
            ("classes", &summary.classes),
            ("variables", &summary.variables),
            ("imports", &summary.imports),
        ] {
            if !names.is_empty() {
                println!("  {:<10} {}", label.cyan(), names.join(", "));
            }
        }
        return Ok(());
    }
    let definitions = engine.file_definitions(file)?;
    if json {
        return print_json(&definitions);
    }
    if definitions.is_empty() {
        println!("No definitions indexed for {}", file.display());
        return Ok(());
    }
    for def in &definitions {
        let indent = "  ".repeat(def.scope.as_deref().map_or(0, |s| s.split('.').count()));
        println!(
            "{:>5}  {}{:<8} {}",
            def.line_start,
            indent,
            def.kind().to_string().cyan(),
            def.name
        );
    }
    Ok(())
}

fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn print_apply(response: &ApplyEditsResponse, dry_run: bool) {
    if response.success {
        let verb = if dry_run { "Would apply" } else { "Applied" };
        println!(
            "{} {} {} block(s) to {}",
            "✓".green(),
            verb,
            response.applied_count,
            response.file.display()
        );
    } else if let Some(error) = &response.error {
        eprintln!("{} {}: {}", "✗".red(), error.kind.red().bold(), error.message);
        if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
            eprintln!("  {}", "expected:".dimmed());
            for line in expected.lines() {
                eprintln!("    {}", line.yellow());
            }
            eprintln!("  {}", "found:".dimmed());
            for line in actual.lines() {
                eprintln!("    {}", line);
            }
        }
    }

    for warning in &response.warnings {
        let tag = match warning.severity {
            Severity::High => "HIGH".red().bold(),
            Severity::Medium => "MEDIUM".yellow().bold(),
            Severity::Low => "LOW".normal(),
        };
        println!("  [{}] {}", tag, warning.message);
    }
    for recommendation in &response.recommendations {
        println!("  {} {}", "→".dimmed(), recommendation);
    }
    if let Some(error) = &response.reindex_error {
        println!("  {} {}", "reindex failed:".yellow(), error.message);
    }
    println!("{}", response.suggested_next_action.dimmed());
}

fn cmd_apply(
    root: &Path,
    config_path: Option<&Path>,
    file: &Path,
    blocks_path: &Path,
    dry_run: bool,
    show_diff: bool,
    json: bool,
) -> Result<()> {
    let raw = fs::read_to_string(blocks_path)
        .with_context(|| format!("failed to read blocks from {}", blocks_path.display()))?;
    let blocks: Vec<DiffBlock> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid blocks JSON in {}", blocks_path.display()))?;

    let engine = open_project(root, config_path)?;
    let target = if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    };
    let original = fs::read_to_string(&target).unwrap_or_default();

    let mut response = if dry_run || show_diff {
        engine.preview_edits(&target, &blocks)
    } else {
        engine.apply_edits(&target, &blocks)
    };

    if show_diff {
        if let Some(new_content) = &response.new_content {
            display_diff(file, &original, new_content);
        }
    }
    // A diff without --dry-run previews first, then applies.
    if show_diff && !dry_run && response.success {
        response = engine.apply_edits(&target, &blocks);
    }

    if json {
        print_json(&response)?;
    } else {
        print_apply(&response, dry_run);
    }

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_library(
    config_path: Option<&Path>,
    name: &str,
    query: Option<&str>,
    type_filter: TypeFilter,
    include_private: bool,
    paths: Vec<PathBuf>,
    json: bool,
) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let mut config = load_config(&cwd, config_path)?;
    if !paths.is_empty() {
        let configured = std::mem::take(&mut config.library.search_paths);
        config.library.search_paths = paths.into_iter().chain(configured).collect();
    }

    let engine = Engine::new(config);
    let summary = engine.index_library(name, include_private)?;

    match query {
        Some(query) => {
            let response = engine.search_library(name, query, type_filter)?;
            if json {
                return print_json(&response);
            }
            print_search(&response);
        }
        None => {
            if json {
                return print_json(&summary);
            }
            println!(
                "{} {}: {} definitions ({} functions, {} classes, {} variables, {} imports)",
                "Indexed".green().bold(),
                summary.library_name,
                summary.total_definitions,
                summary.functions,
                summary.classes,
                summary.variables,
                summary.imports
            );
        }
    }
    Ok(())
}
