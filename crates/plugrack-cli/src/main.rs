//! Command-line interface for plugrack plugin directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use plugrack_core::config::env_vars;
use plugrack_core::{
    FullType, Loader, ModuleInfo, NativeLinker, Prober, RuntimeConfig, SearchPath, SymbolContract,
};

/// Plugrack - inspect, list and verify plugin modules.
#[derive(Parser, Debug)]
#[command(name = "plugrack")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file. Falls back to $PLUGRACK_CONFIG.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List the modules available for a category.
    List {
        /// Category (major type), e.g. `checkpoint`.
        category: String,
        /// Search path override, colon separated.
        #[arg(short, long)]
        dir: Option<String>,
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the record embedded in a module file without loading it.
    Probe {
        /// Path to the module file.
        path: PathBuf,
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load a module and resolve a symbol contract against it.
    Check {
        /// Type to load, `<major>/<minor>` or a bare minor with --category.
        full_type: String,
        /// Category the bare type belongs to.
        #[arg(long)]
        category: Option<String>,
        /// Contracted symbols, in order.
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// Search path override, colon separated.
        #[arg(short, long)]
        dir: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::List {
            category,
            dir,
            json,
        } => {
            let config = load_config(args.config.as_deref(), dir.as_deref())?;
            list_modules(&config, &category, json)
        }
        Command::Probe { path, json } => probe_module(&path, json),
        Command::Check {
            full_type,
            category,
            symbols,
            dir,
        } => {
            let config = load_config(args.config.as_deref(), dir.as_deref())?;
            check_module(&config, &full_type, category.as_deref(), symbols)
        }
    }
}

fn init_logging(verbose: bool) {
    // JSON logs for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "plugrack=debug" } else { "plugrack=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>, dir: Option<&str>) -> Result<RuntimeConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(env_vars::CONFIG).map(PathBuf::from));

    let mut config = RuntimeConfig::load(path.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = dir {
        config.plugin_dir = SearchPath::parse(dir);
    }
    tracing::debug!(plugin_dir = %config.plugin_dir, "configuration loaded");
    Ok(config)
}

/// List a category's modules. Discovery only; nothing is linked.
fn list_modules(config: &RuntimeConfig, category: &str, json: bool) -> Result<()> {
    let loader = Loader::from_config(config, Arc::new(NativeLinker::new()))?;
    let modules = loader.new_rack(category).list();

    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    println!("Available {} plugins", category);
    println!("Search path: {}\n", config.plugin_dir);
    if modules.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for module in &modules {
        print_module(module);
    }
    println!("\n{} plugin(s)", modules.len());
    Ok(())
}

fn print_module(module: &ModuleInfo) {
    let id = if module.plugin_id == 0 {
        String::new()
    } else {
        format!("  id={}", module.plugin_id)
    };
    println!(
        "  {:<32} {:<10} {}{}",
        module.full_type,
        module.version,
        module.path.display(),
        id
    );
}

fn probe_module(path: &Path, json: bool) -> Result<()> {
    let record = Prober::new()
        .peek(path)
        .with_context(|| format!("cannot probe {}", path.display()))?;

    if json {
        let value = serde_json::json!({
            "path": path,
            "layout": plugrack_sdk::LAYOUT_VERSION,
            "full_type": record.full_type,
            "plugin_id": record.plugin_id,
            "version": record.version,
            "requires": record.requires,
            "name": record.name,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Module:    {}", path.display());
    println!("Type:      {}", record.full_type);
    println!("Name:      {}", record.name);
    println!("Version:   {}", record.version);
    println!("Requires:  {}", record.requires);
    if record.plugin_id != 0 {
        println!("Plugin id: {}", record.plugin_id);
    }
    Ok(())
}

fn check_module(
    config: &RuntimeConfig,
    full_type: &str,
    category: Option<&str>,
    symbols: Vec<String>,
) -> Result<()> {
    let full_type = match category {
        Some(category) => FullType::for_category(category, full_type)?,
        None => FullType::parse(full_type)?,
    };
    let contract = leak_contract(full_type.major(), symbols);
    let loader = Loader::from_config(config, Arc::new(NativeLinker::new()))?;

    let mut rack = None;
    match loader.load_and_link(&full_type, &contract, &mut rack) {
        Ok((table, outcome)) => {
            println!("Plugin Check: PASSED");
            println!();
            println!("Type:      {}", outcome.full_type);
            println!("Module:    {}", outcome.path.display());
            println!("Version:   {}", outcome.version);
            println!("Found via: {}", outcome.via);
            println!();
            for (name, addr) in contract.symbols.iter().zip(table.addresses()) {
                println!("  {:<32} {:#x}", name, addr);
            }
            Ok(())
        }
        Err(e) => {
            println!("Plugin Check: FAILED");
            println!();
            println!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Build a contract from command-line input. It lives until the process exits.
fn leak_contract(category: &str, symbols: Vec<String>) -> SymbolContract {
    let category: &'static str = Box::leak(category.to_string().into_boxed_str());
    let symbols: Vec<&'static str> = symbols
        .into_iter()
        .map(|s| &*Box::leak(s.trim().to_string().into_boxed_str()))
        .collect();
    SymbolContract::new(category, Box::leak(symbols.into_boxed_slice()))
}
