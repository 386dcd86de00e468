use anyhow::{Context, Result};
use clap::Parser;
use ent_finder::archive::ZipImageExtractor;
use ent_finder::cache::{
    CacheOrigin, CacheStore, EntitlementDatabase, build_database, database_stats, read_database,
};
use ent_finder::cli::{Cli, Commands, OutputFormat};
use ent_finder::config::{clear_db, default_mount_root, resolve_db_path};
use ent_finder::macho::MachoEntitlementReader;
use ent_finder::manifest::BuildManifestResolver;
use ent_finder::mount::{CommandMounter, MountTool};
use ent_finder::query::{
    QueryMode, render_entitlement_hits, render_file_matches, search_entitlement, search_file,
};
use ent_finder::scan::{EntitlementScanner, ScanSession};
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};

const USAGE_EXIT: u8 = 2;

fn main() -> ExitCode {
    let cli = parse_cli();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(e) = err.downcast_ref::<ent_finder::Error>()
                && e.is_usage()
            {
                error!("{e}");
                return ExitCode::from(USAGE_EXIT);
            }
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Search {
            ipsw,
            ent,
            file,
            format,
        } => {
            // Validated before anything touches the archive or the cache.
            let mode = QueryMode::from_filters(ent, file)?;
            let db_path = resolve_db_path(cli.db.as_deref(), &ipsw);
            let (db, _) = load_or_build(&ipsw, &db_path)?;
            let mut stdout = std::io::stdout().lock();

            match mode {
                QueryMode::File(term) => {
                    let matches = search_file(&db, &term);
                    match format {
                        OutputFormat::Text => render_file_matches(&mut stdout, &matches)?,
                        OutputFormat::Json => {
                            writeln!(stdout, "{}", serde_json::to_string_pretty(&matches)?)?
                        }
                    }
                }
                QueryMode::Entitlement(key) => {
                    info!("Files containing entitlement: {key}");
                    let result = search_entitlement(&db, &key)?;
                    match format {
                        OutputFormat::Text => {
                            writeln!(stdout)?;
                            render_entitlement_hits(&mut stdout, &result.hits)?
                        }
                        OutputFormat::Json => {
                            writeln!(stdout, "{}", serde_json::to_string_pretty(&result)?)?
                        }
                    }
                }
            }
            stdout.flush()?;
        }
        Commands::Build { ipsw } => {
            let db_path = resolve_db_path(cli.db.as_deref(), &ipsw);
            let (db, origin) = load_or_build(&ipsw, &db_path)?;
            let stats = database_stats(&db_path, origin, &db);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Stats { ipsw } => {
            let db_path = resolve_db_path(cli.db.as_deref(), &ipsw);
            if !db_path.exists() {
                anyhow::bail!(
                    "No entitlement database at {} (run `ent-finder build` first)",
                    db_path.display()
                );
            }
            let db = read_database(&db_path)?;
            let stats = database_stats(&db_path, CacheOrigin::Loaded, &db);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Clear { ipsw } => {
            let db_path = resolve_db_path(cli.db.as_deref(), &ipsw);
            clear_db(&db_path)?;
        }
    }

    Ok(())
}

fn load_or_build(ipsw: &Path, db_path: &Path) -> Result<(EntitlementDatabase, CacheOrigin)> {
    let store = CacheStore::new(db_path.to_path_buf());

    let extractor = ZipImageExtractor::default();
    let mounter = CommandMounter::new(MountTool::for_platform(), default_mount_root());
    let reader = MachoEntitlementReader;
    let scanner = EntitlementScanner::new(&extractor, &mounter, &reader);
    let mut session = ScanSession::new();

    store
        .load_or_build(|| {
            let resolver = BuildManifestResolver::open(ipsw)?;
            build_database(ipsw, &resolver, &scanner, &mut session)
        })
        .with_context(|| format!("Failed to prepare entitlement database for {}", ipsw.display()))
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_cli() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    Cli::parse_from(rewrite_args_for_implicit_search(args))
}

/// `ent-finder foo.ipsw --ent x` is `ent-finder search foo.ipsw --ent x`.
fn rewrite_args_for_implicit_search(mut args: Vec<String>) -> Vec<String> {
    if args.len() <= 1 {
        return args;
    }

    let subcommands = ["search", "build", "stats", "clear", "help"];
    let value_options = ["--db", "--ent", "-e", "--file", "-f", "--format"];

    let mut idx = 1usize;
    while idx < args.len() {
        let a = args[idx].as_str();
        if a == "--" {
            idx += 1;
            break;
        }

        if value_options.contains(&a) {
            idx += 2;
            continue;
        }

        if a.starts_with('-') {
            idx += 1;
            continue;
        }

        break;
    }

    if idx < args.len() && !subcommands.contains(&args[idx].as_str()) {
        args.insert(1, "search".to_string());
    }

    args
}
