use clap::{Parser, Subcommand};
use codesearch::indexing::WatchService;
use codesearch::tools::Engines;
use codesearch::{Settings, ToolResponse};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "codesearch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Workspace-scoped code search and navigation for LLM agents")]
struct Cli {
    /// Path to a settings.toml (defaults to the conventional location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index a workspace directory
    Index {
        /// Workspace root to index
        path: PathBuf,

        /// Re-index files even when unchanged
        #[arg(short, long)]
        force: bool,

        /// Show a progress bar
        #[arg(short, long)]
        progress: bool,

        /// List what would be indexed without indexing
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many files
        #[arg(long)]
        max_files: Option<usize>,
    },

    /// Start the MCP server on stdio
    Serve {
        /// Also watch indexed workspaces for changes
        #[arg(long)]
        watch: Option<PathBuf>,
    },

    /// Call a tool directly without a server (embedded mode)
    Mcp {
        /// Tool name, e.g. text_search
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },

    /// Fetch a stored resource by URI
    Resource {
        /// Workspace the resource belongs to
        workspace: PathBuf,

        /// Resource URI from a truncated response
        uri: String,
    },

    /// Print the effective configuration
    Config,
}

fn load_settings(config: Option<&PathBuf>) -> Settings {
    let result = match config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    match result {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    }
}

fn print_response(response: &ToolResponse) {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize response: {e}"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref());
    codesearch::logging::init_with_config(&settings.logging);
    let settings = Arc::new(settings);

    match cli.command {
        Commands::Init { force } => {
            let path = settings.index_root.join("settings.toml");
            if path.exists() && !force {
                eprintln!(
                    "Configuration already exists at {} (use --force to overwrite)",
                    path.display()
                );
                std::process::exit(1);
            }
            if let Err(e) = settings.save(&path) {
                eprintln!("Failed to write configuration: {e}");
                std::process::exit(1);
            }
            println!("Wrote configuration to {}", path.display());
        }

        Commands::Index {
            path,
            force,
            progress,
            dry_run,
            max_files,
        } => {
            if dry_run {
                let walker = codesearch::indexing::WorkspaceWalker::new(settings.clone());
                let files = walker.walk(&path);
                for file in &files {
                    println!("{}", file.display());
                }
                println!("{} files would be indexed", files.len());
                return;
            }

            let engines = Engines::new(settings.clone());
            let engine = match engines.get_or_open(&path.display().to_string()) {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            };

            let bar = progress.then(|| {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {pos} files {msg}")
                        .expect("progress template"),
                );
                bar
            });

            let indexer = engine.indexer();
            let cancel = CancellationToken::new();
            let bar_ref = bar.clone();
            let result = tokio::task::spawn_blocking(move || {
                indexer.index_workspace(force, max_files, Some(&cancel), move |file| {
                    if let Some(bar) = &bar_ref {
                        bar.inc(1);
                        bar.set_message(file.display().to_string());
                    }
                })
            })
            .await;

            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            match result {
                Ok(Ok(stats)) => {
                    println!(
                        "Indexed {} files ({} unchanged, {} failed): {} symbols, {} identifiers in {}ms",
                        stats.files_indexed,
                        stats.files_cached,
                        stats.files_failed,
                        stats.symbols,
                        stats.identifiers,
                        stats.elapsed_ms
                    );
                }
                Ok(Err(e)) => {
                    eprintln!("Indexing failed: {e}");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Indexing task panicked: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Serve { watch } => {
            let engines = Arc::new(Engines::new(settings.clone()));

            // keep the watcher alive for the lifetime of the server
            let _watcher = match watch {
                Some(path) => match engines.get_or_open(&path.display().to_string()) {
                    Ok(engine) => {
                        let cache = engine.cache();
                        match WatchService::start(
                            settings.clone(),
                            engine.indexer(),
                            Arc::new(move || cache.invalidate_all()),
                        ) {
                            Ok(service) => Some(service),
                            Err(e) => {
                                eprintln!("Failed to start watcher: {e}");
                                None
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("Cannot watch {}: {e}", path.display());
                        None
                    }
                },
                None => None,
            };

            eprintln!("Starting MCP server on stdio");
            let server = codesearch::mcp::CodeSearchServer::new(engines);
            use rmcp::{ServiceExt, transport::stdio};
            let service = match server.serve(stdio()).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Failed to start MCP server: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = service.waiting().await {
                eprintln!("MCP server error: {e}");
            }
        }

        Commands::Mcp { tool, args } => {
            let params: serde_json::Value = match args.as_deref() {
                Some(json) => match serde_json::from_str(json) {
                    Ok(v) => v,
                    Err(e) => {
                        eprintln!("Invalid --args JSON: {e}");
                        std::process::exit(1);
                    }
                },
                None => serde_json::json!({}),
            };
            let engines = Engines::new(settings);
            let cancel = CancellationToken::new();
            let response = tokio::task::spawn_blocking(move || {
                engines.dispatch(&tool, params, &cancel)
            })
            .await
            .expect("tool task");
            let failed = !response.success;
            print_response(&response);
            if failed {
                std::process::exit(1);
            }
        }

        Commands::Resource { workspace, uri } => {
            let engines = Engines::new(settings);
            let engine = match engines.get_or_open(&workspace.display().to_string()) {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            };
            match engine.resources().fetch(&uri) {
                Some(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("Resource is not valid UTF-8"),
                },
                None => {
                    eprintln!("Resource not found or expired: {uri}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Config => match toml::to_string_pretty(settings.as_ref()) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to render configuration: {e}"),
        },
    }
}
