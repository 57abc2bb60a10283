use std::io::Write;
use std::path::PathBuf;
use std::result::Result;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use kvscope::prelude::*;
use kvscope::{IndexEstimate, KeyIndex, suggested_file_name};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Kvscope(#[from] kvscope::Error),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Value rendering requested on the command line.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum FormatArg {
    /// Text and JSON as text, binary as hex.
    #[default]
    Auto,
    String,
    Hex,
    Base64,
}

impl From<FormatArg> for RenderFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Auto => RenderFormat::Auto,
            FormatArg::String => RenderFormat::String,
            FormatArg::Hex => RenderFormat::Hex,
            FormatArg::Base64 => RenderFormat::Base64,
        }
    }
}

#[derive(Parser)]
#[command(name = "kvscope")]
#[command(about = "Browse the key space of embedded key-value stores and inspect values")]
struct Cli {
    /// Configuration file (defaults apply when absent)
    #[arg(long, global = true, env = "KVSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Connection registry file, overriding `registry.path`
    #[arg(long, global = true, env = "KVSCOPE_REGISTRY")]
    registry: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage named connections
    Connections {
        #[command(subcommand)]
        action: ConnectionCommands,
    },

    /// Show the approximate key count and first key
    Estimate {
        /// Connection name
        connection: String,
    },

    /// Scan all keys and show them grouped by prefix
    Index {
        /// Connection name
        connection: String,

        /// Only print keys containing this text (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,

        /// Print only group names and sizes
        #[arg(long)]
        summary: bool,

        /// Fail if the scan could not read every key
        #[arg(long)]
        require_complete: bool,
    },

    /// Print a full value as text
    Get {
        /// Connection name
        connection: String,
        /// Key (hex keys are written as 0x...)
        key: String,
    },

    /// Classify a value and show a bounded rendering
    Inspect {
        /// Connection name
        connection: String,
        /// Key (hex keys are written as 0x...)
        key: String,

        /// Rendering to print
        #[arg(short, long, value_enum, default_value_t = FormatArg::Auto)]
        format: FormatArg,
    },

    /// Write a full, untruncated value to a file
    Export {
        /// Connection name
        connection: String,
        /// Key (hex keys are written as 0x...)
        key: String,

        /// Output file (defaults to export_<key>.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// List connections in registration order
    List,

    /// Register a store directory under a name
    Add { name: String, location: String },

    /// Rename and/or relocate a connection
    Update {
        name: String,
        location: String,

        /// New name
        #[arg(long)]
        rename: Option<String>,
    },

    /// Forget a connection (the store itself is untouched)
    Remove { name: String },
}

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(registry) = &cli.registry {
        config.registry.path = registry.clone();
    }
    config.apply_env();
    Ok(config)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the index while drawing its progress on stderr.
async fn index_with_progress(session: &Session, connection: &str) -> Result<Arc<KeyIndex>, AppError> {
    let task = session.start_index(connection, false).await?;
    if task.is_finished() {
        return Ok(task.wait().await?);
    }

    let mut progress = task.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            eprint!("\rScanning: {} keys ({}%)", p.scanned, p.percent);
            if p.done {
                break;
            }
        }
        eprintln!();
    });

    let result = task.wait().await;
    let _ = reporter.await;
    Ok(result?)
}

fn print_estimate(estimate: &IndexEstimate) {
    println!("{}", estimate.summary());
}

fn print_index(index: &KeyIndex, summary: bool) {
    for (prefix, keys) in &index.groups {
        let label = if prefix.is_empty() { "(no prefix)" } else { prefix };
        println!("{} ({})", label, keys.len());
        if !summary {
            for key in keys {
                println!("  {}", key);
            }
        }
    }
    eprintln!("{} keys in {} groups", index.total_keys, index.groups.len());
    if let Some(t) = &index.truncation {
        eprintln!(
            "warning: scan limits applied ({} keys skipped{})",
            t.keys_skipped,
            if t.stopped_early { ", stopped early" } else { "" }
        );
    }
    if let Some(reason) = &index.scan_error {
        eprintln!("warning: scan stopped early: {}", reason);
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let session = Session::from_config(&config)?;

    match cli.command {
        Commands::Connections { action } => match action {
            ConnectionCommands::List => {
                if cli.json {
                    print_json(&session.connection_locations())?;
                } else if session.list_connections().is_empty() {
                    println!("No connections registered");
                } else {
                    let locations = session.connection_locations();
                    for name in session.list_connections() {
                        let location = locations.get(&name).map(String::as_str).unwrap_or("");
                        println!("{}\t{}", name, location);
                    }
                }
                Ok(())
            }
            ConnectionCommands::Add { name, location } => {
                let conn = session.add_connection(&name, &location)?;
                println!("Added '{}' -> {}", conn.name, conn.location);
                Ok(())
            }
            ConnectionCommands::Update {
                name,
                location,
                rename,
            } => {
                let new_name = rename.as_deref().unwrap_or(&name);
                let conn = session.update_connection(&name, new_name, &location).await?;
                println!("Updated '{}' -> {}", conn.name, conn.location);
                Ok(())
            }
            ConnectionCommands::Remove { name } => {
                session.remove_connection(&name).await?;
                println!("Removed '{}'", name);
                Ok(())
            }
        },
        Commands::Estimate { connection } => {
            let estimate = session.index_estimate(&connection).await?;
            if cli.json {
                print_json(&estimate)?;
            } else {
                print_estimate(&estimate);
            }
            Ok(())
        }
        Commands::Index {
            connection,
            search,
            summary,
            require_complete,
        } => {
            let index = index_with_progress(&session, &connection).await?;
            if require_complete {
                index.as_ref().clone().require_complete()?;
            }
            match search {
                Some(term) => {
                    let keys = kvscope::filter_keys(&index, &term);
                    if cli.json {
                        print_json(&keys)?;
                    } else if keys.is_empty() {
                        println!("No keys match '{}'", term);
                    } else {
                        for key in keys {
                            println!("{}", key);
                        }
                    }
                }
                None if cli.json => {
                    if summary {
                        print_json(&index.prefixes())?;
                    } else {
                        print_json(index.as_ref())?;
                    }
                }
                None => print_index(&index, summary),
            }
            Ok(())
        }
        Commands::Get { connection, key } => {
            let value = session.get_value(&connection, &key).await?;
            println!("{}", value);
            Ok(())
        }
        Commands::Inspect {
            connection,
            key,
            format,
        } => {
            let descriptor = session.inspect_value(&connection, &key).await?;
            if cli.json {
                print_json(descriptor.as_ref())?;
                return Ok(());
            }
            let format = RenderFormat::from(format).resolve(descriptor.value_type);
            eprintln!(
                "{} | {} | {} | shown as {}",
                descriptor.key,
                descriptor.value_type,
                kvscope::format_bytes(descriptor.size_bytes),
                format.as_str()
            );
            if let Some(note) = &descriptor.truncation_note {
                eprintln!("{}", note);
            }
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(descriptor.render(format).as_bytes())?;
            writeln!(stdout)?;
            Ok(())
        }
        Commands::Export {
            connection,
            key,
            output,
        } => {
            let path = output.unwrap_or_else(|| PathBuf::from(suggested_file_name(&key)));
            let report = session.export_value(&connection, &key, &path).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Exported '{}' to {} ({})",
                    report.key,
                    path.display(),
                    kvscope::format_bytes(report.bytes_written)
                );
            }
            Ok(())
        }
    }
}
