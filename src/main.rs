//! SecureVault - CLI
//!
//! Minimal command surface over the vault service. Every command
//! authenticates first and unlocks with the operator's stored salt.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use securevault::{Vault, VaultResult};

#[derive(Parser)]
#[command(name = "securevault")]
#[command(version = securevault::VERSION)]
#[command(about = "SecureVault - password-bound encrypted file vault")]
struct Cli {
    /// Vault directory (defaults to ~/.securevault)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Operator name
    #[arg(short, long, default_value = "admin")]
    user: String,

    /// Operator password
    #[arg(short, long)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a file to the vault
    Add {
        /// File to encrypt and store
        path: PathBuf,

        /// Free-text description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Comma-separated tags
        #[arg(short, long, default_value = "")]
        tags: String,
    },

    /// List all stored files
    List,

    /// Search by name, tags, or description
    Search { term: String },

    /// Decrypt a stored file into a directory
    Get {
        /// Catalog id (see `list`)
        id: i64,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Delete a stored file
    Rm { id: i64 },

    /// Change the operator password (re-encrypts every file)
    ChangePassword {
        /// New password
        new_password: String,

        /// Optional new operator name
        #[arg(long)]
        new_name: Option<String>,
    },

    /// Show catalog statistics
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show disk-space posture
    Space {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> VaultResult<()> {
    let vault = match &cli.root {
        Some(root) => Vault::open_at(root)?,
        None => Vault::open_default()?,
    };

    let operator = vault.authenticate(&cli.user, &cli.password)?;
    vault.unlock(&cli.password, &operator.salt)?;

    match cli.command {
        Commands::Add {
            path,
            description,
            tags,
        } => {
            let entry = vault.add(&path, &description, &tags)?;
            println!("Stored '{}' as entry {}", entry.original_name, entry.id);
        }

        Commands::List => {
            let entries = vault.list()?;
            if entries.is_empty() {
                println!("Vault is empty");
            } else {
                println!("{} file(s) in vault:", entries.len());
                for entry in entries {
                    println!(
                        "  [{}] {} ({}, added {})",
                        entry.id,
                        entry.original_name,
                        format_size(entry.file_size),
                        entry.date_added.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        Commands::Search { term } => {
            let entries = vault.search(&term)?;
            println!("{} match(es):", entries.len());
            for entry in entries {
                println!("  [{}] {} - {}", entry.id, entry.original_name, entry.tags);
            }
        }

        Commands::Get { id, output } => {
            let entry = vault.entry(id)?.ok_or_else(|| {
                securevault::VaultError::StoreFailed(format!("no entry with id {id}"))
            })?;
            let restored = vault.retrieve(&entry, &output)?;
            println!("Restored to {}", restored.display());
        }

        Commands::Rm { id } => {
            let entry = vault.entry(id)?.ok_or_else(|| {
                securevault::VaultError::StoreFailed(format!("no entry with id {id}"))
            })?;
            if vault.delete(&entry)? {
                println!("Deleted '{}'", entry.original_name);
            } else {
                println!("Entry {id} was already gone");
            }
        }

        Commands::ChangePassword {
            new_password,
            new_name,
        } => {
            let updated =
                vault.change_password(&operator, &cli.password, &new_password, new_name.as_deref())?;
            println!(
                "Credentials updated; all files re-encrypted. Operator: {}",
                updated.username
            );
        }

        Commands::Stats { json } => {
            let stats = vault.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Files:         {}", stats.file_count);
                println!(
                    "Original size: {}",
                    format_size(stats.total_original_bytes)
                );
            }
        }

        Commands::Space { json } => {
            let status = vault.space_status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Free:          {}", format_size(status.free_bytes));
                println!("Total:         {}", format_size(status.total_bytes));
                println!("Usage:         {:.1}%", status.usage_fraction * 100.0);
                println!("Minimum OK:    {}", status.has_min);
                println!("Recommended OK: {}", status.has_recommended);
            }
        }
    }

    vault.lock();
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.1} KB", b / KIB)
    } else if b < KIB * KIB * KIB {
        format!("{:.1} MB", b / (KIB * KIB))
    } else {
        format!("{:.1} GB", b / (KIB * KIB * KIB))
    }
}
