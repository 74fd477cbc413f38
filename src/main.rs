use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use execroot::{ExecRoot, LinkStrategy, Manifest, RootMode, SandboxExecRoot};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "execroot")]
#[command(author, version, about = "Build, collect from and tear down sandbox exec roots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Project inputs and provision writable dirs into an exec root
    Create {
        /// Exec root directory
        #[arg(short, long)]
        root: PathBuf,

        /// JSON manifest with inputs, outputs and writable_dirs
        #[arg(short, long)]
        manifest: PathBuf,

        /// Wipe the root instead of reconciling it
        #[arg(long)]
        fresh: bool,

        /// Hardlink inputs instead of symlinking them
        #[arg(long)]
        hardlink: bool,
    },

    /// Move declared outputs from an exec root into a destination tree
    Collect {
        /// Exec root directory
        #[arg(short, long)]
        root: PathBuf,

        /// Destination root for outputs
        #[arg(short, long)]
        dest: PathBuf,

        /// JSON manifest; only its outputs are used
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// List every entry under an exec root as JSON
    Snapshot {
        /// Exec root directory
        #[arg(short, long)]
        root: PathBuf,
    },

    /// Remove an exec root entirely
    Teardown {
        /// Exec root directory
        #[arg(short, long)]
        root: PathBuf,
    },
}

/// `RUST_LOG` when it parses, otherwise info for this crate
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("execroot=info"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            root,
            manifest,
            fresh,
            hardlink,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let mut exec_root = ExecRoot::builder(&root)
                .mode(if fresh { RootMode::Fresh } else { RootMode::Reuse })
                .strategy(if hardlink {
                    LinkStrategy::Hardlink
                } else {
                    LinkStrategy::Symlink
                })
                .build()?;

            exec_root
                .create_file_system(
                    &manifest.inputs,
                    &manifest.outputs,
                    &manifest.writable_dirs,
                )
                .context(format!("Failed to create exec root at {}", root.display()))?;

            println!(
                "✓ Exec root ready at {} ({} inputs)",
                exec_root.path().display(),
                manifest.inputs.len()
            );
        }
        Commands::Collect {
            root,
            dest,
            manifest,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let mut exec_root = ExecRoot::builder(&root).build()?;

            let report = exec_root
                .copy_outputs(&dest, &manifest.outputs)
                .context(format!(
                    "Failed to collect outputs from {} (some may already be in {})",
                    root.display(),
                    dest.display()
                ))?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Snapshot { root } => {
            let exec_root = ExecRoot::builder(&root).build()?;
            let snapshot = exec_root.snapshot()?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Teardown { root } => {
            let mut exec_root = ExecRoot::builder(&root).build()?;
            exec_root.teardown()?;
            println!("✓ Removed {}", root.display());
        }
    }

    Ok(())
}
