use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use instarelink::config::ClientConfig;
use instarelink::{
    BinaryArtifact, BinaryEditor, EnvMap, RelinkPolicy, RelinkTarget, Relinker, installer,
    platform_editor,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "instarelink")]
#[command(author, version, about = "Relink and wrap pre-built vendor client binaries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a runtime search path and rewrite library install names
    Relink {
        /// Directory to record as the runtime library search path
        #[arg(long)]
        target: PathBuf,

        /// Fail on malformed binaries instead of skipping them
        #[arg(long)]
        strict: bool,

        /// Process files in parallel
        #[arg(long)]
        parallel: bool,

        /// Binaries to relink
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Write a launcher that runs an executable with a fixed environment
    Wrap {
        /// Directory the launcher is written to
        #[arg(long)]
        dest: PathBuf,

        /// Environment entries (KEY=VALUE)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Executable to launch
        executable: PathBuf,
    },

    /// Move every file in a directory aside and leave launchers behind
    WrapAll {
        /// Directory the real executables are moved into
        #[arg(long)]
        private: PathBuf,

        /// Environment entries (KEY=VALUE)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Directory of executables to wrap
        bin_dir: PathBuf,
    },

    /// Run the full post-install sequence on a staged keg
    Install {
        /// JSON install configuration
        #[arg(long)]
        config: PathBuf,

        /// Fail on malformed binaries instead of skipping them
        #[arg(long)]
        strict: bool,
    },

    /// Print usage notes for an installed keg
    Caveats {
        /// JSON install configuration
        #[arg(long)]
        config: PathBuf,
    },

    /// Show format, kind, search paths and identifier of binaries
    Inspect {
        files: Vec<PathBuf>,
    },
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Relink {
            target,
            strict,
            parallel,
            files,
        } => relink(&target, strict, parallel, &files),
        Commands::Wrap {
            dest,
            env,
            executable,
        } => {
            let env: EnvMap = env.into_iter().collect();
            let wrapped = instarelink::wrap(&executable, &dest, &env)
                .with_context(|| format!("Failed to wrap {}", executable.display()))?;
            println!(
                "  {} {} -> {}",
                "✓".green(),
                wrapped.launcher.display().to_string().bold(),
                wrapped.executable.display()
            );
            Ok(())
        }
        Commands::WrapAll {
            private,
            env,
            bin_dir,
        } => {
            let env: EnvMap = env.into_iter().collect();
            let wrapped = instarelink::wrap_all(&bin_dir, &private, &env)
                .with_context(|| format!("Failed to wrap {}", bin_dir.display()))?;
            for w in &wrapped {
                println!("  {} {}", "✓".green(), w.launcher.display());
            }
            println!("Wrapped {} executables", wrapped.len().to_string().bold());
            Ok(())
        }
        Commands::Install { config, strict } => install(&config, strict),
        Commands::Caveats { config } => {
            let config = load_config(&config)?;
            print!("{}", config.caveats());
            Ok(())
        }
        Commands::Inspect { files } => {
            inspect(&files);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<ClientConfig> {
    ClientConfig::from_path(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn relink(target: &Path, strict: bool, parallel: bool, files: &[PathBuf]) -> Result<()> {
    let target = RelinkTarget::new(target)?;
    let artifacts: Vec<BinaryArtifact> = files.iter().map(BinaryArtifact::inspect).collect();
    let relinker = Relinker::with_policy(platform_editor(), RelinkPolicy { strict, parallel });

    let report = relinker.relink(&artifacts, &target)?;

    for path in &report.relinked {
        println!("  {} {}", "✓".green(), path.display());
    }
    for path in &report.skipped_symlinks {
        println!("  {} {} (symlink)", "-".dimmed(), path.display());
    }
    for (path, reason) in &report.skipped_malformed {
        println!("  {} {}: {}", "⚠".yellow(), path.display(), reason.dimmed());
    }
    for (path, reason) in &report.identifier_unchanged {
        println!(
            "  {} {} (identifier unchanged): {}",
            "⚠".yellow(),
            path.display(),
            reason.dimmed()
        );
    }
    println!(
        "Relinked {} of {} files against {}",
        report.relinked.len().to_string().bold(),
        report.total(),
        target.path().display().to_string().cyan()
    );
    Ok(())
}

fn install(config_path: &Path, strict: bool) -> Result<()> {
    let config = load_config(config_path)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .context("Invalid progress template")?,
    );
    pb.set_message(format!("Fixing up {}...", config.prefix.display()));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = installer::post_install(
        &config,
        platform_editor(),
        RelinkPolicy {
            strict,
            parallel: true,
        },
    );
    pb.finish_and_clear();
    let summary = result.with_context(|| format!("Post-install failed for {}", config.prefix.display()))?;

    println!(
        "  {} Relinked {} binaries ({} symlinks, {} skipped)",
        "✓".green(),
        summary.relink.relinked.len().to_string().bold(),
        summary.relink.skipped_symlinks.len(),
        summary.relink.skipped_malformed.len()
    );
    for (path, reason) in summary
        .relink
        .skipped_malformed
        .iter()
        .chain(&summary.relink.identifier_unchanged)
    {
        println!("    {} {}: {}", "⚠".yellow(), path.display(), reason.dimmed());
    }
    println!(
        "  {} Wrapped {} executables",
        "✓".green(),
        summary.wrapped.len().to_string().bold()
    );
    println!("\n{}", "==> Caveats".bold());
    print!("{}", config.caveats());
    Ok(())
}

fn inspect(files: &[PathBuf]) {
    let editor = platform_editor();
    for file in files {
        let artifact = BinaryArtifact::inspect(file);
        println!(
            "{} ({:?}, {:?}{})",
            file.display().to_string().bold(),
            artifact.format,
            artifact.kind,
            if artifact.is_symlink { ", symlink" } else { "" }
        );
        if artifact.is_symlink {
            continue;
        }
        match editor.search_paths(file) {
            Ok(paths) if paths.is_empty() => println!("  search paths: {}", "(none)".dimmed()),
            Ok(paths) => {
                let joined: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                println!("  search paths: {}", joined.join(":"))
            }
            Err(e) => println!("  search paths: {}", e.to_string().red()),
        }
        match editor.self_identifier(file) {
            Ok(Some(id)) => println!("  identifier:   {}", id),
            Ok(None) => println!("  identifier:   {}", "(none)".dimmed()),
            Err(e) => println!("  identifier:   {}", e.to_string().red()),
        }
    }
}
