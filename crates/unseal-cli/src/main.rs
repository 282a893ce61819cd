//! unseal: decrypt Home Assistant backups offline with the emergency kit
//!
//! Commands:
//!   decrypt [BACKUP.tar ...]  - decrypt backups (default: discovered in --dir)
//!   inspect <BACKUP.tar>      - show backup.json metadata and member layout
//!   extract-key <KIT>         - check that a kit contains a key
//!   config show               - display the effective configuration

mod discover;
mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use unseal_backup::{run_batch, BatchOptions, MemberKind, OutputPolicy, ProgressFn, UnpackOptions};
use unseal_core::config::{default_config_path, expand_tilde, BatchPolicy, UnsealConfig};
use unseal_core::{UnsealError, UnsealResult};
use unseal_crypto::kit::{self, KitLookup};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "unseal",
    version,
    about = "Decrypt Home Assistant encrypted backups",
    long_about = "unseal: decrypt Home Assistant backup archives offline using the emergency kit"
)]
struct Cli {
    /// Path to config.toml (default: ~/.config/unseal/config.toml)
    #[arg(long, short = 'c', env = "UNSEAL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "UNSEAL_LOG", global = true)]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "UNSEAL_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decrypt backup archives into plain directory trees
    ///
    /// Without BACKUPS, every backup archive in --dir is decrypted. The key
    /// comes from --key, else from the emergency kit, else from a prompt.
    Decrypt {
        /// Backup archives (default: all backups found in --dir)
        backups: Vec<PathBuf>,
        /// Directory scanned for an emergency kit and backups
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Emergency kit file (overrides config and discovery)
        #[arg(long)]
        kit: Option<PathBuf>,
        /// Encryption key, bypassing the kit
        #[arg(long, env = "UNSEAL_KEY", hide_env_values = true)]
        key: Option<String>,
        /// Accept a free-form password instead of a kit key
        #[arg(long)]
        legacy_password: bool,
        /// Base directory for decrypted output (overrides config)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Replace existing output directories
        #[arg(long)]
        overwrite: bool,
        /// Stop at the first backup that fails
        #[arg(long)]
        abort_on_error: bool,
        /// Never prompt for a key
        #[arg(long)]
        no_prompt: bool,
    },

    /// Print backup.json metadata and the member layout of a backup
    Inspect {
        /// Backup archive
        backup: PathBuf,
    },

    /// Check that an emergency kit contains a well-formed key
    #[command(name = "extract-key")]
    ExtractKey {
        /// Emergency kit file
        kit: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

/// Key sources for `decrypt`, in precedence order
struct KeySource<'a> {
    key: Option<&'a str>,
    kit: Option<PathBuf>,
    legacy: bool,
    prompt: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            let unseal = e.downcast_ref::<UnsealError>();
            if let Some(hint) = unseal.and_then(UnsealError::hint) {
                eprintln!("  hint: {hint}");
            }
            exit_code(unseal.map(|u| u.kind().exit_code()).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = UnsealConfig::load(&config_path)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => LogFormat::from_str(&config.log.format, true).unwrap_or(LogFormat::Text),
    };
    init_logging(&level, &format);

    match cli.command {
        Commands::Decrypt {
            backups,
            dir,
            kit,
            key,
            legacy_password,
            output,
            overwrite,
            abort_on_error,
            no_prompt,
        } => {
            let legacy = legacy_password || config.key.legacy_password;
            let source = KeySource {
                key: key.as_deref(),
                kit: kit.or_else(|| config.key.kit_path.as_deref().map(expand_tilde)),
                legacy,
                prompt: !no_prompt && prompt::can_prompt(),
            };
            let options = BatchOptions {
                unpack: UnpackOptions {
                    output: OutputPolicy {
                        overwrite: overwrite || config.output.overwrite,
                    },
                },
                policy: if abort_on_error {
                    BatchPolicy::Abort
                } else {
                    config.batch.policy
                },
                output_root: expand_tilde(output.as_deref().unwrap_or(&config.output.directory)),
            };
            cmd_decrypt(backups, &dir, source, &options)
        }
        Commands::Inspect { backup } => cmd_inspect(&backup).map(|_| ExitCode::SUCCESS),
        Commands::ExtractKey { kit } => cmd_extract_key(&kit).map(|_| ExitCode::SUCCESS),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path).map(|_| ExitCode::SUCCESS),
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status(code))
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── Key resolution ────────────────────────────────────────────────────────────

/// Resolve the passphrase: explicit key, then the kit, then a prompt.
fn resolve_passphrase(source: &KeySource<'_>, discovered_kits: &[PathBuf]) -> UnsealResult<SecretString> {
    if let Some(key) = source.key {
        return if source.legacy {
            match key.trim() {
                "" => Err(UnsealError::KeyNotFound("--key is empty".into())),
                password => Ok(SecretString::from(password)),
            }
        } else {
            kit::validate_key(key)
        };
    }

    let kit_path = source.kit.as_ref().or(discovered_kits.first());
    match kit_path {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            match kit::find_key(&String::from_utf8_lossy(&bytes)) {
                KitLookup::Found(key) => {
                    println!("Found encryption key in {}", path.display());
                    return Ok(key);
                }
                KitLookup::NotFound => {
                    tracing::warn!("no encryption key found in {}", path.display());
                }
            }
        }
        None => tracing::warn!("no emergency kit found"),
    }

    if source.prompt {
        prompt::prompt_key(source.legacy)
    } else {
        Err(UnsealError::KeyNotFound(
            "no key in --key, UNSEAL_KEY or an emergency kit".into(),
        ))
    }
}

// ── `unseal decrypt` ──────────────────────────────────────────────────────────

fn cmd_decrypt(
    backups: Vec<PathBuf>,
    dir: &Path,
    source: KeySource<'_>,
    options: &BatchOptions,
) -> Result<ExitCode> {
    let discovered = discover::scan_dir(dir)?;
    let backups = if backups.is_empty() {
        discovered.backups
    } else {
        backups
    };
    if backups.is_empty() {
        anyhow::bail!("no backup archives found in {}", dir.display());
    }

    let passphrase = resolve_passphrase(&source, &discovered.kits)?;
    println!("Found {} backup file(s) to process", backups.len());

    let pb = make_progress_bar(0, "decrypt");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let report = run_batch(&backups, passphrase, options, Some(progress));
    pb.finish_and_clear();

    for done in &report.succeeded {
        println!();
        println!("Decrypted {}:", done.name);
        println!("  slug:     {}", done.slug);
        println!("  output:   {}", done.output.display());
        println!("  members:  {}", done.decrypted.join(", "));
        println!("  bytes:    {}", fmt_bytes(done.bytes));
        for missing in &done.missing {
            println!("  missing:  {missing}");
        }
    }
    for failed in &report.failed {
        eprintln!();
        eprintln!("Failed {}:", failed.archive.display());
        eprintln!("  error:  {}", failed.error);
        if let Some(hint) = failed.error.hint() {
            eprintln!("  hint:   {hint}");
        }
    }
    for skipped in &report.skipped {
        eprintln!("Skipped {} (batch aborted)", skipped.display());
    }

    println!();
    println!(
        "{} of {} backup(s) decrypted",
        report.succeeded.len(),
        backups.len()
    );
    Ok(match report.first_failure() {
        Some(kind) => exit_code(kind.exit_code()),
        None => ExitCode::SUCCESS,
    })
}

// ── `unseal inspect` ──────────────────────────────────────────────────────────

fn cmd_inspect(backup: &Path) -> Result<()> {
    let layout = unseal_backup::scan(backup)?;

    println!("{}", backup.display());
    match &layout.metadata {
        Some(meta) => {
            println!("  slug:        {}", meta.slug);
            println!("  name:        {}", meta.name);
            println!("  date:        {}", meta.date);
            println!("  type:        {}", meta.backup_type.as_deref().unwrap_or("-"));
            println!("  version:     {}", meta.version);
            println!("  protected:   {}", meta.protected);
            println!("  crypto:      {}", meta.crypto.as_deref().unwrap_or("-"));
            println!("  compressed:  {}", meta.compressed);
        }
        None => println!("  (no backup.json)"),
    }

    println!();
    println!("Members:");
    for member in &layout.members {
        let role = match &member.kind {
            MemberKind::Metadata => "metadata",
            MemberKind::Encrypted { .. } => "encrypted",
            MemberKind::Directory => "directory",
            MemberKind::Plain => "plain",
        };
        println!("  {:<10} {:>10}  {}", role, fmt_bytes(member.size), member.name);
    }
    for missing in layout.missing_members() {
        println!("  {:<10} {:>10}  {}", "missing", "-", missing);
    }
    Ok(())
}

// ── `unseal extract-key` ──────────────────────────────────────────────────────

fn cmd_extract_key(kit_path: &Path) -> Result<()> {
    use secrecy::ExposeSecret;

    let bytes =
        std::fs::read(kit_path).with_context(|| format!("reading {}", kit_path.display()))?;
    let key = kit::extract_key_from_bytes(&bytes)?;
    println!("Found encryption key in {}", kit_path.display());
    println!("  key:  {}", kit::redact(key.expose_secret()));
    Ok(())
}

// ── `unseal config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &UnsealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const KEY: &str = "A1B2-C3D4-E5F6-G7H8-J9K0-L1M2-N3P4";

    fn source(key: Option<&str>, kit: Option<PathBuf>, legacy: bool) -> KeySource<'_> {
        KeySource {
            key,
            kit,
            legacy,
            prompt: false,
        }
    }

    #[test]
    fn test_explicit_key_wins() {
        let resolved = resolve_passphrase(&source(Some(KEY), None, false), &[]).unwrap();
        assert_eq!(resolved.expose_secret(), KEY);
    }

    #[test]
    fn test_malformed_key_rejected_unless_legacy() {
        let err = resolve_passphrase(&source(Some("hunter2"), None, false), &[]).unwrap_err();
        assert!(matches!(err, UnsealError::KeyNotFound(_)));

        let resolved = resolve_passphrase(&source(Some("hunter2"), None, true), &[]).unwrap();
        assert_eq!(resolved.expose_secret(), "hunter2");
    }

    #[test]
    fn test_key_from_discovered_kit() {
        let tmp = tempfile::tempdir().unwrap();
        let kit = tmp.path().join("emergency_kit.txt");
        std::fs::write(&kit, format!("Encryption key: {KEY}\n")).unwrap();

        let resolved = resolve_passphrase(&source(None, None, false), &[kit]).unwrap();
        assert_eq!(resolved.expose_secret(), KEY);
    }

    #[test]
    fn test_no_key_without_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let kit = tmp.path().join("emergency_kit.txt");
        std::fs::write(&kit, "this kit was damaged").unwrap();

        let err = resolve_passphrase(&source(None, Some(kit), false), &[]).unwrap_err();
        assert!(matches!(err, UnsealError::KeyNotFound(_)));
    }

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_exit_status_clamped() {
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(-1), 1);
        assert_eq!(exit_status(300), 1);
    }
}
