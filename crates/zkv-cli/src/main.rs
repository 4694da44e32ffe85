//! zkv: zero-knowledge vault CLI
//!
//! Commands:
//!   generate              - print a fresh seed phrase
//!   create                - create a new vault from a seed phrase
//!   ls [<path>]           - list a vault folder
//!   mkdir <path>          - create folders along a path
//!   put <local>... [-t]   - upload local files into the vault
//!   get <path> [<local>]  - download a file from the vault
//!   rm <path>             - remove a file or folder (folders recurse)
//!   status                - show vault usage and expiry
//!
//! The seed phrase is read from the ZKV_SEED environment variable or
//! prompted without echo; it never appears in argv.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use zkv_core::config::ZkvConfig;
use zkv_core::types::{BurnPolicy, DownloadStatus};
use zkv_manifest::{Entry, Manifest};
use zkv_session::{Session, SessionHandle};
use zkv_store::StoreClient;
use zkv_transfer::{download_file, DownloadProgress, TransferEvent, UploadFile, UploadQueue};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zkv",
    version,
    about = "Zero-knowledge personal vault client",
    long_about = "zkv: seed-phrase vaults with client-side encryption; the store never sees keys, names, or plaintext"
)]
struct Cli {
    /// Path to zkv.toml configuration file
    #[arg(long, short = 'c', env = "ZKV_CONFIG", default_value = "~/.config/zkv/zkv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a fresh seed phrase
    Generate {
        /// Mnemonic length (12 or 24 words)
        #[arg(long, default_value_t = 12)]
        words: usize,
    },

    /// Create a new vault from a seed phrase
    Create {
        /// Burn the vault this many days after creation
        #[arg(long)]
        burn_days: Option<u32>,
    },

    /// List a vault folder
    Ls {
        /// Folder path inside the vault (default: root)
        path: Option<String>,
    },

    /// Create folders along a path (missing parents included)
    Mkdir {
        path: String,
    },

    /// Upload local files into the vault
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// environment variables.
    Put {
        /// Local files to upload
        files: Vec<PathBuf>,
        /// Destination folder path inside the vault (default: root)
        #[arg(long, short = 't')]
        to: Option<String>,
    },

    /// Download a file from the vault
    Get {
        /// Remote file path inside the vault
        remote: String,
        /// Local destination (default: the remote file name)
        local: Option<PathBuf>,
    },

    /// Remove a file or folder (folders recurse)
    Rm {
        path: String,
    },

    /// Show vault usage and expiry
    Status,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&expand_tilde(&cli.config)).await?;
    init_tracing(&config);

    match cli.command {
        Commands::Generate { words } => cmd_generate(words),
        Commands::Create { burn_days } => cmd_create(&config, burn_days).await,
        Commands::Ls { path } => cmd_ls(&config, path.as_deref()).await,
        Commands::Mkdir { path } => cmd_mkdir(&config, &path).await,
        Commands::Put { files, to } => cmd_put(&config, &files, to.as_deref()).await,
        Commands::Get { remote, local } => cmd_get(&config, &remote, local.as_deref()).await,
        Commands::Rm { path } => cmd_rm(&config, &path).await,
        Commands::Status => cmd_status(&config).await,
    }
}

fn init_tracing(config: &ZkvConfig) {
    let default = config.log_level.as_deref().unwrap_or("warn");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<ZkvConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(ZkvConfig::default())
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{home}/{rest}"))
    } else {
        path.to_path_buf()
    }
}

// ── Session setup ─────────────────────────────────────────────────────────────

/// Build the store client using credentials from environment variables.
fn store_client(config: &ZkvConfig) -> Result<Arc<StoreClient>> {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("ZKV_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
        )?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("ZKV_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;

    let op = zkv_store::build_operator(&config.storage, &access_key, &secret_key)
        .context("building storage operator")?;
    Ok(Arc::new(StoreClient::new(op)))
}

/// Seed phrase from ZKV_SEED, or a no-echo prompt.
fn read_seed() -> Result<SecretString> {
    if let Ok(seed) = std::env::var("ZKV_SEED") {
        return Ok(SecretString::from(seed));
    }
    let seed = rpassword::prompt_password("Seed phrase: ").context("reading seed phrase")?;
    Ok(SecretString::from(seed))
}

/// Unlock the vault; the returned `Session` must outlive every handle use.
async fn unlock(config: &ZkvConfig) -> Result<(Session, SessionHandle)> {
    let store = store_client(config)?;
    let seed = read_seed()?;
    let mut session = Session::new(store, config.kdf.clone());
    let handle = session.unlock(&seed).await.context("unlocking vault")?;
    Ok((session, handle))
}

// ── Path resolution ───────────────────────────────────────────────────────────

/// Walk a `/`-separated folder path from the root; `None` is the root itself.
fn resolve_folder(manifest: &Manifest, path: &str) -> Result<Option<Uuid>> {
    let mut cursor: Option<Uuid> = None;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        let next = manifest
            .entries_in_folder(cursor)
            .into_iter()
            .find(|e| e.is_folder() && e.name == part)
            .map(|e| e.id);
        cursor = Some(next.with_context(|| format!("no such folder: {part}"))?);
    }
    Ok(cursor)
}

fn resolve_entry(manifest: &Manifest, path: &str) -> Result<Entry> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let (name, dir) = parts.split_last().context("empty path")?;
    let parent = resolve_folder(manifest, &dir.join("/"))?;
    manifest
        .entries_in_folder(parent)
        .into_iter()
        .find(|e| e.name == *name)
        .cloned()
        .with_context(|| format!("no such entry: {path}"))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `zkv generate` ────────────────────────────────────────────────────────────

fn cmd_generate(words: usize) -> Result<()> {
    let phrase = zkv_crypto::generate_mnemonic(words).context("generating seed phrase")?;
    println!("{phrase}");
    eprintln!();
    eprintln!("Write this down. Anyone with these words owns the vault;");
    eprintln!("without them the vault cannot be recovered.");
    Ok(())
}

// ── `zkv create` ──────────────────────────────────────────────────────────────

async fn cmd_create(config: &ZkvConfig, burn_days: Option<u32>) -> Result<()> {
    let store = store_client(config)?;
    let seed = read_seed()?;
    let policy = match burn_days {
        Some(days) => BurnPolicy::After { days },
        None => BurnPolicy::Never,
    };

    let mut session = Session::new(store, config.kdf.clone());
    let handle = session.create(&seed, policy).await.context("creating vault")?;

    println!("Vault created");
    println!("  vault id: {}", handle.vault_id);
    if let Some(days) = burn_days {
        println!("  burns in: {days} days");
    }
    session.logout();
    Ok(())
}

// ── `zkv ls` ──────────────────────────────────────────────────────────────────

async fn cmd_ls(config: &ZkvConfig, path: Option<&str>) -> Result<()> {
    let (mut session, handle) = unlock(config).await?;
    let manifest = handle.snapshot();
    let folder = resolve_folder(&manifest, path.unwrap_or(""))?;

    let trail = match folder {
        Some(id) => manifest
            .breadcrumb_path(id)
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
            .join("/"),
        None => "Root".to_string(),
    };
    println!("{trail}:");

    for entry in manifest.entries_in_folder(folder) {
        match entry.file_meta() {
            None => println!("  {}/", entry.name),
            Some(meta) => println!("  {:<40} {:>10}", entry.name, fmt_bytes(meta.size)),
        }
    }
    session.logout();
    Ok(())
}

// ── `zkv mkdir` ───────────────────────────────────────────────────────────────

async fn cmd_mkdir(config: &ZkvConfig, path: &str) -> Result<()> {
    let (mut session, handle) = unlock(config).await?;

    let mut cursor: Option<Uuid> = None;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        let existing = handle
            .snapshot()
            .entries_in_folder(cursor)
            .into_iter()
            .find(|e| e.is_folder() && e.name == part)
            .map(|e| e.id);
        cursor = Some(match existing {
            Some(id) => id,
            None => handle
                .create_folder(part.to_string(), cursor)
                .await
                .with_context(|| format!("creating folder: {part}"))?,
        });
    }

    println!("Created: {path}");
    session.logout();
    Ok(())
}

// ── `zkv put` ─────────────────────────────────────────────────────────────────

async fn cmd_put(config: &ZkvConfig, files: &[PathBuf], to: Option<&str>) -> Result<()> {
    if files.is_empty() {
        anyhow::bail!("no files given");
    }
    let (mut session, handle) = unlock(config).await?;
    let parent = resolve_folder(&handle.snapshot(), to.unwrap_or(""))?;

    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("not a file path: {}", path.display()))?;
        uploads.push(UploadFile {
            name,
            mime_type: guess_mime(path).to_string(),
            data: data.into(),
        });
    }

    let queue = UploadQueue::new(handle.clone(), config.transfer.clone());
    let mut rx = queue.subscribe();
    let ids = queue.enqueue(uploads, parent);

    let multi = MultiProgress::new();
    let mut bars: HashMap<Uuid, ProgressBar> = HashMap::new();
    for (id, path) in ids.iter().zip(files) {
        let pb = multi.add(make_progress_bar(0, "put"));
        pb.set_message(path.display().to_string());
        bars.insert(*id, pb);
    }

    let mut failed = 0usize;
    let mut remaining = ids.len();
    while remaining > 0 {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => anyhow::bail!("transfer engine stopped"),
        };
        match event {
            TransferEvent::Progress {
                item_id,
                bytes_done,
                total_bytes,
                speed_bps,
                ..
            } => {
                if let Some(pb) = bars.get(&item_id) {
                    pb.set_length(total_bytes);
                    pb.set_position(bytes_done);
                    pb.set_message(format!("{}/s", fmt_bytes(speed_bps)));
                }
            }
            TransferEvent::Completed { item_id, .. } => {
                if let Some(pb) = bars.get(&item_id) {
                    pb.finish_with_message("done".to_string());
                }
                remaining -= 1;
            }
            TransferEvent::Failed { item_id, error } => {
                if let Some(pb) = bars.get(&item_id) {
                    pb.abandon_with_message(format!("failed: {error}"));
                }
                failed += 1;
                remaining -= 1;
            }
            TransferEvent::Cancelled { item_id } => {
                if let Some(pb) = bars.get(&item_id) {
                    pb.abandon_with_message("cancelled".to_string());
                }
                remaining -= 1;
            }
        }
    }

    session.logout();
    if failed > 0 {
        anyhow::bail!("{failed} upload(s) failed");
    }
    Ok(())
}

// ── `zkv get` ─────────────────────────────────────────────────────────────────

async fn cmd_get(config: &ZkvConfig, remote: &str, local: Option<&Path>) -> Result<()> {
    let (mut session, handle) = unlock(config).await?;
    let entry = resolve_entry(&handle.snapshot(), remote)?;
    if entry.is_folder() {
        anyhow::bail!("not a file: {remote}");
    }

    let pb = make_progress_bar(0, "get");
    pb.set_message(entry.name.clone());
    let pb_clone = pb.clone();
    let progress: zkv_transfer::ProgressFn = Box::new(move |p: DownloadProgress| {
        pb_clone.set_length(u64::from(p.total_chunks));
        pb_clone.set_position(u64::from(p.chunks_done));
        let phase = match p.status {
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Decrypting => "decrypting",
            DownloadStatus::Done => "done",
            DownloadStatus::Failed => "failed",
        };
        pb_clone.set_message(phase.to_string());
    });

    let result = download_file(&handle, entry.id, Some(progress))
        .await
        .with_context(|| format!("downloading {remote}"))?;
    pb.finish_with_message("done".to_string());

    let local_path = local
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(&result.name));
    tokio::fs::write(&local_path, &result.bytes)
        .await
        .with_context(|| format!("writing: {}", local_path.display()))?;

    println!();
    println!("Downloaded:");
    println!("  local: {}", local_path.display());
    println!("  bytes: {}", fmt_bytes(result.bytes.len() as u64));
    session.logout();
    Ok(())
}

// ── `zkv rm` ──────────────────────────────────────────────────────────────────

async fn cmd_rm(config: &ZkvConfig, path: &str) -> Result<()> {
    let (mut session, handle) = unlock(config).await?;
    let entry = resolve_entry(&handle.snapshot(), path)?;

    let removed = handle
        .remove_entries(vec![entry.id])
        .await
        .with_context(|| format!("removing {path}"))?;

    println!("Removed: {path} ({} file(s))", removed.len());
    session.logout();
    Ok(())
}

// ── `zkv status` ──────────────────────────────────────────────────────────────

async fn cmd_status(config: &ZkvConfig) -> Result<()> {
    let (mut session, handle) = unlock(config).await?;
    let row = handle
        .store()
        .fetch_vault(&handle.vault_id)
        .await
        .context("fetching vault row")?;
    let manifest = handle.snapshot();

    println!("Vault {}", handle.vault_id);
    println!("  entries: {}", manifest.len());
    println!(
        "  storage: {} / {}",
        fmt_bytes(row.storage_used),
        fmt_bytes(row.storage_limit)
    );
    match row.burn_at {
        Some(at) => {
            let now = zkv_core::types::unix_now();
            println!("  burns:   in {}", fmt_duration(at.saturating_sub(now)));
        }
        None => println!("  burns:   never"),
    }
    session.logout();
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("txt") | Some("md") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

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
        format!("{bytes} B")
    }
}

fn fmt_duration(secs: u64) -> String {
    if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
