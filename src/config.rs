use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr};

pub const DEFAULT_PUBLIC_ID_LEN: usize = 8;
pub const DEFAULT_DELETE_ID_LEN: usize = 12;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const MIN_PUBLIC_ID_LEN: usize = 4;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub admin_password: String,
    pub public_id_len: usize,
    pub delete_id_len: usize,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Password-gated image hosting service")]
pub struct Args {
    /// Host to bind to (overrides IMGDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMGDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded images are stored (overrides IMGDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMGDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Shared upload/listing password (overrides IMGDROP_ADMIN_PASSWORD)
    #[arg(long)]
    pub admin_password: Option<String>,

    /// Length of public image identifiers (overrides IMGDROP_PUBLIC_ID_LEN)
    #[arg(long)]
    pub public_id_len: Option<usize>,

    /// Length of secret delete identifiers (overrides IMGDROP_DELETE_ID_LEN)
    #[arg(long)]
    pub delete_id_len: Option<usize>,

    /// Maximum accepted upload body in bytes (overrides IMGDROP_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Skip the startup sweep that removes files with no catalog entry
    #[arg(long)]
    pub skip_reconcile: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run flags.
    pub fn from_env_and_args() -> Result<(Self, Args)> {
        let args = Args::parse();

        let env_host = env::var("IMGDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("IMGDROP_PORT", 3000u16)?;
        let env_storage =
            env::var("IMGDROP_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = env::var("IMGDROP_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/imgdrop.db".into());
        let env_password = env::var("IMGDROP_ADMIN_PASSWORD").ok();
        let env_public_len = env_number("IMGDROP_PUBLIC_ID_LEN", DEFAULT_PUBLIC_ID_LEN)?;
        let env_delete_len = env_number("IMGDROP_DELETE_ID_LEN", DEFAULT_DELETE_ID_LEN)?;
        let env_max_upload = env_number("IMGDROP_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let cfg = Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            admin_password: args
                .admin_password
                .clone()
                .or(env_password)
                .unwrap_or_default(),
            public_id_len: args.public_id_len.unwrap_or(env_public_len),
            delete_id_len: args.delete_id_len.unwrap_or(env_delete_len),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };
        cfg.validate()?;

        Ok((cfg, args))
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin_password.is_empty() {
            bail!("an admin password is required (IMGDROP_ADMIN_PASSWORD or --admin-password)");
        }
        if self.public_id_len < MIN_PUBLIC_ID_LEN {
            bail!(
                "public id length {} is below the minimum of {}",
                self.public_id_len,
                MIN_PUBLIC_ID_LEN
            );
        }
        if self.delete_id_len <= self.public_id_len {
            bail!(
                "delete id length {} must be greater than public id length {}",
                self.delete_id_len,
                self.public_id_len
            );
        }
        if self.max_upload_bytes == 0 {
            bail!("max upload size must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Hand-written so the password never reaches the startup log.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("admin_password", &"<redacted>")
            .field("public_id_len", &self.public_id_len)
            .field("delete_id_len", &self.delete_id_len)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
