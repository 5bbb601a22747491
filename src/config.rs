//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const DEFAULT_AUTH_USER: &str = "matterbox";
pub const DEFAULT_AUTH_PASS: &str = "matterbox";
pub const DEFAULT_TRASH_RETENTION_DAYS: u32 = 7;
pub const TRASH_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
pub const SCAN_SWEEP_INTERVAL_SECS: u64 = 6 * 60 * 60;
pub const WEBDAV_PREFIX: &str = "/dav";
/// quota-available-bytes sentinel for unlimited spaces.
pub const UNLIMITED_QUOTA_BYTES: i64 = 100 * 1024 * 1024 * 1024;
pub const PAGE_HANDLE_SIZE: i64 = 1000;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "matterbox", version, about = "Matterbox storage server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "MATTERBOX_STORAGE_DIR",
        default_value = ".matterbox/storage",
        help = "Storage directory for space trees"
    )]
    pub storage_dir: String,
    #[arg(
        long,
        env = "MATTERBOX_DB_PATH",
        default_value = ".matterbox/matterbox.db",
        help = "SQLite database path"
    )]
    pub db_path: String,
    #[arg(
        long,
        env = "MATTERBOX_AUTH_USER",
        default_value = DEFAULT_AUTH_USER,
        help = "Auth username for API/WebDAV"
    )]
    pub auth_user: String,
    #[arg(
        long,
        env = "MATTERBOX_AUTH_PASS",
        default_value = DEFAULT_AUTH_PASS,
        help = "Auth password for API/WebDAV"
    )]
    pub auth_pass: String,
    #[arg(
        short = 'b',
        long,
        env = "MATTERBOX_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "MATTERBOX_HTTP_PORT",
        default_value_t = 6010,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        long,
        env = "MATTERBOX_TRASH_RETENTION_DAYS",
        default_value_t = DEFAULT_TRASH_RETENTION_DAYS,
        help = "Days a soft-deleted matter stays in the trash"
    )]
    pub trash_retention_days: u32,
    #[arg(
        long,
        env = "MATTERBOX_SCAN_ENABLED",
        default_value_t = true,
        help = "Enable the periodic disk reconciliation sweep"
    )]
    pub scan_enabled: bool,
    #[arg(
        long,
        env = "MATTERBOX_SPACE_SIZE_LIMIT",
        default_value_t = -1,
        help = "Per-file size limit for the bootstrap space (-1 unlimited)"
    )]
    pub space_size_limit: i64,
    #[arg(
        long,
        env = "MATTERBOX_SPACE_TOTAL_LIMIT",
        default_value_t = -1,
        help = "Total size limit for the bootstrap space (-1 unlimited)"
    )]
    pub space_total_limit: i64,
}
