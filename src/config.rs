//! Configuration management

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub db_path: PathBuf,

    /// Admin API bind address
    pub admin_addr: SocketAddr,

    /// Seeded admin account email
    pub admin_email: String,

    /// Seeded admin account password
    pub admin_password: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let db_path = std::env::var("BOTFLEET_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("botfleet.db"));

        let host = std::env::var("BOTFLEET_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = std::env::var("BOTFLEET_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let admin_addr: SocketAddr = format!("{}:{}", host, port).parse()?;

        let admin_email =
            std::env::var("BOTFLEET_ADMIN_EMAIL").unwrap_or_else(|_| "admin@admin.com".to_string());
        let admin_password =
            std::env::var("BOTFLEET_ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".to_string());

        Ok(Self {
            db_path,
            admin_addr,
            admin_email,
            admin_password,
        })
    }
}
