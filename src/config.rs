use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use tillbook_core::money::AmountLimits;

#[derive(Parser, Debug)]
#[command(name = "tillbook", about = "Tillbook - idempotent monetary ledger")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "tillbook.toml")]
    pub config: String,

    /// SQLite database path (overrides config file)
    #[arg(short, long)]
    pub db: Option<String>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a new account
    Open { email: String, name: String },
    /// Credit an account
    Credit {
        account: Uuid,
        amount: String,
        #[arg(long)]
        key: String,
    },
    /// Debit an account
    Debit {
        account: Uuid,
        amount: String,
        #[arg(long)]
        key: String,
    },
    /// Show an account by id or email
    Account {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        email: Option<String>,
    },
    /// List an account's transactions, newest first
    History { account: Uuid },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// "memory" or "sqlite"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_min_amount")]
    pub min_amount: Decimal,

    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
        }
    }
}

impl LimitsConfig {
    pub fn amount_limits(&self) -> AmountLimits {
        AmountLimits {
            min: self.min_amount,
            max: self.max_amount,
        }
    }
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        backend: default_backend(),
        path: default_db_path(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> String {
    "tillbook.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_amount() -> Decimal {
    AmountLimits::default().min
}

fn default_max_amount() -> Decimal {
    AmountLimits::default().max
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: default_storage(),
            logging: default_logging(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(ref db) = cli.db {
            config.storage.backend = "sqlite".to_string();
            config.storage.path = db.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config
    }
}
