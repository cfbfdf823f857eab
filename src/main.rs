use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tillbook::config::{CliArgs, Command, Config, LoggingConfig};
use tillbook::engine::LedgerError;
use tillbook::service::AccountService;
use tillbook_core::{money::Money, storage::LedgerStore};
use tillbook_memory::MemoryStore;
use tillbook_sqlite::SqliteStore;

fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    let store: Arc<dyn LedgerStore> = match config.storage.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        "sqlite" => match SqliteStore::new(&config.storage.path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("error: failed to open database: {}", e);
                std::process::exit(1);
            }
        },
        other => {
            eprintln!("error: unknown storage backend '{}'", other);
            std::process::exit(1);
        }
    };

    tracing::debug!(backend = %config.storage.backend, "store opened");
    let service = AccountService::new(store, config.limits.amount_limits());

    match run(&service, &config, cli.command) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(service: &AccountService, config: &Config, command: Command) -> Result<String, LedgerError> {
    let limits = config.limits.amount_limits();
    let output = match command {
        Command::Open { email, name } => to_json(&service.open_account(&email, &name)?),
        Command::Credit { account, amount, key } => {
            let amount = Money::parse(&amount, &limits)?;
            to_json(&service.credit(account, amount.value(), &key)?)
        }
        Command::Debit { account, amount, key } => {
            let amount = Money::parse(&amount, &limits)?;
            to_json(&service.debit(account, amount.value(), &key)?)
        }
        Command::Account { id, email } => match (id, email) {
            (Some(id), _) => to_json(&service.account(id)?),
            (None, Some(email)) => to_json(&service.account_by_email(&email)?),
            (None, None) => {
                return Err(LedgerError::InvalidArgument(
                    "pass --id or --email".to_string(),
                ))
            }
        },
        Command::History { account } => to_json(&service.history(account)?),
    };
    Ok(output)
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap()
}
