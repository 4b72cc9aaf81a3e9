use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use storage_rent::config::{
    Config, COST_PER_BYTE_ENV, DEFAULT_STATE_PATH, MIN_BALANCE_ENV, STATE_PATH_ENV,
};
use storage_rent::contract::{CallContext, ContractError, StorageContract};
use storage_rent::cost::DEFAULT_COST_PER_BYTE;
use storage_rent::ledger::StorageBalance;
use storage_rent::state::{StateError, StateFile};
use storage_rent::store::{DataKey, KeyedDataStore};
use storage_rent::types::{format_amount, parse_amount, AccountId, Balance, StorageUsage, U128};

//==================== CLI ====================//

/// Each invocation runs exactly one contract call against the state file and
/// saves the result only if the call succeeded.
#[derive(Parser)]
#[command(name = "storage-rent", version)]
#[command(about = "Storage-rent escrow ledger: deposits pay for the bytes an account stores")]
struct Cli {
    /// JSON state file holding the contract instance
    #[arg(long, global = true, env = STATE_PATH_ENV, default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,

    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create the state file and initialize the contract (only once)
    Init {
        #[arg(long)]
        owner: AccountId,
        /// Price of one byte, in minimal units or as "<x> NEAR"
        #[arg(long, env = COST_PER_BYTE_ENV, value_parser = parse_amount, default_value_t = DEFAULT_COST_PER_BYTE)]
        cost_per_byte: Balance,
        /// Smallest first deposit an account may make
        #[arg(long, env = MIN_BALANCE_ENV, value_parser = parse_amount, default_value = "0")]
        min_balance: Balance,
    },
    #[command(flatten)]
    Call(Call),
}

/// Calls against an initialized contract.
#[derive(Subcommand)]
enum Call {
    /// Attach funds to a storage escrow (the caller's unless --account is given)
    Deposit {
        #[arg(long)]
        caller: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
        #[arg(long)]
        account: Option<AccountId>,
    },
    /// Write the caller's primary payload
    SetData {
        #[arg(long)]
        caller: AccountId,
        /// Funds credited to the caller's escrow in the same call
        #[arg(long, value_parser = parse_amount, default_value = "0")]
        attach: Balance,
        string: String,
    },
    /// Write a payload under a caller-chosen id
    SetDataMap {
        #[arg(long)]
        caller: AccountId,
        #[arg(long, value_parser = parse_amount, default_value = "0")]
        attach: Balance,
        data_id: String,
        string: String,
    },
    /// Delete the caller's primary payload, or the one under --data-id
    RemoveData {
        #[arg(long)]
        caller: AccountId,
        #[arg(long)]
        data_id: Option<String>,
    },
    /// Print a stored payload
    GetData {
        account_id: AccountId,
        #[arg(long)]
        data_id: Option<String>,
    },
    /// Withdraw available escrow (everything available when --amount is omitted)
    Withdraw {
        #[arg(long)]
        caller: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Option<Balance>,
    },
    /// Refund the caller's whole escrow; --force deletes the caller's data first
    Unregister {
        #[arg(long)]
        caller: AccountId,
        #[arg(long)]
        force: bool,
    },
    /// Print { total, available } for an account
    Balance { account_id: AccountId },
    /// Print the storage balance bounds
    Bounds,
    /// Print the total number of stored bytes
    Usage,
    /// Print whether an account has a storage record
    Registered { account_id: AccountId },
    /// Hand the contract over to another owner (owner only)
    SetOwner {
        #[arg(long)]
        caller: AccountId,
        new_owner: AccountId,
    },
    /// Dump accounts, roots and configuration
    Inspect,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

//==================== views ====================//

#[derive(Serialize)]
struct AccountView {
    account_id: AccountId,
    bytes_used: StorageUsage,
    balance: StorageBalance,
    keys: Vec<DataKey>,
}

#[derive(Serialize)]
struct Inspection<'a> {
    owner_id: &'a AccountId,
    config: &'a Config,
    height: u64,
    total_storage_usage: StorageUsage,
    ledger_root: String,
    data_root: String,
    accounts: Vec<AccountView>,
}

fn inspect(contract: &StorageContract) -> Inspection<'_> {
    let gateway = contract.gateway();
    let ledger = gateway.ledger();
    let accounts = ledger
        .accounts()
        .map(|(account_id, record)| AccountView {
            account_id: account_id.clone(),
            bytes_used: record.bytes_used,
            balance: ledger.balance_of(account_id),
            keys: gateway.store().keys_of(account_id),
        })
        .collect();
    Inspection {
        owner_id: contract.owner_id(),
        config: contract.config(),
        height: ledger.height(),
        total_storage_usage: ledger.total_bytes(),
        ledger_root: hex::encode(ledger.accounts_root()),
        data_root: hex::encode(gateway.store().root()),
        accounts,
    }
}

fn json<T: Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn data_key(data_id: Option<String>) -> DataKey {
    data_id.map_or(DataKey::Primary, DataKey::Entry)
}

//==================== commands ====================//

/// Runs one call; returns what to print and whether the state changed.
fn execute(contract: &mut StorageContract, call: Call) -> Result<(String, bool), CliError> {
    let outcome = match call {
        Call::Deposit {
            caller,
            amount,
            account,
        } => {
            let ctx = CallContext::new(caller, amount);
            (contract.storage_deposit(&ctx, account)?, true)
        }
        Call::SetData {
            caller,
            attach,
            string,
        } => {
            let data = contract.set_data(&CallContext::new(caller, attach), string)?;
            (json(&data)?, true)
        }
        Call::SetDataMap {
            caller,
            attach,
            data_id,
            string,
        } => {
            let ctx = CallContext::new(caller, attach);
            let data = contract.set_data_map(&ctx, data_id, string)?;
            (json(&data)?, true)
        }
        Call::RemoveData { caller, data_id } => {
            let ctx = CallContext::caller(caller);
            let removed = match data_key(data_id) {
                DataKey::Primary => contract.remove_data(&ctx)?,
                DataKey::Entry(id) => contract.remove_data_map(&ctx, id)?,
            };
            let changed = removed.is_some();
            (json(&removed)?, changed)
        }
        Call::GetData {
            account_id,
            data_id,
        } => {
            let data = match data_key(data_id) {
                DataKey::Primary => contract.get_data(&account_id)?,
                DataKey::Entry(id) => contract.get_data_map(&account_id, id)?,
            };
            (json(&data)?, false)
        }
        Call::Withdraw { caller, amount } => {
            let balance = contract.storage_withdraw(&CallContext::caller(caller), amount.map(U128))?;
            (json(&balance)?, true)
        }
        Call::Unregister { caller, force } => {
            let before = contract.snapshot();
            let closed = contract.storage_unregister(&CallContext::caller(caller), Some(force))?;
            let changed = contract.snapshot() != before;
            (json(&closed)?, changed)
        }
        Call::Balance { account_id } => (json(&contract.storage_balance_of(&account_id))?, false),
        Call::Bounds => (json(&contract.storage_balance_bounds())?, false),
        Call::Usage => (json(&contract.total_storage_usage())?, false),
        Call::Registered { account_id } => (json(&contract.is_registered(&account_id))?, false),
        Call::SetOwner { caller, new_owner } => {
            contract.set_owner(&CallContext::caller(caller), new_owner.clone())?;
            (format!("owner is now {new_owner}"), true)
        }
        Call::Inspect => (json(&inspect(contract))?, false),
    };
    Ok(outcome)
}

fn run(cli: Cli) -> Result<(), CliError> {
    let state = StateFile::new(cli.state);
    match cli.command {
        Command::Init {
            owner,
            cost_per_byte,
            min_balance,
        } => {
            let contract = StorageContract::new(owner, Config::new(cost_per_byte, min_balance))?;
            state.init(&contract)?;
            println!(
                "initialized {} (owner {}, {} per byte)",
                state.path().display(),
                contract.owner_id(),
                format_amount(cost_per_byte)
            );
        }
        Command::Call(call) => {
            let mut contract = state.load()?;
            let (output, changed) = execute(&mut contract, call)?;
            if changed {
                state.save(&contract)?;
            }
            println!("{output}");
        }
    }
    Ok(())
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
