//! Beevault CLI
//!
//!   beevault create-wallet -f <file> [-n <name>] [-m <words>]  → new single-key wallet
//!   beevault show -f <file> [-n <name>] [-v]                 → config summary
//!   beevault balance -f <file> [-n <name>]                   → balances in sats and BTC
//!   beevault list-addresses -f <file> [-n <name>]            → derived addresses
//!   beevault spend -f <file> -n <name> -r <addr> -a <sats>   → build, sign, broadcast
//!
//! Network: mainnet unless `-t/--testnet` or `--network test`.
//! Password: `BEEVAULT_PASSWORD` or an interactive prompt.
//!
//! Output format:
//!   --json     Output raw JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use anyhow::{anyhow, bail, Context, Result};
use beevault::config::{Config, ConfigStore, Wallet};
use beevault::keys::scripts::{derive_address, DerivedAddress};
use beevault::keys::generate_mnemonic;
use beevault::logging::{init_logging, LogFormat};
use beevault::settings::{load_dotenv, vars, EngineSettings};
use beevault::signing::local::software_signers;
use beevault::tx::psbt_to_base64;
use beevault::{
    install_signal_handlers, until_cancelled, AccountData, AccountRefresh, BroadcastOutcome, Engine, FeeSpec, Network,
};
use bitcoin::Amount;
use serde_json::{json, Value};
use std::env;
use std::io::{self, IsTerminal, Write};
use tracing::debug;

fn main() {
    init_logging(LogFormat::from_env());
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("beevault {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("create-wallet") => cmd_create_wallet(&opts),
        Some("show") => cmd_show(&opts),
        Some("balance") => block_on(cmd_balance(&opts)),
        Some("list-addresses") | Some("addresses") => block_on(cmd_addresses(&opts)),
        Some("spend") => block_on(cmd_spend(&opts)),
        Some(cmd) => Err(anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = !opts.json && (opts.pretty || io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{e:#}")}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let out = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    out.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    file: Option<String>,
    network: Option<String>,
    wallet_name: Option<String>,
    mnemonic: Option<String>,
    electrum_url: Option<String>,
    // Spend options
    recipient: Option<String>,
    amount: Option<String>,
    fee: Option<String>,
    fee_rate: Option<String>,
    yes: bool,
    verbose: bool,
    // Output options
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        load_dotenv(".env");

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let mut value = || {
                i += 1;
                args.get(i).cloned()
            };
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--testnet" | "-t" => opts.network = Some("test".into()),
                "--yes" | "-y" => opts.yes = true,
                "--verbose" | "-v" => opts.verbose = true,
                "--network" => opts.network = value(),
                "--file" | "--filename" | "-f" => opts.file = value(),
                "--wallet-name" | "--walletname" | "-n" => opts.wallet_name = value(),
                "--mnemonic" | "-m" => opts.mnemonic = value(),
                "--electrum" | "-e" => opts.electrum_url = value(),
                "--recipient" | "-r" => opts.recipient = value(),
                "--amount" | "-a" => opts.amount = value(),
                "--fee" => opts.fee = value(),
                "--fee-rate" => opts.fee_rate = value(),
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }

        // Environment has lower priority than CLI args
        if opts.file.is_none() {
            opts.file = env::var(vars::CONFIG).ok().filter(|s| !s.is_empty());
        }
        if opts.network.is_none() {
            opts.network = env::var(vars::NETWORK).ok().filter(|s| !s.is_empty());
        }
        if opts.electrum_url.is_none() {
            opts.electrum_url = env::var(vars::ELECTRUM).ok().filter(|s| !s.is_empty());
        }

        opts
    }

    fn settings(&self) -> Result<EngineSettings> {
        let mut settings = EngineSettings::from_env();
        if let Some(raw) = self.network.as_deref() {
            let network = Network::from_str(raw).ok_or_else(|| anyhow!("Invalid network: {} (use main or test)", raw))?;
            settings = settings.with_network(network);
        }
        if let Some(file) = &self.file {
            settings = settings.with_config_path(file);
        }
        if let Some(url) = &self.electrum_url {
            settings = settings.with_electrum(url);
        }
        debug!(network = %settings.network, config = %settings.config_path.display(), "Settings resolved");
        Ok(settings)
    }
}

fn print_usage() {
    println!(
        r#"beevault - multisig Bitcoin wallet

USAGE:
    beevault <command> [options]

COMMANDS:
    create-wallet           Create a single-key wallet (new or from --mnemonic)
    show                    Show the config file
    balance                 Show wallet balances
    list-addresses          Show wallet addresses (alias: addresses)
    spend                   Build, sign and broadcast a transaction

OPTIONS:
    --file, -f <path>       Config file (env: BEEVAULT_CONFIG, default: beevault-config.json)
    --testnet, -t           Use testnet
    --network <net>         Network: main|test (env: BEEVAULT_NETWORK)
    --wallet-name, -n <n>   Select a wallet or vault by name
    --electrum, -e <url>    Electrum server (env: BEEVAULT_ELECTRUM)
    --verbose, -v           show: print the full config document

CREATE-WALLET OPTIONS:
    --mnemonic, -m <words>  Restore from a BIP39 mnemonic instead of generating one

SPEND OPTIONS:
    --recipient, -r <addr>  Destination address
    --amount, -a <sats>     Amount in satoshis
    --fee <sats>            Fixed fee in satoshis
    --fee-rate <sat/vB>     Fee rate (default: normal estimate)
    --yes, -y               Broadcast without asking

OUTPUT OPTIONS:
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

The password is read from BEEVAULT_PASSWORD, or prompted for.

EXAMPLES:
    beevault create-wallet -f vault.json -t -n spending
    beevault balance -f vault.json -t
    beevault spend -f vault.json -t -n spending -r tb1q... -a 50000 --fee-rate 2
"#
    );
}

/// Run an async command; SIGINT/SIGTERM abandons it before any further state change.
fn block_on(command: impl std::future::Future<Output = Result<Value>>) -> Result<Value> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    rt.block_on(async {
        let cancel = install_signal_handlers();
        until_cancelled(&cancel, command).await.unwrap_or_else(|| Err(anyhow!("interrupted")))
    })
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Read from stdin failed")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn read_password(label: &str) -> Result<String> {
    rpassword::prompt_password(format!("{label}: ")).context("Password read failed")
}

fn password() -> Result<String> {
    match env::var(vars::PASSWORD) {
        Ok(pw) if !pw.is_empty() => Ok(pw),
        _ => read_password("Password"),
    }
}

fn password_with_confirmation() -> Result<(String, String)> {
    match env::var(vars::PASSWORD) {
        Ok(pw) if !pw.is_empty() => Ok((pw.clone(), pw)),
        _ => Ok((read_password("Password")?, read_password("Confirm password")?)),
    }
}

fn cmd_create_wallet(opts: &ParsedArgs) -> Result<Value> {
    let settings = opts.settings()?;
    let name = opts.wallet_name.clone().unwrap_or_else(|| "wallet".into());
    let (pw, confirmation) = password_with_confirmation()?;
    let mut store = ConfigStore::create(&settings.config_path, &pw, &confirmation)?;

    let generated = match &opts.mnemonic {
        Some(_) => None,
        None => Some(generate_mnemonic(24)?),
    };
    let phrase = opts.mnemonic.as_deref().or(generated.as_deref().map(String::as_str)).unwrap_or_default();
    let wallet = Wallet::from_mnemonic(&name, phrase, settings.network)?;
    let wallet = store.update(|c| c.add_wallet(wallet))?;
    let first = derive_address(wallet.address_type, &[wallet.key.account_key()], 1, 0, 0, settings.network)?;

    Ok(json!({
        "id": wallet.id,
        "name": wallet.name,
        "network": settings.network,
        "addressType": wallet.address_type,
        "fingerprint": wallet.key.fingerprint().to_string(),
        "firstAddress": first.address.to_string(),
        "mnemonic": generated.as_deref().map(String::as_str),
        "file": store.path().display().to_string(),
    }))
}

fn cmd_show(opts: &ParsedArgs) -> Result<Value> {
    let settings = opts.settings()?;
    let store = ConfigStore::open(&settings.config_path, &password()?)?;
    let config: &Config = store.config();
    if opts.verbose {
        return Ok(serde_json::to_value(config)?);
    }
    let selected = |name: &str| opts.wallet_name.as_deref().map_or(true, |n| n == name);
    let accounts: Vec<Value> = config
        .accounts()
        .into_iter()
        .filter(|a| selected(a.name()))
        .map(|a| {
            json!({
                "name": a.name(),
                "network": a.network(),
                "addressType": a.address_type(),
                "quorum": a.quorum(),
                "signers": a.keys().iter().map(|k| json!({
                    "fingerprint": k.fingerprint().to_string(),
                    "kind": k.signer_kind(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(json!({
        "name": config.name,
        "version": config.version,
        "accounts": accounts,
    }))
}

/// Open the engine and refresh the selected accounts (all of them without `-n`).
async fn load_accounts(opts: &ParsedArgs) -> Result<Vec<AccountRefresh>> {
    let engine = Engine::open(opts.settings()?, &password()?).await?;
    Ok(engine.refresh_accounts(opts.wallet_name.as_deref()).await?)
}

/// One JSON entry per account; a failed account carries its error instead of data.
fn account_entries(refreshed: &[AccountRefresh], entry: impl Fn(&AccountData) -> Value) -> Vec<Value> {
    refreshed
        .iter()
        .map(|r| match &r.result {
            Ok(data) => entry(data),
            Err(e) => json!({"name": r.account.name(), "error": e}),
        })
        .collect()
}

async fn cmd_balance(opts: &ParsedArgs) -> Result<Value> {
    let refreshed = load_accounts(opts).await?;
    let balances = account_entries(&refreshed, |d| {
        json!({
            "name": d.name(),
            "balance": d.current_balance,
            "btc": Amount::from_sat(d.current_balance).to_btc(),
        })
    });
    Ok(json!({"balances": balances}))
}

async fn cmd_addresses(opts: &ParsedArgs) -> Result<Value> {
    let refreshed = load_accounts(opts).await?;
    let addrs = |list: &[DerivedAddress]| -> Vec<String> { list.iter().map(|a| a.address.to_string()).collect() };
    let accounts = account_entries(&refreshed, |d| {
        json!({
            "name": d.name(),
            "addresses": addrs(&d.addresses),
            "changeAddresses": addrs(&d.change_addresses),
            "unusedAddresses": addrs(&d.unused_addresses),
            "unusedChangeAddresses": addrs(&d.unused_change_addresses),
        })
    });
    Ok(json!({"accounts": accounts}))
}

async fn cmd_spend(opts: &ParsedArgs) -> Result<Value> {
    let name = opts.wallet_name.as_deref().ok_or_else(|| anyhow!("--wallet-name is required for spend"))?;
    let recipient = opts.recipient.as_deref().ok_or_else(|| anyhow!("--recipient is required for spend"))?;
    let amount: u64 = opts
        .amount
        .as_deref()
        .ok_or_else(|| anyhow!("--amount is required for spend"))?
        .parse()
        .map_err(|_| anyhow!("invalid amount: expected whole satoshis"))?;

    let engine = Engine::open(opts.settings()?, &password()?).await?;
    // Device keys, or too few stored keys for the quorum, fail before anything is built
    software_signers(&engine.account(Some(name)).await?)?;
    let fee = match (opts.fee.as_deref(), opts.fee_rate.as_deref()) {
        (Some(_), Some(_)) => bail!("use either --fee or --fee-rate, not both"),
        (Some(sats), None) => FeeSpec::Fixed(sats.parse().map_err(|_| anyhow!("invalid fee: {sats}"))?),
        (None, Some(rate)) => FeeSpec::Rate(rate.parse().map_err(|_| anyhow!("invalid fee rate: {rate}"))?),
        (None, None) => FeeSpec::Rate(engine.fee_rates().await?.normal),
    };

    let spend = engine.prepare_spend(Some(name), recipient, amount, fee).await?;
    let summary = json!({
        "wallet": name,
        "recipient": recipient,
        "amount": amount,
        "fee": spend.built.fee,
        "vsize": spend.built.vsize,
        "highFee": spend.built.high_fee,
        "psbt": psbt_to_base64(&spend.built.psbt),
    });

    engine.sign_software(&spend).await?;

    if !opts.yes && !confirm_broadcast(&summary)? {
        return Ok(json!({"transaction": summary, "broadcast": false}));
    }

    let tx = engine.finalize(&spend).await?;
    match engine.broadcast(&tx).await {
        BroadcastOutcome::Rejected { err_msg } => bail!("{err_msg}"),
        outcome => Ok(json!({"transaction": summary, "broadcast": outcome.to_json()})),
    }
}

fn confirm_broadcast(summary: &Value) -> Result<bool> {
    eprintln!("{}", render(summary, true));
    let answer = prompt("Are you sure you want to broadcast the transaction? y/[N]")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
