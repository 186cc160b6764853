use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// cryptoasset accounting and transaction-lifecycle service
pub struct TopLevel {
    #[argh(subcommand)]
    pub command: Command,

    /// path to the TOML config document; falls back to CRYPTOASSETS_CONFIG
    #[argh(option)]
    pub config: Option<PathBuf>,

    /// log level passed to the tracing subscriber when RUST_LOG is unset
    #[argh(option, default = "String::from(\"info\")")]
    pub log_level: String,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Command {
    InitializeDatabase(InitializeDatabase),
    HelperService(HelperService),
    ScanReceived(ScanReceived),
}

#[derive(FromArgs, PartialEq, Debug)]
/// run the schema migrations against the configured database
#[argh(subcommand, name = "initialize-database")]
pub struct InitializeDatabase {}

#[derive(FromArgs, PartialEq, Debug)]
/// run the long-lived service loop: broadcaster, confirmation poller, notifiers
#[argh(subcommand, name = "helper-service")]
pub struct HelperService {}

#[derive(FromArgs, PartialEq, Debug)]
/// run the receive-scanner once against backend history and exit
#[argh(subcommand, name = "scan-received")]
pub struct ScanReceived {}
