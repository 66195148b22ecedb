use clap::{Parser, Subcommand};
use rcu_rs::{
    init_logger, load_document, log_error, log_info, LinkConfig, ParamRegistry, RcuClient,
    RcuError, RcuLinkHandle, SessionConfig, ValueKey, DEFAULT_REGISTRY,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rcu-cli")]
#[command(about = "RCU emulator for heat-pump serial buses")]
struct Cli {
    /// Serial port device
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Parameter configuration document (JSON); built-in catalog when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pump profile name inside the configuration document
    #[arg(long, default_value = "fighter-360p")]
    pump: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the raw timestamped byte stream for offline analysis
    Capture {
        /// Capture duration in seconds
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
    /// Run one read pass and print the collected parameter table
    ReadOnce {
        /// Give up after this many seconds and report partial data
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,
        /// Indices to wait for (hex or decimal); every registry index when omitted
        #[arg(short, long)]
        expect: Vec<String>,
    },
    /// Monitor the bus indefinitely, printing each decoded parameter
    Monitor,
    /// Queue a parameter write for the next poll
    Write {
        /// Parameter index (hex or decimal)
        index: String,
        /// Raw engineering value to write
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },
}

// Exit codes: 0 success, 1 transport failure, 2 collection timeout with
// partial data, 3 configuration error.
#[tokio::main]
async fn main() {
    init_logger();
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let (registry, session_config) = match load_profile(&cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            log_error(&format!("configuration error: {err}"));
            return 3;
        }
    };

    let link = match RcuLinkHandle::open(&cli.port, LinkConfig::default()).await {
        Ok(link) => link,
        Err(err) => {
            log_error(&format!("cannot open {}: {err}", cli.port));
            return 1;
        }
    };

    match cli.command {
        Commands::Capture { duration } => {
            let mut link = link;
            log_info(&format!("capturing bus traffic for {duration}s"));
            match link.capture(Duration::from_secs(duration)).await {
                Ok(captured) => {
                    for entry in &captured {
                        println!("{:10.4}s  {:02X}", entry.offset.as_secs_f64(), entry.byte);
                    }
                    log_info(&format!("captured {} bytes", captured.len()));
                    0
                }
                Err(err) => {
                    log_error(&format!("capture failed: {err}"));
                    1
                }
            }
        }

        Commands::ReadOnce { timeout, expect } => {
            let expected = match parse_expected(&expect, &registry) {
                Ok(expected) => expected,
                Err(err) => {
                    log_error(&format!("configuration error: {err}"));
                    return 3;
                }
            };
            let client = RcuClient::attach(link, Arc::clone(&registry), session_config);
            let outcome = client
                .run_once(&expected, Duration::from_secs(timeout))
                .await;
            let code = match outcome {
                Ok(pass) => {
                    print_table(&pass.values, &registry);
                    if pass.partial {
                        log_error("collection timed out; table is partial");
                        2
                    } else {
                        0
                    }
                }
                Err(err) => {
                    log_error(&format!("read pass failed: {err}"));
                    1
                }
            };
            client.shutdown().await;
            code
        }

        Commands::Monitor => {
            let names = Arc::clone(&registry);
            let client = RcuClient::attach_with_callback(
                link,
                Arc::clone(&registry),
                session_config,
                Some(Box::new(move |key, value| {
                    println!("{} = {value}", describe_key(key, &names));
                })),
            );
            let err = client.run_forever().await.unwrap_err();
            log_error(&format!("monitoring stopped: {err}"));
            client.shutdown().await;
            1
        }

        Commands::Write { index, value } => {
            let index = match parse_index(&index) {
                Ok(index) => index,
                Err(err) => {
                    log_error(&format!("configuration error: {err}"));
                    return 3;
                }
            };
            let client = RcuClient::attach(link, Arc::clone(&registry), session_config);
            let code = match client.request_write(index, value) {
                Ok(ticket) => match ticket.wait().await {
                    Ok(()) => {
                        log_info(&format!("write accepted: [{index:02X}] = {value}"));
                        0
                    }
                    Err(err) => {
                        log_error(&format!("write failed: {err}"));
                        1
                    }
                },
                Err(err) => {
                    log_error(&format!("write rejected: {err}"));
                    3
                }
            };
            client.shutdown().await;
            code
        }
    }
}

fn load_profile(cli: &Cli) -> Result<(Arc<ParamRegistry>, SessionConfig), RcuError> {
    match &cli.config {
        Some(path) => {
            let document = load_document(path)?;
            let profile = document.profile(&cli.pump)?;
            Ok((Arc::new(profile.registry()?), profile.session_config()))
        }
        None => Ok((DEFAULT_REGISTRY.clone(), SessionConfig::default())),
    }
}

fn parse_expected(expect: &[String], registry: &ParamRegistry) -> Result<Vec<u8>, RcuError> {
    if expect.is_empty() {
        return Ok(registry.indices());
    }
    expect.iter().map(|s| parse_index(s)).collect()
}

fn parse_index(text: &str) -> Result<u8, RcuError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| RcuError::Config(format!("'{text}' is not a parameter index")))
}

fn print_table(
    values: &std::collections::BTreeMap<ValueKey, rcu_rs::StoredValue>,
    registry: &ParamRegistry,
) {
    for (key, stored) in values {
        let warning = stored
            .warning
            .as_deref()
            .map(|w| format!("  ({w})"))
            .unwrap_or_default();
        println!("{:.<44} {}{warning}", describe_key(key, registry), stored.value);
    }
}

fn describe_key(key: &ValueKey, registry: &ParamRegistry) -> String {
    match key {
        ValueKey::Param(index) => {
            let name = registry
                .definition(*index)
                .map(|d| d.name.as_str())
                .unwrap_or("?");
            format!("[{index:02X}] {name}")
        }
        ValueKey::Bitfield(index, field) => format!("[{index:02X}] {field}"),
    }
}
