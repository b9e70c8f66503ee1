//! invoice-relay - utility portal invoice relay.
//!
//! Binary entry point: runs the HTTP server or performs one-off fetches from
//! the command line.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use invoice_relay::{Credentials, InvoiceRelay, RelayConfig, server};

/// Relay between a browser page and the utility provider's customer portal.
#[derive(Parser, Debug)]
#[command(name = "invoice-relay", version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API.
    Serve {
        /// Address to bind, overrides INVOICE_RELAY_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Solve the login captcha, log in and print the invoice history.
    Fetch {
        #[arg(long, env = "PORTAL_USERNAME")]
        username: String,
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
        /// Alias of the place of consumption.
        #[arg(long)]
        place: String,
    },
    /// Download one invoice document with a bearer token from `fetch`.
    Download {
        #[arg(long)]
        url: String,
        #[arg(long, env = "PORTAL_TOKEN", hide_env_values = true)]
        token: String,
        /// Output file. Defaults to the name announced by the portal.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("invoice-relay: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), Box<dyn Error>> {
    let mut config = RelayConfig::from_env()?;

    match command {
        Commands::Serve { bind } => {
            if let Some(addr) = bind {
                config.bind_addr = addr;
            }
            let addr = config.bind_addr;
            let relay = Arc::new(InvoiceRelay::new(config)?);
            server::serve(relay, addr).await?;
        }
        Commands::Fetch {
            username,
            password,
            place,
        } => {
            let relay = InvoiceRelay::new(config)?;
            let batch = relay
                .fetch_invoices(&Credentials::new(username, password, place))
                .await?;
            print_invoices(&batch);
        }
        Commands::Download { url, token, output } => {
            let relay = InvoiceRelay::new(config)?;
            let document = relay.download(&url, &token).await?;
            let path = output
                .or_else(|| document.file_name().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("invoice.pdf"));
            tokio::fs::write(&path, &document.bytes).await?;
            println!("saved {} bytes to {}", document.bytes.len(), path.display());
        }
    }

    Ok(())
}

fn print_invoices(batch: &invoice_relay::InvoiceBatch) {
    let rows = batch.rows();
    println!(
        "{:<16} {:<12} {:<12} {:>10} {:>10} {:<12} {:>10}",
        "number", "issued", "due", "total", "unpaid", "division", "usage"
    );
    for row in &rows {
        let cell = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<12} {:<12} {:>10} {:>10} {:<12} {:>10}",
            cell(&row.invoice_number),
            cell(&row.invoiced_at),
            cell(&row.due_date),
            cell(&row.total),
            cell(&row.unpaid),
            cell(&row.division),
            cell(&row.energy_consumption),
        );
    }
    println!("{} invoices", rows.len());
    println!("bearer token for downloads: {}", batch.token);
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("invoice_relay={log_level},tower_http={log_level},warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
