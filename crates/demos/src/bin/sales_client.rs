use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ss_core::AggregateKind;
use ss_runtime::init_tracing;
use ss_service::{SalesClient, ServiceConfig};
use tracing::info;

/// Sales series client.
#[derive(Parser)]
#[command(name = "sales_client")]
#[command(about = "Talks to a sales_server", long_about = None)]
struct Cli {
    /// JSON configuration shared with the server; supplies the port and
    /// the request timeout when the flags below are absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address [default: 127.0.0.1 on the configured port].
    #[arg(short, long)]
    addr: Option<String>,

    #[arg(short, long)]
    user: String,

    #[arg(short, long)]
    password: String,

    /// Register the account before logging in.
    #[arg(long)]
    register: bool,

    /// Per-request timeout in milliseconds (notification waits are not
    /// bounded). A request that times out ends the session.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Quantity,
    Volume,
    Average,
    Max,
}

impl From<Kind> for AggregateKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Quantity => AggregateKind::Quantity,
            Kind::Volume => AggregateKind::Volume,
            Kind::Average => AggregateKind::Average,
            Kind::Max => AggregateKind::Max,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record a sale on the current day.
    Add {
        product: String,
        quantity: i32,
        price: f64,
    },

    /// Aggregate a product over the last closed days.
    Aggregate {
        #[arg(value_enum)]
        kind: Kind,
        product: String,
        #[arg(short, long, default_value = "1")]
        days: i32,
    },

    /// Close the current day.
    NewDay,

    /// List the sales of some products on a closed day.
    Filter {
        /// How many days before the current one.
        days_back: i32,
        #[arg(required = true)]
        products: Vec<String>,
    },

    /// Wait until both products have sold today.
    Simultaneous { first: String, second: String },

    /// Wait until a product sells `n` times in a row.
    Consecutive { product: String, n: i32 },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => ServiceConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    let addr = cli
        .addr
        .unwrap_or_else(|| format!("127.0.0.1:{}", cfg.port));
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .or_else(|| cfg.request_timeout());

    let client = SalesClient::connect(&addr)
        .with_context(|| format!("connecting to {addr}"))?
        .with_timeout(timeout);
    if cli.register && !client.register(&cli.user, &cli.password)? {
        info!(user = %cli.user, "account already exists");
    }
    if !client.login(&cli.user, &cli.password)? {
        bail!("login failed for {}", cli.user);
    }

    match cli.command {
        Commands::Add {
            product,
            quantity,
            price,
        } => println!("{}", client.add_event(&product, quantity, price)?),
        Commands::Aggregate {
            kind,
            product,
            days,
        } => println!("{}", client.aggregate(kind.into(), &product, days)?),
        Commands::NewDay => println!("{}", client.new_day()?),
        Commands::Filter {
            days_back,
            products,
        } => {
            let products: Vec<&str> = products.iter().map(String::as_str).collect();
            for event in client.filter_events(days_back, &products)? {
                println!(
                    "{} - {} x {:.2} = {:.2} ({})",
                    event.product(),
                    event.quantity(),
                    event.unit_price(),
                    event.total_value(),
                    event.timestamp().date()
                );
            }
        }
        Commands::Simultaneous { first, second } => {
            println!("{}", client.wait_simultaneous(&first, &second)?)
        }
        Commands::Consecutive { product, n } => match client.wait_consecutive(&product, n)? {
            Some(product) => println!("{product}"),
            None => println!("day ended first"),
        },
    }

    client.close()?;
    Ok(())
}
