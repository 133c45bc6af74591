mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tandem_agent::{RunOutcome, Runner, Session, SessionManager, Workflows};
use tandem_core::config::{AppConfig, StoreConfig};
use tandem_core::event::EventBus;
use tandem_core::order::Address;
use tandem_core::traits::{Capabilities, Catalog, OrderStore};
use tandem_core::types::{Payload, RunEvent};
use tandem_tools::{keys, StaticCatalog, StaticInventory, StaticRates, ToolRegistry};

#[derive(Parser)]
#[command(name = "tandem", version, about = "Order fulfillment workflows built from composable steps")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tandem.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the product catalog
    Products,
    /// List the registered tools
    Tools,
    /// Search the catalog
    Search {
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Add products to an order, opening a new order unless --order is given
    Cart {
        #[arg(required = true)]
        products: Vec<String>,
        #[arg(long)]
        order: Option<String>,
    },
    /// Set the shipping address of an order and price it
    Checkout {
        order: String,
        #[command(flatten)]
        address: AddressArgs,
        /// standard, express or international
        #[arg(long)]
        shipping_type: Option<String>,
    },
    /// Approve a priced order
    Approve { order: String },
    /// Move a placed order to the next fulfillment stage
    Advance { order: String },
    /// List stored orders
    Orders,
    /// Cart, checkout and approve in one session
    Demo {
        /// Products to buy
        #[arg(default_values_t = vec!["P001".to_string()])]
        products: Vec<String>,
        /// Two-letter state code of the shipping address
        #[arg(long, default_value = "CA")]
        state: String,
    },
    /// Show current configuration
    Config,
    /// Run configuration health checks
    Doctor,
}

impl Commands {
    /// Commands that refer to orders made by an earlier invocation.
    fn needs_persistent_store(&self) -> bool {
        matches!(
            self,
            Commands::Cart { .. }
                | Commands::Checkout { .. }
                | Commands::Approve { .. }
                | Commands::Advance { .. }
                | Commands::Orders
        )
    }
}

#[derive(clap::Args)]
struct AddressArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    address_1: String,
    #[arg(long)]
    address_2: Option<String>,
    #[arg(long)]
    city: String,
    #[arg(long)]
    state: String,
    #[arg(long)]
    postal_code: String,
}

impl From<AddressArgs> for Address {
    fn from(a: AddressArgs) -> Self {
        Address {
            name: a.name,
            address_1: a.address_1,
            address_2: a.address_2,
            city: a.city,
            state: a.state,
            postal_code: a.postal_code,
        }
    }
}

/// Everything a command needs, wired from config.
struct Shop {
    config: AppConfig,
    tools: ToolRegistry,
    catalog: Arc<StaticCatalog>,
    orders: Arc<dyn OrderStore>,
    runner: Runner,
    sessions: SessionManager,
}

impl Shop {
    fn connect(config: AppConfig) -> anyhow::Result<Self> {
        let catalog = Arc::new(StaticCatalog::builtin());
        let orders = tandem_store::open_store(&config.store)?;

        let mut capabilities = Capabilities::new()
            .with_catalog(catalog.clone())
            .with_rates(Arc::new(StaticRates::builtin()))
            .with_inventory(Arc::new(StaticInventory::builtin()))
            .with_orders(orders.clone());
        if let Some(model) = &config.model {
            capabilities = capabilities.with_inference(tandem_llm::create_client(model)?);
            info!(provider = %model.provider, model = %model.model_id, "Inference configured");
        }

        let tools = ToolRegistry::with_builtins(&config.shop).with_timeout(config.engine.tool_timeout_secs);
        let runner = Runner::new(capabilities)
            .with_event_bus(Arc::new(EventBus::default()))
            .with_event_buffer(config.engine.event_buffer);

        Ok(Self {
            config,
            tools,
            catalog,
            orders,
            runner,
            sessions: SessionManager::new(),
        })
    }

    /// Run a named workflow, echoing its events to stderr.
    async fn run(&self, workflow: &str, session: &Session, input: impl Into<Payload>) -> anyhow::Result<RunOutcome> {
        let step = Workflows::new(&self.tools, &self.config)
            .by_name(workflow)
            .ok_or_else(|| anyhow!("unknown workflow: {}", workflow))??;

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let printer = spawn_printer(self.runner.event_bus());
        let outcome = self.runner.run_with_cancel(&step, session, input, cancel).await;
        interrupt.abort();
        printer.await.ok();

        match &outcome.failure {
            None => Ok(outcome),
            Some(failure) => Err(anyhow!("{} ({})", failure.origin().message, failure.kind)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tandem=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Doctor => {
            println!("Tandem Doctor");
            println!("=============");
            doctor::run_doctor(&config);
            return Ok(());
        }
        _ => {}
    }

    check_store(&cli.command, &config)?;
    let shop = Shop::connect(config)?;

    match cli.command {
        Commands::Products => {
            for p in shop.catalog.list_products().await? {
                println!("{}  {:<22} ${:>7.2}  {}", p.id, p.name, p.price, p.description);
            }
        }
        Commands::Tools => {
            for def in shop.tools.definitions() {
                println!("{:<24} {}", def.name, def.description);
            }
        }
        Commands::Search { query } => {
            let session = shop.sessions.start();
            let outcome = shop.run("search", &session, query.join(" ")).await?;
            print_payload(outcome.last_payload());
        }
        Commands::Cart { products, order } => {
            let session = match order {
                Some(id) => shop
                    .sessions
                    .start_with([(keys::ORDER_ID.to_string(), serde_json::json!(id))].into()),
                None => shop.sessions.start(),
            };
            for product in &products {
                shop.run("cart", &session, product.as_str()).await?;
            }
            let order_id: String = session.state.require(keys::ORDER_ID)?;
            println!("{}", order_id);
        }
        Commands::Checkout {
            order,
            address,
            shipping_type,
        } => {
            let session = shop.sessions.start();
            let input = serde_json::json!({
                "order_id": order,
                "address": Address::from(address),
                "shipping_type": shipping_type,
            });
            let outcome = shop.run("fulfillment", &session, input).await?;
            print_payload(outcome.last_payload());
        }
        Commands::Approve { order } => {
            let session = shop.sessions.start();
            let outcome = shop.run("approve", &session, order.as_str()).await?;
            print_payload(outcome.last_payload());
        }
        Commands::Advance { order } => {
            let session = shop.sessions.start();
            let outcome = shop.run("advance", &session, order.as_str()).await?;
            print_payload(outcome.last_payload());
        }
        Commands::Orders => {
            for o in shop.orders.list_orders().await? {
                let total = o
                    .total_cost
                    .map(|t| format!("${:.2}", t))
                    .unwrap_or_else(|| "-".into());
                println!("{}  {:<9} {:>10}  {}", o.order_id, o.status.as_str(), total, o.cart.join(", "));
            }
        }
        Commands::Demo { products, state } => run_demo(&shop, &products, &state).await?,
        Commands::Config | Commands::Doctor => {}
    }

    Ok(())
}

async fn run_demo(shop: &Shop, products: &[String], state: &str) -> anyhow::Result<()> {
    let session = shop.sessions.start();
    info!(session_id = %session.id, "Demo session started");

    for product in products {
        shop.run("cart", &session, product.as_str()).await?;
    }

    let address = Address {
        name: "John Doe".into(),
        address_1: "123 Main St".into(),
        address_2: None,
        city: "Anytown".into(),
        state: state.to_string(),
        postal_code: "90210".into(),
    };
    let outcome = shop
        .run("fulfillment", &session, serde_json::json!({ "address": address }))
        .await?;
    print_payload(outcome.last_payload());

    let outcome = shop.run("approve", &session, "").await?;
    print_payload(outcome.last_payload());

    shop.sessions.end(&session.id);
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return AppConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let config = AppConfig {
        store: StoreConfig::sqlite(),
        ..AppConfig::default()
    };
    warn!(path = %path.display(), store = %config.store.path, "No config file found, using defaults");
    Ok(config)
}

fn check_store(command: &Commands, config: &AppConfig) -> anyhow::Result<()> {
    if command.needs_persistent_store() && !config.store.backend.is_persistent() {
        bail!(
            "orders in the memory store are gone when this command exits; \
             set backend = \"sqlite\" under [store] in the config file"
        );
    }
    Ok(())
}

fn spawn_printer(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(RunEvent::RunStarted { step, .. }) => eprintln!("[run: {}]", step),
                Ok(RunEvent::Step(event)) => {
                    let label = match event.branch() {
                        Some(branch) => format!("{} @ {}", event.author(), branch),
                        None => event.author().to_string(),
                    };
                    eprintln!("[{}] {}", label, truncate(&event.payload().render(), 200));
                }
                Ok(RunEvent::RunCompleted { events, .. }) => {
                    eprintln!("[done: {} events]", events);
                    break;
                }
                Ok(RunEvent::RunFailed { failure, .. }) => {
                    eprintln!("[failed] {}", failure);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_payload(payload: Option<&Payload>) {
    match payload {
        Some(Payload::Text(text)) => println!("{}", text),
        Some(Payload::Data(value)) => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
        }
        None => {}
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
