//! GIOPTest client
//!
//! Resolves `TestService` through the server's naming service and
//! exercises it over a single bidirectional connection:
//!
//! 1. registers a GIOPSmall callback living in a BIDIRECTIONAL adapter
//! 2. `sendBool(false, true)`
//! 3. `peek()`, during which the server calls `call("hello")` back
//! 4. `sendPoint` with a NamedPoint where a Point is declared
//!
//! Run with: cargo run --bin giop-client -- --host 127.0.0.1 --port 2809

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use giop_test::{
    GiopSmallServant, GiopTestClient, RecordingSmall, ValueTypes, TEST_SERVICE_NAME,
};
use orb::{Orb, PolicySet};

#[derive(Parser)]
#[command(name = "giop-client")]
#[command(about = "Bidirectional GIOP test client")]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "2809")]
    port: u16,

    /// Locator to resolve instead of corbaname::<host>:<port>#TestService
    #[arg(short, long)]
    locator: Option<String>,

    /// Log connection and request details
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let orb = Orb::builder().name("giop-client").build();
    let types = ValueTypes::new()?;
    types.register(&orb)?;

    let bidir = orb.create_adapter("bidir", PolicySet::bidirectional())?;
    let small = RecordingSmall::new();
    let small_id = bidir.activate(GiopSmallServant::new(small.clone()))?;
    let callback = bidir.reference(&small_id)?;

    let locator = args
        .locator
        .unwrap_or_else(|| format!("corbaname::{}:{}#{}", args.host, args.port, TEST_SERVICE_NAME));
    info!("Resolving {}", locator);
    let reference = orb.resolve(&locator).await?;

    let server = match GiopTestClient::narrow(&orb, &reference).await? {
        Some(server) => server,
        None => {
            error!("{} is not a GIOPTest", reference);
            orb.destroy().await;
            return Err("narrow failed".into());
        }
    };
    info!("got Server object");

    server.set_callback(&callback).await?;
    server.send_bool(false, true).await?;
    println!("{}", server.peek().await?);

    let point = types.named_point(3.1415, 2.7182, "pi,e")?;
    println!("{}", server.send_point(&point).await?);

    info!("Callback received {:?}", small.messages());
    info!("Stats: {:?}", orb.stats().snapshot());
    orb.destroy().await;
    Ok(())
}
