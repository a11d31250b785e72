//! GIOPTest server
//!
//! Listens, starts the naming service and binds a GIOPTest object as
//! `TestService`. While serving `peek` it calls back into the client
//! over the client's own connection.
//!
//! Run with: cargo run --bin giop-server -- --port 2809

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use giop_test::{GiopTestServant, TestService, ValueTypes, TEST_SERVICE_NAME};
use orb::Orb;

#[derive(Parser)]
#[command(name = "giop-server")]
#[command(about = "Bidirectional GIOP test server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "2809")]
    port: u16,

    /// Host to bind to and advertise
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Log every request
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

    let orb = Orb::builder().name("giop-server").host(args.host.clone()).build();
    ValueTypes::new()?.register(&orb)?;

    let addr = orb.listen((args.host.as_str(), args.port)).await?;
    let naming = orb.start_naming_service()?;
    let service = orb.bind(TEST_SERVICE_NAME, GiopTestServant::new(TestService::new()))?;

    info!("Naming service: {}", naming.to_corbaloc());
    info!("{}: {}", TEST_SERVICE_NAME, orb.object_to_string(&service));
    info!("Server ready on {}, press Ctrl-C to stop", addr);

    tokio::signal::ctrl_c().await?;

    info!("Stopping");
    orb.shutdown(true).await;
    info!("Stats: {:?}", orb.stats().snapshot());
    Ok(())
}
