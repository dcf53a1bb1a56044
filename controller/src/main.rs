//! Bundle loader: the process entry point. Parses the command line,
//! daemonizes if asked, then constructs every store and brick in dependency
//! order (stores and `DPSet` first, then the correlator and programmer that
//! subscribe to them, then the REST bridge brick and its HTTP listener) and
//! runs the bus to completion.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use clap::Parser;
use daemon::Daemonize;

use bus::Bus;
use correlator::PortSetCorrelator;
use programmer::GreProgrammer;
use rest::{router, RestBridge};
use stores::{NetworkStore, TunnelsStore};
use switchmgr::SwitchManager;

/// Positional arguments name the applications to load; this controller only
/// ever loads the one bundle described here, so the list is accepted for
/// command-line compatibility and logged, not dispatched on.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    #[clap(flatten)]
    daemonize: Daemonize,

    /// Application bundle names to load.
    apps: Vec<String>,

    /// Enable richer backtraces on panic.
    #[clap(long)]
    cgitb: bool,

    /// Address the REST surface listens on.
    #[clap(long, default_value = "127.0.0.1:8080")]
    rest_bind: SocketAddr,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.cgitb {
        std::env::set_var("RUST_BACKTRACE", "full");
    }
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    // Safety: this is the first thing the process does after argument
    // parsing and logger setup, before any other thread exists.
    let (daemonizing, _cleanup) = unsafe { args.daemonize.clone().start() };
    daemonizing.finish();

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(apps = ?args.apps, "loading bundle");

    let bus = Bus::new();
    let networks = Rc::new(RefCell::new(NetworkStore::new()));
    let tunnels = Rc::new(RefCell::new(TunnelsStore::new()));
    let switch_manager = SwitchManager::new(bus.clone());

    PortSetCorrelator::new(networks.clone(), tunnels.clone(), switch_manager.dpset(), bus.clone()).register();
    GreProgrammer::new(networks.clone(), tunnels.clone(), switch_manager.dpset()).register(&bus);

    let (bridge, handle) = RestBridge::new(networks, tunnels, bus);
    tokio::task::spawn_local(bridge.run());

    let listener = tokio::net::TcpListener::bind(args.rest_bind).await?;
    tracing::info!(addr = %args.rest_bind, "REST surface listening");
    axum::serve(listener, router(handle)).await?;
    Ok(())
}
