use std::path::PathBuf;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use state_service::store::Store;
use state_service::{persist, server};

/// Authoritative state service: users, rooms and game logs behind a framed
/// TCP command protocol.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_STATE_PORT)]
    port: u16,

    /// Snapshot file loaded on boot and written on clean shutdown
    #[clap(short, long, default_value = "db_state.txt")]
    state_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info");
    }

    let args = Args::parse();

    let store = match persist::load(&args.state_file)? {
        Some(store) => {
            info!(
                "loaded snapshot {}: {} users, {} rooms, {} logs",
                args.state_file.display(),
                store.user_count(),
                store.room_count(),
                store.logs().len()
            );
            store
        }
        None => {
            info!("no snapshot at {}, starting empty", args.state_file.display());
            Store::new()
        }
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("state service listening on {}", addr);

    let store = server::serve(listener, store, shared::shutdown_signal()).await;

    persist::save(&args.state_file, &store)?;
    info!("snapshot written to {}", args.state_file.display());
    Ok(())
}
