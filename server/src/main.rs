use clap::Parser;
use server::admin::AdminConsole;
use server::network::ChatServer;
use shared::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_ROOM_CAPACITY};

/// Parses command-line arguments, binds the listener, and runs the accept
/// loop alongside the operator console until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about = "LAN multi-room chat server")]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = DEFAULT_HOST)]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Default per-room member capacity
        #[clap(short, long, default_value_t = DEFAULT_ROOM_CAPACITY)]
        capacity: usize,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = ChatServer::bind(&address, args.capacity).await?;
    let state = server.state();

    // Operator console runs in the background over stdin.
    let console_handle = tokio::spawn(async move {
        AdminConsole::new(state).run().await;
    });

    let server_handle = tokio::spawn(async move {
        server.run().await;
    });

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                eprintln!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down...");
        }
    }

    console_handle.abort();
    Ok(())
}
