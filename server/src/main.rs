use clap::Parser;
use server::modes::betting::BettingMode;
use server::modes::contracts::ContractsMode;
use server::modes::hiddenrole::HiddenRoleMode;
use server::modes::trivia::TriviaMode;
use server::network;
use server::session::{GameMode, Session};

/// Parses command-line arguments, builds the requested game mode and
/// spawns the session loop next to the two listeners.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// WebSocket port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Port for the plain-HTTP address endpoint
        #[clap(short, long, default_value = "8081")]
        address_port: u16,
        /// Hostname advertised to displays via the address endpoint
        #[clap(long, default_value = "127.0.0.1")]
        public_host: String,
        /// Game to run: contracts, trivia, hidden-role or betting
        #[clap(short, long, default_value = "contracts")]
        mode: String,
        /// Fixed RNG seed, for reproducible sessions
        #[clap(short, long)]
        seed: Option<u64>,
    }

    let args = Args::parse();

    let mode: Box<dyn GameMode> = match args.mode.as_str() {
        "contracts" => Box::new(ContractsMode::new()),
        "trivia" => Box::new(TriviaMode::new()),
        "hidden-role" => Box::new(HiddenRoleMode::new()),
        "betting" => Box::new(BettingMode::new()),
        other => return Err(format!("unknown mode: {}", other).into()),
    };

    let (session, session_tx) = Session::new(mode, args.seed);
    let session_handle = tokio::spawn(session.run());

    let ws_addr = format!("{}:{}", args.host, args.port);
    let ws_handle = {
        let session_tx = session_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = network::run_ws_listener(&ws_addr, session_tx).await {
                eprintln!("WebSocket listener failed: {}", e);
            }
        })
    };

    let address_addr = format!("{}:{}", args.host, args.address_port);
    let advertised = format!("ws://{}:{}", args.public_host, args.port);
    let address_handle = tokio::spawn(async move {
        if let Err(e) = network::run_address_endpoint(&address_addr, advertised).await {
            eprintln!("Address endpoint failed: {}", e);
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        result = session_handle => {
            if let Err(e) = result {
                eprintln!("Session task panicked: {}", e);
            }
        }
        result = ws_handle => {
            if let Err(e) = result {
                eprintln!("WebSocket task panicked: {}", e);
            }
        }
        result = address_handle => {
            if let Err(e) = result {
                eprintln!("Address endpoint task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
