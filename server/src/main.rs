use clap::Parser;
use server::backend::MemoryBackend;
use server::server::Server;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, then binds the server and runs it until
/// the process is interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "4000")]
        port: u16,
        /// Secret for verifying client tokens (falls back to the JWT_SECRET
        /// environment variable)
        #[clap(long, default_value = "")]
        jwt_secret: String,
    }

    // Parse command line arguments
    let args = Args::parse();

    let jwt_secret = if args.jwt_secret.is_empty() {
        std::env::var("JWT_SECRET").unwrap_or_default()
    } else {
        args.jwt_secret
    };
    if jwt_secret.is_empty() {
        log::warn!("No token secret configured; every connection will play as a guest");
    }

    let backend = Arc::new(MemoryBackend::new());
    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::bind(&address, jwt_secret, backend).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
