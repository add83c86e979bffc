use clap::Parser;
use qfieldsync_cloud::{AppState, serve};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "qfieldsync-cloud")]
struct CloudArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind_address: String,

    /// Seed account as `username:password`. May be repeated.
    #[arg(long = "user", value_parser = parse_user)]
    users: Vec<(String, String)>,
}

fn parse_user(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((username, password)) if !username.trim().is_empty() && !password.is_empty() => {
            Ok((username.trim().to_owned(), password.to_owned()))
        }
        _ => Err(format!("expected username:password, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CloudArgs::parse();
    if args.users.is_empty() {
        warn!("no --user given; nobody will be able to log in");
    }

    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!(users = args.users.len(), "cloud starting on {}", args.bind_address);
    if let Err(err) = serve(listener, AppState::with_users(args.users)).await {
        warn!("cloud server exited: {}", err);
    }
}
