use crate::server::MainServer;
use ar_booter::booter::Booter;
use std::error::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod handlers;
mod server;
mod state;

fn main() -> Result<(), Box<dyn Error>> {
    registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("info,{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = Booter::run(MainServer::new()) {
        tracing::error!("Failed to start application: {}", err);
        let code = err
            .downcast_ref::<ar_common::RegistryError>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
    Ok(())
}
