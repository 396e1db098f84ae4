//! realias - standardize Go import aliases across your codebase.
//!
//! Discovers every file importing a target package, then drives gopls over
//! LSP to rename the import alias in each, applying the returned workspace
//! edits to disk (or previewing them).

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging. Diagnostics stay on stderr so stdout remains
    // clean for list/preview output.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "realias=warn".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
