//! Standalone server binary: `weft-server [ADDR]`.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = config::load_and_apply("weft", None) {
        tracing::warn!("config load failed: {}", e);
    }

    let addr = std::env::args().nth(1);
    if let Err(e) = serve::run_serve(addr.as_deref()).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
