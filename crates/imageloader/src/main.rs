//! A command line tool that loads images through the cache coordinator.
//!
//! All URLs are loaded concurrently, then loaded once more to show which of them are now
//! served from the cache.

use imageloader_service::logging;

mod cli;
mod output;

#[tokio::main]
async fn main() {
    if let Err(error) = cli::execute().await {
        logging::ensure_log_error(&error);
        std::process::exit(1);
    }
}
