use std::error::Error;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

pub trait Application: Send + Sync {
    fn new() -> Self;

    /// Loads and validates configuration from the given file path.
    fn prepare(&mut self, path: String) -> Result<(), Box<dyn Error>>;

    fn run(&mut self, shutdown: CancellationToken, rt: Runtime) -> Result<(), Box<dyn Error>>;
}
