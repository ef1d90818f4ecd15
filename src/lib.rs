pub mod app;
pub mod config;
pub mod conversation;
pub mod error;
pub mod geometry;
pub mod imaging;
pub mod inference;
pub mod input;
pub mod logging;
pub mod notification;
pub mod session;
pub mod state;
pub mod storage;
pub mod worker;
pub use error::{AppError, AppResult};

/// Entrypoint used by the binary and other front-ends.
pub fn run(options: &app::StartupOptions) -> AppResult<()> {
    logging::init();
    tracing::info!("starting ITT-Qwen");

    app::run_terminal(options)?;

    tracing::info!("shutdown complete");
    Ok(())
}
