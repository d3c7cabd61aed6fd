pub mod api_docs;
pub mod auth;
pub mod config;
pub mod error;
pub mod reaper;
pub mod routes;
pub mod state;
pub mod wire;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use reaper::start_reaper_task;
pub use routes::create_app;
pub use state::AppState;
