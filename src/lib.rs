pub mod analytics;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod gateways;
pub mod loan;
pub mod media;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;

pub use dispatch::Dispatcher;
pub use error::{AppError, AppResult};
pub use routes::create_router;
pub use state::AppState;
