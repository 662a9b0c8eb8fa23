pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handler;
pub mod state;
pub mod upstream;
pub mod worker;

pub use bootstrap::bootstrap;
pub use error::ApiError;
pub use state::GatewayState;
