//! Application services and their wiring.

mod container;
mod handler;

pub use container::{ServiceContainer, build_player_client};
pub use handler::OperationDispatcher;
