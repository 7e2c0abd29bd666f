pub mod http;
pub mod registry;
pub mod server;
pub mod sync;
pub mod ws;

pub use registry::ConnectionRegistry;
pub use server::{start, AppState, ServerConfig, ServerHandle};
pub use sync::SyncEngine;
