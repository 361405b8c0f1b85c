pub mod api;
pub mod broadcaster;
pub mod compiler;
pub mod error;
pub mod policy;
pub mod state;
pub mod store;

pub use api::build_router;
pub use state::{run_recompile_loop, AppState};
pub use store::{InMemoryStore, PolicyStore};
