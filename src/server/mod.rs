mod app;
mod state;

pub use app::create_app;
pub use state::{connection_manager_for, AppState};
