//! Resource sessions tracking in-flight parallel uploads.

pub use resource_session::{ResourceSession, SessionStatus};
pub use session_manager::SessionManager;

mod resource_session;
mod session_manager;
