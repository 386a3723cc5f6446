//! chat_session - A conversation session over the graph client
//!
//! - `session` - ChatSession: run stream into branch state, edit/regenerate/resume
//! - `logging` - env_logger setup
//! - `error` - SessionError

pub mod error;
pub mod logging;
pub mod session;

pub use error::SessionError;
pub use logging::init_logging;
pub use session::ChatSession;
