//! The error categories of spec §7. Scripting-surface operations return
//! [`CoreError`]; the script bridge translates every variant to the Lua
//! `nil` convention (or, for `AuthRejected`/`AuthTimeout`, a socket close)
//! rather than ever unwinding across the Lua boundary. `XFatal` is the one
//! variant that terminates the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("name `{0}` is already registered in this scope")]
    NameCollision(String),

    #[error("`{0}` was not found")]
    NotFound(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("no matching window appeared within the claim timeout")]
    ClaimTimeout,

    #[error("websocket client rejected during auth")]
    AuthRejected,

    #[error("websocket client did not authenticate in time")]
    AuthTimeout,

    #[error("fatal X server error: {0}")]
    XFatal(String),

    #[error("script callback error: {0}")]
    ScriptError(String),
}

impl CoreError {
    /// The close reason sent over the admin websocket (§6.3), if any.
    pub fn ws_close_reason(&self) -> Option<&'static str> {
        match self {
            CoreError::AuthRejected => Some("auth"),
            CoreError::AuthTimeout => Some("auth_timeout"),
            _ => None,
        }
    }
}
