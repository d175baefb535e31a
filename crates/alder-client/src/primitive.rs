//! The contracts every primitive fulfills.

use alder_api::PrimitiveName;
use async_trait::async_trait;

use crate::error::ClientError;
use crate::session::Session;

/// Base contract of every primitive handle.
#[async_trait]
pub trait Primitive: Send + Sync {
    /// The primitive's stable identity.
    fn name(&self) -> &PrimitiveName;

    /// Close the primitive's sessions, releasing server-side session state
    /// while keeping the primitive's data for later reattach.
    async fn close(&self) -> Result<(), ClientError>;

    /// Close the primitive's sessions and destroy its server-side state.
    async fn delete(&self) -> Result<(), ClientError>;
}

/// Per-primitive session lifecycle hooks.
///
/// The session runtime has no knowledge of which primitive it carries; each
/// primitive registers a handler at session construction whose hooks issue
/// that primitive's create, keep-alive, and close RPCs. Handlers are plain
/// stateless values, not subclasses.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Issue the primitive's `Create` RPC and adopt the granted timeout.
    async fn create(&self, session: &Session) -> Result<(), ClientError>;

    /// Issue the primitive's `KeepAlive` RPC. Invoked only by the session's
    /// keep-alive task.
    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError>;

    /// Issue the primitive's `Close` RPC.
    async fn close(&self, session: &Session) -> Result<(), ClientError>;

    /// Issue the primitive's `Close` RPC with the delete flag.
    async fn delete(&self, session: &Session) -> Result<(), ClientError>;
}
