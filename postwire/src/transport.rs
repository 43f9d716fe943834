//! The [`PgTransport`] trait.
use crate::{
    Result,
    postgres::{BackendProtocol, FrontendProtocol, frontend},
};

/// A buffered stream which can send and receive postgres message.
///
/// Protocol phases ([`startup`][1], [`authenticate`][2], queries) are written against this trait
/// instead of a concrete stream.
///
/// [1]: crate::connection::startup
/// [2]: crate::auth::authenticate
pub trait PgTransport {
    /// Send message to the backend.
    ///
    /// Note that this send is buffered, caller must also call [`flush`][PgTransport::flush] afterwards.
    fn send<F: FrontendProtocol>(&mut self, message: F) -> Result<()>;

    /// Send [`Startup`][1] message to the backend.
    ///
    /// For historical reasons, the very first message sent by the client (the startup message)
    /// has no initial message-type byte.
    ///
    /// Thus, [`Startup`][1] does not implement [`FrontendProtocol`]
    ///
    /// [1]: frontend::Startup
    fn send_startup(&mut self, startup: frontend::Startup) -> Result<()>;

    /// Returns the length of buffered messages that are not flushed yet.
    fn buffered(&self) -> usize;

    /// Discard buffered messages written after [`buffered`][PgTransport::buffered]
    /// returned `len`.
    fn truncate(&mut self, len: usize);

    /// Flush buffered messages to the underlying io.
    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Receive a message.
    ///
    /// Implementor should handle `NoticeResponse` and should not return it.
    ///
    /// Implementor also should handle `ErrorResponse` and return it as [`Err`].
    fn recv<B: BackendProtocol + Send>(&mut self) -> impl Future<Output = Result<B>> + Send;

    /// Request implementor to ignore all backend messages until `ReadyForQuery` is received.
    fn ready_request(&mut self);
}
