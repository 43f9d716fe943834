//! Buffered message stream.
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    Result,
    common::verbose,
    ext::FmtExt,
    net::Socket,
    postgres::{
        BackendMessage, BackendProtocol, ErrorResponse, FrontendProtocol, NoticeResponse,
        ProtocolError, backend::ReadyForQuery, frontend,
    },
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Largest message the backend is allowed to send.
const MAX_MESSAGE_LEN: i32 = 1 << 30;

/// Buffered connection to postgres.
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Messages up to the next `ReadyForQuery` belong to an aborted exchange.
    sync_pending: bool,
    verbose: bool,
}

impl PgStream {
    pub fn new(socket: Socket, verbose: bool) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            sync_pending: false,
            verbose,
        }
    }

    /// Returns the underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Read exactly one message, returns its type and body.
    ///
    /// Message header is 5 bytes, the type and the length, followed by `length - 4` bytes body.
    pub async fn read_message(&mut self) -> Result<(u8, Bytes)> {
        loop {
            if let Some(message) = self.parse_message()? {
                return Ok(message);
            }
            if self.socket.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ProtocolError::UnexpectedEof.into());
            }
        }
    }

    fn parse_message(&mut self) -> Result<Option<(u8, Bytes)>, ProtocolError> {
        let Some(mut header) = self.read_buf.get(..5) else {
            self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            return Ok(None);
        };

        let msgtype = header.get_u8();
        let len = header.get_i32();

        if !(4..=MAX_MESSAGE_LEN).contains(&len) {
            return Err(ProtocolError::InvalidLength { msgtype, len });
        }

        // length include itself, but not the msgtype
        let total = 1 + len as usize;
        if self.read_buf.len() < total {
            self.read_buf.reserve(total - self.read_buf.len());
            return Ok(None);
        }

        self.read_buf.advance(5);
        let body = self.read_buf.split_to(total - 5).freeze();
        Ok(Some((msgtype, body)))
    }

    async fn drain_until_ready(&mut self) -> Result<()> {
        loop {
            let (msgtype, body) = self.read_message().await?;
            if msgtype == NoticeResponse::MSGTYPE {
                log_notice(body)?;
                continue;
            }
            verbose!(
                self.verbose,
                "discard `{}` of aborted exchange",
                BackendMessage::message_name(msgtype)
            );
            if msgtype == ReadyForQuery::MSGTYPE {
                self.sync_pending = false;
                return Ok(());
            }
        }
    }

    /// Close the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.socket.shutdown().await?;
        Ok(())
    }
}

impl PgTransport for PgStream {
    fn send<F: FrontendProtocol>(&mut self, message: F) -> Result<()> {
        verbose!(self.verbose, "frontend `{}`", F::MSGTYPE as char);
        frontend::write(message, &mut self.write_buf)?;
        Ok(())
    }

    fn send_startup(&mut self, startup: frontend::Startup) -> Result<()> {
        verbose!(self.verbose, user = startup.user, "frontend `Startup`");
        startup.write(&mut self.write_buf)?;
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.write_buf.len()
    }

    fn truncate(&mut self, len: usize) {
        self.write_buf.truncate(len);
    }

    async fn flush(&mut self) -> Result<()> {
        self.socket.write_all_buf(&mut self.write_buf).await?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn recv<B: BackendProtocol + Send>(&mut self) -> Result<B> {
        if self.sync_pending {
            self.drain_until_ready().await?;
        }

        loop {
            let (msgtype, body) = self.read_message().await?;

            verbose!(
                self.verbose,
                len = body.len(),
                "backend `{}`",
                BackendMessage::message_name(msgtype)
            );

            match msgtype {
                ErrorResponse::MSGTYPE => {
                    let err = ErrorResponse::decode(msgtype, body)?;
                    // the backend always follows with `ReadyForQuery`
                    self.sync_pending = true;
                    return Err(err.into());
                }
                NoticeResponse::MSGTYPE => log_notice(body)?,
                _ => {
                    if BackendMessage::message_name(msgtype) == "Unknown" {
                        verbose!(self.verbose, body = %body.lossy(), "unknown message `{}`", msgtype as char);
                    }
                    return Ok(B::decode(msgtype, body)?);
                }
            }
        }
    }

    fn ready_request(&mut self) {
        self.sync_pending = true;
    }
}

/// Notices are advisory, they are logged and never returned.
fn log_notice(body: Bytes) -> Result<(), ProtocolError> {
    let notice = NoticeResponse::decode(NoticeResponse::MSGTYPE, body)?;
    tracing::info!(
        severity = notice.fields.severity(),
        code = notice.fields.code(),
        "{}",
        notice.fields.message(),
    );
    Ok(())
}
