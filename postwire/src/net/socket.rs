use std::{
    fmt, io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

/// Any byte stream that can carry the protocol.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send { }

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Unpin + Send { }

/// an either `TcpStream`, TLS session, or caller provided stream, which implement
/// `AsyncRead` and `AsyncWrite` transparently
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(TcpStream),
    Tls(Box<TlsStream<Socket>>),
    Raw {
        stream: Box<dyn RawStream>,
        encrypted: bool,
    },
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    /// Wrap an already open plain stream.
    pub fn new(stream: impl RawStream + 'static) -> Socket {
        Socket { kind: Kind::Raw { stream: Box::new(stream), encrypted: false } }
    }

    /// Wrap an already open stream that is encrypted by other means.
    ///
    /// TLS negotiation is skipped for this socket.
    pub fn new_encrypted(stream: impl RawStream + 'static) -> Socket {
        Socket { kind: Kind::Raw { stream: Box::new(stream), encrypted: true } }
    }

    pub(crate) fn tls(stream: TlsStream<Socket>) -> Socket {
        Socket { kind: Kind::Tls(Box::new(stream)) }
    }

    /// Returns `true` if the stream is already encrypted.
    pub fn is_tls(&self) -> bool {
        match &self.kind {
            Kind::Tcp(_) => false,
            Kind::Tls(_) => true,
            Kind::Raw { encrypted, .. } => *encrypted,
        }
    }

    fn as_stream(&mut self) -> Pin<&mut (dyn RawStream + '_)> {
        match &mut self.kind {
            Kind::Tcp(tcp) => Pin::new(tcp as &mut dyn RawStream),
            Kind::Tls(tls) => Pin::new(&mut **tls as &mut dyn RawStream),
            Kind::Raw { stream, .. } => Pin::new(&mut **stream),
        }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().as_stream().poll_read(cx, buf)
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().as_stream().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().as_stream().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().as_stream().poll_shutdown(cx)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Tcp(tcp) => fmt::Debug::fmt(tcp, f),
            Kind::Tls(tls) => f.debug_tuple("Tls").field(tls.get_ref().0).finish(),
            Kind::Raw { encrypted, .. } => f
                .debug_struct("Raw")
                .field("encrypted", encrypted)
                .finish_non_exhaustive(),
        }
    }
}
