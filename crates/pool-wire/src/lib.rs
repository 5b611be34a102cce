//! Generic framed-connection plumbing for line-delimited JSON protocols.
//!
//! This mirrors the shape of a Braiins-style wire stack (`Framing` trait +
//! `Server`/`Connection` type aliases built on top of it, as used by the
//! CGMiner-API server) but targets a newline-delimited JSON wire format
//! instead of CGMiner's null-terminated one, and exposes an explicit
//! `accept().await` loop rather than a hand-rolled `Stream` impl over the
//! listener — the same shape, written against stable async/await instead of
//! the futures-preview combinators the original stack predates.

pub mod codec;

use pool_async::tokio::net::{TcpListener, TcpStream};
use pool_async::tokio_util::codec::{Decoder, Encoder, Framed};
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;

/// Binds together the wire types for one protocol: what gets sent, what
/// gets received, and the codec that converts between bytes and those
/// types. A concrete protocol (e.g. Stratum) implements this once and gets
/// a `Server`/`Connection` pair for free.
pub trait Framing {
    type Tx;
    type Rx;
    type Codec: Decoder<Item = Self::Rx, Error = io::Error>
        + Encoder<Self::Tx, Error = io::Error>
        + Default;
}

/// A framed duplex connection: `Stream<Item = Result<F::Rx, io::Error>>` and
/// `Sink<F::Tx, Error = io::Error>` via [`tokio_util::codec::Framed`].
pub type Connection<F> = Framed<TcpStream, <F as Framing>::Codec>;

/// A TCP listener that hands out [`Connection`]s framed for protocol `F`.
pub struct Server<F: Framing> {
    listener: TcpListener,
    _marker: PhantomData<F>,
}

impl<F: Framing> Server<F> {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            _marker: PhantomData,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts the next inbound connection and wraps it with `F::Codec`.
    /// Disables Nagle's algorithm: Stratum is a request/response-ish
    /// protocol with small frames where coalescing would only add latency.
    pub async fn accept(&self) -> io::Result<(Connection<F>, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true).ok();
        Ok((Framed::new(stream, F::Codec::default()), peer))
    }
}
