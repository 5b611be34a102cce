//! ZMQ subscriber for `bitcoind`'s `hashblock`/`rawblock` publishers,
//! driven on a dedicated blocking thread and forwarded to async consumers
//! over an `mpsc` channel.

mod error;
mod event;
mod health;
mod subscriber;

pub use error::ZmqError;
pub use event::ZmqEvent;
pub use health::{ZmqHealth, ZmqHealthSnapshot};
pub use subscriber::{ZmqEndpoints, ZmqSubscriber};
