//! Re-exports the async runtime stack at one pinned version so every other
//! crate in the workspace depends on `pool-async` instead of declaring its
//! own `tokio`/`futures`/`bytes`/`tokio-util` version. Keeps the whole
//! workspace on one executor without each crate repeating the version pin.

pub use bytes;
pub use futures;
pub use tokio;
pub use tokio_util;
