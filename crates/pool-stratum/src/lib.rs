//! Stratum V1 wire types: the request/response/notification envelope,
//! typed method params, the fixed error-code taxonomy, and the
//! newline-delimited JSON codec/framing used to speak it over TCP.

pub mod codec;
pub mod error;
pub mod message;
pub mod params;

pub use error::StratumError;
pub use message::{ErrorObject, Message, RequestMessage, ResponseMessage};
