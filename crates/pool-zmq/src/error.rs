use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZmqError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("no zmq endpoints configured")]
    NoEndpoints,
}
