use crate::message::Message;
use pool_wire::codec::NdjsonCodec;
use pool_wire::Framing;

pub type Codec = NdjsonCodec<Message, Message>;

/// Wire framing for a Stratum V1 connection: both directions carry
/// [`Message`], framed one JSON object per line.
#[derive(Debug)]
pub struct StratumFraming;

impl Framing for StratumFraming {
    type Tx = Message;
    type Rx = Message;
    type Codec = Codec;
}

pub type Server = pool_wire::Server<StratumFraming>;
pub type Connection = pool_wire::Connection<StratumFraming>;
