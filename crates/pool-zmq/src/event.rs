/// One message received on a ZMQ topic the pool cares about. `hashblock`
/// and `rawblock` drive an immediate template refresh; `hashtx`/`rawtx`
/// (per-mempool-transaction notifications) aren't subscribed to since
/// nothing here consumes them.
#[derive(Clone, Debug)]
pub enum ZmqEvent {
    HashBlock { hash_hex: String, sequence: u32 },
    RawBlock { block_hex: String, sequence: u32 },
}
