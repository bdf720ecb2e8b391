mod digest;
mod peer_id;

pub use digest::Sha1;
pub use peer_id::PeerId;
