use rand::RngCore;

const CLIENT_PREFIX: &[u8; 8] = b"-LT0001-";

/// Identifier this client announces to trackers and peers.
///
/// Generated once at startup and shared read-only afterwards.
#[derive(PartialEq, Eq, Clone)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn random() -> Self {
        let mut data = [0; 20];
        data[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill_bytes(&mut data[CLIENT_PREFIX.len()..]);
        Self(data)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0[..CLIENT_PREFIX.len()]))?;
        write!(f, "{}", hex::encode(&self.0[CLIENT_PREFIX.len()..]))
    }
}
