//! Crypto-random id generation shared by the token registry and the
//! approval queues.

use rand::RngCore;

/// 16 hex characters (8 random bytes) from the platform CSPRNG — the id
/// format used for pending commands and pending domains.
pub fn random_hex_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    use std::fmt::Write;
    let mut s = String::with_capacity(16);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_id_shape() {
        let id = random_hex_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_hex_id());
    }
}
