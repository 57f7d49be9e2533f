//! Owner identity tokens

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use rand::Rng;

/// Number of random bytes in an owner id. A v4 UUID carries 122 bits of
/// entropy in 16 bytes; this is at least as strong.
pub const OWNER_ID_BYTES: usize = 16;

/// Generate a random, URL-safe owner id.
///
/// Draws from the thread-local CSPRNG, which is seeded from the operating
/// system. Entropy failure panics inside `rand`; there is no recoverable path.
pub fn generate_owner_id() -> String {
    let mut entropy = [0u8; OWNER_ID_BYTES];
    rand::rng().fill(&mut entropy[..]);
    URL_SAFE.encode(entropy)
}
