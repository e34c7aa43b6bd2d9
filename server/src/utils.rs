//! Small helpers shared across the server.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_ms() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_millis().min(u64::MAX as u128)) as u64
}

/// Short random alphanumeric identifier for participants and entities.
pub fn random_id(rng: &mut StdRng) -> String {
    (0..8).map(|_| rng.sample(Alphanumeric) as char).collect()
}
