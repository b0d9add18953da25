//! Identifier generation.
//!
//! Ids combine the current time in milliseconds with a random base-36
//! suffix, e.g. `sub-1718000000000-k3j9x0a1b`. Collisions are possible in
//! principle but not guarded against.

use chrono::Utc;
use rand::Rng;

/// Length of the random suffix.
const SUFFIX_LEN: usize = 9;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Prefix used for pending submission ids.
pub const SUBMISSION_PREFIX: &str = "sub";

/// Generate a new identifier with the given prefix.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect();
    format!("{prefix}-{}-{suffix}", Utc::now().timestamp_millis())
}

/// Generate a new pending submission id.
#[must_use]
pub fn submission_id() -> String {
    generate_id(SUBMISSION_PREFIX)
}

/// Prefix for ids generated inside a form: the first three characters of its id.
#[must_use]
pub fn form_prefix(form_id: &str) -> String {
    form_id.chars().take(3).collect()
}
