use uuid::Uuid;

use crate::config::HubConfig;

/// Generates a subscriber name of `len` hex digits (at most 32).
///
/// Uniqueness only has to hold within one channel; the hub retries on the
/// rare collision.
pub(crate) fn generate(len: usize) -> String {
    let mut name = Uuid::new_v4().simple().to_string();
    name.truncate(len.min(HubConfig::MAX_GENERATED_NAME_LEN));
    name
}
