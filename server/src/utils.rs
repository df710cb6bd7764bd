use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Lowercase hex rendering of a digest
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// Salted credential hash stored on accounts; the account name is the salt
pub fn hash_password(account: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.to_ascii_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

// Names are letters, digits and single spaces, within the length limit
pub fn is_valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (3..=shared::MAX_NAME_LENGTH).contains(&len)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ')
        && !name.starts_with(' ')
        && !name.ends_with(' ')
        && !name.contains("  ")
}

// Key used for name lookups in repositories
pub fn name_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
