//! Stable identifiers and target paths for event records.
//!
//! Every event gets a deterministic, storage-safe location derived purely from
//! the configured prefix, the calendar's display name, and the feed-assigned
//! event identity. Nothing here does I/O and nothing here depends on volatile
//! event fields, so the same event lands at the same path on every run.

use crate::utils::fnv1a_32;

// Two independent FNV-1a bases. A single 32-bit hash collides too readily at
// realistic calendar sizes; two differently-salted hashes concatenated push
// the collision probability out to ~64 bits while keeping the token short.
// Collisions remain theoretically possible; two raw identities hashing to the
// same token would alias at one location. Known limitation.
const IDENTITY_BASIS_A: u32 = 0x811c_9dc5;
const IDENTITY_BASIS_B: u32 = 0x0100_0193;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encode a 32-bit value in base36, zero-padded to 7 digits so tokens have a
/// constant length.
fn to_base36(mut value: u32) -> String {
    let mut buf = [b'0'; 7];
    let mut i = buf.len();
    while value > 0 {
        i -= 1;
        buf[i] = BASE36_DIGITS[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Derive the short storage-safe token naming an event's record location.
/// Deterministic forever: same raw identity, same token.
pub fn derive_record_identity(event_identity: &str) -> String {
    let a = fnv1a_32(event_identity, IDENTITY_BASIS_A);
    let b = fnv1a_32(event_identity, IDENTITY_BASIS_B);
    format!("{}{}", to_base36(a), to_base36(b))
}

/// Lowercase, whitespace to hyphens, everything else non-alphanumeric
/// stripped, hyphen runs collapsed. Idempotent. Returns an empty segment only
/// when the input had zero alphanumeric characters.
pub fn sanitize_display_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if (ch.is_whitespace() || ch == '-') && !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// The deterministic store path for one (calendar, event) pair:
/// `<prefix>/<sanitized calendar name>/<derived record identity>`.
pub fn target_location(prefix: &str, calendar_display_name: &str, event_identity: &str) -> String {
    format!(
        "{}/{}/{}",
        prefix,
        sanitize_display_name(calendar_display_name),
        derive_record_identity(event_identity)
    )
}
