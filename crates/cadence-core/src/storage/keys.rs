//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u16.

use crate::model::{ActivityType, EventId};

const SEPARATOR: u8 = b':';

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Encode a variable-length string with a 2-byte big-endian length prefix.
fn encode_string(s: &str) -> Vec<u8> {
    let len = u16::try_from(s.len()).expect("key string exceeds 64 KiB");
    let mut buf = Vec::with_capacity(2 + s.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf
}

fn activity_tag(activity: ActivityType) -> u8 {
    match activity {
        ActivityType::Posts => b'p',
        ActivityType::Mentions => b'm',
    }
}

/// Build a user key: the raw user id bytes.
pub fn user_key(user_id: &str) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Build an event key: `{user_id}:{activity}:{event_id}`
///
/// Key layout (binary):
/// - length-prefixed user_id
/// - separator
/// - one-byte activity tag
/// - separator
/// - 8-byte big-endian event id
pub fn event_key(user_id: &str, activity: ActivityType, event_id: EventId) -> Vec<u8> {
    let mut key = event_prefix(user_id, activity);
    key.extend_from_slice(&encode_u64(event_id));
    key
}

/// Build a prefix for iterating one user's events of one activity type.
pub fn event_prefix(user_id: &str, activity: ActivityType) -> Vec<u8> {
    let mut prefix = user_prefix(user_id);
    prefix.push(activity_tag(activity));
    prefix.push(SEPARATOR);
    prefix
}

/// Build a prefix for iterating all of a user's events.
pub fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 16);
    prefix.extend_from_slice(&encode_string(user_id));
    prefix.push(SEPARATOR);
    prefix
}
