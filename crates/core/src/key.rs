//! Storage key derivation.
//!
//! Keys never reuse the user-facing display name verbatim. Each key embeds a
//! millisecond timestamp and a random suffix so that two uploads with the
//! same name never collide, plus a sanitized copy of the name for operators
//! browsing the bucket.

use crate::group::GroupId;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of the sanitized name segment.
pub const MAX_NAME_SEGMENT: usize = 96;

/// Prefix under which standalone files are stored.
pub const FILES_PREFIX: &str = "files/";

/// Prefix under which group items are stored.
pub const GROUPS_PREFIX: &str = "groups/";

/// Reduce a display name to the `[A-Za-z0-9._-]` alphabet.
///
/// Other characters are dropped, runs of dots collapse to one, leading dots
/// are removed, and the result is truncated. An empty result becomes `file`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_NAME_SEGMENT));
    for c in name.chars() {
        if out.len() >= MAX_NAME_SEGMENT {
            break;
        }
        match c {
            '.' if out.is_empty() || out.ends_with('.') => {}
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => out.push(c),
            _ => {}
        }
    }
    if out.is_empty() {
        out.push_str("file");
    }
    out
}

fn unique_leaf(name: &str, now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let random = Uuid::new_v4().simple().to_string();
    format!("{millis}-{}-{}", &random[..8], sanitize_name(name))
}

/// Storage key for a standalone file owned by `owner`.
pub fn file_key(owner: &str, name: &str) -> String {
    file_key_at(owner, name, OffsetDateTime::now_utc())
}

/// Storage key for a standalone file, with an explicit timestamp.
pub fn file_key_at(owner: &str, name: &str, now: OffsetDateTime) -> String {
    format!(
        "{FILES_PREFIX}{}/{}",
        sanitize_name(owner),
        unique_leaf(name, now)
    )
}

/// Prefix holding every object that belongs to `group`.
pub fn group_prefix(group: &GroupId) -> String {
    format!("{GROUPS_PREFIX}{group}/")
}

/// Storage key for an item inside `group`.
pub fn group_item_key(group: &GroupId, name: &str) -> String {
    group_item_key_at(group, name, OffsetDateTime::now_utc())
}

/// Storage key for a group item, with an explicit timestamp.
pub fn group_item_key_at(group: &GroupId, name: &str, now: OffsetDateTime) -> String {
    format!("{}{}", group_prefix(group), unique_leaf(name, now))
}
