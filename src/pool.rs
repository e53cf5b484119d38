//! Mask-fill pool.
//!
//! Most masks are a single character repeated to the value's length,
//! so repeated fills are served from a shared two-level cache
//! (`char → len → string`) instead of being rebuilt per entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

/// Fills longer than this are allocated fresh on every call.
const MAX_POOLED_LEN: usize = 128;

static FILL_POOL: Lazy<Mutex<HashMap<char, HashMap<usize, Arc<str>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns `len` copies of `mask_char`, cached for `len <= 128`.
pub(crate) fn fill(mask_char: char, len: usize) -> Arc<str> {
    if len > MAX_POOLED_LEN {
        return build(mask_char, len);
    }
    if let Ok(mut pool) = FILL_POOL.lock() {
        let by_len = pool.entry(mask_char).or_default();
        if let Some(hit) = by_len.get(&len) {
            return Arc::clone(hit);
        }
        let made = build(mask_char, len);
        by_len.insert(len, Arc::clone(&made));
        return made;
    }
    build(mask_char, len)
}

pub(crate) fn clear() {
    if let Ok(mut pool) = FILL_POOL.lock() {
        pool.clear();
    }
}

fn build(mask_char: char, len: usize) -> Arc<str> {
    let mut out = String::with_capacity(len * mask_char.len_utf8());
    for _ in 0..len {
        out.push(mask_char);
    }
    Arc::from(out)
}
