//! Content fingerprint and the process-global parse cache.
//!
//! The fingerprint is a deliberately cheap summary: full equality is
//! never checked, and a collision at worst paints one stale decoration
//! that the next edit corrects. Cached parses therefore store raw byte
//! ranges and every range is re-validated against the current input
//! before it is served.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::Lazy;

use crate::parser::{self, RawParse};

/// Inputs below this take the prefix regime.
const SMALL_INPUT_LIMIT: usize = 512;
const PREFIX_BYTES: usize = 64;
const SAMPLE_STRIDE: usize = 16;
const MAX_SAMPLES: usize = 512;
const PARSE_CACHE_CAPACITY: usize = 200;

/// Two-regime summary of an input buffer.
///
/// Short inputs are identified by length plus their first 64 bytes;
/// everything else by length plus a 32-bit rolling hash over every
/// 16th byte, capped at 512 samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Fingerprint {
    Small {
        len: usize,
        prefix: [u8; PREFIX_BYTES],
        used: u8,
    },
    Sampled {
        len: usize,
        hash: u32,
    },
}

impl Fingerprint {
    pub(crate) fn of(input: &[u8]) -> Self {
        if input.len() < SMALL_INPUT_LIMIT {
            let used = input.len().min(PREFIX_BYTES);
            let mut prefix = [0u8; PREFIX_BYTES];
            prefix[..used].copy_from_slice(&input[..used]);
            Fingerprint::Small {
                len: input.len(),
                prefix,
                used: used as u8,
            }
        } else {
            let mut hash = 0u32;
            for i in (0..input.len()).step_by(SAMPLE_STRIDE).take(MAX_SAMPLES) {
                hash = hash.wrapping_mul(31).wrapping_add(u32::from(input[i]));
            }
            Fingerprint::Sampled {
                len: input.len(),
                hash,
            }
        }
    }
}

static PARSE_CACHE: Lazy<Mutex<LruCache<Fingerprint, Arc<RawParse>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(PARSE_CACHE_CAPACITY).expect("nonzero capacity"),
    ))
});

/// Parse `text`, consulting the LRU first.
pub(crate) fn parse_cached(text: &str) -> Arc<RawParse> {
    let fingerprint = Fingerprint::of(text.as_bytes());
    if let Some(hit) = lookup(fingerprint) {
        if hit.spans_valid(text) {
            log::debug!("parse cache hit ({} entries)", hit.entries.len());
            return hit;
        }
        // Fingerprint collision: the ranges do not fit this input.
    }
    let parsed = Arc::new(parser::scan(text));
    store(fingerprint, Arc::clone(&parsed));
    parsed
}

pub(crate) fn clear() {
    if let Ok(mut cache) = PARSE_CACHE.lock() {
        cache.clear();
    }
}

fn lookup(fingerprint: Fingerprint) -> Option<Arc<RawParse>> {
    PARSE_CACHE
        .lock()
        .ok()
        .and_then(|mut cache| cache.get(&fingerprint).cloned())
}

fn store(fingerprint: Fingerprint, parsed: Arc<RawParse>) {
    if let Ok(mut cache) = PARSE_CACHE.lock() {
        cache.put(fingerprint, parsed);
    }
}
