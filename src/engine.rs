//! Engine: decoration building and incremental updates.
//!
//! [`Engine`] owns the mode registry, the compiled policy and the
//! host-level settings. `generate` walks a full parse;
//! `generate_incremental` rebuilds only an edited line range and
//! merges with the caller's cached records; `refresh` adds the
//! fingerprint fast path and the paste latch on top of a host-owned
//! [`BufferCache`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::fingerprint::{self, Fingerprint};
use crate::mode::{
    self, MaskOutput, ModeContext, ModeDef, ModeInfo, ModeInstance, ModeRegistry,
};
use crate::parser::RawParse;
use crate::pattern::{PatternResolver, Policy};
use crate::{pool, Error, QuoteType};

/// Engine-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Skip entries originating from comment lines.
    pub skip_comments: bool,
    /// Host configuration handed to custom modes as `ctx.config`.
    pub settings: Map<String, Value>,
}

/// One mask decoration: overlay `mask` over the value's byte span.
/// `value` stays a borrow of the input for diagnostics; callers copy
/// out what they keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRecord<'a> {
    pub line_number: usize,
    pub value_end_line: usize,
    pub value_start: usize,
    pub value_end: usize,
    pub quote_type: QuoteType,
    pub mask: Arc<str>,
    pub value: &'a str,
}

/// Owned form of a record, held in per-buffer caches across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMask {
    pub line_number: usize,
    pub value_end_line: usize,
    pub value_start: usize,
    pub value_end: usize,
    pub quote_type: QuoteType,
    pub mask: Arc<str>,
}

impl From<&MaskRecord<'_>> for CachedMask {
    fn from(record: &MaskRecord<'_>) -> Self {
        Self {
            line_number: record.line_number,
            value_end_line: record.value_end_line,
            value_start: record.value_start,
            value_end: record.value_end,
            quote_type: record.quote_type,
            mask: Arc::clone(&record.mask),
        }
    }
}

/// Per-line overlay bounds for a record: byte columns relative to the
/// line start, quotes already excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlaySpan {
    pub line: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl CachedMask {
    /// One span per line the record covers. First line starts at the
    /// value; intermediate lines cover their whole content; the last
    /// line stops at `value_end`.
    pub fn overlay_lines(&self, input: &str, line_offsets: &[usize]) -> Vec<OverlaySpan> {
        let mut spans = Vec::with_capacity(self.value_end_line - self.line_number + 1);
        for line in self.line_number..=self.value_end_line {
            let Some(&line_start) = line_offsets.get(line - 1) else {
                break;
            };
            let content_end = match line_offsets.get(line) {
                Some(&next) => {
                    let mut end = next - 1; // before '\n'
                    if end > line_start && input.as_bytes().get(end - 1) == Some(&b'\r') {
                        end -= 1;
                    }
                    end
                }
                None => input.len(),
            };
            let start_abs = if line == self.line_number {
                self.value_start
            } else {
                line_start
            };
            let end_abs = if line == self.value_end_line {
                self.value_end
            } else {
                content_end
            };
            spans.push(OverlaySpan {
                line,
                start_col: start_abs.saturating_sub(line_start),
                end_col: end_abs.saturating_sub(line_start),
            });
        }
        spans
    }
}

/// Output of [`Engine::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSet<'a> {
    pub masks: Vec<MaskRecord<'a>>,
    pub line_offsets: Vec<usize>,
}

/// Edit descriptor for incremental calls. Callers must send
/// `FullRebuild` whenever the edit changed the buffer's line count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    FullRebuild,
    /// 1-indexed, inclusive.
    LineRange { min_line: usize, max_line: usize },
}

/// Output of [`Engine::generate_incremental`]: the merged record list
/// for the cache, and the minimal subset the overlay must redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalMaskSet {
    pub masks: Vec<CachedMask>,
    pub masks_to_apply: Vec<CachedMask>,
    pub line_offsets: Vec<usize>,
}

/// Outcome of [`Engine::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// Fingerprint matched; the cached records still stand.
    Unchanged,
    Updated { masks_to_apply: Vec<CachedMask> },
}

/// Host-owned per-buffer state, keyed by the editor's opaque buffer
/// handle and dropped on buffer detach.
#[derive(Debug, Clone, Default)]
pub struct BufferCache {
    masks: Vec<CachedMask>,
    line_offsets: Vec<usize>,
    line_count: usize,
    fingerprint: Option<Fingerprint>,
    epoch: u64,
    force_full: bool,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a full rebuild for the next [`Engine::refresh`] call,
    /// bypassing the fingerprint fast path once. Hosts set this after
    /// a paste so stale offsets can never survive.
    pub fn mark_paste(&mut self) {
        self.force_full = true;
    }

    pub fn masks(&self) -> &[CachedMask] {
        &self.masks
    }

    pub fn line_offsets(&self) -> &[usize] {
        &self.line_offsets
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }
}

/// The masking engine. Hosts create one at setup and pass it by
/// reference; there are no hidden singletons beyond the process-wide
/// parse LRU and fill pool.
pub struct Engine {
    registry: ModeRegistry,
    resolver: PatternResolver,
    config: EngineConfig,
    epoch: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: ModeRegistry::with_builtins(),
            resolver: PatternResolver::default(),
            config,
            epoch: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Install and compile a policy. Any cached records predate the
    /// new policy and are invalidated via the epoch.
    pub fn set_policy(&mut self, policy: Policy) -> Result<(), Error> {
        self.resolver = PatternResolver::compile(&policy)?;
        self.bump_epoch();
        Ok(())
    }

    pub fn register_mode(&mut self, name: &str, def: ModeDef) -> Result<(), Error> {
        self.registry.register(name, def)?;
        self.bump_epoch();
        Ok(())
    }

    pub fn configure_mode(
        &mut self,
        name: &str,
        options: Map<String, Value>,
    ) -> Result<(), Error> {
        self.registry.configure(name, options)?;
        self.bump_epoch();
        Ok(())
    }

    /// A detached instance of `name` with `overrides` applied; the
    /// registry keeps its current configuration.
    pub fn create_mode(
        &self,
        name: &str,
        overrides: Map<String, Value>,
    ) -> Result<ModeInstance, Error> {
        self.registry.create(name, overrides)
    }

    pub fn list_modes(&self) -> Vec<&str> {
        self.registry.list()
    }

    pub fn mode_info(&self, name: &str) -> Result<ModeInfo, Error> {
        self.registry.info(name)
    }

    /// Drop the process-global parse LRU and fill pool.
    pub fn clear_caches(&self) {
        fingerprint::clear();
        pool::clear();
    }

    /// Mask decorations for the whole buffer.
    pub fn generate<'a>(
        &self,
        input: &'a [u8],
        source: Option<&str>,
    ) -> Result<MaskSet<'a>, Error> {
        let text = std::str::from_utf8(input)?;
        let parsed = fingerprint::parse_cached(text);
        let basename = source.map(source_basename);
        let masks = self.build_records(text, &parsed, basename, None);
        Ok(MaskSet {
            masks,
            line_offsets: parsed.line_offsets.clone(),
        })
    }

    /// Rebuild only the edited line range and merge with `cached`.
    ///
    /// Cached records outside the range are reused verbatim, which is
    /// sound only while the edit left the line count unchanged —
    /// callers send [`Edit::FullRebuild`] otherwise.
    pub fn generate_incremental(
        &self,
        input: &[u8],
        source: Option<&str>,
        edit: Edit,
        cached: &[CachedMask],
    ) -> Result<IncrementalMaskSet, Error> {
        let text = std::str::from_utf8(input)?;
        let parsed = fingerprint::parse_cached(text);
        let basename = source.map(source_basename);
        match edit {
            Edit::FullRebuild => {
                let masks = to_cached(self.build_records(text, &parsed, basename, None));
                Ok(IncrementalMaskSet {
                    masks_to_apply: masks.clone(),
                    masks,
                    line_offsets: parsed.line_offsets.clone(),
                })
            }
            Edit::LineRange { min_line, max_line } => {
                let fresh = to_cached(self.build_records(
                    text,
                    &parsed,
                    basename,
                    Some((min_line, max_line)),
                ));
                let mut merged: Vec<CachedMask> = cached
                    .iter()
                    .filter(|mask| mask.line_number < min_line || mask.line_number > max_line)
                    .cloned()
                    .collect();
                merged.extend(fresh.iter().cloned());
                merged.sort_by_key(|mask| (mask.line_number, mask.value_start));
                Ok(IncrementalMaskSet {
                    masks: merged,
                    masks_to_apply: fresh,
                    line_offsets: parsed.line_offsets.clone(),
                })
            }
        }
    }

    /// Incremental update against a host-owned cache: fingerprint
    /// fast path, paste latch, policy-epoch check, cache write-back.
    pub fn refresh(
        &self,
        input: &[u8],
        source: Option<&str>,
        edit: Edit,
        cache: &mut BufferCache,
    ) -> Result<Refresh, Error> {
        let fingerprint = Fingerprint::of(input);
        let latched = cache.force_full;
        let stale_policy = cache.epoch != self.epoch;
        let effective = if latched || stale_policy {
            Edit::FullRebuild
        } else {
            edit
        };
        if effective == Edit::FullRebuild
            && !latched
            && !stale_policy
            && cache.fingerprint == Some(fingerprint)
        {
            log::debug!("fingerprint unchanged; skipping remask");
            return Ok(Refresh::Unchanged);
        }
        if latched {
            log::debug!("paste latch set; forcing full rebuild");
        }
        let outcome = self.generate_incremental(input, source, effective, &cache.masks)?;
        cache.line_count = outcome.line_offsets.len();
        cache.masks = outcome.masks;
        cache.line_offsets = outcome.line_offsets;
        cache.fingerprint = Some(fingerprint);
        cache.epoch = self.epoch;
        cache.force_full = false;
        Ok(Refresh::Updated {
            masks_to_apply: outcome.masks_to_apply,
        })
    }

    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Walk entries and emit one record per masked value, in input
    /// order. Key→mode and mode→instance resolutions are memoised for
    /// the duration of the call.
    fn build_records<'a>(
        &self,
        text: &'a str,
        parsed: &RawParse,
        source_basename: Option<&str>,
        range: Option<(usize, usize)>,
    ) -> Vec<MaskRecord<'a>> {
        let mut mode_names: HashMap<&str, &str> = HashMap::new();
        let mut instances: HashMap<&str, &ModeInstance> = HashMap::new();
        let mut masks = Vec::new();
        let source = source_basename.unwrap_or("");
        for raw in &parsed.entries {
            if let Some((min_line, max_line)) = range {
                if raw.line_number < min_line || raw.line_number > max_line {
                    continue;
                }
            }
            let Some(entry) = raw.view(text) else { continue };
            if entry.is_comment && self.config.skip_comments {
                continue;
            }
            let mode_name = *mode_names
                .entry(entry.key)
                .or_insert_with(|| self.resolver.resolve(entry.key, source_basename));
            let instance = *instances
                .entry(mode_name)
                .or_insert_with(|| self.lookup_instance(mode_name));
            let ctx = ModeContext {
                key: entry.key,
                value: entry.value,
                source,
                line_number: entry.line_number,
                quote_type: entry.quote_type,
                is_comment: entry.is_comment,
                config: &self.config.settings,
            };
            let MaskOutput::Masked(mask) = instance.apply(&ctx) else {
                continue;
            };
            if &*mask == entry.value {
                continue;
            }
            masks.push(MaskRecord {
                line_number: entry.line_number,
                value_end_line: entry.value_end_line,
                value_start: entry.value_start,
                value_end: entry.value_end,
                quote_type: entry.quote_type,
                mask,
                value: entry.value,
            });
        }
        masks
    }

    /// Registry lookup; unknown names fall back to the default mode,
    /// and as a last resort to built-in `full` — over-masking is the
    /// safe failure direction.
    fn lookup_instance(&self, name: &str) -> &ModeInstance {
        if let Some(instance) = self.registry.get(name) {
            return instance;
        }
        mode::warn_unknown_mode(name);
        let default_name = self.resolver.default_mode();
        if let Some(instance) = self.registry.get(default_name) {
            return instance;
        }
        mode::warn_unknown_mode(default_name);
        self.registry.builtin_full()
    }
}

fn to_cached(records: Vec<MaskRecord<'_>>) -> Vec<CachedMask> {
    records.iter().map(CachedMask::from).collect()
}

/// Policy keying uses only the basename; full paths never reach the
/// resolver.
fn source_basename(source: &str) -> &str {
    source
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source)
}
