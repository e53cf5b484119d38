//! Masking engine for dotenv ("EDF") buffers.
//!
//! Given the bytes of an env file and a per-key policy, the engine
//! produces *mask decorations*: byte-exact spans of the original text
//! together with the replacement string an editor host should draw
//! over them. The real characters never enter the display pipeline;
//! the host overlays the mask and leaves the buffer untouched.
//!
//! The crate is a pure computation service: no I/O, no callbacks, no
//! background work. Hosts own the per-buffer caches and drive the
//! engine through [`Engine::generate`], [`Engine::generate_incremental`]
//! and [`Engine::refresh`].

use thiserror::Error as ThisError;

mod engine;
mod fingerprint;
mod mode;
mod parser;
mod pattern;
mod pool;


pub use engine::{
    BufferCache, CachedMask, Edit, Engine, EngineConfig, IncrementalMaskSet, MaskRecord, MaskSet,
    OverlaySpan, Refresh,
};
pub use mode::{
    CustomApply, FallbackMode, FullOptions, MaskOutput, ModeContext, ModeDef, ModeInfo,
    ModeInstance, PartialOptions, MODE_FULL, MODE_NONE, MODE_PARTIAL,
};
pub use parser::{parse, Entry, ParseOptions, ParseResult};
pub use pattern::Policy;

/// Span represents a byte range in the original content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Quoting style of a parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteType {
    None = 0,
    Single = 1,
    Double = 2,
}

impl QuoteType {
    pub fn is_quoted(self) -> bool {
        self != QuoteType::None
    }
}

/// Failures surfaced by the engine.
///
/// Only [`Error::InvalidEncoding`] can come out of the mask-producing
/// paths; everything else concerns registry and policy configuration
/// and leaves the previous state intact.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("input is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    #[error("mode '{mode}' rejected options: {detail}")]
    SchemaViolation { mode: String, detail: String },

    #[error("mode '{0}' is not registered")]
    ModeNotFound(String),

    #[error("mode '{0}' is built-in and cannot be replaced")]
    ReservedMode(String),

    #[error("pattern '{pattern}' does not compile: {detail}")]
    InvalidPattern { pattern: String, detail: String },
}
