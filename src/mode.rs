//! Mode registry and the built-in masking modes.
//!
//! A mode turns an entry's value into the string the host displays.
//! The built-ins (`full`, `partial`, `none`) are variants of one
//! tagged instance type; user-defined modes plug in as callables.
//! Options are validated against each mode's declared JSON Schema
//! when the mode is configured, never on the hot path.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{pool, Error, QuoteType};

pub const MODE_FULL: &str = "full";
pub const MODE_PARTIAL: &str = "partial";
pub const MODE_NONE: &str = "none";

const BUILTIN_MODES: [&str; 3] = [MODE_FULL, MODE_PARTIAL, MODE_NONE];

/// Entry context handed to a mode for one value.
#[derive(Debug, Clone, Copy)]
pub struct ModeContext<'a> {
    pub key: &'a str,
    pub value: &'a str,
    /// Basename of the buffer's source file; empty when unknown.
    pub source: &'a str,
    pub line_number: usize,
    pub quote_type: QuoteType,
    pub is_comment: bool,
    /// Host-level settings, shared by every mode.
    pub config: &'a Map<String, Value>,
}

/// User-supplied mask function: entry context plus the mode's bound
/// options. Must be pure with respect to its inputs.
pub type CustomApply = Arc<dyn Fn(&ModeContext<'_>, &Map<String, Value>) -> String + Send + Sync>;

/// What a mode produced for one value. `Identity` (and any masked
/// output equal to the value) yields no decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskOutput {
    Identity,
    Masked(Arc<str>),
}

/// Registration payload for a user-defined mode.
#[derive(Clone)]
pub struct ModeDef {
    pub apply: CustomApply,
    /// JSON Schema the options must satisfy; `None` accepts anything.
    pub option_schema: Option<Value>,
    pub default_options: Map<String, Value>,
}

impl fmt::Debug for ModeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeDef")
            .field("option_schema", &self.option_schema)
            .field("default_options", &self.default_options)
            .finish_non_exhaustive()
    }
}

/// Description of a registered mode.
#[derive(Debug, Clone)]
pub struct ModeInfo {
    pub name: String,
    pub builtin: bool,
    pub options: Map<String, Value>,
    pub option_schema: Option<Value>,
}

// ───────────────────────── built-in options ─────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FullOptions {
    pub mask_char: char,
    /// Mask length follows the value's byte length; ignored when
    /// `fixed_length` is set.
    pub preserve_length: bool,
    pub fixed_length: Option<usize>,
}

impl Default for FullOptions {
    fn default() -> Self {
        Self {
            mask_char: '*',
            preserve_length: true,
            fixed_length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartialOptions {
    pub mask_char: char,
    pub show_start: usize,
    pub show_end: usize,
    /// Values too short to keep this many masked bytes delegate to
    /// `fallback_mode`.
    pub min_mask: usize,
    pub fallback_mode: FallbackMode,
}

impl Default for PartialOptions {
    fn default() -> Self {
        Self {
            mask_char: '*',
            show_start: 3,
            show_end: 3,
            min_mask: 3,
            fallback_mode: FallbackMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    Full,
    None,
}

fn full_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "mask_char": { "type": "string", "minLength": 1, "maxLength": 1 },
            "preserve_length": { "type": "boolean" },
            "fixed_length": { "type": "integer", "minimum": 1 }
        }
    })
}

fn partial_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "mask_char": { "type": "string", "minLength": 1, "maxLength": 1 },
            "show_start": { "type": "integer", "minimum": 0 },
            "show_end": { "type": "integer", "minimum": 0 },
            "min_mask": { "type": "integer", "minimum": 1 },
            "fallback_mode": { "enum": ["full", "none"] }
        }
    })
}

fn none_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false
    })
}

// ───────────────────────── instances ─────────────────────────

/// A mode bound to validated options, ready to apply.
#[derive(Clone)]
pub enum ModeInstance {
    Full(FullOptions),
    Partial(PartialOptions),
    None,
    Custom {
        name: String,
        apply: CustomApply,
        options: Arc<Map<String, Value>>,
    },
}

impl fmt::Debug for ModeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeInstance::Full(opts) => f.debug_tuple("Full").field(opts).finish(),
            ModeInstance::Partial(opts) => f.debug_tuple("Partial").field(opts).finish(),
            ModeInstance::None => f.write_str("None"),
            ModeInstance::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
        }
    }
}

impl ModeInstance {
    pub fn apply(&self, ctx: &ModeContext<'_>) -> MaskOutput {
        match self {
            ModeInstance::None => MaskOutput::Identity,
            ModeInstance::Full(opts) => MaskOutput::Masked(mask_full(ctx.value, opts)),
            ModeInstance::Partial(opts) => mask_partial(ctx.value, opts),
            ModeInstance::Custom { apply, options, .. } => {
                let masked = apply(ctx, options);
                if masked == ctx.value {
                    MaskOutput::Identity
                } else {
                    MaskOutput::Masked(Arc::from(masked))
                }
            }
        }
    }
}

fn mask_full(value: &str, opts: &FullOptions) -> Arc<str> {
    if let Some(len) = opts.fixed_length {
        pool::fill(opts.mask_char, len)
    } else if opts.preserve_length {
        pool::fill(opts.mask_char, value.len())
    } else {
        pool::fill(opts.mask_char, 1)
    }
}

fn mask_partial(value: &str, opts: &PartialOptions) -> MaskOutput {
    let len = value.len();
    let visible = opts.show_start.saturating_add(opts.show_end);
    // Counting is by byte length; a prefix or suffix that would split
    // a code point also delegates to the fallback.
    if len <= visible.saturating_add(opts.min_mask)
        || !value.is_char_boundary(opts.show_start)
        || !value.is_char_boundary(len - opts.show_end)
    {
        return match opts.fallback_mode {
            FallbackMode::Full => MaskOutput::Masked(pool::fill(opts.mask_char, len)),
            FallbackMode::None => MaskOutput::Identity,
        };
    }
    let middle = len - visible;
    let fill = pool::fill(opts.mask_char, middle);
    let mut out = String::with_capacity(opts.show_start + fill.len() + opts.show_end);
    out.push_str(&value[..opts.show_start]);
    out.push_str(&fill);
    out.push_str(&value[len - opts.show_end..]);
    MaskOutput::Masked(Arc::from(out))
}

// ───────────────────────── registry ─────────────────────────

#[derive(Clone)]
enum ModeKind {
    Full,
    Partial,
    None,
    Custom(CustomApply),
}

struct ModeSlot {
    kind: ModeKind,
    schema: Option<Arc<JSONSchema>>,
    raw_schema: Option<Value>,
    options: Map<String, Value>,
    instance: ModeInstance,
}

pub(crate) struct ModeRegistry {
    slots: HashMap<String, ModeSlot>,
}

static FALLBACK_FULL: Lazy<ModeInstance> =
    Lazy::new(|| ModeInstance::Full(FullOptions::default()));

impl ModeRegistry {
    pub(crate) fn with_builtins() -> Self {
        let mut slots = HashMap::new();
        slots.insert(
            MODE_FULL.to_string(),
            builtin_slot(ModeKind::Full, full_schema()),
        );
        slots.insert(
            MODE_PARTIAL.to_string(),
            builtin_slot(ModeKind::Partial, partial_schema()),
        );
        slots.insert(
            MODE_NONE.to_string(),
            builtin_slot(ModeKind::None, none_schema()),
        );
        Self { slots }
    }

    pub(crate) fn register(&mut self, name: &str, def: ModeDef) -> Result<(), Error> {
        if BUILTIN_MODES.contains(&name) {
            return Err(Error::ReservedMode(name.to_string()));
        }
        let schema = match &def.option_schema {
            Some(raw) => Some(Arc::new(compile_schema(name, raw)?)),
            None => None,
        };
        if let Some(compiled) = &schema {
            validate_options(name, compiled, &def.default_options)?;
        }
        let kind = ModeKind::Custom(def.apply);
        let instance = build_instance(&kind, name, &def.default_options)?;
        self.slots.insert(
            name.to_string(),
            ModeSlot {
                kind,
                schema,
                raw_schema: def.option_schema,
                options: def.default_options,
                instance,
            },
        );
        Ok(())
    }

    /// Validate and merge `options` into the mode's configuration.
    /// On rejection the previous configuration is retained.
    pub(crate) fn configure(&mut self, name: &str, options: Map<String, Value>) -> Result<(), Error> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| Error::ModeNotFound(name.to_string()))?;
        if let Some(schema) = &slot.schema {
            validate_options(name, schema, &options)?;
        }
        let mut merged = slot.options.clone();
        merged.extend(options);
        let instance = build_instance(&slot.kind, name, &merged)?;
        slot.options = merged;
        slot.instance = instance;
        Ok(())
    }

    /// A detached instance bound to the mode's options plus
    /// `overrides`; the registry is left untouched.
    pub(crate) fn create(
        &self,
        name: &str,
        overrides: Map<String, Value>,
    ) -> Result<ModeInstance, Error> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| Error::ModeNotFound(name.to_string()))?;
        if let Some(schema) = &slot.schema {
            validate_options(name, schema, &overrides)?;
        }
        let mut merged = slot.options.clone();
        merged.extend(overrides);
        build_instance(&slot.kind, name, &merged)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ModeInstance> {
        self.slots.get(name).map(|slot| &slot.instance)
    }

    /// The mandatory `full` mode; last-resort fallback for resolution.
    pub(crate) fn builtin_full(&self) -> &ModeInstance {
        self.get(MODE_FULL).unwrap_or(&FALLBACK_FULL)
    }

    pub(crate) fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn info(&self, name: &str) -> Result<ModeInfo, Error> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| Error::ModeNotFound(name.to_string()))?;
        Ok(ModeInfo {
            name: name.to_string(),
            builtin: BUILTIN_MODES.contains(&name),
            options: slot.options.clone(),
            option_schema: slot.raw_schema.clone(),
        })
    }
}

fn builtin_slot(kind: ModeKind, raw_schema: Value) -> ModeSlot {
    let schema = JSONSchema::compile(&raw_schema)
        .ok()
        .map(Arc::new);
    let options = Map::new();
    let instance = match kind {
        ModeKind::Full => ModeInstance::Full(FullOptions::default()),
        ModeKind::Partial => ModeInstance::Partial(PartialOptions::default()),
        ModeKind::None => ModeInstance::None,
        ModeKind::Custom(_) => ModeInstance::None,
    };
    ModeSlot {
        kind,
        schema,
        raw_schema: Some(raw_schema),
        options,
        instance,
    }
}

fn build_instance(
    kind: &ModeKind,
    name: &str,
    options: &Map<String, Value>,
) -> Result<ModeInstance, Error> {
    let violation = |err: serde_json::Error| Error::SchemaViolation {
        mode: name.to_string(),
        detail: err.to_string(),
    };
    match kind {
        ModeKind::Full => {
            let opts: FullOptions =
                serde_json::from_value(Value::Object(options.clone())).map_err(violation)?;
            Ok(ModeInstance::Full(opts))
        }
        ModeKind::Partial => {
            let opts: PartialOptions =
                serde_json::from_value(Value::Object(options.clone())).map_err(violation)?;
            Ok(ModeInstance::Partial(opts))
        }
        ModeKind::None => Ok(ModeInstance::None),
        ModeKind::Custom(apply) => Ok(ModeInstance::Custom {
            name: name.to_string(),
            apply: Arc::clone(apply),
            options: Arc::new(options.clone()),
        }),
    }
}

fn compile_schema(name: &str, raw: &Value) -> Result<JSONSchema, Error> {
    JSONSchema::compile(raw).map_err(|err| Error::SchemaViolation {
        mode: name.to_string(),
        detail: format!("schema does not compile: {err}"),
    })
}

fn validate_options(
    name: &str,
    schema: &JSONSchema,
    options: &Map<String, Value>,
) -> Result<(), Error> {
    let instance = Value::Object(options.clone());
    if let Err(errors) = schema.validate(&instance) {
        let detail = errors
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::SchemaViolation {
            mode: name.to_string(),
            detail,
        });
    }
    Ok(())
}

// ───── diagnostics ─────

static WARNED_MODES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Warn once per process lifetime about a policy naming an
/// unregistered mode.
pub(crate) fn warn_unknown_mode(name: &str) {
    if let Ok(mut warned) = WARNED_MODES.lock() {
        if warned.insert(name.to_string()) {
            log::warn!("mode '{name}' is not registered; falling back to the default mode");
        }
    }
}
