//! Lifting functions out of an argument tree.
//!
//! The walker clones every list and map into plain JSON, replacing each
//! function with `null` and recording a [`FunctionDescriptor`] for it.
//! Containers are memoized by identity: a container seen again after its
//! clone finished is reused (its functions get fresh descriptors at the new
//! position), while re-entering a container that is still being cloned is a
//! cycle and fails with [`ErrorCode::CircularReference`]. A reused clone
//! must still fit under the depth bound at its new position.
//!
//! Descriptor channels are `<base>_<n>` with `n` drawn from a process-wide
//! sequence, so a reused base never reproduces an earlier call's channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ErrorCode, IpcxError, Result};
use crate::path::{format_path, Segment};
use crate::types::{FunctionDescriptor, InvokeEnvelope};
use crate::value::Arg;

/// Default bound on nesting depth.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Suffix source for descriptor channels; never repeats within a process.
static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Deepest nesting accepted below the argument list.
    pub max_depth: usize,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Output of [`serialize_args`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Serialized {
    /// Arguments with functions replaced by `null`.
    pub args: Vec<Value>,
    pub descriptors: Vec<FunctionDescriptor>,
}

impl Serialized {
    pub fn into_envelope(self) -> InvokeEnvelope {
        InvokeEnvelope::new(self.args, self.descriptors)
    }
}

/// Lift every function out of `args`, naming reply channels after `base_channel`.
pub fn serialize_args(args: &[Arg], base_channel: &str) -> Result<Serialized> {
    serialize_args_with(args, base_channel, SerializeOptions::default())
}

pub fn serialize_args_with(
    args: &[Arg],
    base_channel: &str,
    options: SerializeOptions,
) -> Result<Serialized> {
    if args.is_empty() {
        debug!("serializing empty args");
        return Ok(Serialized::default());
    }

    let mut walker = Walker::new(Mode::Lift { base_channel }, options.max_depth);
    let values = walker.walk_args(args)?;

    debug!(
        base_channel,
        args = values.len(),
        functions = walker.descriptors.len(),
        "serialization completed"
    );

    Ok(Serialized {
        args: values,
        descriptors: walker.descriptors,
    })
}

/// Render a tree as plain JSON. Functions are [`ErrorCode::UnsupportedType`].
pub fn to_plain(arg: &Arg) -> Result<Value> {
    let mut walker = Walker::new(Mode::Plain, DEFAULT_MAX_DEPTH);
    walker.walk(arg, &mut Vec::new(), 0)
}

/// [`to_plain`] over an argument list.
pub fn to_plain_args(args: &[Arg]) -> Result<Vec<Value>> {
    Walker::new(Mode::Plain, DEFAULT_MAX_DEPTH).walk_args(args)
}

/// Number of descriptors [`serialize_args`] will emit for `args`.
///
/// Shared containers count once per position; cycles and anything deeper
/// than `max_depth` contribute nothing.
pub fn count_functions(args: &[Arg], max_depth: usize) -> usize {
    let mut memo = HashMap::new();
    args.iter()
        .map(|arg| count_in(arg, &mut memo, 1, max_depth))
        .sum()
}

fn count_in(arg: &Arg, memo: &mut HashMap<usize, Option<usize>>, depth: usize, max: usize) -> usize {
    if depth > max {
        return 0;
    }
    let (id, children): (usize, Vec<Arg>) = match arg {
        Arg::Function(_) => return 1,
        Arg::List(list) => (list.id(), list.snapshot()),
        Arg::Map(map) => (map.id(), map.snapshot().into_iter().map(|(_, v)| v).collect()),
        _ => return 0,
    };
    match memo.get(&id) {
        Some(Some(count)) => return *count,
        Some(None) => return 0,
        None => {}
    }
    memo.insert(id, None);
    let count = children
        .iter()
        .map(|child| count_in(child, memo, depth + 1, max))
        .sum();
    memo.insert(id, Some(count));
    count
}

#[derive(Clone, Copy)]
enum Mode<'a> {
    Lift { base_channel: &'a str },
    Plain,
}

#[derive(Clone)]
struct LiftedFn {
    /// Path below the memoized container.
    relative: Vec<Segment>,
    label: String,
}

enum Memo {
    InProgress,
    Done {
        value: Value,
        /// Levels below the container itself.
        height: usize,
        functions: Vec<LiftedFn>,
    },
}

struct Walker<'a> {
    mode: Mode<'a>,
    max_depth: usize,
    memo: HashMap<usize, Memo>,
    descriptors: Vec<FunctionDescriptor>,
}

impl<'a> Walker<'a> {
    fn new(mode: Mode<'a>, max_depth: usize) -> Self {
        Self {
            mode,
            max_depth,
            memo: HashMap::new(),
            descriptors: Vec::new(),
        }
    }

    fn walk_args(&mut self, args: &[Arg]) -> Result<Vec<Value>> {
        let mut path = Vec::with_capacity(8);
        let mut values = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            path.push(Segment::Index(index));
            values.push(self.walk(arg, &mut path, 1)?);
            path.pop();
        }
        Ok(values)
    }

    fn walk(&mut self, arg: &Arg, path: &mut Vec<Segment>, depth: usize) -> Result<Value> {
        if depth > self.max_depth {
            return Err(circular(
                "maximum serialization depth exceeded (possible circular reference)",
                path,
            )
            .with_context("depth", depth));
        }

        match arg {
            Arg::Null => Ok(Value::Null),
            Arg::Bool(b) => Ok(Value::Bool(*b)),
            Arg::Number(n) => Ok(Value::Number(n.clone())),
            Arg::String(s) => Ok(Value::String(s.clone())),
            Arg::Function(callback) => self.lift(callback.label(), path),
            Arg::Opaque(opaque) => {
                debug!(
                    path = %format_path(path),
                    type_name = opaque.type_name(),
                    "non-plain value passed through"
                );
                opaque.render().map_err(|err| {
                    IpcxError::new(
                        ErrorCode::SerializeFailed,
                        format!("failed to render {}: {err}", opaque.type_name()),
                    )
                    .with_context("path", format_path(path))
                })
            }
            Arg::List(list) => self.enter(list.id(), path, depth, |walker, path| {
                let items = list.snapshot();
                let mut cloned = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(Segment::Index(index));
                    cloned.push(walker.walk(item, path, depth + 1)?);
                    path.pop();
                }
                Ok(Value::Array(cloned))
            }),
            Arg::Map(map) => self.enter(map.id(), path, depth, |walker, path| {
                let entries = map.snapshot();
                let mut cloned = Map::new();
                for (key, entry) in &entries {
                    path.push(Segment::Key(key.clone()));
                    let value = walker.walk(entry, path, depth + 1)?;
                    path.pop();
                    cloned.insert(key.clone(), value);
                }
                Ok(Value::Object(cloned))
            }),
        }
    }

    fn enter<F>(
        &mut self,
        id: usize,
        path: &mut Vec<Segment>,
        depth: usize,
        clone: F,
    ) -> Result<Value>
    where
        F: FnOnce(&mut Self, &mut Vec<Segment>) -> Result<Value>,
    {
        match self.memo.get(&id) {
            Some(Memo::InProgress) => {
                return Err(circular("circular reference detected", path));
            }
            Some(Memo::Done { height, .. }) if depth + height > self.max_depth => {
                return Err(circular(
                    "maximum serialization depth exceeded (possible circular reference)",
                    path,
                )
                .with_context("depth", depth + height));
            }
            Some(Memo::Done {
                value, functions, ..
            }) => {
                let value = value.clone();
                let functions = functions.clone();
                debug!(path = %format_path(path), "reusing clone of shared container");
                self.replay(&functions, path);
                return Ok(value);
            }
            None => {}
        }

        self.memo.insert(id, Memo::InProgress);
        let first = self.descriptors.len();
        let value = clone(self, path)?;

        let prefix = path.len();
        let functions = self.descriptors[first..]
            .iter()
            .map(|descriptor| LiftedFn {
                relative: descriptor.segments[prefix..].to_vec(),
                label: descriptor.label.clone(),
            })
            .collect();
        self.memo.insert(
            id,
            Memo::Done {
                height: height(&value),
                value: value.clone(),
                functions,
            },
        );
        Ok(value)
    }

    fn replay(&mut self, functions: &[LiftedFn], path: &mut Vec<Segment>) {
        let prefix = path.len();
        for function in functions {
            path.extend(function.relative.iter().cloned());
            self.emit(function.label.clone(), path);
            path.truncate(prefix);
        }
    }

    fn lift(&mut self, label: Option<&str>, path: &[Segment]) -> Result<Value> {
        if let Mode::Plain = self.mode {
            return Err(IpcxError::new(
                ErrorCode::UnsupportedType,
                "functions cannot be sent as plain values",
            )
            .with_context("path", format_path(path)));
        }
        let label = label
            .map(str::to_string)
            .or_else(|| path.last().map(Segment::to_string))
            .unwrap_or_else(|| "fn".to_string());
        self.emit(label, path);
        Ok(Value::Null)
    }

    fn emit(&mut self, label: String, path: &[Segment]) {
        let Mode::Lift { base_channel } = self.mode else {
            return;
        };
        let channel = format!("{base_channel}_{}", CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed));
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(Segment::Key("args".to_string()));
        full.extend(path.iter().cloned());
        let index = format_path(&full);

        debug!(%index, %channel, %label, "function extracted");
        self.descriptors.push(FunctionDescriptor {
            label,
            index,
            channel,
            segments: path.to_vec(),
        });
    }
}

fn height(value: &Value) -> usize {
    let below = match value {
        Value::Array(items) => items.iter().map(height).max(),
        Value::Object(entries) => entries.values().map(height).max(),
        _ => return 0,
    };
    below.map_or(0, |h| h + 1)
}

fn circular(message: &str, path: &[Segment]) -> IpcxError {
    IpcxError::new(ErrorCode::CircularReference, message)
        .with_context("path", format_path(path))
}
