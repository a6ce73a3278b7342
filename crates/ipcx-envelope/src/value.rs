//! In-process argument tree.
//!
//! [`Arg`] is what callers pass to `invoke` and what handlers receive. Lists
//! and maps are shared, interior-mutable containers: cloning an `Arg` clones
//! the handle, not the contents, so one container can sit at several
//! positions of a tree and a container can hold itself.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{Number, Value};

use crate::error::{BoxError, Result};

type CallbackFn = dyn Fn(Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync;
type RenderFn = fn(&(dyn Any + Send + Sync)) -> std::result::Result<Value, serde_json::Error>;

/// A node of an argument tree.
#[derive(Clone, Default)]
pub enum Arg {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(ArgList),
    Map(ArgMap),
    /// A live function. Lifted out of the tree when serialized.
    Function(Callback),
    /// A value that is not a plain container. Passed through as its rendering.
    Opaque(Opaque),
}

impl Arg {
    /// Build a fresh tree from plain JSON. Every container is newly allocated.
    pub fn from_plain(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => {
                Self::List(ArgList::from_vec(items.into_iter().map(Self::from_plain).collect()))
            }
            Value::Object(object) => Self::Map(ArgMap::from_entries(
                object.into_iter().map(|(k, v)| (k, Self::from_plain(v))),
            )),
        }
    }

    /// Render as plain JSON. Fails on functions and on cycles.
    pub fn to_plain(&self) -> Result<Value> {
        crate::serialize::to_plain(self)
    }

    /// Convenience constructor for a list.
    pub fn list(items: impl IntoIterator<Item = Arg>) -> Self {
        Self::List(ArgList::from_vec(items.into_iter().collect()))
    }

    /// Convenience constructor for an ordered map.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Arg)>) -> Self {
        Self::Map(ArgMap::from_entries(
            entries.into_iter().map(|(k, v)| (k.into(), v)),
        ))
    }

    /// Wrap a closure as a function argument.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::Function(Callback::new(f))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ArgList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ArgMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Self::Function(callback) => Some(callback),
            _ => None,
        }
    }

    /// Look up a map entry. `None` for missing keys and non-maps.
    pub fn get(&self, key: &str) -> Option<Arg> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Look up a list element. `None` when out of range or not a list.
    pub fn at(&self, index: usize) -> Option<Arg> {
        self.as_list().and_then(|list| list.get(index))
    }

    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Function(_) => "function",
            Self::Opaque(opaque) => opaque.type_name(),
        }
    }
}

// Containers print their identity and size only; trees may be cyclic.
impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::List(list) => write!(f, "List(#{:x}, len={})", list.id(), list.len()),
            Self::Map(map) => write!(f, "Map(#{:x}, len={})", map.id(), map.len()),
            Self::Function(callback) => write!(f, "{callback:?}"),
            Self::Opaque(opaque) => write!(f, "{opaque:?}"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::from_plain(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// Non-finite floats have no JSON form and become `Null`.
impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<ArgList> for Arg {
    fn from(value: ArgList) -> Self {
        Self::List(value)
    }
}

impl From<ArgMap> for Arg {
    fn from(value: ArgMap) -> Self {
        Self::Map(value)
    }
}

impl From<Callback> for Arg {
    fn from(value: Callback) -> Self {
        Self::Function(value)
    }
}

impl From<Opaque> for Arg {
    fn from(value: Opaque) -> Self {
        Self::Opaque(value)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, ordered list of arguments.
#[derive(Clone, Default)]
pub struct ArgList(Arc<Mutex<Vec<Arg>>>);

impl ArgList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Arg>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    /// Identity of the underlying container.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arg> {
        lock(&self.0).get(index).cloned()
    }

    pub fn push(&self, item: impl Into<Arg>) {
        lock(&self.0).push(item.into());
    }

    /// Replace the element at `index`, or append when `index == len`.
    ///
    /// Returns the item back when `index` is past the append slot.
    pub fn set(&self, index: usize, item: Arg) -> std::result::Result<(), Arg> {
        let mut items = lock(&self.0);
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => *slot = item,
            None if index == len => items.push(item),
            None => return Err(item),
        }
        Ok(())
    }

    /// Copy of the element handles. Nested containers stay shared.
    pub fn snapshot(&self) -> Vec<Arg> {
        lock(&self.0).clone()
    }
}

impl fmt::Debug for ArgList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArgList(#{:x}, len={})", self.id(), self.len())
    }
}

impl From<Vec<Arg>> for ArgList {
    fn from(items: Vec<Arg>) -> Self {
        Self::from_vec(items)
    }
}

/// Shared map of arguments that keeps insertion order.
#[derive(Clone, Default)]
pub struct ArgMap(Arc<Mutex<Vec<(String, Arg)>>>);

impl ArgMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates replace earlier values in place.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Arg)>) -> Self {
        let map = Self::new();
        for (key, value) in entries {
            map.insert(key, value);
        }
        map
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Arg> {
        lock(&self.0)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.0).iter().any(|(k, _)| k == key)
    }

    /// Insert or replace. A replaced key keeps its position.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Arg>) {
        let key = key.into();
        let value = value.into();
        let mut entries = lock(&self.0);
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn remove(&self, key: &str) -> Option<Arg> {
        let mut entries = lock(&self.0);
        let position = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(position).1)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.0).iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<(String, Arg)> {
        lock(&self.0).clone()
    }
}

impl fmt::Debug for ArgMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArgMap(#{:x}, keys={:?})", self.id(), self.keys())
    }
}

/// A callable argument.
///
/// On the calling side this wraps the user's closure. On the handling side
/// it is a proxy that forwards its arguments back to the caller.
#[derive(Clone)]
pub struct Callback {
    label: Option<Arc<str>>,
    func: Arc<CallbackFn>,
}

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            label: None,
            func: Arc::new(f),
        }
    }

    /// A callback with a diagnostic label. The label travels in descriptors.
    pub fn named<F>(label: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            label: Some(label.into()),
            func: Arc::new(f),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn call(&self, args: Vec<Arg>) -> std::result::Result<(), BoxError> {
        (self.func)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "Callback({label})"),
            None => f.write_str("Callback"),
        }
    }
}

/// A non-plain value carried through an argument tree.
///
/// It crosses the link as whatever its renderer produces: the `Serialize`
/// form for [`Opaque::new`], `null` for [`Opaque::handle`].
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    render: RenderFn,
}

impl Opaque {
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + Any + Send + Sync,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
            render: render_serialize::<T>,
        }
    }

    /// An engine-native handle with no plain form. Renders as `null`.
    pub fn handle<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
            render: render_null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn render(&self) -> std::result::Result<Value, serde_json::Error> {
        (self.render)(self.value.as_ref())
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

fn render_serialize<T: Serialize + Any>(
    value: &(dyn Any + Send + Sync),
) -> std::result::Result<Value, serde_json::Error> {
    match value.downcast_ref::<T>() {
        Some(value) => serde_json::to_value(value),
        None => Ok(Value::Null),
    }
}

fn render_null(_: &(dyn Any + Send + Sync)) -> std::result::Result<Value, serde_json::Error> {
    Ok(Value::Null)
}
