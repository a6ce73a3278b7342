//! Addressing positions inside an argument tree.
//!
//! A path is a list of [`Segment`]s from the root argument list. Its
//! display form (`args[0].options.onProgress`) is for diagnostics; the
//! segment list is what addresses a slot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, IpcxError, Result};
use crate::value::{Arg, ArgList, ArgMap};

/// One step of a path: a list index or a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Index(usize),
    Key(String),
}

impl Segment {
    /// The index this segment addresses in a list, if any. Digit-only keys count.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(key) if is_digits(key) => key.parse().ok(),
            Self::Key(_) => None,
        }
    }

    /// The key this segment addresses in a map.
    pub fn as_key(&self) -> String {
        match self {
            Self::Index(index) => index.to_string(),
            Self::Key(key) => key.clone(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Render segments as `first.key[0].other`.
pub fn format_path(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (position, segment) in segments.iter().enumerate() {
        if position == 0 {
            out.push_str(&segment.to_string());
        } else if segment.as_index().is_some() {
            out.push_str(&format!("[{segment}]"));
        } else {
            out.push('.');
            out.push_str(&segment.to_string());
        }
    }
    out
}

/// Parse a display path back into segments.
///
/// Runs of word characters become keys and `[digits]` becomes an index;
/// anything else separates tokens and is dropped.
pub fn parse_path(path: &str) -> Vec<Segment> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            let digits: String = chars[i + 1..]
                .iter()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            let close = i + 1 + digits.len();
            if !digits.is_empty() && chars.get(close) == Some(&']') {
                if let Ok(index) = digits.parse() {
                    segments.push(Segment::Index(index));
                    i = close + 1;
                    continue;
                }
            }
            i += 1;
        } else if is_word(chars[i]) {
            let start = i;
            while i < chars.len() && is_word(chars[i]) {
                i += 1;
            }
            segments.push(Segment::Key(chars[start..i].iter().collect()));
        } else {
            i += 1;
        }
    }
    segments
}

fn child(node: &Arg, segment: &Segment) -> Option<Arg> {
    match node {
        Arg::List(list) => segment.as_index().and_then(|index| list.get(index)),
        Arg::Map(map) => map.get(&segment.as_key()),
        _ => None,
    }
}

/// Resolve a path from `root`. `None` if any step is missing.
pub fn get_by_path(root: &Arg, segments: &[Segment]) -> Option<Arg> {
    let mut node = root.clone();
    for segment in segments {
        node = child(&node, segment)?;
    }
    Some(node)
}

/// Store `value` at the path below `root`.
///
/// Missing or scalar intermediate slots are replaced by a new list (when the
/// next segment is an index) or map. A list index may address an existing
/// slot or the append slot. Fails when `root` is not a container, when the
/// path is empty, when a key addresses a list, or when an index is past the
/// append slot.
pub fn set_by_path(root: &Arg, segments: &[Segment], value: Arg) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(set_error("empty path", segments));
    };

    let mut node = root.clone();
    for (depth, segment) in parents.iter().enumerate() {
        let next = match child(&node, segment) {
            Some(existing @ (Arg::List(_) | Arg::Map(_))) => existing,
            _ => {
                let fresh = if segments[depth + 1].as_index().is_some() {
                    Arg::List(ArgList::new())
                } else {
                    Arg::Map(ArgMap::new())
                };
                store(&node, segment, fresh.clone(), segments)?;
                fresh
            }
        };
        node = next;
    }
    store(&node, last, value, segments)
}

fn store(node: &Arg, segment: &Segment, value: Arg, path: &[Segment]) -> Result<()> {
    match node {
        Arg::List(list) => {
            let index = segment
                .as_index()
                .ok_or_else(|| set_error("non-numeric key on a list", path))?;
            let len = list.len();
            list.set(index, value).map_err(|_| {
                set_error(&format!("index {index} is past the end of a list of {len}"), path)
            })
        }
        Arg::Map(map) => {
            map.insert(segment.as_key(), value);
            Ok(())
        }
        other => Err(set_error(
            &format!("cannot set a child of a {}", other.type_name()),
            path,
        )),
    }
}

fn set_error(reason: &str, path: &[Segment]) -> IpcxError {
    IpcxError::new(
        ErrorCode::HydrationFailed,
        format!("cannot set value at path: {reason}"),
    )
    .with_context("path", format_path(path))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn segs(raw: serde_json::Value) -> Vec<Segment> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn format_mixes_keys_and_indices() {
        let path = segs(json!(["args", 0, "options", "onProgress", 2]));
        assert_eq!(format_path(&path), "args[0].options.onProgress[2]");
        assert_eq!(format_path(&[]), "");
        assert_eq!(format_path(&[Segment::from("args"), Segment::from("7")]), "args[7]");
    }

    #[test]
    fn parse_reverses_format() {
        assert_eq!(
            parse_path("args[0].options.onProgress"),
            segs(json!(["args", 0, "options", "onProgress"]))
        );
        assert_eq!(parse_path("a[x].b"), segs(json!(["a", "x", "b"])));
        assert!(parse_path("...").is_empty());
    }

    #[test]
    fn segments_deserialize_untagged() {
        let path = segs(json!([1, "cb"]));
        assert_eq!(path, vec![Segment::Index(1), Segment::Key("cb".into())]);
        assert!(serde_json::from_value::<Vec<Segment>>(json!([true])).is_err());
    }

    #[test]
    fn get_walks_lists_and_maps() {
        let root = Arg::from_plain(json!([{"items": [10, 20]}]));
        let found = get_by_path(&root, &segs(json!([0, "items", 1]))).unwrap();
        assert_eq!(found.as_i64(), Some(20));
        assert!(get_by_path(&root, &segs(json!([0, "missing"]))).is_none());
        assert!(get_by_path(&root, &segs(json!([0, "items", 1, "deeper"]))).is_none());
    }

    #[test]
    fn set_replaces_existing_slot() {
        let root = Arg::from_plain(json!([{"cb": null}]));
        set_by_path(&root, &segs(json!([0, "cb"])), Arg::from("here")).unwrap();
        assert_eq!(root.at(0).unwrap().get("cb").unwrap().as_str(), Some("here"));
    }

    #[test]
    fn set_creates_missing_containers() {
        let root = Arg::List(ArgList::new());
        set_by_path(&root, &segs(json!([0, "deep", 0])), Arg::from(true)).unwrap();
        assert_eq!(root.to_plain().unwrap(), json!([{"deep": [true]}]));
    }

    #[test]
    fn set_rejects_bad_targets() {
        let root = Arg::List(ArgList::new());
        let err = set_by_path(&root, &[], Arg::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::HydrationFailed);

        let err = set_by_path(&root, &segs(json!(["key"])), Arg::Null).unwrap_err();
        assert_eq!(err.context["path"], "key");

        let err = set_by_path(&Arg::from(1), &segs(json!([0])), Arg::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::HydrationFailed);

        let err = set_by_path(&root, &segs(json!([2])), Arg::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::HydrationFailed);
        let err = set_by_path(&root, &[Segment::Index(usize::MAX)], Arg::Null).unwrap_err();
        assert_eq!(err.context["path"], usize::MAX.to_string());
        assert!(root.as_list().unwrap().is_empty());
    }
}
