//! Path addressing into document trees.
//!
//! A [`Path`] is an ordered sequence of segments addressing a location inside
//! a document: dot notation for mapping keys (`user.name`), bracket notation
//! for sequence indices (`items[0]`) or for keys containing special
//! characters (`["a.b"]`). The empty path addresses the whole document.
//!
//! Resolution rules are identical for reads and writes: a segment is treated
//! as a sequence index only when the container it addresses into already is,
//! or is being created as, a sequence; against a mapping, numeric segments
//! become string keys.

use crate::error::PathError;
use crate::value::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single segment of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Mapping key: `.foo` or `["foo"]`.
    Key(String),
    /// Sequence index: `[0]`.
    Index(usize),
}

impl PathSegment {
    /// The mapping key this segment denotes when addressing into a mapping.
    /// Index segments become their decimal string form.
    #[must_use]
    pub fn mapping_key(&self) -> Cow<'_, str> {
        match self {
            PathSegment::Key(k) => Cow::Borrowed(k),
            PathSegment::Index(i) => Cow::Owned(i.to_string()),
        }
    }

    /// The sequence index this segment denotes when addressing into a
    /// sequence, if it has one. Key segments qualify when their text parses
    /// as an index.
    #[must_use]
    pub fn sequence_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(k) => k.parse().ok(),
        }
    }
}

/// A parsed path into a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    /// The root path (empty), addressing the whole document.
    #[must_use]
    pub fn root() -> Self {
        Path {
            segments: Vec::new(),
        }
    }

    /// Build a path from segments.
    #[must_use]
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Path { segments }
    }

    /// The segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a key segment (builder form).
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    /// Append an index segment (builder form).
    #[must_use]
    pub fn index(mut self, idx: usize) -> Self {
        self.segments.push(PathSegment::Index(idx));
        self
    }

    /// The parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Path {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// The last segment, or `None` for the root.
    #[must_use]
    pub fn last_segment(&self) -> Option<&PathSegment> {
        self.segments.last()
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Path::root());
        }

        let chars: Vec<char> = s.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        // A single leading dot is tolerated: ".a" parses as "a".
        if chars[0] == '.' {
            i = 1;
            if i >= chars.len() {
                return Err(PathError::EmptyKey(i));
            }
        }

        while i < chars.len() {
            if chars[i] == '.' {
                i += 1;
                if i >= chars.len() || chars[i] == '.' {
                    return Err(PathError::EmptyKey(i));
                }
            }

            if chars[i] == '[' {
                let start = i;
                i += 1;
                if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
                    // Quoted key: ['a.b'] or ["a.b"].
                    let quote = chars[i];
                    i += 1;
                    let key_start = i;
                    while i < chars.len() && chars[i] != quote {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(PathError::UnclosedQuote(start + 1));
                    }
                    let key: String = chars[key_start..i].iter().collect();
                    i += 1;
                    if i >= chars.len() {
                        return Err(PathError::UnclosedBracket(start));
                    }
                    if chars[i] != ']' {
                        return Err(PathError::UnexpectedChar {
                            ch: chars[i],
                            position: i,
                        });
                    }
                    i += 1;
                    segments.push(PathSegment::Key(key));
                } else {
                    // Bare bracket content: an index if all digits, a key
                    // otherwise.
                    let content_start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(PathError::UnclosedBracket(start));
                    }
                    let content: String = chars[content_start..i].iter().collect();
                    i += 1;
                    if content.is_empty() {
                        return Err(PathError::InvalidIndex {
                            position: content_start,
                            text: content,
                        });
                    }
                    if content.chars().all(|c| c.is_ascii_digit()) {
                        let idx = content.parse().map_err(|_| PathError::InvalidIndex {
                            position: content_start,
                            text: content.clone(),
                        })?;
                        segments.push(PathSegment::Index(idx));
                    } else {
                        segments.push(PathSegment::Key(content));
                    }
                }
            } else if chars[i] == ']' {
                return Err(PathError::UnexpectedChar {
                    ch: ']',
                    position: i,
                });
            } else {
                let key_start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' && chars[i] != ']' {
                    i += 1;
                }
                let key: String = chars[key_start..i].iter().collect();
                segments.push(PathSegment::Key(key));
            }
        }

        Ok(Path { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            match seg {
                PathSegment::Key(k) => {
                    let needs_brackets = k.is_empty()
                        || k.chars().any(|c| c == '.' || c == '[' || c == ']')
                        || k.chars().all(|c| c.is_ascii_digit());
                    if needs_brackets {
                        let quote = if k.contains('"') { '\'' } else { '"' };
                        write!(f, "[{quote}{k}{quote}]")?;
                    } else {
                        if !first {
                            write!(f, ".")?;
                        }
                        write!(f, "{k}")?;
                    }
                }
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
            first = false;
        }
        Ok(())
    }
}

/// Read the value a path addresses inside a document.
///
/// Returns `None` when the location is absent: an intermediate segment is
/// missing, or addresses into something that is not a container. Absence is
/// distinct from a stored `Null`, which resolves to `Some(&Value::Null)`.
pub fn resolve<'a>(document: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = document;
    for seg in path.segments() {
        current = match current {
            Value::Mapping(map) => map.get(seg.mapping_key().as_ref())?,
            Value::Sequence(items) => items.get(seg.sequence_index()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Mutable variant of [`resolve`]. Never creates missing locations.
pub fn resolve_mut<'a>(document: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let mut current = document;
    for seg in path.segments() {
        current = match current {
            Value::Mapping(map) => map.get_mut(seg.mapping_key().as_ref())?,
            Value::Sequence(items) => items.get_mut(seg.sequence_index()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write a value at a path, creating intermediate containers as needed.
///
/// An intermediate that is not a suitable container is destructively
/// replaced: key segments create mappings, index segments create sequences.
/// An index beyond a sequence's end pads the gap with `Null`. Assigning with
/// the root path replaces the whole document. Assignment cannot fail.
pub fn assign(document: &mut Value, path: &Path, value: Value) {
    if path.is_root() {
        *document = value;
        return;
    }

    let segments = path.segments();
    let mut current = document;

    for (i, seg) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();

        // Make the node this segment addresses into a suitable container.
        let traversable = match (&*current, seg.sequence_index()) {
            (Value::Mapping(_), _) => true,
            (Value::Sequence(_), Some(_)) => true,
            _ => false,
        };
        if !traversable {
            *current = match seg {
                PathSegment::Key(_) => Value::Mapping(BTreeMap::new()),
                PathSegment::Index(_) => Value::Sequence(Vec::new()),
            };
        }

        match current {
            Value::Mapping(map) => {
                let key = seg.mapping_key().into_owned();
                if last {
                    map.insert(key, value);
                    return;
                }
                current = map.entry(key).or_insert(Value::Null);
            }
            Value::Sequence(items) => {
                let idx = seg
                    .sequence_index()
                    .expect("normalized sequence segment has an index");
                if items.len() <= idx {
                    items.resize(idx + 1, Value::Null);
                }
                if last {
                    items[idx] = value;
                    return;
                }
                current = &mut items[idx];
            }
            _ => unreachable!("normalized node is a container"),
        }
    }
}

/// Delete the value a path addresses, returning it.
///
/// Removing a mapping key deletes the entry. Removing a sequence element
/// sets the slot to `Null`, preserving the indices of the remaining
/// elements. Removing with the root path takes the whole document, leaving
/// `Null`. Returns `None` when the location is absent.
pub fn remove(document: &mut Value, path: &Path) -> Option<Value> {
    if path.is_root() {
        return Some(document.take());
    }

    let parent_path = path.parent()?;
    let last = path.last_segment()?;
    let parent = resolve_mut(document, &parent_path)?;

    match parent {
        Value::Mapping(map) => map.remove(last.mapping_key().as_ref()),
        Value::Sequence(items) => {
            let idx = last.sequence_index()?;
            if idx < items.len() {
                Some(items[idx].take())
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn parse_empty_is_root() {
        assert!(path("").is_root());
    }

    #[test]
    fn parse_dot_and_bracket_notation() {
        assert_eq!(
            path("a.b[0].c").segments(),
            &[
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(0),
                PathSegment::Key("c".into()),
            ]
        );
        assert_eq!(path("[0]").segments(), &[PathSegment::Index(0)]);
        assert_eq!(
            path(r#"["a.b"]"#).segments(),
            &[PathSegment::Key("a.b".into())]
        );
        assert_eq!(path("['x']").segments(), &[PathSegment::Key("x".into())]);
        assert_eq!(path("[abc]").segments(), &[PathSegment::Key("abc".into())]);
    }

    #[test]
    fn parse_numeric_dot_segment_is_a_key() {
        // Dot notation always produces keys; only brackets produce indices.
        assert_eq!(path("a.0").segments()[1], PathSegment::Key("0".into()));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            "a..b".parse::<Path>(),
            Err(PathError::EmptyKey(_))
        ));
        assert!(matches!("a.".parse::<Path>(), Err(PathError::EmptyKey(_))));
        assert!(matches!(
            "a[0".parse::<Path>(),
            Err(PathError::UnclosedBracket(_))
        ));
        assert!(matches!(
            "a['x".parse::<Path>(),
            Err(PathError::UnclosedQuote(_))
        ));
        assert!(matches!(
            "a[]".parse::<Path>(),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            "a]b".parse::<Path>(),
            Err(PathError::UnexpectedChar { .. })
        ));
    }

    #[test]
    fn display_round_trip() {
        for s in ["", "a", "a.b", "a[0].b", "[3]", r#"["a.b"].c"#] {
            let p = path(s);
            let shown = p.to_string();
            assert_eq!(shown.parse::<Path>().unwrap(), p, "via {shown:?}");
        }
        // Numeric keys display in quoted-bracket form so they parse back as
        // keys, not indices.
        let numeric_key = Path::root().key("0");
        assert_eq!(numeric_key.to_string().parse::<Path>().unwrap(), numeric_key);
    }

    #[test]
    fn resolve_nested() {
        let doc = Value::mapping([(
            "a",
            Value::mapping([(
                "b",
                Value::sequence([Value::Int(1), Value::mapping([("c", Value::Int(2))])]),
            )]),
        )]);

        assert_eq!(resolve(&doc, &path("a.b[1].c")), Some(&Value::Int(2)));
        assert_eq!(resolve(&doc, &path("a.b[0]")), Some(&Value::Int(1)));
        assert_eq!(resolve(&doc, &path("")), Some(&doc));
        assert_eq!(resolve(&doc, &path("a.x")), None);
        assert_eq!(resolve(&doc, &path("a.b[5]")), None);
        assert_eq!(resolve(&doc, &path("a.b[0].c")), None);
    }

    #[test]
    fn absent_is_distinct_from_null() {
        let doc = Value::mapping([("x", Value::Null)]);
        assert_eq!(resolve(&doc, &path("x")), Some(&Value::Null));
        assert_eq!(resolve(&doc, &path("y")), None);
    }

    #[test]
    fn assign_creates_intermediates() {
        let mut doc = Value::Null;
        assign(&mut doc, &path("user.profile.name"), Value::from("Alice"));
        assert_eq!(
            resolve(&doc, &path("user.profile.name")),
            Some(&Value::String("Alice".into()))
        );
    }

    #[test]
    fn assign_index_creates_sequence_and_pads() {
        let mut doc = Value::Null;
        assign(&mut doc, &path("items[2]"), Value::Int(9));
        assert_eq!(
            resolve(&doc, &path("items")),
            Some(&Value::Sequence(vec![
                Value::Null,
                Value::Null,
                Value::Int(9)
            ]))
        );
    }

    #[test]
    fn assign_replaces_non_container_intermediate() {
        let mut doc = Value::mapping([("a", Value::Int(1))]);
        assign(&mut doc, &path("a.b"), Value::Int(2));
        assert_eq!(resolve(&doc, &path("a.b")), Some(&Value::Int(2)));
    }

    #[test]
    fn assign_root_replaces_document() {
        let mut doc = Value::mapping([("a", Value::Int(1))]);
        assign(&mut doc, &Path::root(), Value::Int(7));
        assert_eq!(doc, Value::Int(7));
    }

    #[test]
    fn numeric_segment_against_mapping_is_a_string_key() {
        let mut doc = Value::mapping([("a", Value::Int(1))]);
        assign(&mut doc, &path("[0]").key("x"), Value::Int(3));
        // The existing mapping is kept; "0" became a string key.
        assert_eq!(resolve(&doc, &path("a")), Some(&Value::Int(1)));
        assert_eq!(resolve(&doc, &Path::root().key("0").key("x")), Some(&Value::Int(3)));
    }

    #[test]
    fn numeric_key_against_sequence_is_an_index() {
        let mut doc = Value::mapping([("a", Value::sequence([Value::Int(1), Value::Int(2)]))]);
        assign(&mut doc, &path("a.1"), Value::Int(5));
        assert_eq!(
            resolve(&doc, &path("a")),
            Some(&Value::sequence([Value::Int(1), Value::Int(5)]))
        );
    }

    #[test]
    fn assign_idempotence() {
        let p = path("a.b[1].c");
        let mut d1 = Value::Null;
        assign(&mut d1, &p, Value::Int(1));
        assign(&mut d1, &p, Value::Int(2));

        let mut d2 = Value::Null;
        assign(&mut d2, &p, Value::Int(2));
        assert_eq!(d1, d2);
    }

    #[test]
    fn remove_mapping_key_deletes_entry() {
        let mut doc = Value::mapping([("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(remove(&mut doc, &path("a")), Some(Value::Int(1)));
        assert_eq!(resolve(&doc, &path("a")), None);
        assert_eq!(resolve(&doc, &path("b")), Some(&Value::Int(2)));
    }

    #[test]
    fn remove_sequence_element_leaves_hole() {
        let mut doc = Value::mapping([(
            "xs",
            Value::sequence([Value::Int(1), Value::Int(2), Value::Int(3)]),
        )]);
        assert_eq!(remove(&mut doc, &path("xs[1]")), Some(Value::Int(2)));
        // Index stability: the remaining elements keep their positions.
        assert_eq!(
            resolve(&doc, &path("xs")),
            Some(&Value::sequence([
                Value::Int(1),
                Value::Null,
                Value::Int(3)
            ]))
        );
        assert_eq!(resolve(&doc, &path("xs[2]")), Some(&Value::Int(3)));
    }

    #[test]
    fn remove_root_takes_document() {
        let mut doc = Value::Int(5);
        assert_eq!(remove(&mut doc, &Path::root()), Some(Value::Int(5)));
        assert_eq!(doc, Value::Null);
    }

    #[test]
    fn remove_absent_returns_none() {
        let mut doc = Value::mapping([("a", Value::Int(1))]);
        assert_eq!(remove(&mut doc, &path("b.c")), None);
        assert_eq!(remove(&mut doc, &path("a.b")), None);
    }
}
