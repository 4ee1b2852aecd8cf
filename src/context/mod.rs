//! Per-request context: bound path arguments and the `g` extensions bag.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased request extensions map, used as the per-request `g` bag so
/// hooks can hand state to handlers without knowing each other's types.
///
/// # Examples
///
/// ```
/// use picodot::context::Extensions;
///
/// struct User(&'static str);
///
/// let mut g = Extensions::new();
/// g.insert(User("susan"));
/// assert_eq!(g.get::<User>().map(|u| u.0), Some("susan"));
/// ```
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// A single typed value captured from a URL segment.
#[derive(Clone)]
pub enum PathArg {
    /// `string`, `path` and `re:` segments.
    Str(String),
    /// `int` segments.
    Int(i64),
    /// The parsed value of a user-registered segment type.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl PathArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PathArg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PathArg::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            PathArg::Custom(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for PathArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathArg::Str(s) => f.debug_tuple("Str").field(s).finish(),
            PathArg::Int(n) => f.debug_tuple("Int").field(n).finish(),
            PathArg::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for PathArg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PathArg::Str(a), PathArg::Str(b)) => a == b,
            (PathArg::Int(a), PathArg::Int(b)) => a == b,
            (PathArg::Custom(a), PathArg::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for PathArg {
    fn from(value: &str) -> Self {
        PathArg::Str(value.to_owned())
    }
}

impl From<i64> for PathArg {
    fn from(value: i64) -> Self {
        PathArg::Int(value)
    }
}

/// Path arguments bound by the matched route, in template order.
///
/// # Examples
///
/// ```
/// use picodot::router::UrlPattern;
///
/// let pattern = UrlPattern::compile("/users/<int:id>/<name>").unwrap();
/// let args = pattern.matches("/users/42/susan").unwrap();
/// assert_eq!(args.int("id"), Some(42));
/// assert_eq!(args.str("name"), Some("susan"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathArgs {
    entries: Vec<(String, PathArg)>,
}

impl PathArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PathArg) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&PathArg> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Returns a string argument.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    /// Returns an `int` argument.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_int()
    }

    /// Returns the value produced by a custom segment type's parser.
    pub fn custom<T: Any>(&self, name: &str) -> Option<&T> {
        self.get(name)?.downcast_ref::<T>()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PathArg)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_replace_by_type() {
        let mut g = Extensions::new();
        assert_eq!(g.insert(1u32), None);
        assert_eq!(g.insert(2u32), Some(1));
        *g.get_mut::<u32>().unwrap() += 1;
        assert_eq!(g.remove::<u32>(), Some(3));
        assert!(g.is_empty());
    }

    #[test]
    fn path_args_accessors() {
        let mut args = PathArgs::new();
        args.insert("id", PathArg::Int(-3));
        args.insert("name", "bob".into());
        args.insert("point", PathArg::Custom(Arc::new((1u8, 2u8))));
        assert_eq!(args.int("id"), Some(-3));
        assert_eq!(args.str("id"), None);
        assert_eq!(args.str("name"), Some("bob"));
        assert_eq!(args.custom::<(u8, u8)>("point"), Some(&(1, 2)));
        assert_eq!(args.len(), 3);
    }
}
