//! URL templates compiled into matchers.
//!
//! A template is a `/`-separated list of literal segments and typed argument
//! segments written as `<name>` or `<type:name>`:
//!
//! | Type        | Matches                          | Bound as            |
//! |-------------|----------------------------------|---------------------|
//! | `string`    | one segment without `/` (default)| [`PathArg::Str`]    |
//! | `int`       | `-?\d+`                          | [`PathArg::Int`]    |
//! | `path`      | the rest of the path, `/` included | [`PathArg::Str`]  |
//! | `re:<expr>` | the given regular expression     | [`PathArg::Str`]    |
//!
//! Further named types can be added to a [`TypeRegistry`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::context::{PathArg, PathArgs};

/// Errors raised while compiling a URL template.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid URL pattern: segment {segment:?} is missing its closing '>'")]
    Unterminated { segment: String },

    #[error("invalid URL segment type {name:?}")]
    UnknownType { name: String },

    #[error("invalid regular expression in URL pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Converts the matched text of a custom segment type. `None` rejects the match.
pub type TypeParser = Arc<dyn Fn(&str) -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync>;

#[derive(Clone)]
struct SegmentType {
    pattern: String,
    parser: Option<TypeParser>,
}

/// User-defined segment types, looked up by name when templates compile.
///
/// # Examples
///
/// ```
/// use picodot::router::{TypeRegistry, UrlPattern};
///
/// let mut types = TypeRegistry::new();
/// types.register_parsed("hex", "[0-9a-f]+", |s| u32::from_str_radix(s, 16).ok());
///
/// let pattern = UrlPattern::compile_with("/color/<hex:rgb>", &types).unwrap();
/// let args = pattern.matches("/color/ff00").unwrap();
/// assert_eq!(args.custom::<u32>("rgb"), Some(&0xff00));
/// ```
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, SegmentType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type whose matches are bound as plain strings.
    pub fn register(&mut self, name: impl Into<String>, pattern: impl Into<String>) {
        self.types.insert(
            name.into(),
            SegmentType {
                pattern: pattern.into(),
                parser: None,
            },
        );
    }

    /// Registers a type whose matches are converted by `parse`.
    pub fn register_parsed<T, F>(
        &mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        parse: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        let parser: TypeParser = Arc::new(move |raw: &str| {
            parse(raw).map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>)
        });
        self.types.insert(
            name.into(),
            SegmentType {
                pattern: pattern.into(),
                parser: Some(parser),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Adds every type of `other` that is not already registered here.
    pub(crate) fn merge(&mut self, other: &TypeRegistry) {
        for (name, ty) in &other.types {
            self.types
                .entry(name.clone())
                .or_insert_with(|| ty.clone());
        }
    }

    fn get(&self, name: &str) -> Option<&SegmentType> {
        self.types.get(name)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.types.keys()).finish()
    }
}

#[derive(Clone)]
enum ArgKind {
    Str,
    Int,
    Custom(TypeParser),
}

#[derive(Clone)]
struct ArgSpec {
    name: String,
    kind: ArgKind,
    group: usize,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Regex(Regex),
}

/// A compiled URL template. Immutable once built.
///
/// # Examples
///
/// ```
/// use picodot::router::UrlPattern;
///
/// let pattern = UrlPattern::compile("/static/<path:file>").unwrap();
/// let args = pattern.matches("/static/css/site.css").unwrap();
/// assert_eq!(args.str("file"), Some("css/site.css"));
/// assert!(pattern.matches("/static").is_none());
/// ```
#[derive(Clone)]
pub struct UrlPattern {
    template: String,
    args: Vec<ArgSpec>,
    matcher: Matcher,
}

impl UrlPattern {
    /// Compiles a template using only the built-in segment types.
    pub fn compile(template: &str) -> Result<Self, PatternError> {
        Self::compile_with(template, &TypeRegistry::default())
    }

    /// Compiles a template, resolving unknown type names in `types`.
    pub fn compile_with(template: &str, types: &TypeRegistry) -> Result<Self, PatternError> {
        let mut exact = String::new();
        let mut regex_src = String::from("^");
        let mut args = Vec::new();
        // Group 0 is the whole match.
        let mut next_group = 1;

        for segment in template.trim_start_matches('/').split('/') {
            if !segment.starts_with('<') {
                exact.push('/');
                exact.push_str(segment);
                regex_src.push('/');
                regex_src.push_str(&regex::escape(segment));
                continue;
            }

            let inner = segment
                .strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'))
                .ok_or_else(|| PatternError::Unterminated {
                    segment: segment.to_owned(),
                })?;
            let (type_name, name) = inner.rsplit_once(':').unwrap_or(("string", inner));

            let (sub_pattern, kind) = match type_name {
                "string" => ("[^/]+", ArgKind::Str),
                "int" => (r"-?\d+", ArgKind::Int),
                "path" => (".+", ArgKind::Str),
                other => match other.strip_prefix("re:") {
                    Some(expr) => (expr, ArgKind::Str),
                    None => {
                        let ty = types.get(other).ok_or_else(|| PatternError::UnknownType {
                            name: other.to_owned(),
                        })?;
                        let kind = match &ty.parser {
                            Some(parser) => ArgKind::Custom(Arc::clone(parser)),
                            None => ArgKind::Str,
                        };
                        (ty.pattern.as_str(), kind)
                    }
                },
            };

            // Groups inside the sub-pattern shift every later argument.
            let groups = Regex::new(sub_pattern)?.captures_len();
            args.push(ArgSpec {
                name: name.to_owned(),
                kind,
                group: next_group,
            });
            next_group += groups;

            regex_src.push_str("/(");
            regex_src.push_str(sub_pattern);
            regex_src.push(')');
        }

        let matcher = if args.is_empty() {
            Matcher::Exact(exact)
        } else {
            regex_src.push('$');
            Matcher::Regex(Regex::new(&regex_src)?)
        };

        Ok(Self {
            template: template.to_owned(),
            args,
            matcher,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns `true` if the template has no typed segments.
    pub fn is_exact(&self) -> bool {
        matches!(self.matcher, Matcher::Exact(_))
    }

    /// Matches `path`, binding every argument. `None` if the path does not
    /// match or a value fails to convert.
    pub fn matches(&self, path: &str) -> Option<PathArgs> {
        match &self.matcher {
            Matcher::Exact(exact) => (exact == path).then(PathArgs::new),
            Matcher::Regex(regex) => {
                let captures = regex.captures(path)?;
                let mut bound = PathArgs::new();
                for arg in &self.args {
                    let raw = captures.get(arg.group)?.as_str();
                    let value = match &arg.kind {
                        ArgKind::Str => PathArg::Str(raw.to_owned()),
                        ArgKind::Int => PathArg::Int(raw.parse().ok()?),
                        ArgKind::Custom(parse) => PathArg::Custom(parse(raw)?),
                    };
                    bound.insert(arg.name.clone(), value);
                }
                Some(bound)
            }
        }
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlPattern")
            .field("template", &self.template)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}
