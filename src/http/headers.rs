//! Ordered header fields with case-insensitive names.

/// Header fields in the order they were added.
///
/// A name may occur more than once, so repeated response headers such as
/// `Set-Cookie` serialize one line per value. Lookups ignore ASCII case; the
/// spelling used on insertion is kept for output.
///
/// # Examples
///
/// ```
/// use picodot::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html; charset=UTF-8");
/// headers.insert("Set-Cookie", "a=1");
/// headers.insert("Set-Cookie", "b=2");
///
/// assert_eq!(headers.get("content-type"), Some("text/html; charset=UTF-8"));
/// let all: Vec<_> = headers.get_all("set-cookie").collect();
/// assert_eq!(all, vec!["a=1", "b=2"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

fn same_name(field: &(String, String), name: &str) -> bool {
    field.0.eq_ignore_ascii_case(name)
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Adds a field after the existing ones, keeping earlier values.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every value stored under `name` with a single `value`.
    ///
    /// The new field takes the position of the first replaced one, or is
    /// appended when the name was absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let Some(first) = self.fields.iter().position(|f| same_name(f, &name)) else {
            self.fields.push((name, value));
            return;
        };
        self.fields[first].1 = value;
        let mut index = 0;
        self.fields.retain(|field| {
            let keep = index <= first || !same_name(field, &name);
            index += 1;
            keep
        });
    }

    /// The first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |field| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Drops every field called `name`. Returns whether anything was dropped.
    pub fn remove(&mut self, name: &str) -> bool {
        let count = self.fields.len();
        self.fields.retain(|field| !same_name(field, name));
        self.fields.len() != count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl<N, V, const LEN: usize> From<[(N, V); LEN]> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(N, V); LEN]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_but_output_keeps_it() {
        let mut h = Headers::new();
        h.insert("X-Request-Id", "7");
        assert_eq!(h.get("x-request-id"), Some("7"));
        assert_eq!(h.get("X-REQUEST-ID"), Some("7"));
        assert_eq!(h.iter().next(), Some(("X-Request-Id", "7")));
    }

    #[test]
    fn set_replaces_all_values_in_place() {
        let mut h = Headers::new();
        h.insert("X-Foo", "1");
        h.insert("Allow", "GET");
        h.insert("x-foo", "2");
        h.set("X-FOO", "3");
        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(pairs, vec![("X-Foo", "3"), ("Allow", "GET")]);
    }

    #[test]
    fn set_appends_missing_name() {
        let mut h = Headers::from([("Content-Type", "text/plain")]);
        h.set("Content-Length", "0");
        assert_eq!(h.len(), 2);
        assert_eq!(h.get("content-length"), Some("0"));
    }

    #[test]
    fn remove_drops_every_value() {
        let mut h = Headers::from([("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")]);
        assert!(h.remove("set-cookie"));
        assert!(h.is_empty());
        assert!(!h.remove("set-cookie"));
    }

    #[test]
    fn lookups_borrow_only_the_map() {
        let h = Headers::from([("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")]);
        let first = {
            let name = String::from("set-cookie");
            h.get(&name)
        };
        assert_eq!(first, Some("a=1"));
    }

    #[test]
    fn from_array() {
        let h = Headers::from([("Location", "/home"), ("X-A", "b")]);
        assert_eq!(h.len(), 2);
        assert!(h.contains("location"));
        assert!(!h.contains("x-missing"));
    }
}
