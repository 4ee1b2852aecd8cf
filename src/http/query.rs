//! URL-encoded key/value decoding for query strings and form bodies.

use std::str::FromStr;

use percent_encoding::percent_decode;

/// An insertion-ordered map that can hold several values per key.
///
/// Used for parsed query strings and `application/x-www-form-urlencoded`
/// bodies.
///
/// # Examples
///
/// ```
/// use picodot::http::MultiDict;
///
/// let args = MultiDict::parse_urlencoded("sort=name&sort=email&page=2");
/// assert_eq!(args.get("sort"), Some("name"));
/// assert_eq!(args.get_all("sort").collect::<Vec<_>>(), vec!["name", "email"]);
/// assert_eq!(args.get_as::<u32>("page"), Some(2));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiDict {
    entries: Vec<(String, String)>,
}

impl MultiDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `key=value&key2=value2`, applying `+` → space and `%XX` → byte
    /// to keys and values independently. Empty pairs are skipped and a pair
    /// without `=` maps to an empty value.
    pub fn parse_urlencoded(input: &str) -> Self {
        let entries = input
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (urldecode(key), urldecode(value)),
                None => (urldecode(pair), String::new()),
            })
            .collect();
        Self { entries }
    }

    /// Appends a value under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Returns the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value under `key` converted with [`FromStr`].
    ///
    /// A value that fails to convert is reported as absent.
    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    /// Returns every value stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over every `(key, value)` pair in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decodes one URL-encoded component. Invalid UTF-8 is replaced lossily.
pub fn urldecode(input: &str) -> String {
    let plus_decoded = input.replace('+', " ");
    percent_decode(plus_decoded.as_bytes())
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plus_and_percent() {
        let args = MultiDict::parse_urlencoded("q=hello+world&name=caf%C3%A9&sym=%2B%26");
        assert_eq!(args.get("q"), Some("hello world"));
        assert_eq!(args.get("name"), Some("café"));
        assert_eq!(args.get("sym"), Some("+&"));
    }

    #[test]
    fn keys_are_decoded_too() {
        let args = MultiDict::parse_urlencoded("a%20b=1");
        assert_eq!(args.get("a b"), Some("1"));
    }

    #[test]
    fn keeps_order_and_duplicates() {
        let args = MultiDict::parse_urlencoded("x=1&y=2&x=3");
        let pairs: Vec<_> = args.iter().collect();
        assert_eq!(pairs, vec![("x", "1"), ("y", "2"), ("x", "3")]);
        assert_eq!(args.get_all("x").collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[test]
    fn bare_key_and_empty_pairs() {
        let args = MultiDict::parse_urlencoded("&flag&&k=");
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("flag"), Some(""));
        assert_eq!(args.get("k"), Some(""));
    }

    #[test]
    fn get_as_rejects_bad_values() {
        let args = MultiDict::parse_urlencoded("n=abc");
        assert_eq!(args.get_as::<i32>("n"), None);
    }
}
