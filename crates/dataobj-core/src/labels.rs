//! Label sets and label matchers.
//!
//! A [`Labels`] value is the identity of a stream: an ordered set of
//! `name -> value` pairs with unique names. [`LabelMatcher`] is the
//! equality / inequality / regex predicate used by the metastore to select
//! streams, with the same semantics as the surrounding query language:
//!
//! - Regex matchers are fully anchored (`app=~"fo"` does not match `foo`).
//! - A label missing from a set is treated as the empty string, so
//!   `team!="a"` matches streams without a `team` label.

use std::{collections::BTreeMap, fmt, str::FromStr};

use regex::Regex;
use snafu::prelude::*;

/// Errors raised while parsing label selectors and matchers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LabelError {
    /// A matcher string did not have the form `name<op>value`.
    #[snafu(display("Invalid matcher {input:?}: expected name=value, name!=value, name=~re or name!~re"))]
    InvalidMatcher {
        /// The rejected input.
        input: String,
    },

    /// A regex matcher failed to compile.
    #[snafu(display("Invalid regex in matcher for {name}: {source}"))]
    InvalidRegex {
        /// Label name of the matcher.
        name: String,
        /// Underlying regex error.
        source: regex::Error,
    },

    /// A label selector string was malformed.
    #[snafu(display("Invalid label selector {input:?}: {reason}"))]
    InvalidSelector {
        /// The rejected input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A label name was empty.
    #[snafu(display("Empty label name in {input:?}"))]
    EmptyName {
        /// The rejected input.
        input: String,
    },
}

/// An ordered set of label pairs with unique names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from pairs. Later duplicates replace earlier ones.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Insert or replace a label.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterate pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every matcher accepts this set.
    pub fn matches_all(&self, matchers: &[LabelMatcher]) -> bool {
        matchers.iter().all(|m| m.matches(self.get(&m.name)))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v:?}")?;
        }
        f.write_str("}")
    }
}

impl FromStr for Labels {
    type Err = LabelError;

    /// Parse `{name="value", other="value"}`. Braces are optional.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let body = match (trimmed.strip_prefix('{'), trimmed.ends_with('}')) {
            (Some(rest), true) => &rest[..rest.len() - 1],
            (None, false) => trimmed,
            _ => {
                return InvalidSelectorSnafu {
                    input,
                    reason: "unbalanced braces",
                }
                .fail();
            }
        };

        let mut labels = Labels::new();
        let mut rest = body.trim();
        while !rest.is_empty() {
            let (name, after) = rest.split_once('=').context(InvalidSelectorSnafu {
                input,
                reason: "missing '='",
            })?;
            let name = name.trim();
            ensure!(!name.is_empty(), EmptyNameSnafu { input });

            let after = after.trim_start();
            let quoted = after.strip_prefix('"').context(InvalidSelectorSnafu {
                input,
                reason: "values must be double-quoted",
            })?;
            let (value, tail) = read_quoted(quoted).context(InvalidSelectorSnafu {
                input,
                reason: "unterminated string",
            })?;
            labels.insert(name, value);

            rest = tail.trim_start();
            if let Some(next) = rest.strip_prefix(',') {
                rest = next.trim_start();
            } else {
                ensure!(
                    rest.is_empty(),
                    InvalidSelectorSnafu {
                        input,
                        reason: "expected ',' between labels",
                    }
                );
            }
        }
        Ok(labels)
    }
}

/// Read a double-quoted string body (after the opening quote), handling `\"`
/// and `\\` escapes. Returns the value and the text after the closing quote.
fn read_quoted(s: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &s[i + 1..])),
            '\\' => {
                let (_, escaped) = chars.next()?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }
    None
}

/// Kind of comparison performed by a [`LabelMatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// `name="value"`
    Equal,
    /// `name!="value"`
    NotEqual,
    /// `name=~"regex"`
    Regex,
    /// `name!~"regex"`
    NotRegex,
}

impl MatchType {
    fn operator(self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regex => "=~",
            MatchType::NotRegex => "!~",
        }
    }
}

/// Predicate over a single label.
#[derive(Clone, Debug)]
pub struct LabelMatcher {
    name: String,
    value: String,
    match_type: MatchType,
    // Compiled, anchored pattern for the regex kinds.
    regex: Option<Regex>,
}

impl LabelMatcher {
    /// Create a matcher, compiling the pattern for regex kinds.
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, LabelError> {
        let name = name.into();
        let value = value.into();
        let regex = match match_type {
            MatchType::Regex | MatchType::NotRegex => Some(
                Regex::new(&format!("^(?:{value})$"))
                    .context(InvalidRegexSnafu { name: name.clone() })?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            name,
            value,
            match_type,
            regex,
        })
    }

    /// Shorthand for an equality matcher, which cannot fail.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_type: MatchType::Equal,
            regex: None,
        }
    }

    /// Label name this matcher tests.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Literal value or pattern.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Comparison kind.
    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Test a label value; `None` (label absent) is treated as `""`.
    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match (self.match_type, &self.regex) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(value),
            (MatchType::NotRegex, Some(re)) => !re.is_match(value),
            // Constructors always compile a regex for the regex kinds.
            (MatchType::Regex | MatchType::NotRegex, None) => false,
        }
    }
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.match_type == other.match_type
    }
}

impl Eq for LabelMatcher {}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type.operator(), self.value)
    }
}

impl FromStr for LabelMatcher {
    type Err = LabelError;

    /// Parse `name=value`, `name!=value`, `name=~re` or `name!~re`.
    /// The value may optionally be double-quoted.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let idx = input.find(['=', '!']).context(InvalidMatcherSnafu { input })?;
        let name = input[..idx].trim();
        ensure!(!name.is_empty(), EmptyNameSnafu { input });

        let op_and_value = &input[idx..];
        let (match_type, raw) = if let Some(v) = op_and_value.strip_prefix("=~") {
            (MatchType::Regex, v)
        } else if let Some(v) = op_and_value.strip_prefix("!~") {
            (MatchType::NotRegex, v)
        } else if let Some(v) = op_and_value.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = op_and_value.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return InvalidMatcherSnafu { input }.fail();
        };

        let raw = raw.trim();
        let value = match raw.strip_prefix('"') {
            Some(quoted) => {
                let (value, tail) = read_quoted(quoted).context(InvalidMatcherSnafu { input })?;
                ensure!(tail.trim().is_empty(), InvalidMatcherSnafu { input });
                value
            }
            None => raw.to_string(),
        };

        LabelMatcher::new(match_type, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_selector() -> TestResult {
        let labels: Labels = r#"{app="foo", env="prod"}"#.parse()?;
        assert_eq!(labels.get("app"), Some("foo"));
        assert_eq!(labels.get("env"), Some("prod"));
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.to_string(), r#"{app="foo", env="prod"}"#);
        Ok(())
    }

    #[test]
    fn parse_selector_with_escapes_and_no_braces() -> TestResult {
        let labels: Labels = r#"msg="say \"hi\"",x="1""#.parse()?;
        assert_eq!(labels.get("msg"), Some(r#"say "hi""#));
        assert_eq!(labels.get("x"), Some("1"));

        let empty: Labels = "{}".parse()?;
        assert!(empty.is_empty());
        Ok(())
    }

    #[test]
    fn parse_selector_rejects_garbage() {
        assert!(r#"{app="foo""#.parse::<Labels>().is_err());
        assert!(r#"{app=foo}"#.parse::<Labels>().is_err());
        assert!(r#"{="foo"}"#.parse::<Labels>().is_err());
        assert!(r#"{a="1" b="2"}"#.parse::<Labels>().is_err());
    }

    #[test]
    fn parse_matchers() -> TestResult {
        let m: LabelMatcher = "app=foo".parse()?;
        assert_eq!(m.match_type(), MatchType::Equal);
        assert_eq!((m.name(), m.value()), ("app", "foo"));

        let m: LabelMatcher = r#"app!="foo""#.parse()?;
        assert_eq!(m.match_type(), MatchType::NotEqual);
        assert_eq!(m.value(), "foo");

        let m: LabelMatcher = "app=~fo+".parse()?;
        assert_eq!(m.match_type(), MatchType::Regex);

        let m: LabelMatcher = "app!~b.*".parse()?;
        assert_eq!(m.match_type(), MatchType::NotRegex);

        assert!("app".parse::<LabelMatcher>().is_err());
        assert!("=foo".parse::<LabelMatcher>().is_err());
        assert!("app=~(".parse::<LabelMatcher>().is_err());
        Ok(())
    }

    #[test]
    fn regex_is_anchored() -> TestResult {
        let m = LabelMatcher::new(MatchType::Regex, "app", "fo")?;
        assert!(!m.matches(Some("foo")));
        assert!(m.matches(Some("fo")));

        let m = LabelMatcher::new(MatchType::Regex, "app", "foo|bar")?;
        assert!(m.matches(Some("bar")));
        assert!(!m.matches(Some("barn")));
        Ok(())
    }

    #[test]
    fn missing_label_reads_as_empty() -> TestResult {
        let labels = Labels::from_pairs([("app", "foo")]);

        assert!(labels.matches_all(&[LabelMatcher::new(MatchType::NotEqual, "team", "a")?]));
        assert!(!labels.matches_all(&[LabelMatcher::equal("team", "a")]));
        assert!(labels.matches_all(&[LabelMatcher::equal("team", "")]));
        assert!(labels.matches_all(&[LabelMatcher::new(MatchType::Regex, "team", ".*")?]));
        assert!(!labels.matches_all(&[LabelMatcher::new(MatchType::Regex, "team", ".+")?]));
        Ok(())
    }

    #[test]
    fn empty_matchers_match_everything() {
        assert!(Labels::new().matches_all(&[]));
        assert!(Labels::from_pairs([("a", "b")]).matches_all(&[]));
    }

    #[test]
    fn matcher_display_round_trips() -> TestResult {
        let m = LabelMatcher::new(MatchType::NotRegex, "env", "dev|qa")?;
        assert_eq!(m.to_string(), r#"env!~"dev|qa""#);
        assert_eq!(m.to_string().parse::<LabelMatcher>()?, m);
        Ok(())
    }
}
