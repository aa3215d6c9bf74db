use regex::Regex;

use crate::ConfigError;

/// A branch or tag matcher from an action's `branches`/`tags` lists.
///
/// A plain name matches only by equality; a value starting with `^` is
/// compiled as a regex and matched against the full ref short name.
#[derive(Debug, Clone)]
pub enum RefMatcher {
    Literal(String),
    Pattern(Regex),
}

impl RefMatcher {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.starts_with('^') {
            let re = Regex::new(value).map_err(|e| ConfigError::BadPattern {
                pattern: value.to_owned(),
                message: e.to_string(),
            })?;
            Ok(Self::Pattern(re))
        } else {
            Ok(Self::Literal(value.to_owned()))
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == name,
            Self::Pattern(re) => re.is_match(name),
        }
    }

    /// The configured source text, used for set intersection during
    /// dependency propagation.
    pub fn source(&self) -> &str {
        match self {
            Self::Literal(literal) => literal,
            Self::Pattern(re) => re.as_str(),
        }
    }
}

impl PartialEq for RefMatcher {
    fn eq(&self, other: &Self) -> bool { self.source() == other.source() }
}

impl Eq for RefMatcher {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_exact_name_only() {
        let m = RefMatcher::parse("master").unwrap();
        assert!(m.matches("master"));
        assert!(!m.matches("master-next"));
        assert!(!m.matches("a-master"));
    }

    #[test]
    fn caret_compiles_as_regex() {
        let m = RefMatcher::parse("^release-.*").unwrap();
        assert!(matches!(m, RefMatcher::Pattern(_)));
        assert!(m.matches("release-1.0"));
        assert!(!m.matches("beta-1.0"));
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        assert!(RefMatcher::parse("^release-(").is_err());
    }
}
