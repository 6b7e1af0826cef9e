//! Action identifiers: `(agent, action, version)` and numeric-segment version compare (§3, §4.1).

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version token: {0}")]
    InvalidToken(String),
}

/// Dot-separated integer sequence, e.g. `1.2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let mut segs = Vec::new();
        for tok in s.split('.') {
            let n: u64 = tok
                .parse()
                .map_err(|_| VersionError::InvalidToken(s.to_string()))?;
            segs.push(n);
        }
        if segs.is_empty() {
            return Err(VersionError::InvalidToken(s.to_string()));
        }
        Ok(Version(segs))
    }

    /// Total order: pairwise numeric compare over the common prefix; if the common
    /// prefix is equal, the longer sequence wins (whether or not its tail is all zeros).
    pub fn compare(&self, other: &Version) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strs: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", strs.join("."))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// A fully-qualified action identifier: canonical form `@<agent>/<action>:<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub agent: String,
    pub action: String,
    pub version: Version,
}

impl ActionId {
    pub fn new(agent: impl Into<String>, action: impl Into<String>, version: Version) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            version,
        }
    }

    pub fn canonical(&self) -> String {
        format!("@{}/{}:{}", self.agent, self.action, self.version)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// An identifier as it appears in source text, before canonicalization against the
/// registry and the current agent context (§3, §4.1 short forms).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnresolvedRef {
    pub agent: Option<String>,
    pub action: Option<String>,
    pub version: Option<Version>,
}

/// Parses one of the four short-form grammars:
/// `<action>`, `@<agent>`, `@<agent>:<version>`, `@<agent>/<action>`, `@<agent>/<action>:<version>`.
pub fn parse_ref(s: &str) -> Result<UnresolvedRef, VersionError> {
    let Some(rest) = s.strip_prefix('@') else {
        return Ok(UnresolvedRef {
            agent: None,
            action: Some(s.to_string()),
            version: None,
        });
    };
    match rest.split_once('/') {
        Some((agent, action_and_version)) => match action_and_version.split_once(':') {
            Some((action, version)) => Ok(UnresolvedRef {
                agent: Some(agent.to_string()),
                action: Some(action.to_string()),
                version: Some(Version::parse(version)?),
            }),
            None => Ok(UnresolvedRef {
                agent: Some(agent.to_string()),
                action: Some(action_and_version.to_string()),
                version: None,
            }),
        },
        None => match rest.split_once(':') {
            Some((agent, version)) => Ok(UnresolvedRef {
                agent: Some(agent.to_string()),
                action: None,
                version: Some(Version::parse(version)?),
            }),
            None => Ok(UnresolvedRef {
                agent: Some(rest.to_string()),
                action: None,
                version: None,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_compare_numeric_not_lexical() {
        let a = Version::parse("2.0.0").unwrap();
        let b = Version::parse("10.0.0").unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
    }

    #[test]
    fn version_prefix_with_positive_tail_is_greater() {
        let short = Version::parse("1.2").unwrap();
        let long = Version::parse("1.2.0.1").unwrap();
        assert_eq!(short.compare(&long), Ordering::Less);
    }

    #[test]
    fn version_prefix_plus_zeros_is_still_greater() {
        let short = Version::parse("1.2").unwrap();
        let long = Version::parse("1.2.0").unwrap();
        assert_eq!(short.compare(&long), Ordering::Less);
    }

    #[test]
    fn version_total_order_antisymmetric() {
        let a = Version::parse("1.2.3.1").unwrap();
        let b = Version::parse("1.2.3").unwrap();
        assert_eq!(a.compare(&b), Ordering::Greater);
        assert_eq!(b.compare(&a), Ordering::Less);
    }

    #[test]
    fn version_invalid_token_fails() {
        assert!(Version::parse("1.x").is_err());
    }

    #[test]
    fn parse_ref_forms() {
        assert_eq!(
            parse_ref("b").unwrap(),
            UnresolvedRef {
                agent: None,
                action: Some("b".into()),
                version: None
            }
        );
        assert_eq!(
            parse_ref("@myAgent").unwrap(),
            UnresolvedRef {
                agent: Some("myAgent".into()),
                action: None,
                version: None
            }
        );
        assert_eq!(
            parse_ref("@myAgent:1.0.0").unwrap().version,
            Some(Version::parse("1.0.0").unwrap())
        );
        let full = parse_ref("@myAgent/doThing:2.1.0").unwrap();
        assert_eq!(full.agent.as_deref(), Some("myAgent"));
        assert_eq!(full.action.as_deref(), Some("doThing"));
        assert_eq!(full.version, Some(Version::parse("2.1.0").unwrap()));
    }

    #[test]
    fn canonical_form_matches_grammar() {
        let id = ActionId::new("myAgent", "doThing", Version::parse("1.0.0").unwrap());
        assert_eq!(id.canonical(), "@myAgent/doThing:1.0.0");
    }
}
