//! Role selector expressions.
//!
//! A selector is a comma separated union of terms, matched
//! case-insensitively against role names:
//!
//! - empty: every role
//! - `datanode-1`: exact role name
//! - `datanode*`: name prefix
//! - `*node-?`: glob (`*` and `?`) anywhere in the name
//! - `type=nodemanager`: every role of a type
//!
//! Results are deduplicated and keep topology declaration order.

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::topology::{Role, RoleType, Topology};

#[derive(Debug, Clone)]
enum Term {
    Name(String),
    Prefix(String),
    Glob(Regex),
    Type(RoleType),
}

impl Term {
    fn parse(token: &str) -> Result<Self> {
        if let Some((key, value)) = token.split_once('=') {
            if !key.trim().eq_ignore_ascii_case("type") {
                return Err(Error::validation(format!(
                    "unknown selector key '{}' in '{}'",
                    key.trim(),
                    token
                )));
            }
            let value = value.trim();
            if value.is_empty() {
                return Err(Error::validation(format!(
                    "selector '{}' names no role type",
                    token
                )));
            }
            return Ok(Term::Type(value.parse()?));
        }

        let lower = token.to_lowercase();
        match lower.find(['*', '?']) {
            None => Ok(Term::Name(lower)),
            Some(pos) if pos == lower.len() - 1 && lower.ends_with('*') => {
                Ok(Term::Prefix(lower[..pos].to_string()))
            }
            Some(_) => {
                let regex = RegexBuilder::new(&glob_to_regex(&lower))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::validation(format!("bad selector '{}': {}", token, e)))?;
                Ok(Term::Glob(regex))
            }
        }
    }

    fn matches(&self, role: &Role) -> bool {
        match self {
            Term::Name(name) => role.name.to_lowercase() == *name,
            Term::Prefix(prefix) => role.name.to_lowercase().starts_with(prefix.as_str()),
            Term::Glob(regex) => regex.is_match(&role.name),
            Term::Type(role_type) => role.role_type == *role_type,
        }
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}

/// A parsed selector expression.
#[derive(Debug, Clone)]
pub struct Selector {
    expression: String,
    terms: Vec<Term>,
}

impl Selector {
    pub fn parse(expression: &str) -> Result<Self> {
        let terms = expression
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Term::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            expression: expression.trim().to_string(),
            terms,
        })
    }

    /// Whether the selector is empty and selects every role.
    pub fn is_all(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, role: &Role) -> bool {
        self.is_all() || self.terms.iter().any(|t| t.matches(role))
    }

    /// Matching roles in declaration order. A selector with terms that
    /// matches nothing is an error; an empty cluster with an empty
    /// selector is not.
    pub fn select<'a>(&self, roles: &'a [Role]) -> Result<Vec<&'a Role>> {
        let selected: Vec<&Role> = roles.iter().filter(|r| self.matches(r)).collect();
        if selected.is_empty() && !self.is_all() {
            return Err(Error::SelectorResolution {
                expression: self.expression.clone(),
            });
        }
        Ok(selected)
    }
}

/// Resolve `expression` against a topology.
pub fn resolve(expression: &str, topology: &Topology) -> Result<Vec<Role>> {
    let selector = Selector::parse(expression)?;
    let roles = selector
        .select(topology.roles())?
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    tracing::debug!(
        selector = %expression,
        roles = roles.len(),
        "Selector resolved"
    );
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ProcessControl;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn role(name: &str, role_type: RoleType) -> Role {
        Role {
            name: name.into(),
            role_type,
            host: name.into(),
            config_dir: PathBuf::from("/etc/hadoop"),
            log_file: format!("/logs/{}.log", name),
            artifact_dir: PathBuf::from("/opt/hadoop/share"),
            control: ProcessControl::None,
        }
    }

    fn roles() -> Vec<Role> {
        vec![
            role("namenode", RoleType::NameNode),
            role("datanode-1", RoleType::DataNode),
            role("datanode-2", RoleType::DataNode),
            role("resourcemanager", RoleType::ResourceManager),
            role("nodemanager-1", RoleType::NodeManager),
            role("nodemanager-2", RoleType::NodeManager),
        ]
    }

    fn names(expr: &str) -> Vec<String> {
        let roles = roles();
        Selector::parse(expr)
            .unwrap()
            .select(&roles)
            .unwrap()
            .into_iter()
            .map(|r| r.name.clone())
            .collect()
    }

    #[test]
    fn test_empty_selects_all() {
        assert_eq!(names("").len(), 6);
        assert_eq!(names(" , ").len(), 6);
    }

    #[test]
    fn test_exact_and_prefix() {
        assert_eq!(names("NameNode"), vec!["namenode"]);
        assert_eq!(names("datanode*"), vec!["datanode-1", "datanode-2"]);
    }

    #[test]
    fn test_type_term() {
        assert_eq!(
            names("type=NODEMANAGER"),
            vec!["nodemanager-1", "nodemanager-2"]
        );
    }

    #[test]
    fn test_union_keeps_declaration_order_without_duplicates() {
        assert_eq!(
            names("nodemanager-2, namenode, type=nodemanager, namenode"),
            vec!["namenode", "nodemanager-1", "nodemanager-2"]
        );
    }

    #[test]
    fn test_interior_glob() {
        assert_eq!(names("*node-1"), vec!["datanode-1"]);
        assert_eq!(names("*-1"), vec!["datanode-1", "nodemanager-1"]);
        assert_eq!(names("datanode-?"), vec!["datanode-1", "datanode-2"]);
    }

    #[test]
    fn test_no_match_is_resolution_error() {
        let roles = roles();
        let err = Selector::parse("journal*").unwrap().select(&roles).unwrap_err();
        assert!(matches!(err, Error::SelectorResolution { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_empty_type_is_validation_error() {
        assert!(matches!(
            Selector::parse("type=").unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            Selector::parse("host=dn1").unwrap_err(),
            Error::Validation(_)
        ));
    }

    proptest! {
        #[test]
        fn prop_selection_is_ordered_subset(picks in proptest::collection::vec(0usize..6, 1..6)) {
            let roles = roles();
            let expr = picks
                .iter()
                .map(|i| roles[*i].name.to_uppercase())
                .collect::<Vec<_>>()
                .join(",");

            let selected = Selector::parse(&expr).unwrap().select(&roles).unwrap();
            let positions: Vec<usize> = selected
                .iter()
                .map(|r| roles.iter().position(|x| x.name == r.name).unwrap())
                .collect();

            let mut expected = picks.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(positions, expected);
        }
    }
}
