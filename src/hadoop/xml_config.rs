//! Hadoop `*-site.xml` files and in-place property patching.
//!
//! Patching works on the document text so that comments, ordering and
//! formatting of untouched properties survive byte for byte.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Config files hades can update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HadoopConfigFile {
    #[value(name = "core-site", alias = "core-site.xml")]
    CoreSite,
    #[value(name = "hdfs-site", alias = "hdfs-site.xml")]
    HdfsSite,
    #[value(name = "yarn-site", alias = "yarn-site.xml")]
    YarnSite,
    #[value(name = "mapred-site", alias = "mapred-site.xml")]
    MapredSite,
    #[value(name = "capacity-scheduler", alias = "capacity-scheduler.xml")]
    CapacityScheduler,
}

impl HadoopConfigFile {
    pub fn file_name(&self) -> &'static str {
        match self {
            HadoopConfigFile::CoreSite => "core-site.xml",
            HadoopConfigFile::HdfsSite => "hdfs-site.xml",
            HadoopConfigFile::YarnSite => "yarn-site.xml",
            HadoopConfigFile::MapredSite => "mapred-site.xml",
            HadoopConfigFile::CapacityScheduler => "capacity-scheduler.xml",
        }
    }
}

impl fmt::Display for HadoopConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// One property to set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyPatch {
    pub name: String,
    pub value: String,
}

impl PropertyPatch {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pair names with values. Fails when the counts differ.
    pub fn zip(names: &[String], values: &[String]) -> Result<Vec<Self>, PatchError> {
        if names.len() != values.len() {
            return Err(PatchError::CountMismatch {
                properties: names.len(),
                values: values.len(),
            });
        }
        Ok(names
            .iter()
            .zip(values)
            .map(|(n, v)| PropertyPatch::new(n.clone(), v.clone()))
            .collect())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Number of properties and values must match. Properties: {properties} Values: {values}")]
    CountMismatch { properties: usize, values: usize },

    #[error("property name must not be empty")]
    EmptyName,

    #[error("not a Hadoop configuration document: {0}")]
    MalformedDocument(String),
}

fn property_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<property>.*?</property>").expect("static regex"))
}

fn name_element() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<name>\s*(.*?)\s*</name>").expect("static regex"))
}

fn value_element() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<value>.*?</value>|<value\s*/>").expect("static regex"))
}

/// `doc` with every `<!-- ... -->` comment blanked to spaces. Byte offsets
/// are preserved, so matches found here index into `doc` directly.
fn mask_comments(doc: &str) -> String {
    let mut masked = String::with_capacity(doc.len());
    let mut rest = doc;
    while let Some(start) = rest.find("<!--") {
        masked.push_str(&rest[..start]);
        let comment_len = match rest[start + 4..].find("-->") {
            Some(end) => end + 7,
            None => rest.len() - start,
        };
        masked.extend(std::iter::repeat(' ').take(comment_len));
        rest = &rest[start + comment_len..];
    }
    masked.push_str(rest);
    masked
}

/// Escape text for use inside an XML element.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Set every property in `patches` in `document`.
///
/// Existing properties get their value replaced; missing ones are appended
/// before `</configuration>`. Patches apply in order, so a repeated name
/// ends with the last value.
pub fn apply_properties(document: &str, patches: &[PropertyPatch]) -> Result<String, PatchError> {
    if !mask_comments(document).contains("<configuration") {
        return Err(PatchError::MalformedDocument(
            "missing <configuration> element".into(),
        ));
    }

    let mut doc = document.to_string();
    for patch in patches {
        if patch.name.trim().is_empty() {
            return Err(PatchError::EmptyName);
        }
        doc = set_property(&doc, patch)?;
    }
    Ok(doc)
}

fn set_property(doc: &str, patch: &PropertyPatch) -> Result<String, PatchError> {
    let value = format!("<value>{}</value>", escape_xml(&patch.value));

    // Searches run on the masked copy so nothing inside a comment matches;
    // edits are applied to the original at the same offsets.
    let masked = mask_comments(doc);
    for block in property_block().find_iter(&masked) {
        let text = block.as_str();
        let original = &doc[block.range()];
        let matches_name = name_element()
            .captures(text)
            .and_then(|c| c.get(1))
            .is_some_and(|n| unescape_xml(n.as_str()) == patch.name);
        if !matches_name {
            continue;
        }

        let replaced = match value_element().find(text) {
            Some(existing) => format!(
                "{}{}{}",
                &original[..existing.start()],
                value,
                &original[existing.end()..]
            ),
            None => {
                let close = text.len() - "</property>".len();
                format!("{}{}{}", &original[..close], value, &original[close..])
            }
        };
        return Ok(format!(
            "{}{}{}",
            &doc[..block.start()],
            replaced,
            &doc[block.end()..]
        ));
    }

    let close = masked.rfind("</configuration>").ok_or_else(|| {
        PatchError::MalformedDocument("missing </configuration> closing tag".into())
    })?;
    let property = format!(
        "  <property>\n    <name>{}</name>\n    {}\n  </property>\n",
        escape_xml(&patch.name),
        value
    );
    Ok(format!("{}{}{}", &doc[..close], property, &doc[close..]))
}

/// Read a property's value, if present.
pub fn get_property(document: &str, name: &str) -> Option<String> {
    let masked = mask_comments(document);
    let found = property_block().find_iter(&masked).find_map(|block| {
        let text = block.as_str();
        let found = name_element().captures(text)?.get(1)?;
        if unescape_xml(found.as_str()) != name {
            return None;
        }
        let value = value_element().find(text)?.as_str();
        let inner = value
            .strip_prefix("<value>")
            .and_then(|v| v.strip_suffix("</value>"))
            .unwrap_or("");
        Some(unescape_xml(inner))
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const YARN_SITE: &str = r#"<?xml version="1.0"?>
<!-- managed by hand -->
<configuration>
  <property>
    <name>yarn.nodemanager.resource.memory-mb</name>
    <value>4096</value>
  </property>
  <property>
    <name>yarn.resourcemanager.hostname</name>
    <value>resourcemanager</value>
  </property>
</configuration>
"#;

    #[test]
    fn test_replaces_existing_value_only() {
        let patched = apply_properties(
            YARN_SITE,
            &[PropertyPatch::new("yarn.nodemanager.resource.memory-mb", "8192")],
        )
        .unwrap();

        assert_eq!(
            patched,
            YARN_SITE.replace("<value>4096</value>", "<value>8192</value>")
        );
    }

    #[test]
    fn test_appends_missing_property() {
        let patched = apply_properties(
            YARN_SITE,
            &[PropertyPatch::new("yarn.log-aggregation-enable", "true")],
        )
        .unwrap();

        assert!(patched.starts_with(&YARN_SITE[..YARN_SITE.rfind("</configuration>").unwrap()]));
        assert_eq!(
            get_property(&patched, "yarn.log-aggregation-enable").as_deref(),
            Some("true")
        );
        assert!(patched.trim_end().ends_with("</configuration>"));
    }

    #[test]
    fn test_commented_out_property_is_left_alone() {
        let doc = r#"<configuration>
  <!--
  <property>
    <name>dfs.replication</name>
    <value>1</value>
  </property>
  -->
  <property>
    <name>dfs.replication</name>
    <value>3</value>
  </property>
</configuration>
"#;
        assert_eq!(get_property(doc, "dfs.replication").as_deref(), Some("3"));

        let patched = apply_properties(doc, &[PropertyPatch::new("dfs.replication", "2")]).unwrap();
        assert_eq!(patched, doc.replace("<value>3</value>", "<value>2</value>"));
        assert!(patched.contains("<value>1</value>"));
    }

    #[test]
    fn test_property_only_in_comment_is_appended() {
        let doc = "<configuration>\n  <!-- <property><name>a</name><value>x</value></property> -->\n</configuration>\n";
        let patched = apply_properties(doc, &[PropertyPatch::new("a", "y")]).unwrap();
        assert!(patched.contains("<value>x</value></property> -->"));
        assert_eq!(get_property(&patched, "a").as_deref(), Some("y"));
    }

    #[test]
    fn test_mask_comments_keeps_offsets() {
        let doc = "a<!-- é -->b<!-- open";
        let masked = mask_comments(doc);
        assert_eq!(masked.len(), doc.len());
        assert!(masked.starts_with('a'));
        assert_eq!(masked.trim(), "a           b");
    }

    #[test]
    fn test_values_are_escaped() {
        let patched =
            apply_properties(YARN_SITE, &[PropertyPatch::new("x.opts", "-Da=1 && b<2")]).unwrap();
        assert!(patched.contains("<value>-Da=1 &amp;&amp; b&lt;2</value>"));
        assert_eq!(get_property(&patched, "x.opts").as_deref(), Some("-Da=1 && b<2"));
    }

    #[test]
    fn test_last_patch_wins() {
        let patched = apply_properties(
            YARN_SITE,
            &[
                PropertyPatch::new("yarn.resourcemanager.hostname", "rm1"),
                PropertyPatch::new("yarn.resourcemanager.hostname", "rm2"),
            ],
        )
        .unwrap();
        assert_eq!(
            get_property(&patched, "yarn.resourcemanager.hostname").as_deref(),
            Some("rm2")
        );
    }

    #[test]
    fn test_rejects_non_config_document() {
        let err = apply_properties("<html></html>", &[PropertyPatch::new("a", "b")]).unwrap_err();
        assert!(matches!(err, PatchError::MalformedDocument(_)));
    }

    #[test]
    fn test_zip_checks_counts() {
        let err = PropertyPatch::zip(&["a".into(), "b".into()], &["1".into()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Number of properties and values must match. Properties: 2 Values: 1"
        );
    }

    #[test]
    fn test_config_file_names() {
        assert_eq!(HadoopConfigFile::CapacityScheduler.file_name(), "capacity-scheduler.xml");
        assert_eq!(HadoopConfigFile::CoreSite.to_string(), "core-site.xml");
    }
}
