//! Glob rule sets for the scheduler's rule stage.

use config::{Config, File as ConfigFile, FileFormat};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Error;
use crate::scanner::matches_any;

/// Decides which rule, if any, flags a path.
pub trait RuleMatcher: Send + Sync {
    fn match_path(&self, path: &Path) -> Option<String>;

    /// Rule id per matching path; paths without a match are absent.
    fn match_paths<'a, I>(&self, paths: I) -> BTreeMap<PathBuf, String>
    where
        I: IntoIterator<Item = &'a PathBuf>,
        Self: Sized,
    {
        paths
            .into_iter()
            .filter_map(|path| self.match_path(path).map(|id| (path.clone(), id)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

/// Ordered rules; the first one that matches wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    compiled: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, Error> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    include: compile_strict(&rule.include)?,
                    exclude: compile_strict(&rule.exclude)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(RuleSet { rules, compiled })
    }

    /// Load a `rules = [...]` document (TOML, JSON or YAML by extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file: RuleFile = Config::builder()
            .add_source(ConfigFile::from(path))
            .build()?
            .try_deserialize()?;
        info!("Loaded {} rules from {}", file.rules.len(), path.display());
        Self::new(file.rules)
    }

    pub fn from_text(text: &str, format: FileFormat) -> Result<Self, Error> {
        let file: RuleFile = Config::builder()
            .add_source(ConfigFile::from_str(text, format))
            .build()?
            .try_deserialize()?;
        Self::new(file.rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_strict(globs: &[String]) -> Result<Vec<Pattern>, Error> {
    globs
        .iter()
        .map(|glob| Pattern::new(glob).map_err(Error::from))
        .collect()
}

impl RuleMatcher for RuleSet {
    fn match_path(&self, path: &Path) -> Option<String> {
        self.rules
            .iter()
            .zip(&self.compiled)
            .find(|(_, compiled)| {
                matches_any(&compiled.include, path) && !matches_any(&compiled.exclude, path)
            })
            .map(|(rule, _)| rule.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, include: &[&str], exclude: &[&str]) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_lowercase(),
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let set = RuleSet::new(vec![rule("R1", &["*.txt"], &[]), rule("R2", &["*"], &[])]).unwrap();
        assert_eq!(set.match_path(Path::new("/ws/a.txt")).as_deref(), Some("R1"));
        assert_eq!(set.match_path(Path::new("/ws/b.log")).as_deref(), Some("R2"));
    }

    #[test]
    fn test_exclude_and_empty_include() {
        let set = RuleSet::new(vec![
            rule("R1", &["*.txt"], &["secret*"]),
            rule("EMPTY", &[], &[]),
        ])
        .unwrap();
        assert_eq!(set.match_path(Path::new("/ws/secret.txt")), None);
        assert_eq!(set.match_path(Path::new("/ws/notes.md")), None);
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let err = RuleSet::new(vec![rule("BAD", &["["], &[])]).unwrap_err();
        assert!(matches!(err, Error::Pattern(_)));
    }

    #[test]
    fn test_parse_toml_rules() {
        let text = r#"
            [[rules]]
            id = "R1"
            name = "text files"
            include = ["*.txt"]

            [[rules]]
            id = "R2"
            name = "logs"
            include = ["*.log"]
            exclude = ["keep.log"]
        "#;
        let set = RuleSet::from_text(text, FileFormat::Toml).unwrap();
        assert_eq!(set.rules().len(), 2);
        let paths = vec![
            PathBuf::from("/ws/a.txt"),
            PathBuf::from("/ws/b.log"),
            PathBuf::from("/ws/keep.log"),
        ];
        let matches = set.match_paths(&paths);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[&PathBuf::from("/ws/b.log")], "R2");
    }
}
