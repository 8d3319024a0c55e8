//! YAML configuration

use crate::arc::BeatMovePolicy;
use crate::error::{OutlineError, OutlineResult};
use crate::story::TypeGrammar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings for the gateway and the command line tool.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineConfig {
    /// SQLite database file; the platform data directory when unset
    pub database: Option<PathBuf>,
    /// Retries of a request that lost a race with another writer
    pub max_retries: u32,
    pub beat_moves: BeatMovePolicy,
    /// Parent type to permitted child types; empty means the built-in grammar
    pub story_grammar: BTreeMap<String, Vec<String>>,
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            database: None,
            max_retries: 2,
            beat_moves: BeatMovePolicy::default(),
            story_grammar: BTreeMap::new(),
        }
    }
}

impl OutlineConfig {
    pub fn from_yaml_str(yaml: &str) -> OutlineResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| OutlineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> OutlineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| OutlineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// `$XDG_CONFIG_HOME/fiction-outlines/config.yaml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fiction-outlines").join("config.yaml"))
    }

    /// The configured database, or `<data dir>/fiction-outlines/outlines.db`
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
                .join("fiction-outlines")
                .join("outlines.db")
        })
    }

    pub fn grammar(&self) -> OutlineResult<TypeGrammar> {
        if self.story_grammar.is_empty() {
            Ok(TypeGrammar::default())
        } else {
            TypeGrammar::from_table(&self.story_grammar)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::StoryElementType;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = OutlineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, OutlineConfig::default());
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.grammar().unwrap(), TypeGrammar::default());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
database: /tmp/outlines.db
max_retries: 5
beat_moves: same_segment
story_grammar:
  root: [part]
  part: [part, chapter]
  chapter: [scene]
"#;
        let config = OutlineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/outlines.db"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.beat_moves, BeatMovePolicy::SameSegment);

        let grammar = config.grammar().unwrap();
        assert!(grammar.permits(StoryElementType::Part, StoryElementType::Part));
        assert!(!grammar.permits(StoryElementType::Root, StoryElementType::Chapter));
    }

    #[test]
    fn test_unknown_policy_is_a_config_error() {
        let err = OutlineConfig::from_yaml_str("beat_moves: anywhere").unwrap_err();
        assert!(matches!(err, OutlineError::Config(_)));
    }

    #[test]
    fn test_bad_grammar_surfaces_on_use() {
        let config = OutlineConfig::from_yaml_str("story_grammar:\n  root: [volume]\n").unwrap();
        assert!(matches!(config.grammar(), Err(OutlineError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_retries: 0\n").unwrap();
        assert_eq!(OutlineConfig::load(&path).unwrap().max_retries, 0);
        assert!(OutlineConfig::load(dir.path().join("missing.yaml")).is_err());
    }
}
