//! Parent/child type-compatibility table for story trees

use super::StoryElementType;
use crate::error::{OutlineError, OutlineResult, Violation};
use crate::tree::{Intent, NodeKind};
use std::collections::{BTreeMap, BTreeSet};

/// Finite set of legal `(parent_type, child_type)` pairs.
///
/// A type missing from the table has no legal children. The root type
/// never appears as a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeGrammar {
    allowed: BTreeMap<StoryElementType, BTreeSet<StoryElementType>>,
}

impl Default for TypeGrammar {
    /// root: part, chapter; part: chapter; chapter: scene, sequel
    fn default() -> Self {
        use StoryElementType::*;
        let allowed = [
            (Root, vec![Part, Chapter]),
            (Part, vec![Chapter]),
            (Chapter, vec![Scene, Sequel]),
            (Scene, vec![]),
            (Sequel, vec![]),
        ]
        .into_iter()
        .map(|(parent, children)| (parent, children.into_iter().collect()))
        .collect();
        Self { allowed }
    }
}

impl TypeGrammar {
    /// Build from a name table such as the `story_grammar` config section
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> OutlineResult<Self> {
        let parse = |name: &str| {
            StoryElementType::parse(name).ok_or_else(|| {
                OutlineError::Config(format!("unknown story node type '{}' in grammar", name))
            })
        };

        let mut allowed = BTreeMap::new();
        for (parent, children) in table {
            let parent = parse(parent)?;
            let mut set = BTreeSet::new();
            for child in children {
                let child = parse(child)?;
                if child.is_root() {
                    return Err(OutlineError::Config(format!(
                        "'{}' cannot list root as a child",
                        parent
                    )));
                }
                set.insert(child);
            }
            allowed.insert(parent, set);
        }
        Ok(Self { allowed })
    }

    pub fn permits(&self, parent: StoryElementType, child: StoryElementType) -> bool {
        self.allowed
            .get(&parent)
            .is_some_and(|children| children.contains(&child))
    }

    /// Legal child types of `parent`
    pub fn children_of(&self, parent: StoryElementType) -> Vec<StoryElementType> {
        self.allowed
            .get(&parent)
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every legal pair
    pub fn pairs(&self) -> Vec<(StoryElementType, StoryElementType)> {
        self.allowed
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |child| (*parent, *child)))
            .collect()
    }

    pub fn check(
        &self,
        parent: StoryElementType,
        child: StoryElementType,
        intent: Intent,
    ) -> OutlineResult<()> {
        if self.permits(parent, child) {
            Ok(())
        } else {
            Err(intent.reject(Violation::Grammar {
                parent: parent.as_str(),
                child: child.as_str(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StoryElementType::*;

    fn table(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(parent, children)| {
                (
                    parent.to_string(),
                    children.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_default_grammar_pairs() {
        let grammar = TypeGrammar::default();
        assert_eq!(
            grammar.pairs(),
            vec![
                (Root, Part),
                (Root, Chapter),
                (Part, Chapter),
                (Chapter, Scene),
                (Chapter, Sequel),
            ]
        );
        assert!(!grammar.permits(Part, Part));
        assert!(grammar.children_of(Scene).is_empty());
    }

    #[test]
    fn test_from_table_accepts_nested_parts() {
        let grammar = TypeGrammar::from_table(&table(&[
            ("root", &["part"]),
            ("part", &["part", "chapter"]),
            ("chapter", &["scene"]),
        ]))
        .unwrap();
        assert!(grammar.permits(Part, Part));
        assert!(!grammar.permits(Root, Chapter));
        // Missing entries mean no children
        assert!(grammar.children_of(Sequel).is_empty());
    }

    #[test]
    fn test_from_table_rejects_unknown_names() {
        let err = TypeGrammar::from_table(&table(&[("root", &["volume"])])).unwrap_err();
        assert!(matches!(err, OutlineError::Config(msg) if msg.contains("volume")));
    }

    #[test]
    fn test_from_table_rejects_root_as_child() {
        let err = TypeGrammar::from_table(&table(&[("chapter", &["root"])])).unwrap_err();
        assert!(matches!(err, OutlineError::Config(_)));
    }

    #[test]
    fn test_check_reports_pair() {
        let err = TypeGrammar::default()
            .check(Scene, Chapter, Intent::Move)
            .unwrap_err();
        assert!(matches!(
            err,
            OutlineError::IllegalMove(Violation::Grammar {
                parent: "scene",
                child: "chapter"
            })
        ));
    }
}
