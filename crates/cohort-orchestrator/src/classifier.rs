use crate::config::ClassifierKind;
use crate::types::Priority;
use cohort_core::{CohortError, CohortResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Estimated effort of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// A quick, contained change.
    Simple,
    /// The default when nothing else matches.
    Moderate,
    /// Broad or risky work.
    Complex,
}

impl Complexity {
    /// Simple work is low priority, complex work high.
    pub fn suggested_priority(self) -> Priority {
        match self {
            Complexity::Simple => Priority::Low,
            Complexity::Moderate => Priority::Medium,
            Complexity::Complex => Priority::High,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        };
        f.write_str(s)
    }
}

/// Suggestion produced for a task description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Estimated effort.
    pub complexity: Complexity,
    /// Priority derived from the complexity.
    pub priority: Priority,
    /// Capability tags detected in the text.
    pub capabilities: BTreeSet<String>,
}

impl Classification {
    /// Build a classification, deriving the priority from `complexity`.
    pub fn new(complexity: Complexity, capabilities: BTreeSet<String>) -> Self {
        Self {
            complexity,
            priority: complexity.suggested_priority(),
            capabilities,
        }
    }
}

/// Pure function from a task's text to a suggested priority and capability set.
pub trait ComplexityClassifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Suggest a priority and capabilities for a task.
    fn classify(&self, title: &str, description: &str) -> Classification;
}

const COMPLEX_PATTERN: &str = concat!(
    r"\b(architect\w*|redesign\w*|migrat\w*|distributed|concurren\w*",
    r"|scal(e|ing|ability)|overhaul\w*|rewrite)\b",
);

const SIMPLE_PATTERN: &str = r"\b(typo\w*|rename\w*|bump\w*|tweak\w*|minor|trivial|small)\b";

const CAPABILITY_PATTERNS: &[(&str, &str)] = &[
    (
        "frontend",
        r"\b(ui|ux|css|html|react|frontend|component\w*|layout\w*|page)\b",
    ),
    (
        "backend",
        r"\b(api|endpoint\w*|server\w*|backend|service\w*)\b",
    ),
    (
        "database",
        r"\b(sql|database\w*|schema\w*|migration\w*|quer(y|ies)|index(es)?)\b",
    ),
    ("testing", r"\b(test\w*|coverage|qa|regression\w*)\b"),
    (
        "security",
        r"\b(auth\w*|security|vulnerab\w*|encrypt\w*|permission\w*|xss|csrf)\b",
    ),
    (
        "devops",
        r"\b(deploy\w*|ci|pipeline\w*|docker\w*|kubernetes|k8s|infra\w*)\b",
    ),
    (
        "documentation",
        r"\b(doc|docs|documentation|readme|guide)\b",
    ),
    (
        "performance",
        r"\b(perf|performance|latency|optimi[sz]\w*|benchmark\w*)\b",
    ),
];

/// Regex keyword rules for complexity and capability detection.
pub struct KeywordClassifier {
    complex: Regex,
    simple: Regex,
    capabilities: Vec<(String, Regex)>,
}

impl KeywordClassifier {
    /// Compile the rules. Three or more capability hits also count as complex.
    pub fn new(complex: &str, simple: &str, capabilities: &[(&str, &str)]) -> CohortResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                CohortError::Config(format!("invalid classifier pattern '{pattern}': {e}"))
            })
        };
        Ok(Self {
            complex: compile(complex)?,
            simple: compile(simple)?,
            capabilities: capabilities
                .iter()
                .map(|(tag, pattern)| Ok(((*tag).to_string(), compile(pattern)?)))
                .collect::<CohortResult<_>>()?,
        })
    }

    /// Built-in rule set.
    pub fn standard() -> CohortResult<Self> {
        Self::new(COMPLEX_PATTERN, SIMPLE_PATTERN, CAPABILITY_PATTERNS)
    }
}

impl ComplexityClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, title: &str, description: &str) -> Classification {
        let text = format!("{title} {description}").to_lowercase();
        let capabilities: BTreeSet<String> = self
            .capabilities
            .iter()
            .filter(|(_, re)| re.is_match(&text))
            .map(|(tag, _)| tag.clone())
            .collect();

        let complexity = if self.complex.is_match(&text) || capabilities.len() >= 3 {
            Complexity::Complex
        } else if self.simple.is_match(&text) {
            Complexity::Simple
        } else {
            Complexity::Moderate
        };
        Classification::new(complexity, capabilities)
    }
}

/// Classifies by word count alone.
#[derive(Debug, Clone, Copy)]
pub struct LengthClassifier {
    /// At most this many words is simple.
    pub simple_max_words: usize,
    /// At least this many words is complex.
    pub complex_min_words: usize,
}

impl Default for LengthClassifier {
    fn default() -> Self {
        Self {
            simple_max_words: 12,
            complex_min_words: 60,
        }
    }
}

impl ComplexityClassifier for LengthClassifier {
    fn name(&self) -> &str {
        "length"
    }

    fn classify(&self, title: &str, description: &str) -> Classification {
        let words = title.split_whitespace().count() + description.split_whitespace().count();
        let complexity = if words >= self.complex_min_words {
            Complexity::Complex
        } else if words <= self.simple_max_words {
            Complexity::Simple
        } else {
            Complexity::Moderate
        };
        Classification::new(complexity, BTreeSet::new())
    }
}

/// Adapter for a closure, e.g. a call into an external model.
pub struct FnClassifier<F> {
    name: String,
    f: F,
}

impl<F> FnClassifier<F>
where
    F: Fn(&str, &str) -> Classification + Send + Sync,
{
    /// Wrap `f` under the given name.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ComplexityClassifier for FnClassifier<F>
where
    F: Fn(&str, &str) -> Classification + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, title: &str, description: &str) -> Classification {
        (self.f)(title, description)
    }
}

/// Construct the built-in classifier selected in configuration.
pub fn build(kind: ClassifierKind) -> CohortResult<Arc<dyn ComplexityClassifier>> {
    Ok(match kind {
        ClassifierKind::Keyword => Arc::new(KeywordClassifier::standard()?),
        ClassifierKind::Length => Arc::new(LengthClassifier::default()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_complexity() {
        let c = KeywordClassifier::standard().unwrap();
        assert_eq!(
            c.classify("Fix typo", "in the footer").complexity,
            Complexity::Simple
        );
        assert_eq!(
            c.classify("Redesign the scheduler", "").complexity,
            Complexity::Complex
        );
        let moderate = c.classify("Add pagination", "to the list view");
        assert_eq!(moderate.complexity, Complexity::Moderate);
        assert_eq!(moderate.priority, Priority::Medium);
    }

    #[test]
    fn test_keyword_capabilities() {
        let c = KeywordClassifier::standard().unwrap();
        let result = c.classify("Add API endpoint", "with SQL query and tests");
        let tags: Vec<&str> = result.capabilities.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["backend", "database", "testing"]);
        assert_eq!(result.complexity, Complexity::Complex);
        assert_eq!(result.priority, Priority::High);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = KeywordClassifier::new("(", "x", &[]).err().unwrap();
        assert!(matches!(err, CohortError::Config(_)));
    }

    #[test]
    fn test_length_thresholds() {
        let c = LengthClassifier::default();
        assert_eq!(c.classify("short", "").complexity, Complexity::Simple);
        let medium = "word ".repeat(30);
        assert_eq!(c.classify("t", &medium).complexity, Complexity::Moderate);
        let long = "word ".repeat(80);
        assert_eq!(c.classify("t", &long).complexity, Complexity::Complex);
    }

    #[test]
    fn test_fn_classifier_and_build() {
        let c = FnClassifier::new("always-complex", |_: &str, _: &str| {
            let tags = BTreeSet::from(["research".to_string()]);
            Classification::new(Complexity::Complex, tags)
        });
        assert_eq!(c.name(), "always-complex");
        assert_eq!(c.classify("a", "b").priority, Priority::High);

        assert_eq!(build(ClassifierKind::Length).unwrap().name(), "length");
        assert_eq!(build(ClassifierKind::Keyword).unwrap().name(), "keyword");
    }
}
