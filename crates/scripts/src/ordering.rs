use crate::error::ScriptError;
use crate::script::Script;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Migrations run once and are journaled; setups are re-applied on every upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptCategory {
    Migration,
    Setup,
}

impl std::fmt::Display for ScriptCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptCategory::Migration => f.write_str("migration"),
            ScriptCategory::Setup => f.write_str("setup"),
        }
    }
}

/// Decides a script's category from its id (`migrations.001.sql`, `setup.api.views.sql`, ...).
#[derive(Debug, Clone)]
pub struct ScriptClassifier {
    migration: Regex,
    setup: Regex,
}

static DEFAULT_MIGRATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.migrations?\.").expect("migration pattern is valid"));
static DEFAULT_SETUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.setups?\.").expect("setup pattern is valid"));

impl Default for ScriptClassifier {
    fn default() -> Self {
        Self {
            migration: DEFAULT_MIGRATION.clone(),
            setup: DEFAULT_SETUP.clone(),
        }
    }
}

impl ScriptClassifier {
    pub fn new(migration_pattern: &str, setup_pattern: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            migration: Regex::new(migration_pattern)?,
            setup: Regex::new(setup_pattern)?,
        })
    }

    /// `None` for scripts that belong to neither category.
    pub fn classify(&self, script: &Script) -> Option<ScriptCategory> {
        // Leading dot so a top-level `migrations/` directory matches too.
        let key = format!(".{}", script.id());
        if self.migration.is_match(&key) {
            Some(ScriptCategory::Migration)
        } else if self.setup.is_match(&key) {
            Some(ScriptCategory::Setup)
        } else {
            None
        }
    }
}

/// A script with its category, as produced by [`ScriptPriorityComparer::order`].
#[derive(Debug, Clone)]
pub struct OrderedScript {
    pub category: ScriptCategory,
    pub script: Script,
}

/// Orders scripts for execution.
///
/// Migrations come before setups. Setups are further ordered by the index of
/// the first priority pattern matching their path (unmatched last). Remaining
/// ties fall back to ordinal path comparison.
#[derive(Debug, Clone)]
pub struct ScriptPriorityComparer {
    classifier: ScriptClassifier,
    setup_priorities: Vec<Regex>,
}

impl ScriptPriorityComparer {
    /// Builds a comparer; `setup_priority_patterns` are matched case-insensitively.
    pub fn new<S: AsRef<str>>(
        classifier: ScriptClassifier,
        setup_priority_patterns: &[S],
    ) -> Result<Self, ScriptError> {
        let setup_priorities = setup_priority_patterns
            .iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            classifier,
            setup_priorities,
        })
    }

    pub fn classifier(&self) -> &ScriptClassifier {
        &self.classifier
    }

    fn setup_priority(&self, script: &Script) -> usize {
        self.setup_priorities
            .iter()
            .position(|p| p.is_match(script.path()))
            .unwrap_or(self.setup_priorities.len())
    }

    pub fn compare(&self, a: &OrderedScript, b: &OrderedScript) -> Ordering {
        a.category
            .cmp(&b.category)
            .then_with(|| match a.category {
                ScriptCategory::Setup => self
                    .setup_priority(&a.script)
                    .cmp(&self.setup_priority(&b.script)),
                ScriptCategory::Migration => Ordering::Equal,
            })
            .then_with(|| a.script.path().cmp(b.script.path()))
    }

    /// Classifies and sorts `scripts`. Scripts that fit no category are dropped with a warning.
    pub fn order(&self, scripts: impl IntoIterator<Item = Script>) -> Vec<OrderedScript> {
        let mut ordered: Vec<OrderedScript> = scripts
            .into_iter()
            .filter_map(|script| match self.classifier.classify(&script) {
                Some(category) => Some(OrderedScript { category, script }),
                None => {
                    tracing::warn!(
                        script_id = %script.id(),
                        "Script is neither a migration nor a setup script; ignoring it."
                    );
                    None
                }
            })
            .collect();
        ordered.sort_by(|a, b| self.compare(a, b));
        ordered
    }
}
