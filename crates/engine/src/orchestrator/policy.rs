//! Named prompt templates ("policies") with `%key%` placeholders.
//!
//! Templates come from two places: a small set of built-in defaults and a
//! directory holding one `<name>.txt` file per template. A file overrides the
//! default of the same name; a file whose text is blank is ignored. The
//! directory can be re-read at runtime with [`PolicyResolver::reload`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Template names used by the game-side callers.
pub mod names {
    /// Classify a player suggestion (rule, config, other).
    pub const SUGGEST_CLASSIFY: &str = "suggest_classify";
    /// Map a suggestion onto a configuration parameter.
    pub const SUGGEST_MAP: &str = "suggest_map";
    /// Turn a suggestion into a structured rule.
    pub const RULE_MAP: &str = "rule_map";
    /// Moderate a batch of pseudonymized chat lines.
    pub const CHAT_ANALYSIS: &str = "chat_analysis";
}

/// Built-in template bodies.
pub mod defaults {
    pub const SUGGEST_CLASSIFY: &str = r#"Goal:
Decide whether a player suggestion is useful, redundant, immature or harmful, given the current server rules.

Context:
* The suggestion was made by player %player%: %suggestion%
* Current server rules: %rules%
* Weigh originality, fairness, technical feasibility and server balance.

Instructions:
Answer only with a JSON object, no comments or extra text:
{"suggestion_type": "rule" | "config" | "other", "reasoning": "short factual justification", "confidence": 0.0-1.0}"#;

    pub const CHAT_ANALYSIS: &str = r#"Goal:
Review the following in-game chat lines and judge each speaker's behaviour against the server etiquette.

Context:
* Chat lines, each prefixed with a pseudonymous alias: %message%
* Behaviour rules include: %rules%
* Focus on respect, constructiveness and community spirit.

Instructions:
Answer only with a JSON array. Add one element per alias whose behaviour needs a reputation change; return [] if none does:
[{"alias_id": "alias from the chat", "flag": "flag code", "reason_summary": "short assessment"}]"#;

    pub const RULE_MAP: &str = r#"Goal:
Rewrite a proposed rule so it is unambiguous, categorized and complete.

Context:
* Proposal: %suggestion%
* Current rules (id: text): %rules%

Instructions:
Answer only with a JSON object naming the rule it replaces or extends:
{"id": rule id as integer, "text": "final rule text", "summary": "one-line summary", "impact": 1-5}"#;
}

/// Errors from reading the template directory.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Failed to read policy directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Loads and resolves prompt templates.
pub struct PolicyResolver {
    dir: Option<PathBuf>,
    templates: RwLock<HashMap<String, String>>,
}

impl PolicyResolver {
    /// Resolver with only the built-in defaults.
    pub fn with_defaults() -> Self {
        Self {
            dir: None,
            templates: RwLock::new(builtin_templates()),
        }
    }

    /// Resolver backed by a template directory, loaded immediately.
    ///
    /// A missing directory is not an error; only the defaults are available
    /// until it appears and [`reload`](Self::reload) is called.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let resolver = Self {
            dir: Some(dir.into()),
            templates: RwLock::new(HashMap::new()),
        };
        resolver.reload()?;
        Ok(resolver)
    }

    /// Re-read the directory. Returns the number of registered templates.
    pub fn reload(&self) -> Result<usize, PolicyError> {
        let mut templates = builtin_templates();
        if let Some(dir) = &self.dir {
            let loaded = load_dir(dir)?;
            tracing::info!(
                dir = %dir.display(),
                count = loaded.len(),
                "Loaded policy templates"
            );
            templates.extend(loaded);
        }

        let count = templates.len();
        *self
            .templates
            .write()
            .unwrap_or_else(PoisonError::into_inner) = templates;
        Ok(count)
    }

    /// Register or replace a template in memory.
    pub fn insert(&self, name: impl Into<String>, body: impl Into<String>) {
        let body = body.into();
        if body.trim().is_empty() {
            return;
        }
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), body);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Fill the named template. `None` if no such template exists.
    ///
    /// Placeholders without a value are left verbatim.
    pub fn resolve(&self, name: &str, values: &HashMap<String, String>) -> Option<String> {
        let template = self.get(name)?;
        Some(substitute(&template, values))
    }
}

fn builtin_templates() -> HashMap<String, String> {
    HashMap::from([
        (names::SUGGEST_CLASSIFY.to_string(), defaults::SUGGEST_CLASSIFY.to_string()),
        (names::CHAT_ANALYSIS.to_string(), defaults::CHAT_ANALYSIS.to_string()),
        (names::RULE_MAP.to_string(), defaults::RULE_MAP.to_string()),
    ])
}

fn load_dir(dir: &Path) -> Result<HashMap<String, String>, PolicyError> {
    let mut templates = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(dir = %dir.display(), "Policy directory missing, using defaults only");
            return Ok(templates);
        }
        Err(source) => {
            return Err(PolicyError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    for entry in entries {
        let path = entry
            .map_err(|source| PolicyError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();

        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let body = std::fs::read_to_string(&path).map_err(|source| PolicyError::Io {
            path: path.clone(),
            source,
        })?;
        if body.trim().is_empty() {
            tracing::debug!(policy = name, "Ignoring empty policy file");
            continue;
        }
        templates.insert(name.to_string(), body);
    }

    Ok(templates)
}

/// Single left-to-right pass replacing `%key%` for known keys.
///
/// Substituted values are never rescanned, so a value that itself contains
/// `%other%` (player chat, for instance) stays literal.
pub fn substitute(template: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) => match values.get(&after[..end]) {
                Some(value) => {
                    out.push_str(value);
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            },
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
