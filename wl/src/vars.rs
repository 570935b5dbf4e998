//! Process-wide variable map
//!
//! Pipes data between steps and loops. Writers are the orchestrator (a
//! loop's `output_state` after it completes) and the step executor (a step
//! whose `output` names a variable); readers are input resolution at step
//! and loop start. The map lives from workflow start to workflow end.

use std::collections::BTreeMap;

use tracing::debug;

/// Process-wide mapping from variable names to string values.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    inner: BTreeMap<String, String>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-key replacement. Returns the previous value, if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        debug!(%name, "VariableMap::set");
        self.inner.insert(name, value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of the map for checkpoint persistence.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.clone()
    }

    /// Merge a persisted snapshot back in (used on loop resume).
    pub fn restore(&mut self, snapshot: BTreeMap<String, String>) {
        debug!(count = snapshot.len(), "VariableMap::restore");
        for (name, value) in snapshot {
            self.inner.insert(name, value);
        }
    }

    /// Replace `$NAME` tokens in `text` with values from the map.
    ///
    /// Longer names substitute first so `$FOO` never clips a `$FOOBAR`
    /// occurrence. Tokens with no matching variable are left untouched.
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }

        let mut keys: Vec<&String> = self.inner.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut result = text.to_string();
        for key in keys {
            let token = format!("${}", key);
            if result.contains(&token) {
                result = result.replace(&token, &self.inner[key.as_str()]);
            }
        }
        result
    }
}

/// True when `name` is an exportable variable name: an UPPERCASE_IDENTIFIER.
///
/// A step `output` matching this rule stores into the variable map instead
/// of naming a file.
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Replace `{{name}}` and `{{ name }}` placeholders with values from `vars`.
pub fn render_template(text: &str, vars: &BTreeMap<String, String>) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }

    let mut result = text.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
        result = result.replace(&format!("{{{{ {} }}}}", key), value);
    }
    result
}
