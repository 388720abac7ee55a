use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Short names that expand to full command text. Lookup is exact-name only;
/// anything that is not a defined alias passes through unchanged.
pub struct AliasTable {
    aliases: HashMap<String, String>,
    name_pattern: Regex,
}

impl AliasTable {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
            // Same class of names a shell would accept for an alias
            name_pattern: Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("alias name pattern"),
        }
    }

    pub fn set(&mut self, name: &str, command: &str) {
        self.aliases.insert(name.to_string(), command.to_string());
    }

    /// No-op when the name is absent; returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    pub fn resolve(&self, text: &str) -> String {
        match self.aliases.get(text) {
            Some(command) => command.clone(),
            None => text.to_string(),
        }
    }

    /// Parse a `name=command` definition and install it. Rejected definitions
    /// leave the table untouched.
    pub fn define(&mut self, definition: &str) -> Result<(String, String)> {
        let (name, command) = definition
            .split_once('=')
            .ok_or_else(|| anyhow!("alias definition must be name=command: {definition}"))?;
        let name = name.trim();
        let command = command.trim();
        if command.is_empty() {
            return Err(anyhow!("alias command is empty: {definition}"));
        }
        if !self.name_pattern.is_match(name) {
            return Err(anyhow!("invalid alias name: {name}"));
        }
        self.set(name, command);
        Ok((name.to_string(), command.to_string()))
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Load a table from a toml file; a missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        let mut table = Self::new();
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            table.aliases = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
        }
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.aliases)?;
        fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}
