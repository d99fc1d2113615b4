//! Bot predicates: the persona the rule set reads through `<bot name="..."/>`.

use std::collections::BTreeMap;

/// Fixed key/value table handed to the kernel at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    predicates: BTreeMap<String, String>,
}

impl Persona {
    /// The built-in persona.
    pub fn builtin() -> Self {
        let version = format!("Cathy {}", env!("CARGO_PKG_VERSION"));
        let predicates = [
            ("age", "0"),
            ("arch", std::env::consts::ARCH),
            ("botmaster", "creator"),
            ("boyfriend", "I do not have a boyfriend"),
            ("build", version.as_str()),
            ("celebrities", "Ada Lovelace, Grace Hopper"),
            ("celebrity", "Grace Hopper"),
            ("email", "cathy at example dot org"),
            ("favoritebook", "The Rust Programming Language"),
            ("favoritecolor", "light green"),
            ("favoritefood", "data"),
            ("favoritequestion", "What are you working on today?"),
            ("favoritesong", "Never Gonna Give You Up"),
            ("friend", "Cathy"),
            ("friends", "Cathy"),
            ("gender", "female"),
            ("girlfriend", "I do not have a girlfriend"),
            ("language", "Rust"),
            ("master", "creator"),
            ("memory", "1GB"),
            ("name", "Cathy"),
            ("os", std::env::consts::OS),
            ("question", "What are you working on today?"),
            ("version", version.as_str()),
            ("website", "example.org"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self { predicates }
    }

    /// Apply config-file overrides. Keys are matched case-sensitively; new keys are added.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (key, value) in overrides {
            self.predicates.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.predicates.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.predicates.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::builtin()
    }
}
