use std::collections::{BTreeMap, HashMap};

/// Parameters reported with ParameterStatus after authentication and again
/// whenever SET changes one of them.
pub const REPORTED: &[&str] = &[
    "server_version",
    "server_version_num",
    "server_encoding",
    "client_encoding",
    "DateStyle",
    "TimeZone",
    "integer_datetimes",
    "standard_conforming_strings",
    "IntervalStyle",
    "is_superuser",
    "application_name",
];

/// Startup packet keys that are connection attributes, not settings.
const STARTUP_ONLY: &[&str] = &["user", "database", "options", "replication"];

/// Session parameters keyed case-insensitively, keeping the canonical
/// spelling for reporting.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, (String, String)>,
}

impl Settings {
    pub fn initial(
        server_version: &str,
        server_version_num: &str,
        superuser: bool,
        startup: &HashMap<String, String>,
    ) -> Self {
        let mut settings = Settings::default();
        let defaults = [
            ("server_version", server_version),
            ("server_version_num", server_version_num),
            ("server_encoding", "UTF8"),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO, MDY"),
            ("TimeZone", "UTC"),
            ("integer_datetimes", "on"),
            ("standard_conforming_strings", "on"),
            ("IntervalStyle", "postgres"),
            ("is_superuser", if superuser { "on" } else { "off" }),
            ("application_name", ""),
            ("search_path", "\"$user\", public"),
            ("transaction_isolation", "read committed"),
        ];
        for (name, value) in defaults {
            settings.set(name, value);
        }
        for (name, value) in startup {
            if !STARTUP_ONLY.contains(&name.as_str()) {
                settings.set(name, value);
            }
        }
        settings
    }

    /// Stores `value`. Returns the canonical name when the parameter is
    /// one the client must be told about.
    pub fn set(&mut self, name: &str, value: &str) -> Option<String> {
        let key = name.to_ascii_lowercase();
        let canonical = REPORTED
            .iter()
            .find(|r| r.eq_ignore_ascii_case(name))
            .map(|r| r.to_string());
        let display = match self.values.get(&key) {
            Some((existing, _)) => existing.clone(),
            None => canonical.clone().unwrap_or_else(|| name.to_string()),
        };
        self.values.insert(key, (display, value.to_string()));
        canonical
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Reported parameters in their canonical order.
    pub fn reported(&self) -> Vec<(String, String)> {
        REPORTED
            .iter()
            .filter_map(|name| {
                self.get(name)
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}
