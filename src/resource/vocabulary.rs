//! Vocabulary tables
//!
//! Backend vocabulary -> CIMI vocabulary, kept as data (loaded from
//! `resources/common.json`) so a driver can extend it without touching
//! mapping or dispatch code.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct Vocabulary {
    /// Prefix of every action relation URI
    pub action_rel_prefix: String,
    /// Backend state -> CIMI state
    #[serde(default)]
    pub states: BTreeMap<String, String>,
    /// Backend action -> CIMI action
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

impl Vocabulary {
    /// Translate a backend state. Unknown states pass through unchanged.
    pub fn standard_state(&self, state: &str) -> String {
        self.states
            .get(state)
            .cloned()
            .unwrap_or_else(|| state.to_string())
    }

    /// Translate a backend action name. Unknown actions pass through unchanged.
    pub fn standard_action<'a>(&'a self, action: &'a str) -> &'a str {
        self.actions.get(action).map(|s| s.as_str()).unwrap_or(action)
    }

    /// Backend names that translate to the given CIMI action
    pub fn backend_actions<'a>(&'a self, standard: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.actions
            .iter()
            .filter(move |(_, to)| to.as_str() == standard)
            .map(|(from, _)| from.as_str())
    }

    /// Relation URI of a CIMI action
    pub fn action_rel(&self, action: &str) -> String {
        format!("{}{}", self.action_rel_prefix, action)
    }

    /// Action name from either a bare name or a relation URI
    pub fn action_name<'a>(&self, name_or_rel: &'a str) -> &'a str {
        name_or_rel
            .strip_prefix(self.action_rel_prefix.as_str())
            .unwrap_or(name_or_rel)
    }

    /// Add (or override) entries from another table
    pub fn extend(&mut self, other: Vocabulary) {
        self.states.extend(other.states);
        self.actions.extend(other.actions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> Vocabulary {
        Vocabulary {
            action_rel_prefix: "http://www.dmtf.org/cimi/action/".to_string(),
            states: [("RUNNING".to_string(), "STARTED".to_string())].into(),
            actions: [
                ("delete".to_string(), "destroy".to_string()),
                ("reboot".to_string(), "restart".to_string()),
            ]
            .into(),
        }
    }

    #[test]
    fn test_state_translation() {
        let vocab = vocabulary();
        assert_eq!(vocab.standard_state("RUNNING"), "STARTED");
        assert_eq!(vocab.standard_state("STOPPED"), "STOPPED");
        assert_eq!(vocab.standard_state("running"), "running");
    }

    #[test]
    fn test_action_translation_and_reverse() {
        let vocab = vocabulary();
        assert_eq!(vocab.standard_action("reboot"), "restart");
        assert_eq!(vocab.standard_action("start"), "start");
        assert_eq!(vocab.backend_actions("destroy").collect::<Vec<_>>(), vec!["delete"]);
        assert_eq!(vocab.backend_actions("start").count(), 0);
    }

    #[test]
    fn test_action_rel_round_trip() {
        let vocab = vocabulary();
        let rel = vocab.action_rel("restart");
        assert_eq!(rel, "http://www.dmtf.org/cimi/action/restart");
        assert_eq!(vocab.action_name(&rel), "restart");
        assert_eq!(vocab.action_name("stop"), "stop");
    }

    #[test]
    fn test_extend_adds_backend_entries() {
        let mut vocab = vocabulary();
        vocab.extend(Vocabulary {
            action_rel_prefix: String::new(),
            states: [("PROVISIONING".to_string(), "CREATING".to_string())].into(),
            actions: [("reset".to_string(), "restart".to_string())].into(),
        });

        assert_eq!(vocab.standard_state("PROVISIONING"), "CREATING");
        assert_eq!(vocab.standard_action("reset"), "restart");
        assert_eq!(vocab.action_rel_prefix, "http://www.dmtf.org/cimi/action/");
        assert_eq!(vocab.backend_actions("restart").count(), 2);
    }
}
