//! Capability filter
//!
//! Decides whether a notification is a job request this instance serves.

use ldn_core::{Notification, TYPE_CREATE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityFilter {
    action: String,
}

impl CapabilityFilter {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// A `Create` whose `instrument.action` names our capability
    pub fn is_actionable(&self, notification: &Notification) -> bool {
        if notification.kind() != Some(TYPE_CREATE) {
            return false;
        }
        notification.instrument_action() == Some(self.action.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn notification(value: Value) -> Notification {
        Notification::from_value(value).unwrap()
    }

    #[test]
    fn test_matching_create_is_actionable() {
        let filter = CapabilityFilter::new("infer");
        let n = notification(json!({
            "type": "Create",
            "object": {"user_prompt": "hi"},
            "instrument": {"type": "Service", "action": "infer"}
        }));
        assert!(filter.is_actionable(&n));
    }

    #[test]
    fn test_multi_typed_instrument_is_actionable() {
        let filter = CapabilityFilter::new("infer");
        let n = notification(json!({
            "type": "Create",
            "instrument": {"type": ["Service", "prov:SoftwareAgent"], "action": "infer"}
        }));
        assert!(filter.is_actionable(&n));
    }

    #[test]
    fn test_other_types_and_actions_are_ignored() {
        let filter = CapabilityFilter::new("infer");
        let cases = [
            json!({"type": "Announce", "instrument": {"action": "infer"}}),
            json!({"type": "Create", "instrument": {"action": "index"}}),
            json!({"type": "Create"}),
            json!({"type": "Create", "instrument": "infer"}),
            json!({"instrument": {"action": "infer"}}),
        ];
        for case in cases {
            assert!(!filter.is_actionable(&notification(case.clone())), "{case}");
        }
    }
}
