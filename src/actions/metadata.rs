//! Behavioural metadata for each action kind.

use crate::actions::kind::ActionKind;
use serde::{Deserialize, Serialize};

/// Coarse grouping of action kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Navigation,
    Interaction,
    Input,
    Wait,
    Assertion,
    Capture,
    Data,
    Variable,
    Context,
    ControlFlow,
    Storage,
    Network,
    Custom,
}

/// Runtime flags consulted by dispatch, retries and the entry check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionMetadata {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub category: ActionCategory,
    pub description: String,
    pub needs_selector_wait: bool,
    pub triggers_dom_changes: bool,
    pub requires_element: bool,
    pub can_fail: bool,
    pub produces_data: bool,
    pub is_control_flow: bool,
}

/// Flag bits used by the static table below.
const SELECTOR: u8 = 1;
const DOM: u8 = 1 << 1;
const ELEMENT: u8 = 1 << 2;
const FAILS: u8 = 1 << 3;
const DATA: u8 = 1 << 4;
const CONTROL: u8 = 1 << 5;

struct Entry {
    kind: ActionKind,
    category: ActionCategory,
    flags: u8,
    description: &'static str,
}

const REGISTRY: [Entry; 34] = [
    Entry { kind: ActionKind::Navigate, category: ActionCategory::Navigation, flags: DOM | FAILS, description: "Navigate the active page to a URL" },
    Entry { kind: ActionKind::Click, category: ActionCategory::Interaction, flags: SELECTOR | DOM | ELEMENT | FAILS, description: "Click an element" },
    Entry { kind: ActionKind::Hover, category: ActionCategory::Interaction, flags: SELECTOR | ELEMENT | FAILS, description: "Move the pointer over an element" },
    Entry { kind: ActionKind::DragDrop, category: ActionCategory::Interaction, flags: SELECTOR | DOM | ELEMENT | FAILS, description: "Drag an element onto a target" },
    Entry { kind: ActionKind::Scroll, category: ActionCategory::Interaction, flags: FAILS, description: "Scroll the page or an element" },
    Entry { kind: ActionKind::Gesture, category: ActionCategory::Interaction, flags: DOM | FAILS, description: "Perform a touch gesture" },
    Entry { kind: ActionKind::Rotate, category: ActionCategory::Interaction, flags: DOM | FAILS, description: "Rotate the device orientation" },
    Entry { kind: ActionKind::Type, category: ActionCategory::Input, flags: SELECTOR | DOM | ELEMENT | FAILS, description: "Type text into an element" },
    Entry { kind: ActionKind::Keyboard, category: ActionCategory::Input, flags: DOM | FAILS, description: "Press or release keys" },
    Entry { kind: ActionKind::Shortcut, category: ActionCategory::Input, flags: DOM | FAILS, description: "Send a keyboard shortcut" },
    Entry { kind: ActionKind::Focus, category: ActionCategory::Input, flags: SELECTOR | ELEMENT | FAILS, description: "Focus an element" },
    Entry { kind: ActionKind::Blur, category: ActionCategory::Input, flags: SELECTOR | ELEMENT | FAILS, description: "Remove focus from an element" },
    Entry { kind: ActionKind::Select, category: ActionCategory::Input, flags: SELECTOR | DOM | ELEMENT | FAILS, description: "Choose an option in a select element" },
    Entry { kind: ActionKind::UploadFile, category: ActionCategory::Input, flags: SELECTOR | DOM | ELEMENT | FAILS, description: "Attach files to a file input" },
    Entry { kind: ActionKind::Wait, category: ActionCategory::Wait, flags: FAILS, description: "Wait for time, an element or a navigation" },
    Entry { kind: ActionKind::Assert, category: ActionCategory::Assertion, flags: SELECTOR | FAILS, description: "Assert a condition about the page" },
    Entry { kind: ActionKind::Screenshot, category: ActionCategory::Capture, flags: FAILS | DATA, description: "Capture a screenshot" },
    Entry { kind: ActionKind::Extract, category: ActionCategory::Data, flags: SELECTOR | ELEMENT | FAILS | DATA, description: "Extract data from elements" },
    Entry { kind: ActionKind::Evaluate, category: ActionCategory::Data, flags: DOM | FAILS | DATA, description: "Evaluate a script in the page" },
    Entry { kind: ActionKind::SetVariable, category: ActionCategory::Variable, flags: DATA, description: "Store a value in the execution store" },
    Entry { kind: ActionKind::UseVariable, category: ActionCategory::Variable, flags: FAILS | DATA, description: "Read a value from the execution store" },
    Entry { kind: ActionKind::TabSwitch, category: ActionCategory::Context, flags: FAILS, description: "Switch the active tab" },
    Entry { kind: ActionKind::FrameSwitch, category: ActionCategory::Context, flags: SELECTOR | FAILS, description: "Switch the active frame" },
    Entry { kind: ActionKind::Conditional, category: ActionCategory::ControlFlow, flags: CONTROL, description: "Branch on an expression" },
    Entry { kind: ActionKind::Loop, category: ActionCategory::ControlFlow, flags: FAILS | CONTROL, description: "Repeat a body graph" },
    Entry { kind: ActionKind::Subflow, category: ActionCategory::ControlFlow, flags: FAILS | DATA | CONTROL, description: "Invoke another workflow" },
    Entry { kind: ActionKind::SetCookie, category: ActionCategory::Storage, flags: FAILS, description: "Set a cookie" },
    Entry { kind: ActionKind::GetCookie, category: ActionCategory::Storage, flags: FAILS | DATA, description: "Read cookies" },
    Entry { kind: ActionKind::ClearCookie, category: ActionCategory::Storage, flags: FAILS, description: "Clear cookies" },
    Entry { kind: ActionKind::SetStorage, category: ActionCategory::Storage, flags: FAILS, description: "Write local or session storage" },
    Entry { kind: ActionKind::GetStorage, category: ActionCategory::Storage, flags: FAILS | DATA, description: "Read local or session storage" },
    Entry { kind: ActionKind::ClearStorage, category: ActionCategory::Storage, flags: FAILS, description: "Clear local or session storage" },
    Entry { kind: ActionKind::NetworkMock, category: ActionCategory::Network, flags: FAILS, description: "Mock or intercept network requests" },
    Entry { kind: ActionKind::Custom, category: ActionCategory::Custom, flags: FAILS, description: "Engine-specific custom action" },
];

impl Entry {
    fn to_metadata(&self) -> ActionMetadata {
        ActionMetadata {
            kind: self.kind,
            category: self.category,
            description: self.description.to_string(),
            needs_selector_wait: self.flags & SELECTOR != 0,
            triggers_dom_changes: self.flags & DOM != 0,
            requires_element: self.flags & ELEMENT != 0,
            can_fail: self.flags & FAILS != 0,
            produces_data: self.flags & DATA != 0,
            is_control_flow: self.flags & CONTROL != 0,
        }
    }
}

/// Metadata for a kind. Never fails; kinds without an entry get the custom default.
pub fn lookup(kind: ActionKind) -> ActionMetadata {
    REGISTRY
        .iter()
        .find(|entry| entry.kind == kind)
        .map(Entry::to_metadata)
        .unwrap_or_else(|| custom_default(kind))
}

/// Metadata for a raw wire name.
pub fn lookup_str(kind: &str) -> ActionMetadata {
    lookup(ActionKind::parse(kind))
}

fn custom_default(kind: ActionKind) -> ActionMetadata {
    ActionMetadata {
        kind,
        category: ActionCategory::Custom,
        description: "Custom action".to_string(),
        needs_selector_wait: false,
        triggers_dom_changes: false,
        requires_element: false,
        can_fail: true,
        produces_data: false,
        is_control_flow: false,
    }
}

pub fn all_types() -> Vec<ActionKind> {
    ActionKind::ALL.to_vec()
}

pub fn by_category(category: ActionCategory) -> Vec<ActionKind> {
    REGISTRY
        .iter()
        .filter(|entry| entry.category == category)
        .map(|entry| entry.kind)
        .collect()
}

/// Kinds that act on a concrete element.
pub fn interaction_types() -> Vec<ActionKind> {
    REGISTRY
        .iter()
        .filter(|entry| entry.flags & ELEMENT != 0)
        .map(|entry| entry.kind)
        .collect()
}

pub fn dom_changing_types() -> Vec<ActionKind> {
    REGISTRY
        .iter()
        .filter(|entry| entry.flags & DOM != 0)
        .map(|entry| entry.kind)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_exactly_one_entry() {
        for kind in ActionKind::ALL {
            let count = REGISTRY.iter().filter(|e| e.kind == kind).count();
            assert_eq!(count, 1, "{} should have one metadata entry", kind);
            assert_eq!(lookup(kind).kind, kind);
        }
    }

    #[test]
    fn test_control_flow_flags_match_kind() {
        for kind in ActionKind::ALL {
            assert_eq!(lookup(kind).is_control_flow, kind.is_control_flow(), "{}", kind);
        }
    }

    #[test]
    fn test_unknown_string_gets_custom_default() {
        let meta = lookup_str("warpDrive");
        assert_eq!(meta.category, ActionCategory::Custom);
        assert!(meta.can_fail);
        assert!(!meta.needs_selector_wait);
        assert!(!meta.produces_data);
    }

    #[test]
    fn test_category_queries() {
        let control = by_category(ActionCategory::ControlFlow);
        assert_eq!(
            control,
            vec![ActionKind::Conditional, ActionKind::Loop, ActionKind::Subflow]
        );
        assert!(interaction_types().contains(&ActionKind::Click));
        assert!(!interaction_types().contains(&ActionKind::Navigate));
        assert!(dom_changing_types().contains(&ActionKind::Navigate));
        assert!(!dom_changing_types().contains(&ActionKind::Screenshot));
        assert_eq!(all_types().len(), 34);
    }

    #[test]
    fn test_metadata_serializes_type_field() {
        let json = serde_json::to_value(lookup(ActionKind::Click)).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["category"], "interaction");
    }
}
