//! Action kinds understood by the executor and the driver.

use crate::error::{AutomationError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Supported action kinds. Wire names are camelCase and case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    // Navigation
    Navigate,

    // Pointer
    Click,
    Hover,
    DragDrop,
    Scroll,
    Gesture,
    Rotate,

    // Keyboard & focus
    Type,
    Keyboard,
    Shortcut,
    Focus,
    Blur,

    // Forms
    Select,
    UploadFile,

    // Wait & observation
    Wait,
    Assert,
    Screenshot,
    Extract,
    Evaluate,

    // Variables
    SetVariable,
    UseVariable,

    // Context switching
    TabSwitch,
    FrameSwitch,

    // Control flow
    Conditional,
    Loop,
    Subflow,

    // Cookies & storage
    SetCookie,
    GetCookie,
    ClearCookie,
    SetStorage,
    GetStorage,
    ClearStorage,

    // Network
    NetworkMock,

    Custom,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [ActionKind; 34] = [
        ActionKind::Navigate,
        ActionKind::Click,
        ActionKind::Hover,
        ActionKind::DragDrop,
        ActionKind::Scroll,
        ActionKind::Gesture,
        ActionKind::Rotate,
        ActionKind::Type,
        ActionKind::Keyboard,
        ActionKind::Shortcut,
        ActionKind::Focus,
        ActionKind::Blur,
        ActionKind::Select,
        ActionKind::UploadFile,
        ActionKind::Wait,
        ActionKind::Assert,
        ActionKind::Screenshot,
        ActionKind::Extract,
        ActionKind::Evaluate,
        ActionKind::SetVariable,
        ActionKind::UseVariable,
        ActionKind::TabSwitch,
        ActionKind::FrameSwitch,
        ActionKind::Conditional,
        ActionKind::Loop,
        ActionKind::Subflow,
        ActionKind::SetCookie,
        ActionKind::GetCookie,
        ActionKind::ClearCookie,
        ActionKind::SetStorage,
        ActionKind::GetStorage,
        ActionKind::ClearStorage,
        ActionKind::NetworkMock,
        ActionKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Hover => "hover",
            ActionKind::DragDrop => "dragDrop",
            ActionKind::Scroll => "scroll",
            ActionKind::Gesture => "gesture",
            ActionKind::Rotate => "rotate",
            ActionKind::Type => "type",
            ActionKind::Keyboard => "keyboard",
            ActionKind::Shortcut => "shortcut",
            ActionKind::Focus => "focus",
            ActionKind::Blur => "blur",
            ActionKind::Select => "select",
            ActionKind::UploadFile => "uploadFile",
            ActionKind::Wait => "wait",
            ActionKind::Assert => "assert",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Extract => "extract",
            ActionKind::Evaluate => "evaluate",
            ActionKind::SetVariable => "setVariable",
            ActionKind::UseVariable => "useVariable",
            ActionKind::TabSwitch => "tabSwitch",
            ActionKind::FrameSwitch => "frameSwitch",
            ActionKind::Conditional => "conditional",
            ActionKind::Loop => "loop",
            ActionKind::Subflow => "subflow",
            ActionKind::SetCookie => "setCookie",
            ActionKind::GetCookie => "getCookie",
            ActionKind::ClearCookie => "clearCookie",
            ActionKind::SetStorage => "setStorage",
            ActionKind::GetStorage => "getStorage",
            ActionKind::ClearStorage => "clearStorage",
            ActionKind::NetworkMock => "networkMock",
            ActionKind::Custom => "custom",
        }
    }

    /// Parse a wire name. Unknown names map to [`ActionKind::Custom`].
    pub fn parse(value: &str) -> Self {
        Self::lookup(value).unwrap_or(ActionKind::Custom)
    }

    /// Like [`ActionKind::parse`] but rejects names outside the catalog.
    pub fn validate(value: &str) -> Result<Self> {
        Self::lookup(value).ok_or_else(|| AutomationError::UnsupportedAction(value.to_string()))
    }

    fn lookup(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == value)
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            ActionKind::Conditional | ActionKind::Loop | ActionKind::Subflow
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_for_every_kind() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(&kind.to_string()), kind);
        }
    }

    #[test]
    fn test_unknown_and_case_mismatch_parse_to_custom() {
        assert_eq!(ActionKind::parse("teleport"), ActionKind::Custom);
        assert_eq!(ActionKind::parse("Navigate"), ActionKind::Custom);
        assert_eq!(ActionKind::parse("DRAGDROP"), ActionKind::Custom);
        assert_eq!(ActionKind::parse(""), ActionKind::Custom);
    }

    #[test]
    fn test_validate_rejects_unknown() {
        assert_eq!(ActionKind::validate("dragDrop").unwrap(), ActionKind::DragDrop);
        let err = ActionKind::validate("dragdrop").unwrap_err();
        assert!(matches!(err, AutomationError::UnsupportedAction(ref s) if s == "dragdrop"));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&ActionKind::UploadFile).unwrap();
        assert_eq!(json, "\"uploadFile\"");
        let parsed: ActionKind = serde_json::from_str("\"networkMock\"").unwrap();
        assert_eq!(parsed, ActionKind::NetworkMock);
        let unknown: ActionKind = serde_json::from_str("\"somethingElse\"").unwrap();
        assert_eq!(unknown, ActionKind::Custom);
    }
}
