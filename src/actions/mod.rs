//! Action catalog: kinds, behavioural metadata and graph sentinels.

pub mod kind;
pub mod metadata;

pub use kind::ActionKind;
pub use metadata::{ActionCategory, ActionMetadata};

/// Edge target that jumps to the next loop iteration.
pub const LOOP_CONTINUE_TARGET: &str = "__loop_continue__";
/// Edge target that leaves the enclosing loop.
pub const LOOP_BREAK_TARGET: &str = "__loop_break__";

pub const PORT_LOOP_BODY: &str = "loopbody";
pub const PORT_LOOP_AFTER: &str = "loopafter";
pub const PORT_LOOP_BREAK: &str = "loopbreak";
pub const PORT_LOOP_CONTINUE: &str = "loopcontinue";
pub const PORT_LOOP_BODY_ALT: &str = "loop_body";
pub const PORT_LOOP_NEXT: &str = "loop_next";
pub const PORT_LOOP_BREAK_ALT: &str = "loop_break";
pub const PORT_LOOP_CONTINUE_ALT: &str = "loop_continue";

/// Normalized loop port carried by an edge label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPort {
    Body,
    After,
    Break,
    Continue,
}

impl LoopPort {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            PORT_LOOP_BODY | PORT_LOOP_BODY_ALT => Some(LoopPort::Body),
            PORT_LOOP_AFTER | PORT_LOOP_NEXT => Some(LoopPort::After),
            PORT_LOOP_BREAK | PORT_LOOP_BREAK_ALT => Some(LoopPort::Break),
            PORT_LOOP_CONTINUE | PORT_LOOP_CONTINUE_ALT => Some(LoopPort::Continue),
            _ => None,
        }
    }
}

/// True when `target` is one of the loop sentinels.
pub fn is_loop_sentinel(target: &str) -> bool {
    target == LOOP_CONTINUE_TARGET || target == LOOP_BREAK_TARGET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_port_parsing_accepts_both_spellings() {
        assert_eq!(LoopPort::parse("loopafter"), Some(LoopPort::After));
        assert_eq!(LoopPort::parse("loop_next"), Some(LoopPort::After));
        assert_eq!(LoopPort::parse("LoopBreak"), Some(LoopPort::Break));
        assert_eq!(LoopPort::parse("loop_continue"), Some(LoopPort::Continue));
        assert_eq!(LoopPort::parse("loop_body"), Some(LoopPort::Body));
        assert_eq!(LoopPort::parse("then"), None);
    }

    #[test]
    fn test_sentinels() {
        assert!(is_loop_sentinel("__loop_break__"));
        assert!(is_loop_sentinel("__loop_continue__"));
        assert!(!is_loop_sentinel("node-1"));
    }
}
