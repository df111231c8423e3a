//! Readiness tiers.

use std::fmt;

/// How confident a candidate vertex is that evaluating it now gives its
/// final answer. Each round dequeues only the lowest non-empty tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadyPriority {
    /// Definite work.
    ReadyNow,
    /// Could still gain a value from something not yet known.
    NotReadyMid,
    /// Containers and graph-wide queries: more can always be added.
    NotReadyHigh,
    /// No template yet.
    NotReadyMax,
}

impl fmt::Display for ReadyPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadyPriority::ReadyNow => "ReadyNow",
            ReadyPriority::NotReadyMid => "NotReadyMid",
            ReadyPriority::NotReadyHigh => "NotReadyHigh",
            ReadyPriority::NotReadyMax => "NotReadyMax",
        };
        f.write_str(s)
    }
}
