//! Strongly typed identifiers.
//!
//! Database rows are keyed by `i64`, so every id wraps one. Codes identify
//! definitions (stable across versions); ids identify rows.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Row id of a persisted command.
    CommandId
);
define_id!(
    /// Row id of a workflow instance.
    WorkflowInstanceId
);
define_id!(
    /// Row id of one task attempt. Every retry gets a fresh one.
    TaskInstanceId
);
define_id!(
    /// Code of a workflow definition.
    WorkflowCode
);
define_id!(
    /// Code of a task node inside a workflow definition.
    TaskCode
);

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_id_displays_inner_value() {
        assert_eq!(WorkflowInstanceId::new(42).to_string(), "42");
        assert_eq!(TaskCode::from(7).get(), 7);
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&CommandId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: CommandId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CommandId::new(9));
    }
}
