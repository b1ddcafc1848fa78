//! Slot keys.
//!
//! Every state cell and widget created while building the tree resolves a
//! key from its position. A position is the enclosing structural scope plus
//! either the Rust call site (captured with `#[track_caller]`) and an
//! occurrence counter, or an explicit name. Scopes are created fresh each
//! time a branch arm or list item mounts, so occurrence counting restarts
//! on remount.

use std::fmt;
use std::panic::Location;

use serde::Serialize;

/// Identifier of a structural scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScopeId(pub(crate) u64);

impl ScopeId {
    /// The scope of the build script itself.
    pub const ROOT: ScopeId = ScopeId(0);
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A source location that instantiates cells or widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl CallSite {
    /// The location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A resolved key, unique within a session while its slot is alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKey {
    /// Derived from the call site.
    Site {
        /// Enclosing scope.
        scope: ScopeId,
        /// Where the slot was created.
        site: CallSite,
        /// How many times this site already ran in this scope.
        occurrence: u32,
    },

    /// Supplied by the caller.
    Named {
        /// Enclosing scope.
        scope: ScopeId,
        /// The caller's key.
        name: String,
    },
}

impl SlotKey {
    /// The scope the key lives in.
    pub fn scope(&self) -> ScopeId {
        match self {
            SlotKey::Site { scope, .. } | SlotKey::Named { scope, .. } => *scope,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Site {
                scope,
                site,
                occurrence,
            } => write!(f, "{scope}/{site}#{occurrence}"),
            SlotKey::Named { scope, name } => write!(f, "{scope}/{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn here() -> CallSite {
        CallSite::caller()
    }

    #[test]
    fn caller_resolves_to_the_calling_line() {
        let a = here();
        let b = here();
        assert_ne!(a, b);
        assert!(a.to_string().contains("key.rs"));
    }

    #[test]
    fn keys_in_different_scopes_differ() {
        let k1 = SlotKey::Named {
            scope: ScopeId::ROOT,
            name: "user".into(),
        };
        let k2 = SlotKey::Named {
            scope: ScopeId(7),
            name: "user".into(),
        };
        assert_ne!(k1, k2);
        assert_eq!(k2.to_string(), "s7/user");
    }
}
