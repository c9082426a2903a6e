//! Rule scopes.
//!
//! Every rule declaration lives in exactly one scope, and scopes form a
//! tree rooted at `engine`. A declaration may only reference declarations
//! in an equal-or-ancestor scope; graph construction checks this through
//! [`RulesScope::contains`].

use std::fmt;
use std::sync::Arc;

use crate::util::InternedString;

/// A node in the scope tree.
#[derive(Debug, Clone)]
pub struct RulesScope {
    name: InternedString,
    parent: Option<Arc<RulesScope>>,
}

impl RulesScope {
    /// The root scope every assembly chain ends in.
    pub fn engine() -> Arc<RulesScope> {
        Arc::new(RulesScope {
            name: InternedString::new("engine"),
            parent: None,
        })
    }

    /// Create a child scope of `parent`.
    pub fn child(parent: &Arc<RulesScope>, name: impl AsRef<str>) -> Arc<RulesScope> {
        Arc::new(RulesScope {
            name: InternedString::new(name),
            parent: Some(parent.clone()),
        })
    }

    pub fn name(&self) -> InternedString {
        self.name
    }

    pub fn parent(&self) -> Option<&Arc<RulesScope>> {
        self.parent.as_ref()
    }

    /// True iff `other` lies on the chain from this scope to the root,
    /// itself included. A scope may reference rules of any scope it
    /// contains.
    pub fn contains(&self, other: &RulesScope) -> bool {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.name == other.name {
                return true;
            }
            current = scope.parent.as_deref();
        }
        false
    }

    /// Depth of this scope; the root is 0.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_deref();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent.as_deref();
        }
        depth
    }
}

impl fmt::Display for RulesScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", parent, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl PartialEq for RulesScope {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.depth() == other.depth()
    }
}

impl Eq for RulesScope {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_follows_parent_chain() {
        let engine = RulesScope::engine();
        let enterprise = RulesScope::child(&engine, "enterprise");
        let project = RulesScope::child(&enterprise, "project");
        let plugin = RulesScope::child(&project, "plugin");

        // A project rule may reference engine and enterprise rules.
        assert!(project.contains(&engine));
        assert!(project.contains(&enterprise));
        assert!(plugin.contains(&engine));
        assert!(plugin.contains(&plugin));

        // The reverse reference is illegal.
        assert!(!engine.contains(&project));
        assert!(!enterprise.contains(&plugin));
    }

    #[test]
    fn test_display_renders_full_chain() {
        let engine = RulesScope::engine();
        let project = RulesScope::child(&engine, "project");
        assert_eq!(project.to_string(), "engine/project");
    }

    #[test]
    fn test_sibling_scopes_do_not_contain_each_other() {
        let engine = RulesScope::engine();
        let a = RulesScope::child(&engine, "plugin_a");
        let b = RulesScope::child(&engine, "plugin_b");
        assert!(!a.contains(&b));
        assert!(!b.contains(&a));
        assert!(a.contains(&engine));
    }
}
