//! Context handed to module rules at instantiation.

use std::path::PathBuf;
use std::sync::Arc;

use crate::rules::scope::RulesScope;
use crate::util::InternedString;

/// Kind of generated-code support a module defaults to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeGenKind {
    Reflection,
    None,
}

/// Per-assembly context copied into every module instantiated from that
/// assembly. Derived copies may tighten fields; the original is frozen
/// once the assembly finishes loading.
#[derive(Debug, Clone)]
pub struct ModuleRulesContext {
    /// Scope of the owning assembly. A module's context scope must equal
    /// the scope of the assembly that instantiated it.
    pub scope: Arc<RulesScope>,

    /// Base directory intermediates default under.
    pub default_output_base_dir: PathBuf,

    /// Owning plugin, when the assembly belongs to one.
    pub plugin: Option<InternedString>,

    /// Whether modules from this assembly may participate in hot reload.
    pub can_hot_reload: bool,

    /// Whether DebugGame builds are allowed to diverge from Development.
    pub can_build_debug_game: bool,

    /// Whether modules here may contribute shared PCH templates.
    pub can_use_for_shared_pch: bool,

    /// Whether modules default to game-module classification.
    pub classify_as_game_module: bool,

    /// Default generated-code mode for modules without an explicit one.
    pub default_code_gen_kind: Option<CodeGenKind>,
}

impl ModuleRulesContext {
    pub fn new(scope: Arc<RulesScope>, default_output_base_dir: PathBuf) -> Self {
        ModuleRulesContext {
            scope,
            default_output_base_dir,
            plugin: None,
            can_hot_reload: false,
            can_build_debug_game: false,
            can_use_for_shared_pch: true,
            classify_as_game_module: false,
            default_code_gen_kind: None,
        }
    }

    /// Derive a copy for a plugin assembly nested under this context.
    pub fn for_plugin(&self, plugin: InternedString, scope: Arc<RulesScope>) -> Self {
        let mut derived = self.clone();
        derived.plugin = Some(plugin);
        derived.scope = scope;
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_derivation_keeps_base_fields() {
        let engine = RulesScope::engine();
        let ctx = ModuleRulesContext {
            can_use_for_shared_pch: true,
            classify_as_game_module: true,
            ..ModuleRulesContext::new(engine.clone(), PathBuf::from("/proj/Intermediate"))
        };

        let plugin_scope = RulesScope::child(&engine, "plugin");
        let derived = ctx.for_plugin(InternedString::new("MyPlugin"), plugin_scope.clone());

        assert_eq!(derived.plugin.unwrap(), "MyPlugin");
        assert_eq!(derived.scope.name(), plugin_scope.name());
        assert!(derived.classify_as_game_module);
        assert_eq!(derived.default_output_base_dir, ctx.default_output_base_dir);
    }
}
