//! Assemblies the agent never rewrites.
//!
//! The rewriting engine and its helpers are managed code themselves; letting
//! their methods through would have the engine instrument its own call path.
//! A handful of base runtime assemblies are unsafe to rewrite as well.

/// Managed counterpart of the agent.
pub const AGENT_ASSEMBLY: &str = "ClrRewriter";
/// Core support library the injected code calls into.
pub const CORE_ASSEMBLY: &str = "ClrRewriter.Core";
/// IL emission helpers used by the engine.
pub const EMIT_ASSEMBLY: &str = "ClrRewriter.Emit";

/// Compiled-in deny list.
pub const DEFAULT_EXCLUDED_ASSEMBLIES: &[&str] = &[
    AGENT_ASSEMBLY,
    CORE_ASSEMBLY,
    EMIT_ASSEMBLY,
    "mscorlib",
    "System.Core",
    "System.Private.CoreLib",
];

/// Exact-match assembly deny list, fixed once the agent is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionFilter {
    assemblies: Vec<String>,
}

impl ExclusionFilter {
    pub fn new<I, S>(assemblies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExclusionFilter {
            assemblies: assemblies.into_iter().map(Into::into).collect(),
        }
    }

    /// `true` when methods of `assembly` must be left untouched.
    ///
    /// Matching is exact and case-sensitive, like the runtime's own
    /// assembly simple names.
    pub fn is_excluded(&self, assembly: &str) -> bool {
        self.assemblies.iter().any(|a| a == assembly)
    }

    pub fn assemblies(&self) -> impl Iterator<Item = &str> {
        self.assemblies.iter().map(String::as_str)
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        ExclusionFilter::new(DEFAULT_EXCLUDED_ASSEMBLIES.iter().copied())
    }
}
