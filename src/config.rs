//! Compiler configuration threaded through the `compile_*` entry points.
//!
//! Grounded on the teacher's `config.rs`: a small builder-pattern struct
//! rather than a config *file* (spec.md has no analog to `lint.toml`).

use crate::asm::AssemblerSyntax;
use crate::types::CallConv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Emit the assembly-text listing only (`-S`).
    Assembly,
    /// Assemble and link, emitting the final hex listing.
    Linked,
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub default_callconv: CallConv,
    pub emit_syntax: AssemblerSyntax,
    pub accept_syntax: AssemblerSyntax,
    pub optimize: bool,
    pub output: OutputKind,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            default_callconv: CallConv::StackCall,
            emit_syntax: AssemblerSyntax::Notch,
            accept_syntax: AssemblerSyntax::Notch,
            optimize: true,
            output: OutputKind::Linked,
        }
    }
}

impl CompilerConfig {
    pub fn builder() -> CompilerConfigBuilder {
        CompilerConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct CompilerConfigBuilder {
    inner: CompilerConfigPartial,
}

#[derive(Default)]
struct CompilerConfigPartial {
    default_callconv: Option<CallConv>,
    emit_syntax: Option<AssemblerSyntax>,
    optimize: Option<bool>,
    output: Option<OutputKind>,
}

impl CompilerConfigBuilder {
    pub fn default_callconv(mut self, cc: CallConv) -> Self {
        self.inner.default_callconv = Some(cc);
        self
    }

    pub fn emit_syntax(mut self, s: AssemblerSyntax) -> Self {
        self.inner.emit_syntax = Some(s);
        self
    }

    pub fn optimize(mut self, on: bool) -> Self {
        self.inner.optimize = Some(on);
        self
    }

    pub fn output(mut self, kind: OutputKind) -> Self {
        self.inner.output = Some(kind);
        self
    }

    pub fn build(self) -> CompilerConfig {
        let defaults = CompilerConfig::default();
        CompilerConfig {
            default_callconv: self.inner.default_callconv.unwrap_or(defaults.default_callconv),
            emit_syntax: self.inner.emit_syntax.unwrap_or(defaults.emit_syntax),
            accept_syntax: defaults.accept_syntax,
            optimize: self.inner.optimize.unwrap_or(defaults.optimize),
            output: self.inner.output.unwrap_or(defaults.output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_only_set_fields() {
        let cfg = CompilerConfig::builder().optimize(false).build();
        assert!(!cfg.optimize);
        assert_eq!(cfg.default_callconv, CallConv::StackCall);
    }
}
