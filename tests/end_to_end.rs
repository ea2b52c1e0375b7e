//! End-to-end scenarios exercising the full pipeline on whole C snippets,
//! grounded on spec.md §8's "Concrete end-to-end scenarios" and testable
//! properties. Kept in `tests/` rather than `#[cfg(test)]` modules since
//! these exercise the public `dccc` API as a whole, matching the teacher's
//! own split between colocated unit tests and crate-level integration tests.

use dccc::config::{CompilerConfig, OutputKind};
use dccc::{compile_and_link_files, compile_source};
use std::io::Write;

fn assembly_only(src: &str) -> String {
    let cfg = CompilerConfig::builder().output(OutputKind::Assembly).build();
    compile_source(src, "t.c", &cfg).expect("compile should succeed").assembly
}

#[test]
fn add_function_stack_call_links_end_to_end() {
    let src = "int add(int a, int b) { return a + b; } int main() { return add(2, 3); }";
    let cfg = CompilerConfig::default();
    let out = compile_source(src, "t.c", &cfg).expect("compiles");
    assert!(out.linked_words.is_some());
    assert!(out.assembly.contains("add"));
    assert!(out.assembly.contains("main"));
}

#[test]
fn add_function_reg_call_links_end_to_end() {
    let src = "__regcall int add(int a, int b) { return a + b; } int main() { return add(2, 3); }";
    let cfg = CompilerConfig::default();
    let out = compile_source(src, "t.c", &cfg).expect("compiles");
    assert!(out.linked_words.is_some());
    // Reg-call cleanup must use ADD, never SUB (Open Question #3).
    assert!(!out.assembly.contains("SUB SP"));
}

#[test]
fn stack_call_parameters_are_read_entirely_off_the_stack() {
    // A plain (stack-call by default) two-parameter function must seed both
    // locals from `[J + 2]`/`[J + 3]`, never from `A`/`B` the way reg-call
    // would.
    let asm = assembly_only("int add(int a, int b) { return a + b; }");
    assert!(asm.contains("[J + 2]"));
    assert!(asm.contains("[J + 3]"));
}

#[test]
fn reg_call_parameters_are_seeded_from_a_and_b() {
    let asm = assembly_only("__regcall int add(int a, int b) { return a + b; }");
    assert!(asm.contains(", A"));
    assert!(asm.contains(", B"));
    assert!(!asm.contains("[J + 2]"));
}

#[test]
fn short_circuit_and_produces_diamond_shape() {
    let asm = assembly_only("int f(int x) { return x && 1; }");
    assert!(asm.contains("IFE"));
}

#[test]
fn loop_lowering_reevaluates_condition_at_top() {
    let asm = assembly_only(
        "int sum() { int i; int s; i = 0; s = 0; while (i < 10) { s = s + i; i = i + 1; } return s; }",
    );
    assert!(asm.contains("IFL") || asm.contains("IFG"));
}

#[test]
fn array_subscript_scales_index_by_element_size() {
    // Disable folding: every scalar in this language is one word wide, so
    // the `MUL`/`MLI` by the element size always folds to a no-op once
    // constant folding runs (§ast_opt) — with folding off, the scaling
    // multiply lowered by the parser's subscript desugaring is still
    // visible. `int` is signed, so a signed index lowers to `MLI`.
    let cfg = CompilerConfig::builder().output(OutputKind::Assembly).optimize(false).build();
    let asm = compile_source("int at(int *p, int i) { return p[i]; }", "t.c", &cfg)
        .expect("compiles")
        .assembly;
    assert!(asm.contains("MLI"));
}

#[test]
fn pointer_cast_via_deref_compiles_to_a_load() {
    let asm = assembly_only("int read_first(int *p) { return *p; }");
    // A `Deref` always lowers to a bracketed (indirect) operand somewhere.
    assert!(asm.contains('['));
}

#[test]
fn signed_modulo_lowers_to_mdi() {
    let asm = assembly_only("int f(int a, int b) { return a % b; }");
    assert!(asm.contains("MDI"));
    assert!(!asm.contains("MUL"));
}

#[test]
fn unsigned_modulo_lowers_to_mod_never_mul() {
    let asm = assembly_only("unsigned int f(unsigned int a, unsigned int b) { return a % b; }");
    assert!(asm.contains("MOD"));
    assert!(!asm.contains("MLI") && !asm.contains("MDI"));
}

#[test]
fn multi_file_program_links_across_translation_units() {
    let helper = "int helper(int x) { return x + 1; }".to_string();
    let main_src = "int helper(int x); int main() { return helper(41); }".to_string();
    let cfg = CompilerConfig::default();
    let (image, _diagnostics) = compile_and_link_files(
        &[("helper.c".to_string(), helper), ("main.c".to_string(), main_src)],
        &cfg,
    )
    .expect("multi-file link should succeed");
    assert!(!image.is_empty());
}

#[test]
fn undefined_symbol_across_files_is_reported() {
    let main_src = "int ghost(int x); int main() { return ghost(1); }".to_string();
    let cfg = CompilerConfig::default();
    let result = compile_and_link_files(&[("main.c".to_string(), main_src)], &cfg);
    assert!(result.is_err());
}

#[test]
fn compiles_from_a_file_on_disk() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    writeln!(tmp, "int main() {{ return 0; }}").unwrap();
    let src = std::fs::read_to_string(tmp.path()).unwrap();
    let cfg = CompilerConfig::default();
    let out = compile_source(&src, "main.c", &cfg).expect("compiles");
    assert!(out.linked_words.is_some());
}

#[test]
fn global_variable_counter_compiles_and_links() {
    let src = "int counter; int inc() { counter = counter + 1; return counter; } int main() { return inc(); }";
    let cfg = CompilerConfig::default();
    let out = compile_source(src, "t.c", &cfg).expect("compiles");
    assert!(out.linked_words.is_some());
    assert!(out.assembly.contains("counter"));
}

#[test]
fn do_while_lowers_without_duplicating_body_text() {
    let asm = assembly_only("int f() { int i; i = 0; do { i = i + 1; } while (i < 3); return i; }");
    // The body contains exactly one `ADD` for `i + 1`; textual duplication
    // would produce two.
    let add_count = asm.matches("ADD").count();
    assert_eq!(add_count, 1);
}

#[test]
fn break_exits_a_loop_via_the_escape_flag() {
    let src = "int f() { int i; i = 0; while (1) { if (i == 5) { break; } i = i + 1; } return i; }";
    let cfg = CompilerConfig::default();
    let out = compile_source(src, "t.c", &cfg).expect("compiles");
    assert!(out.linked_words.is_some());
}

#[test]
fn bitwise_and_does_not_short_circuit_like_logical_and() {
    // Both operands of `&` must always be evaluated and combined bitwise;
    // this must compile to a plain AND instruction, not the &&-diamond.
    let asm = assembly_only("int f(int a, int b) { return a & b; }");
    assert!(asm.contains("AND"));
    assert!(!asm.contains("IFE"));
}

#[test]
fn bitwise_or_does_not_alias_xor() {
    let asm = assembly_only("int f(int a, int b) { return a | b; }");
    assert!(asm.contains("BOR"));
}

#[test]
fn struct_declarations_are_rejected_with_a_diagnostic() {
    let cfg = CompilerConfig::default();
    let result = compile_source("struct Foo { int x; };", "t.c", &cfg);
    assert!(result.is_err());
}
