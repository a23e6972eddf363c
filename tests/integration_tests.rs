//! End-to-end tests for the compilation pipeline.

use tcfront::frontend::sema::{Sema, SemaOptions};
use tcfront::ir::builder::{Op, OpKind, Region};
use tcfront::ir::{BodyOp, IterKind, Module};
use tcfront::utils::errors::CompilerError;
use tcfront::{compile, parse, CompileOptions};

fn options(body_op: BodyOp, specialize: bool) -> CompileOptions {
    CompileOptions {
        emit_warnings: false,
        print_ranges: false,
        body_op,
        specialize,
    }
}

/// Walk every operation in a module, including nested regions.
fn all_ops(module: &Module) -> Vec<&Op> {
    fn walk<'a>(region: &'a Region, out: &mut Vec<&'a Op>) {
        for op in &region.ops {
            out.push(op);
            for r in &op.regions {
                walk(r, out);
            }
        }
    }
    let mut out = Vec::new();
    for f in &module.functions {
        walk(&f.body, &mut out);
    }
    out
}

fn count_kind(module: &Module, pred: impl Fn(&OpKind) -> bool) -> usize {
    all_ops(module).iter().filter(|op| pred(&op.kind)).count()
}

const MM: &str =
    "def mm(float(N,K) A, float(K,M) B) -> (float(N,M) C) { C(i,j) +=! A(i,k)*B(k,j) }";

const MM_HALO: &str = "def mm_halo(float(N,K) A, float(K,M) B) -> (float(N,M) C) \
    { C(i,j) +=! A(i,k)*B(k,j) where i in 1:N-1, j in 1:M-1, k in 1:K-1 }";

const MV: &str = "def mv(float(N,M) A, float(M) x) -> (float(N) y) { y(i) +=! A(i,k)*x(k) }";

#[test]
fn test_mm_static_specialized() {
    let module = compile(MM, "mm.tc", &options(BodyOp::Structured, true)).unwrap();

    // The matmul pattern is recognized and the operands appear in
    // canonical order: A, B, C.
    let ops = all_ops(&module);
    let matmul = ops
        .iter()
        .find(|op| matches!(op.kind, OpKind::Matmul))
        .expect("expected a matmul op");
    let func = &module.functions[0];
    // Parameters are inputs then outputs: A, B, C.
    let params = func.params();
    assert_eq!(matmul.operands[0], params[0]);
    assert_eq!(matmul.operands[1], params[1]);
    assert_eq!(matmul.operands[2], params[2]);

    // The LHS iterators span C fully, so initialization fills the whole
    // tensor without a sub-view.
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Fill)), 1);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::SubView)), 0);
}

#[test]
fn test_mm_static_swapped_operands_canonicalized() {
    let source =
        "def mm(float(N,K) A, float(K,M) B) -> (float(N,M) C) { C(i,j) +=! B(k,j)*A(i,k) }";
    let module = compile(source, "mm.tc", &options(BodyOp::Structured, true)).unwrap();

    let ops = all_ops(&module);
    let matmul = ops
        .iter()
        .find(|op| matches!(op.kind, OpKind::Matmul))
        .expect("expected a matmul op");
    let params = module.functions[0].params();
    // Canonical order is still [A, B, C] despite the swapped source.
    assert_eq!(matmul.operands[0], params[0]);
    assert_eq!(matmul.operands[1], params[1]);
    assert_eq!(matmul.operands[2], params[2]);
}

#[test]
fn test_mm_static_generic_when_not_specializing() {
    let module = compile(MM, "mm.tc", &options(BodyOp::Structured, false)).unwrap();

    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Matmul)), 0);
    let ops = all_ops(&module);
    let generic = ops
        .iter()
        .find(|op| matches!(op.kind, OpKind::Generic { .. }))
        .expect("expected a generic op");

    // Iterators are ordered i, j, k: i and j parallel, k reduction.
    if let OpKind::Generic { iterator_types, .. } = &generic.kind {
        assert_eq!(
            iterator_types.as_slice(),
            &[IterKind::Parallel, IterKind::Parallel, IterKind::Reduction]
        );
    }
    // Two inputs plus the output.
    assert_eq!(generic.operands.len(), 3);
}

#[test]
fn test_mm_halo_subview_and_loop_fallback() {
    let module = compile(MM_HALO, "mm.tc", &options(BodyOp::Structured, true)).unwrap();

    // The LHS domain is a strict sub-region: initialization goes through a
    // sub-view of C.
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::SubView)), 1);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Fill)), 1);

    // Iterator domains do not match the tensor dimensions, so the body
    // falls back to a loop nest: three nested loops, no structured op.
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Matmul)), 0);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Generic { .. })), 0);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::For)), 3);

    // The loop body loads A, B and C and stores back to C.
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Load)), 3);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Store)), 1);
}

#[test]
fn test_matvec_specialized_canonical_order() {
    let module = compile(MV, "mv.tc", &options(BodyOp::Structured, true)).unwrap();

    let ops = all_ops(&module);
    let matvec = ops
        .iter()
        .find(|op| matches!(op.kind, OpKind::Matvec))
        .expect("expected a matvec op");
    let params = module.functions[0].params();
    // Canonical order [A, x, y].
    assert_eq!(matvec.operands[0], params[0]);
    assert_eq!(matvec.operands[1], params[1]);
    assert_eq!(matvec.operands[2], params[2]);
}

#[test]
fn test_matvec_swapped_source_canonical_order() {
    let source = "def mv(float(N,M) A, float(M) x) -> (float(N) y) { y(i) +=! x(k)*A(i,k) }";
    let module = compile(source, "mv.tc", &options(BodyOp::Structured, true)).unwrap();

    let ops = all_ops(&module);
    let matvec = ops
        .iter()
        .find(|op| matches!(op.kind, OpKind::Matvec))
        .expect("expected a matvec op");
    let params = module.functions[0].params();
    assert_eq!(matvec.operands[0], params[0]);
    assert_eq!(matvec.operands[1], params[1]);
}

#[test]
fn test_reduction_without_initialization_warns_but_compiles() {
    let source = "def f(float(N) x) -> (float s) { s += x(i) }";
    let defs = parse(source, "f.tc").unwrap();
    let mut sema = Sema::new(SemaOptions {
        emit_warnings: false,
    });
    sema.check_def(&defs[0]).unwrap();
    assert_eq!(sema.warnings().len(), 1);
    assert!(sema.warnings()[0].contains("reduction without initialization"));

    // Compilation succeeds; the generated code assumes s holds a value.
    let module = compile(source, "f.tc", &options(BodyOp::Structured, false)).unwrap();
    // No initialization fill for a `+=` reduction.
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Fill)), 0);
}

#[test]
fn test_type_narrowing_without_cast_is_error() {
    let err = compile(
        "def g(float32(N) x) -> (float16(N) y) { y(i) = x(i) }",
        "g.tc",
        &options(BodyOp::Structured, false),
    )
    .unwrap_err();
    match err {
        CompilerError::Sema(e) => {
            assert!(e
                .message
                .contains("attempting to assign type f32 to narrower type f16"));
            assert!(e.message.contains("without an explicit cast"));
        }
        other => panic!("expected a semantic error, got {}", other),
    }
}

#[test]
fn test_reduction_var_inconsistency_is_error() {
    let err = compile(
        "def h(float(N,M) A) -> (float(N) y) { y(i) = A(i,k) }",
        "h.tc",
        &options(BodyOp::Structured, false),
    )
    .unwrap_err();
    match err {
        CompilerError::Sema(e) => {
            assert!(e.message.contains("'=' used with reduction variable 'k'"));
        }
        other => panic!("expected a semantic error, got {}", other),
    }
}

#[test]
fn test_loop_nest_mode_forces_loops() {
    let module = compile(MM, "mm.tc", &options(BodyOp::LoopNest, false)).unwrap();
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Generic { .. })), 0);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Matmul)), 0);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::For)), 3);
}

#[test]
fn test_min_reduction_rejected_at_lowering() {
    let err = compile(
        "def f(float(N,M) A) -> (float(N) y) { y(i) min=! A(i,k) }",
        "f.tc",
        &options(BodyOp::Structured, false),
    )
    .unwrap_err();
    match err {
        CompilerError::Ir(e) => {
            assert!(e.message.contains("unsupported reduction operator"));
        }
        other => panic!("expected an IR error, got {}", other),
    }
}

#[test]
fn test_size_symbols_bound_once_from_extents() {
    // K appears in both A and B; only one dim op binds it. N, K, M: three
    // dim ops in total, no explicit size parameters in the signature.
    let module = compile(MM, "mm.tc", &options(BodyOp::Structured, false)).unwrap();
    let func = &module.functions[0];
    assert_eq!(func.param_types.len(), 3);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Dim { .. })), 3);
}

#[test]
fn test_structured_generic_reads_each_tensor_once() {
    // x(i) appears twice in the RHS but becomes a single structured
    // operand.
    let source = "def sq(float(N) x) -> (float(N) y) { y(i) = x(i) * x(i) }";
    let module = compile(source, "sq.tc", &options(BodyOp::Structured, false)).unwrap();
    let ops = all_ops(&module);
    let generic = ops
        .iter()
        .find(|op| matches!(op.kind, OpKind::Generic { .. }))
        .expect("expected a generic op");
    // One input plus the output.
    assert_eq!(generic.operands.len(), 2);
}

#[test]
fn test_affine_shifted_access_stays_structured() {
    let source =
        "def shift(float(N) x) -> (float(N) y) { y(i) = x(i) } \
         def conv(float(N) x, float(K) w) -> (float(N) y) { y(i) +=! x(i+k) * w(k) }";
    // i+k is affine but k's domain matches w's K and i's matches y's N;
    // x is indexed by a compound expression, which no iterator indexes
    // directly, so the reduction iterator check still passes through w(k).
    let module = compile(source, "conv.tc", &options(BodyOp::Structured, false));
    let module = module.unwrap();
    assert_eq!(module.functions.len(), 2);
}

#[test]
fn test_divided_index_falls_back_to_loops() {
    // i/2 has no affine-map form; the statement must lower as a loop nest
    // instead of failing structured emission.
    let source = "def half(float(N) x) -> (float(M) y) { y(i) = x(i/2) }";
    let module = compile(source, "h.tc", &options(BodyOp::Structured, false)).unwrap();
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Generic { .. })), 0);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::For)), 1);
    assert_eq!(count_kind(&module, |k| matches!(k, OpKind::Load)), 1);
}

#[test]
fn test_multiple_kernels_in_one_module() {
    let source = format!("{}\n{}", MM, MV);
    let module = compile(&source, "k.tc", &options(BodyOp::Structured, true)).unwrap();
    assert_eq!(module.functions.len(), 2);
    assert_eq!(module.functions[0].name, "mm");
    assert_eq!(module.functions[1].name, "mv");
}

#[test]
fn test_module_printing_is_stable() {
    let module = compile(MM, "mm.tc", &options(BodyOp::Structured, true)).unwrap();
    let text = module.to_string();
    assert!(text.contains("func @mm"));
    assert!(text.contains("matmul ins(%0, %1) outs(%2)"));
    assert!(text.contains("fill"));

    let module2 = compile(MM, "mm.tc", &options(BodyOp::Structured, true)).unwrap();
    assert_eq!(text, module2.to_string());
}

#[test]
fn test_inference_ranges_attached_to_statements() {
    let opts = options(BodyOp::Structured, false);
    let checked = tcfront::check(MM, "mm.tc", &opts).unwrap();
    let stmt = &checked[0].statements[0];
    let rendered = stmt.ranges.to_string();
    assert!(rendered.contains("0 <= i < $N"));
    assert!(rendered.contains("0 <= j < $M"));
    assert!(rendered.contains("0 <= k < $K"));
}

#[test]
fn test_int_to_float_alignment_in_body() {
    // int8 elements widen losslessly to float in the multiplication.
    let source = "def scale(int8(N) b, float(N) x) -> (float(N) y) { y(i) = x(i) * b(i) }";
    let module = compile(source, "s.tc", &options(BodyOp::LoopNest, false)).unwrap();
    assert!(count_kind(&module, |k| matches!(k, OpKind::SIToFP)) >= 1);
}

#[test]
fn test_unalignable_operands_rejected() {
    // An int64 value cannot losslessly convert to f32.
    let source = "def f(float(N) x, int64(N) b) -> (float(N) y) { y(i) = x(i) * b(i) }";
    let err = compile(source, "f.tc", &options(BodyOp::LoopNest, false)).unwrap_err();
    match err {
        CompilerError::Ir(e) => assert!(e.message.contains("aligning operand types")),
        other => panic!("expected an IR error, got {}", other),
    }
}

#[test]
fn test_verifier_accepts_all_generated_modules() {
    for (source, body_op) in [
        (MM, BodyOp::Structured),
        (MM, BodyOp::LoopNest),
        (MM_HALO, BodyOp::Structured),
        (MV, BodyOp::Structured),
        (MV, BodyOp::LoopNest),
    ] {
        let module = compile(source, "k.tc", &options(body_op, false)).unwrap();
        module.verify().unwrap();
    }
}
