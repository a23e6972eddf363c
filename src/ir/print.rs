//! Textual form of the tensor IR.

use crate::ir::builder::{ArithOp, Function, Module, Op, OpKind, Region};
use crate::utils::pretty::IndentWriter;
use std::fmt;

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = IndentWriter::new();
        out.scope("module", |out| {
            for func in &self.functions {
                print_function(func, out);
            }
        });
        write!(f, "{}", out.finish())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = IndentWriter::new();
        print_function(self, &mut out);
        write!(f, "{}", out.finish())
    }
}

fn csv<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_function(func: &Function, out: &mut IndentWriter) {
    let params: Vec<String> = func
        .params()
        .iter()
        .map(|v| format!("{}: {}", v, func.value_type(*v)))
        .collect();
    let header = format!("func @{}({})", func.name, params.join(", "));
    out.scope(&header, |out| print_region_ops(func, &func.body, out));
}

fn print_region_ops(func: &Function, region: &Region, out: &mut IndentWriter) {
    for op in &region.ops {
        print_op(func, op, out);
    }
}

fn arith_name(op: ArithOp, float: bool) -> &'static str {
    match (op, float) {
        (ArithOp::Add, true) => "addf",
        (ArithOp::Sub, true) => "subf",
        (ArithOp::Mul, true) => "mulf",
        (ArithOp::Div, true) => "divf",
        (ArithOp::Rem, true) => "remf",
        (ArithOp::Add, false) => "addi",
        (ArithOp::Sub, false) => "subi",
        (ArithOp::Mul, false) => "muli",
        (ArithOp::Div, false) => "divi",
        (ArithOp::Rem, false) => "remi",
    }
}

fn result_prefix(op: &Op) -> String {
    match op.results.first() {
        Some(r) => format!("{} = ", r),
        None => String::new(),
    }
}

fn result_type(func: &Function, op: &Op) -> String {
    match op.results.first() {
        Some(r) => func.value_type(*r).to_string(),
        None => String::new(),
    }
}

fn print_op(func: &Function, op: &Op, out: &mut IndentWriter) {
    let pre = result_prefix(op);
    match &op.kind {
        OpKind::ConstInt { value, ty } => {
            out.line(format!("{}constant {} : {}", pre, value, ty));
        }
        OpKind::ConstFloat { value, kind } => {
            out.line(format!("{}constant {:e} : f{}", pre, value, kind.bits()));
        }
        OpKind::ConstIndex { value } => {
            out.line(format!("{}constant {} : index", pre, value));
        }
        OpKind::Arith { op: a, float } => {
            out.line(format!(
                "{}{} {}, {} : {}",
                pre,
                arith_name(*a, *float),
                op.operands[0],
                op.operands[1],
                result_type(func, op)
            ));
        }
        OpKind::Cmp { pred, float } => {
            let name = if *float { "cmpf" } else { "cmpi" };
            out.line(format!(
                "{}{} {}, {}, {}",
                pre, name, pred, op.operands[0], op.operands[1]
            ));
        }
        OpKind::Select => {
            out.line(format!(
                "{}select {}, {}, {} : {}",
                pre,
                op.operands[0],
                op.operands[1],
                op.operands[2],
                result_type(func, op)
            ));
        }
        OpKind::Load => {
            out.line(format!(
                "{}load {}[{}] : {}",
                pre,
                op.operands[0],
                csv(&op.operands[1..]),
                func.value_type(op.operands[0])
            ));
        }
        OpKind::Store => {
            out.line(format!(
                "store {}, {}[{}] : {}",
                op.operands[0],
                op.operands[1],
                csv(&op.operands[2..]),
                func.value_type(op.operands[1])
            ));
        }
        OpKind::Fill => {
            out.line(format!(
                "fill({}, {}) : {}",
                op.operands[0],
                op.operands[1],
                func.value_type(op.operands[1])
            ));
        }
        OpKind::SubView => {
            let rank = func.value_type(op.operands[0]).rank().unwrap_or(0);
            let offsets = &op.operands[1..1 + rank];
            let sizes = &op.operands[1 + rank..];
            out.line(format!(
                "{}subview {}[{}][{}] : {}",
                pre,
                op.operands[0],
                csv(offsets),
                csv(sizes),
                func.value_type(op.operands[0])
            ));
        }
        OpKind::Dim { index } => {
            out.line(format!("{}dim {}, {} : index", pre, op.operands[0], index));
        }
        OpKind::For => {
            let induction = op
                .regions
                .first()
                .and_then(|r| r.args.first())
                .map(|v| v.to_string())
                .unwrap_or_default();
            let header = format!(
                "for {} = {} to {} step 1",
                induction, op.operands[0], op.operands[1]
            );
            out.scope(&header, |out| {
                if let Some(region) = op.regions.first() {
                    print_region_ops(func, region, out);
                }
            });
        }
        OpKind::Generic {
            indexing_maps,
            iterator_types,
        } => {
            let inputs = &op.operands[..op.operands.len() - 1];
            let output = op.operands[op.operands.len() - 1];
            out.line(format!(
                "generic {{indexing_maps = [{}], iterators = [{}]}}",
                csv(indexing_maps),
                csv(iterator_types)
            ));
            out.line(format!("    ins({}) outs({})", csv(inputs), output));
            if let Some(region) = op.regions.first() {
                let args: Vec<String> = region
                    .args
                    .iter()
                    .map(|v| format!("{}: {}", v, func.value_type(*v)))
                    .collect();
                out.line(format!("^bb({}):", args.join(", ")));
                out.indented(|out| print_region_ops(func, region, out));
            }
        }
        OpKind::Matmul => {
            out.line(format!(
                "matmul ins({}, {}) outs({})",
                op.operands[0], op.operands[1], op.operands[2]
            ));
        }
        OpKind::Matvec => {
            out.line(format!(
                "matvec ins({}, {}) outs({})",
                op.operands[0], op.operands[1], op.operands[2]
            ));
        }
        OpKind::ExtF | OpKind::ExtSI | OpKind::SIToFP | OpKind::IndexCast => {
            let name = match op.kind {
                OpKind::ExtF => "extf",
                OpKind::ExtSI => "extsi",
                OpKind::SIToFP => "sitofp",
                _ => "index_cast",
            };
            out.line(format!(
                "{}{} {} : {}",
                pre,
                name,
                op.operands[0],
                result_type(func, op)
            ));
        }
        OpKind::Yield => {
            out.line(format!("yield {}", csv(&op.operands)));
        }
        OpKind::Return => {
            out.line("return");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::builder::{FuncBuilder, Module};
    use crate::ir::types::{FloatKind, IrType, ScalarType};

    #[test]
    fn test_print_loop() {
        let memref = IrType::MemRef {
            elem: ScalarType::Float(FloatKind::F32),
            rank: 1,
        };
        let mut b = FuncBuilder::new("copy", vec![memref, memref]);
        let p = b.params();
        let lo = b.const_index(0);
        let hi = b.dim(p[0], 0);
        b.build_loop(lo, hi, |b, i| {
            let v = b.load(p[0], &[i])?;
            b.store(v, p[1], &[i]);
            Ok(())
        })
        .unwrap();
        let mut module = Module::default();
        module.push(b.finish());

        let text = module.to_string();
        assert!(text.contains("func @copy(%0: memref<?xf32>, %1: memref<?xf32>)"));
        assert!(text.contains("dim %0, 0 : index"));
        assert!(text.contains("step 1 {"));
        assert!(text.contains("load %0["));
        assert!(text.contains("store"));
        assert!(text.contains("return"));
    }
}
