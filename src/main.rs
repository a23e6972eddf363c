//! Command-line driver for the TC front-end.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Read;

use tcfront::ir::BodyOp;
use tcfront::{frontend, CompileOptions};

#[derive(Parser)]
#[command(name = "tcfront")]
#[command(version)]
#[command(about = "Tensor Comprehensions front-end")]
#[command(long_about = r#"
Translates Tensor Comprehensions kernels into a tensor IR of loop nests,
affine memory accesses and structured reductions.

Example usage:
  tcfront kernels.tc --emit ir
  tcfront kernels.tc --emit ir --body-op structured --specialize-structured-ops
  tcfront kernels.tc --emit inference --json
"#)]
struct Cli {
    /// Input file ('-' reads from stdin).
    #[arg(default_value = "-")]
    input: String,

    /// The kind of output to produce.
    #[arg(long, value_enum, default_value = "ir")]
    emit: EmitAction,

    /// How comprehension bodies are generated.
    #[arg(long, value_enum, default_value = "structured")]
    body_op: BodyOpArg,

    /// Replace recognized patterns (matmul, matvec) with named structured
    /// operators.
    #[arg(long)]
    specialize_structured_ops: bool,

    /// Print the inference dump as JSON.
    #[arg(long)]
    json: bool,

    /// Suppress warnings.
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitAction {
    /// Dump the checked AST.
    Ast,
    /// Dump the per-statement range inference problems.
    Inference,
    /// Dump the tensor IR module.
    Ir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BodyOpArg {
    Structured,
    LoopNest,
}

impl From<BodyOpArg> for BodyOp {
    fn from(arg: BodyOpArg) -> Self {
        match arg {
            BodyOpArg::Structured => BodyOp::Structured,
            BodyOpArg::LoopNest => BodyOp::LoopNest,
        }
    }
}

fn read_input(input: &str) -> Result<(String, String)> {
    if input == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("failed to read from stdin")?;
        Ok((source, "<stdin>".to_string()))
    } else {
        let source = std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input))?;
        Ok((source, input.to_string()))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if cli.specialize_structured_ops && cli.body_op == BodyOpArg::LoopNest {
        bail!("--specialize-structured-ops requires --body-op structured");
    }

    let opts = CompileOptions {
        emit_warnings: !cli.quiet,
        print_ranges: cli.emit == EmitAction::Inference,
        body_op: cli.body_op.into(),
        specialize: cli.specialize_structured_ops,
    };

    let (source, filename) = read_input(&cli.input)?;

    match cli.emit {
        EmitAction::Ast => {
            let defs = tcfront::parse(&source, &filename).map_err(|e| anyhow::anyhow!("{}", e))?;
            for def in &defs {
                println!("{:#?}", def);
            }
        }
        EmitAction::Inference => {
            let checked = tcfront::check(&source, &filename, &opts)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            dump_inference(&checked, cli.json)?;
        }
        EmitAction::Ir => {
            let module = tcfront::compile(&source, &filename, &opts)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            print!("{}", module);
        }
    }

    Ok(())
}

fn dump_inference(defs: &[frontend::Def], json: bool) -> Result<()> {
    if json {
        let mut kernels = serde_json::Map::new();
        for def in defs {
            let stmts: Vec<serde_json::Value> = def
                .statements
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "output": &s.ident.name,
                        "ranges": &s.ranges.solved,
                        "constraints": &s.ranges.constraints,
                    })
                })
                .collect();
            kernels.insert(def.name.name.clone(), serde_json::Value::from(stmts));
        }
        println!("{}", serde_json::to_string_pretty(&kernels)?);
        return Ok(());
    }

    for def in defs {
        for stmt in &def.statements {
            println!("{}:{}:", stmt.range.file.name, stmt.range.start_line);
            print!("{}", stmt.ranges);
        }
    }
    Ok(())
}
