//! The PIR driver: reads a textual PIR program, builds a `Module`, runs a
//! configurable optimisation schedule over every Function it declares, and
//! prints either the resulting dump or the verifier/capability failures
//! encountered along the way.
//!
//! Sequences the passes and reports diagnostics — there is no real host
//! bytecode reader or codegen backend behind this binary.

mod surface;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser as _;

use pir::dump::{dump_module, DumpContext};
use pir::pipeline::{Pass, PipelineConfig};

/// CLI surface: `clap` derive, `anyhow` at the binary-entry layer.
#[derive(clap::Parser)]
#[command(author, version, about = "Parses and optimises a textual PIR program")]
struct Cli {
    /// Path to a program written in the textual surface syntax.
    file: PathBuf,

    /// Comma-separated subsequence of `inline,scope-resolve,cleanup`, run
    /// in the given order each iteration.
    #[arg(long, value_delimiter = ',', default_value = "inline,scope-resolve,cleanup")]
    passes: Vec<String>,

    /// Upper bound on `(passes) x k` repetitions before giving up on
    /// reaching a fixed point.
    #[arg(long, default_value_t = pir::pipeline::DEFAULT_MAX_ITERS)]
    max_iters: u32,

    /// Call-expansion bound for scope analysis's abstract interpreter.
    #[arg(long, default_value_t = pir::analysis::scope::DEFAULT_RECURSION_BOUND)]
    recursion_bound: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.file).with_context(|| format!("reading {}", cli.file.display()))?;
    let program = surface::parse(&source).with_context(|| format!("parsing {}", cli.file.display()))?;

    let passes = cli.passes.iter().map(|s| parse_pass(s)).collect::<Result<Vec<_>, _>>()?;
    let config = PipelineConfig { passes, max_iters: cli.max_iters, recursion_bound: cli.recursion_bound };

    let mut module = program.module;
    let mut failures = Vec::new();
    for &function_id in &program.functions {
        let name = module.function(function_id).name.clone();
        // Capability gaps and verifier failures are fatal for the one
        // Function that hit them; every other Function in the program
        // still gets optimised and dumped.
        if let Err(err) = pir::pipeline::optimize(&mut module, function_id, &config) {
            log::error!("{name}: {err}");
            failures.push(name);
        }
    }

    let ctx = DumpContext::new(&module.symbols).with_consts(&program.consts).with_builtins(&program.builtins);
    println!("{}", dump_module(&module, &ctx));

    if !failures.is_empty() {
        bail!("{} of {} function(s) failed to optimise cleanly", failures.len(), program.functions.len());
    }
    Ok(())
}

fn parse_pass(s: &str) -> anyhow::Result<Pass> {
    match s.trim() {
        "inline" => Ok(Pass::Inline),
        "scope-resolve" => Ok(Pass::ScopeResolve),
        "cleanup" => Ok(Pass::Cleanup),
        other => bail!("unknown pass `{other}` (expected one of inline, scope-resolve, cleanup)"),
    }
}
