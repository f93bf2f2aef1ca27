use clap::Parser;
use colored::Colorize;
use exprc_jit::{
    clif_ir, compile_module, compile_module_with_names, linker, Backend, CompileError,
    CompileOptions, ExprError, Module, OptLevel,
};
use std::process;

#[derive(Parser)]
#[command(name = "exprc")]
#[command(about = "Compile an arithmetic expression and show or evaluate the result")]
#[command(version)]
struct Args {
    /// Expression to compile, e.g. "2*x0 + sin(x1)"
    expression: String,

    /// Number of inputs x0 .. x(N-1)
    #[arg(short = 'n', long = "inputs", default_value_t = 0, conflicts_with = "names")]
    inputs: usize,

    /// Comma-separated input names, aliasing x0, x1, ...
    #[arg(long, value_delimiter = ',')]
    names: Vec<String>,

    /// Loader backend
    #[arg(long, default_value_t = Backend::Jit)]
    backend: Backend,

    /// Cranelift optimisation level
    #[arg(long, default_value_t = OptLevel::Speed)]
    opt_level: OptLevel,

    /// Also print the Cranelift IR
    #[arg(long)]
    clif: bool,

    /// Evaluate at this point (comma-separated values)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    at: Option<Vec<f64>>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        match &e {
            ExprError::Compile(err) => report_compile_error(&args.expression, err),
            other => eprintln!("{} {other}", "error:".red().bold()),
        }
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), ExprError> {
    let module = front_end(args)?;

    println!("{}", "Module:".cyan().bold());
    print!("{module}");

    let options = CompileOptions::default()
        .with_backend(args.backend)
        .with_opt_level(args.opt_level);

    if args.clif {
        println!("{}", "CLIF IR:".cyan().bold());
        println!("{}", clif_ir(&module, &options)?);
    }

    if let Some(point) = &args.at {
        let function = linker::load_with(&module, &options)?;
        let value = function.try_evaluate(point)?;
        println!(
            "{} {} = {value} ({} backend)",
            "Result:".cyan().bold(),
            format_point(&module, &args.names, point),
            function.backend()
        );
    }
    Ok(())
}

fn front_end(args: &Args) -> Result<Module, ExprError> {
    if args.names.is_empty() {
        return Ok(compile_module(&args.expression, args.inputs)?);
    }
    let names: Vec<&str> = args.names.iter().map(String::as_str).collect();
    compile_module_with_names(&args.expression, &names)
}

fn format_point(module: &Module, names: &[String], point: &[f64]) -> String {
    let args: Vec<String> = point
        .iter()
        .enumerate()
        .map(|(i, v)| match names.get(i) {
            Some(name) => format!("{name}={v}"),
            None => format!("x{i}={v}"),
        })
        .collect();
    format!("{}({})", module.source(), args.join(", "))
}

/// Prints the error with a caret under the offending byte.
fn report_compile_error(source: &str, err: &CompileError) {
    eprintln!("{} {err}", "error:".red().bold());
    eprintln!("  {source}");
    let column = source
        .get(..err.position.min(source.len()))
        .map_or(err.position, |prefix| prefix.chars().count());
    eprintln!("  {}{}", " ".repeat(column), "^".red().bold());
}
