/// mathjit - Expression Evaluator CLI
use mathjit::{Bundle, Context, Expression, Options};
use std::env;
use std::io::{self, BufRead, Write};
use std::process;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("mathjit v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    mathjit [OPTIONS] [EXPRESSION]...");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help       Print this help message");
    eprintln!("    -v, --version    Print version information");
    eprintln!("    --no-jit         Evaluate through the tree interpreter");
    eprintln!("    --no-optimize    Skip the algebraic optimizer");
    eprintln!("    --verbose        Print the generated Cranelift IR");
    eprintln!();
    eprintln!("Variables x, y, z are pre-bound to slots 0, 1, 2 of the");
    eprintln!("variables buffer (initially 5.1, 6.7, 9.9) and the math");
    eprintln!("bundle (sin, cos, sqrt, min, ...) is registered.");
    eprintln!();
    eprintln!("Without EXPRESSION arguments, expressions are read from");
    eprintln!("stdin, one per line.");
}

struct Driver {
    ctx: Context,
    options: Options,
    verbose: bool,
    variables: [f32; 3],
}

impl Driver {
    fn new(options: Options, verbose: bool) -> Self {
        let mut ctx = Context::new();
        ctx.add_bundle(Bundle::All).expect("bundle registration");
        ctx.add_variable("x", 0, 0).expect("variable registration");
        ctx.add_variable("y", 4, 0).expect("variable registration");
        ctx.add_variable("z", 8, 0).expect("variable registration");

        Driver {
            ctx,
            options,
            verbose,
            variables: [5.1, 6.7, 9.9],
        }
    }

    fn run(&mut self, source: &str) {
        match Expression::create(&self.ctx, source, self.options) {
            Ok(expr) => {
                let value = expr.evaluate(&mut self.variables);
                let backend = if expr.is_jit() { "jit" } else { "interp" };
                println!("{} = {} ({})", source, value, backend);

                if self.verbose {
                    if let Some(log) = expr.jit_log() {
                        println!("{}", log);
                    }
                }
            }
            Err(err) => {
                eprintln!("{}: error: {}", source, err);
            }
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut options = Options::NONE;
    let mut verbose = false;
    let mut expressions = Vec::new();

    for arg in &args[1..] {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                println!("mathjit {}", VERSION);
                process::exit(0);
            }
            "--no-jit" => options = options | Options::NO_JIT,
            "--no-optimize" => options = options | Options::NO_OPTIMIZE,
            "--verbose" => {
                options = options | Options::VERBOSE;
                verbose = true;
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                process::exit(1);
            }
            other => expressions.push(other.to_string()),
        }
    }

    let mut driver = Driver::new(options, verbose);

    if expressions.is_empty() {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        loop {
            print!("> ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    driver.run(line);
                }
            }
        }
    } else {
        for source in &expressions {
            driver.run(source);
        }
    }
}
