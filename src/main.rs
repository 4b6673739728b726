use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cube::diagnostic::{self, ansi::AnsiRenderer};
use cube::{GcConfig, InterpretError, Value, Vm, VmConfig};

/// Exit status when the input file cannot be read.
const EXIT_IO: u8 = 74;

#[derive(Parser, Debug)]
#[command(name = "cube", version, about = "Run cube scripts, or start a REPL when no script is given")]
struct Cli {
    /// Script to run
    file: Option<PathBuf>,

    /// Arguments the script sees as `args`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Run CODE instead of a file and print its result
    #[arg(short = 'e', long = "eval", value_name = "CODE")]
    eval: Option<String>,

    /// Report errors as JSON lines on stderr
    #[arg(long)]
    json: bool,

    /// Print the compiled bytecode to stderr before running
    #[arg(long)]
    disassemble: bool,

    /// Print each executed instruction and the stack to stderr
    #[arg(long)]
    trace: bool,

    /// Print a line to stderr for every garbage collection
    #[arg(long = "gc-log")]
    gc_log: bool,

    /// Bytes allocated before the first collection
    #[arg(long = "gc-threshold", value_name = "BYTES")]
    gc_threshold: Option<usize>,

    /// Extra directory searched by `import` and `require`
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        let mut gc = GcConfig { debug: self.gc_log, ..GcConfig::default() };
        if let Some(threshold) = self.gc_threshold {
            gc.gc_threshold = threshold;
        }
        VmConfig { gc, search_paths: self.include.clone(), trace: self.trace, ..VmConfig::default() }
    }
}

fn report(err: &InterpretError, json: bool, path: &str, source: &str) {
    let renderer = AnsiRenderer::for_stderr();
    for d in diagnostic::from_interpret_error(err) {
        let d = d.with_path(path).with_source(source);
        if json {
            eprintln!("{}", diagnostic::json::render(&d));
        } else {
            eprint!("{}", renderer.render(&d));
        }
    }
}

/// Runs one script source. Returns the process exit status.
fn run(vm: &mut Vm, cli: &Cli, source: &str, path: &str, print_result: bool) -> u8 {
    if cli.disassemble {
        match vm.disassemble(source, path) {
            Ok(listing) => eprint!("{listing}"),
            Err(err) => {
                report(&err, cli.json, path, source);
                return err.exit_code() as u8;
            }
        }
    }
    match vm.interpret(source, path) {
        Ok(value) => {
            if print_result && value != Value::None {
                println!("{}", vm.format_value(value));
            }
            0
        }
        Err(err) => {
            report(&err, cli.json, path, source);
            err.exit_code() as u8
        }
    }
}

fn repl(vm: &mut Vm, cli: &Cli) -> std::io::Result<u8> {
    let interactive = std::io::stdin().is_terminal();
    let prompt = || -> std::io::Result<()> {
        if interactive {
            print!("> ");
            std::io::stdout().flush()?;
        }
        Ok(())
    };

    prompt()?;
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            prompt()?;
            continue;
        }
        vm.define_global("__ans__", Value::None);
        if let Err(err) = vm.interpret(&line, "repl") {
            report(&err, cli.json, "repl", &line);
        } else if let Some(answer) = vm.global("__ans__").filter(|v| *v != Value::None) {
            println!("{}", vm.format_value(answer));
        }
        prompt()?;
    }
    Ok(0)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut vm = Vm::new(cli.vm_config());

    if let Some(code) = &cli.eval {
        let args: Vec<String> = cli.file.iter().map(|f| f.display().to_string()).chain(cli.args.clone()).collect();
        vm.load_args(args);
        return ExitCode::from(run(&mut vm, &cli, code, "<eval>", true));
    }

    let Some(file) = &cli.file else {
        return match repl(&mut vm, &cli) {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                eprintln!("Could not read input: {e}");
                ExitCode::from(EXIT_IO)
            }
        };
    };
    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not open file \"{}\": {e}", file.display());
            return ExitCode::from(EXIT_IO);
        }
    };
    if let Some(dir) = file.parent() {
        vm.add_path(if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir.to_path_buf() });
    }
    vm.load_args(cli.args.clone());
    let path = file.display().to_string();
    ExitCode::from(run(&mut vm, &cli, &source, &path, false))
}
