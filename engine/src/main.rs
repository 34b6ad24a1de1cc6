use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weft::diag::{self, Diagnostic};
use weft::emit::EmitOptions;
use weft::exec::Execution;
use weft::facade::EngineContext;
use weft::interp::Interpreter;
use weft::pipeline::{self, CompilationState, PassId};
use weft::sched::FixedStepScheduler;
use weft::script::vm::Machine;
use weft::sink::{CompileSink, ScriptSink};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Trigger the event, tick, and print variables and trace
    Run,
    /// Emitted script unit
    Source,
    /// Debug map of the emitted unit as JSON
    DebugMap,
    /// Graphviz rendering of the graph
    Dot,
    /// Validate and type-check only
    Check,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Backend {
    /// Reflection interpreter over the graph
    Interp,
    /// Emitted unit on the script VM
    Compiled,
}

#[derive(Parser, Debug)]
#[command(
    name = "weft",
    version,
    about = "Weft — runs behavior graphs by interpretation or through emitted script units"
)]
struct Cli {
    /// Input graph (.graph.json)
    graph: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Run)]
    emit: EmitStage,

    /// Execution backend for `--emit run`
    #[arg(long, value_enum, default_value_t = Backend::Interp)]
    backend: Backend,

    /// Event to trigger for `--emit run`
    #[arg(long, default_value = "start")]
    event: String,

    /// Maximum number of ticks after the trigger
    #[arg(long, default_value_t = 0)]
    ticks: u32,

    /// Seconds the host clock advances per tick
    #[arg(long, default_value_t = 1.0 / 60.0)]
    dt: f64,

    /// Keep every value node as its own `let` in emitted source
    #[arg(long)]
    no_simplify: bool,

    /// Output file path (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log passes, fibers and timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "weft=debug" } else { "weft=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn report(diags: &[Diagnostic]) {
    for d in diags {
        eprintln!("weft: {d}");
    }
}

fn write_output(cli: &Cli, text: &str) -> ExitCode {
    match &cli.output {
        Some(path) => match std::fs::write(path, text) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("weft: error: {}: {e}", path.display());
                ExitCode::from(2)
            }
        },
        None => {
            print!("{text}");
            ExitCode::SUCCESS
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let graph = match weft::store::load_file(&cli.graph) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("weft: error: {e}");
            return ExitCode::from(2);
        }
    };
    info!(graph = %graph.name, nodes = graph.nodes.len(), emit = ?cli.emit, "loaded graph");

    if let EmitStage::Dot = cli.emit {
        return write_output(&cli, &weft::dot::emit_dot(&graph));
    }

    let ctx = EngineContext::with_builtins();
    let options = EmitOptions {
        simplify: !cli.no_simplify,
    };

    // Running on the interpreter only needs a structurally sound graph;
    // every other stage needs the passes up to its own.
    let terminal = match (cli.emit, cli.backend) {
        (EmitStage::Check, _) => PassId::Check,
        (EmitStage::Run, Backend::Interp) => PassId::Validate,
        _ => PassId::Emit,
    };
    let mut state = CompilationState::new(&graph);
    let result = pipeline::run_pipeline(&ctx, &mut state, terminal, &options, |_, diags| report(diags));
    if result.is_err() {
        return ExitCode::FAILURE;
    }

    match cli.emit {
        EmitStage::Check => ExitCode::SUCCESS,
        EmitStage::Source | EmitStage::DebugMap => {
            let Some(unit) = state.unit else {
                eprintln!("weft: emit produced no unit");
                return ExitCode::FAILURE;
            };
            if let EmitStage::Source = cli.emit {
                return write_output(&cli, &unit.source);
            }
            match serde_json::to_string_pretty(&unit.debug_map) {
                Ok(json) => write_output(&cli, &(json + "\n")),
                Err(e) => {
                    eprintln!("weft: error: {e}");
                    ExitCode::from(2)
                }
            }
        }
        EmitStage::Run => match cli.backend {
            Backend::Interp => match Interpreter::new(&ctx, &graph) {
                Ok(mut it) => run(&cli, &mut it),
                Err(e) => {
                    eprintln!("weft: error: {e}");
                    ExitCode::FAILURE
                }
            },
            Backend::Compiled => {
                let Some(unit) = state.unit else {
                    eprintln!("weft: emit produced no unit");
                    return ExitCode::FAILURE;
                };
                let loaded = match ScriptSink.load(&ctx, &unit) {
                    Ok(loaded) => loaded,
                    Err(e) => {
                        report(&e.to_diagnostics());
                        return ExitCode::FAILURE;
                    }
                };
                match Machine::new(&ctx, &loaded) {
                    Ok(mut vm) => run(&cli, &mut vm),
                    Err(e) => {
                        eprintln!("weft: error: {e}");
                        ExitCode::FAILURE
                    }
                }
            }
        },
        EmitStage::Dot => ExitCode::SUCCESS,
    }
}

fn run(cli: &Cli, exec: &mut dyn Execution) -> ExitCode {
    let mut sched = FixedStepScheduler::new(cli.dt);
    match exec.trigger(&cli.event, &mut sched) {
        Ok(0) => eprintln!("weft: warning: no handler for event '{}'", cli.event),
        Ok(_) => {}
        Err(e) => {
            eprintln!("weft: error: {e}");
            return ExitCode::FAILURE;
        }
    }
    let ticks = sched.run(exec, cli.ticks);
    info!(ticks, idle = exec.is_idle(), "run finished");

    let mut text = String::new();
    for line in exec.trace() {
        text.push_str(&format!("trace: {line}\n"));
    }
    for (name, value) in exec.variables() {
        text.push_str(&format!("{name} = {value}\n"));
    }
    report(exec.diagnostics());
    let code = write_output(cli, &text);
    if diag::has_errors(exec.diagnostics()) {
        ExitCode::FAILURE
    } else {
        code
    }
}
