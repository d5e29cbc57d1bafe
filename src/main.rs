use clap::{Parser, Subcommand};
use colored::Colorize;

use replbox::config::Config;
use replbox::interpreter::python::PythonInterpreter;
use replbox::interpreter::{Interpreter, Outcome, Variables};
use replbox::tools::demo_toolset;
use replbox::trace::TraceStore;

#[derive(Parser)]
#[command(name = "replbox")]
#[command(about = "A persistent, sandboxed Python session for recursive LLM agent loops.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session (you play the agent loop)
    Repl {
        /// Interpreter command, e.g. "python3.12"
        #[arg(short, long)]
        python: Option<String>,
    },
    /// Execute a code file as a single turn
    Exec {
        /// Path to the code fragment
        file: String,
        /// Seed a namespace variable, NAME=VALUE (VALUE parsed as JSON, else string)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// Interpreter command, e.g. "python3.12"
        #[arg(short, long)]
        python: Option<String>,
    },
    /// List available demo tools
    Tools,
    /// Show configuration
    Config,
    /// List recorded sessions
    Sessions {
        /// Show the turns of one recorded session
        #[arg(long, value_name = "SESSION_ID")]
        show: Option<String>,
        /// Delete all recorded sessions
        #[arg(long)]
        clear: bool,
    },
}

fn build_interpreter(cfg: &Config, python: Option<String>) -> PythonInterpreter {
    let mut interpreter_cfg = cfg.interpreter.clone();
    if let Some(command) = python {
        interpreter_cfg.python_command = command;
    }
    let mut interp = PythonInterpreter::from_config(&interpreter_cfg);
    interp.set_tools(demo_toolset());
    interp
}

fn open_trace(cfg: &Config) -> Option<(TraceStore, String)> {
    if !cfg.trace.enabled {
        return None;
    }
    let store = match TraceStore::new(&cfg.trace.database_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "{} Failed to open trace database: {}",
                "Warning:".yellow(),
                e
            );
            return None;
        }
    };
    let session_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = store.create_session(&session_id) {
        eprintln!("{} Failed to create trace session: {}", "Warning:".yellow(), e);
        return None;
    }
    Some((store, session_id))
}

fn truncate_for_display(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}\n... (truncated to {}/{} chars)", truncated, max_chars, total)
}

fn print_outcome(outcome: &Outcome, max_chars: usize) {
    match outcome {
        Outcome::NoOutput => println!("{}", "(no output)".dimmed()),
        Outcome::Output(text) => print!("{}", truncate_for_display(text, max_chars)),
        Outcome::Final(value) => {
            let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            println!("{} {}", "final:".green().bold(), rendered);
        }
    }
}

fn run_repl(python: Option<String>) {
    let cfg = Config::load();
    let mut interp = build_interpreter(&cfg, python);
    let trace = open_trace(&cfg);

    println!("{}", "replbox v0.2.0".bold());
    println!("One code fragment per turn; the namespace persists between turns.");
    println!(
        "Lines ending in ':' or '\\' open a block; finish a block with an empty line."
    );
    println!(
        "Call {} to end the session with a final value. {} to exit.\n",
        "SUBMIT(expr)".cyan(),
        "Ctrl+D".dimmed()
    );
    println!("Interpreter: {}", interp.python_command().green());
    let tool_names = interp.tools().names().join(", ");
    println!("Tools: {}\n", tool_names.cyan());

    let mut rl = rustyline::DefaultEditor::new().expect("Failed to initialize readline");

    'session: loop {
        let mut block = String::new();
        loop {
            let prompt = if block.is_empty() {
                format!("{} ", "py>".blue().bold())
            } else {
                format!("{} ", "...".dimmed())
            };
            match rl.readline(&prompt) {
                Ok(line) => {
                    if block.is_empty() {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let _ = rl.add_history_entry(&line);
                        let opens_block =
                            line.trim_end().ends_with(':') || line.trim_end().ends_with('\\');
                        block.push_str(&line);
                        block.push('\n');
                        if !opens_block {
                            break;
                        }
                    } else {
                        if line.trim().is_empty() {
                            break;
                        }
                        block.push_str(&line);
                        block.push('\n');
                    }
                }
                Err(rustyline::error::ReadlineError::Interrupted) => {
                    println!("Use Ctrl+D to exit.");
                    continue 'session;
                }
                Err(rustyline::error::ReadlineError::Eof) => {
                    println!("\nGoodbye!");
                    break 'session;
                }
                Err(err) => {
                    eprintln!("Error: {}", err);
                    break 'session;
                }
            }
        }

        let start = std::time::Instant::now();
        let outcome = match interp.execute(&block, None) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("{} {}", "Session error:".red().bold(), e);
                break 'session;
            }
        };
        let elapsed = start.elapsed();

        if let Some((store, session_id)) = &trace {
            if let Err(e) = store.record_outcome(session_id, &block, &outcome) {
                eprintln!("{} Failed to record turn: {}", "Warning:".yellow(), e);
            }
        }

        print_outcome(&outcome, cfg.display.max_output_chars);
        println!("{}", format!("({:.1}s)", elapsed.as_secs_f64()).dimmed());
        println!();

        if outcome.is_final() {
            break 'session;
        }
    }

    interp.shutdown();
}

/// Parse a NAME=VALUE seed. The value is parsed as JSON when possible and
/// falls back to a plain string.
fn parse_var(spec: &str) -> Result<(String, serde_json::Value), String> {
    let (name, raw) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", spec))?;
    if name.trim().is_empty() {
        return Err(format!("empty variable name in '{}'", spec));
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((name.trim().to_string(), value))
}

fn run_exec(file: &str, vars: &[String], python: Option<String>) {
    let cfg = Config::load();

    let code = match std::fs::read_to_string(file) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} Failed to read '{}': {}", "Error:".red().bold(), file, e);
            std::process::exit(1);
        }
    };

    let mut variables = Variables::new();
    for spec in vars {
        match parse_var(spec) {
            Ok((name, value)) => {
                variables.insert(name, value);
            }
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(1);
            }
        }
    }

    let mut interp = build_interpreter(&cfg, python);
    let trace = open_trace(&cfg);

    let outcome = match interp.execute(&code, Some(&variables)) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{} {}", "Session error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    if let Some((store, session_id)) = &trace {
        if let Err(e) = store.record_outcome(session_id, &code, &outcome) {
            eprintln!("{} Failed to record turn: {}", "Warning:".yellow(), e);
        }
    }

    print_outcome(&outcome, cfg.display.max_output_chars);
    interp.shutdown();
}

fn run_sessions(show: Option<String>, clear: bool) {
    let cfg = Config::load();
    let store = match TraceStore::new(&cfg.trace.database_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} Failed to open trace database: {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    if clear {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Delete all recorded sessions?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            println!("Aborted.");
            return;
        }
        match store.clear() {
            Ok(()) => println!("Cleared."),
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        }
        return;
    }

    if let Some(session_id) = show {
        let turns = match store.load_turns(&session_id) {
            Ok(turns) => turns,
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(1);
            }
        };
        if turns.is_empty() {
            println!("No turns recorded for {}", session_id);
            return;
        }
        for (i, (code, kind, output)) in turns.iter().enumerate() {
            println!("{}", format!("--- turn {} [{}] ---", i + 1, kind).bold());
            println!("{}", code.trim_end());
            if !output.is_empty() {
                println!("{}", "->".dimmed());
                println!("{}", output.trim_end());
            }
            println!();
        }
        return;
    }

    match store.list_sessions() {
        Ok(sessions) => {
            if sessions.is_empty() {
                println!("No recorded sessions.");
                return;
            }
            for (id, updated_at, turns) in sessions {
                println!("{}  {}  {} turns", id.cyan(), updated_at.dimmed(), turns);
            }
        }
        Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Repl { python } => run_repl(python),
        Commands::Exec { file, vars, python } => run_exec(&file, &vars, python),
        Commands::Tools => {
            let tools = demo_toolset();
            println!("{}", "Available tools:".bold());
            println!();
            for (name, description) in tools.iter() {
                println!("  {} - {}", name.cyan(), description);
            }
        }
        Commands::Config => {
            let config = Config::load();
            println!("{}", "Current configuration:".bold());
            println!();
            match config.to_toml() {
                Ok(s) => println!("{}", s),
                Err(e) => eprintln!("Error serializing config: {}", e),
            }
        }
        Commands::Sessions { show, clear } => run_sessions(show, clear),
    }
}
