use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use basalt::{
    diagnostics::Diagnostics, eval::EvalMethodValue, GeneralError, Runtime, StateConfig,
};
use basalt_class_loaders::ClassDirectories;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;

mod formatter;

pub const ENV_LOG_CONSOLE: &str = "BASALT_LOG_CONSOLE";
pub const ENV_LOG_FILE: &str = "BASALT_LOG_FILE";
const LOG_FILE_PATH: &str = "./basalt.log";

/// The interpreter recurses on the native stack for each invocation
const INTERPRETER_STACK_SIZE: usize = 256 * 1024 * 1024;
/// The call depth allowed by default on the interpreter thread
const INTERPRETER_MAX_CALL_DEPTH: usize = 4096;

#[derive(Debug, Parser)]
#[clap(name = "basalt")]
#[clap(version = "0.1.0")]
#[clap(about = "A bytecode verifier and interpreter")]
#[clap(propagate_version = true)]
struct CliArgs {
    /// Class path directory to load classes from. Can be given multiple times, and defaults to
    /// the current directory.
    #[clap(short = 'c', long = "class-path", value_name = "DIR", parse(from_os_str))]
    class_path: Vec<PathBuf>,
    /// Maximum number of nested invocations before StackOverflowError is thrown. Defaults to 4096
    #[clap(long, value_name = "DEPTH")]
    max_call_depth: Option<NonZeroUsize>,
    /// Log every executed instruction at the info level
    #[clap(long)]
    log_instructions: bool,
    #[clap(subcommand)]
    command: CliCommands,
}

#[derive(Debug, Subcommand)]
enum CliCommands {
    /// Run the `public static void main(String[])` method of a class
    Run {
        #[clap(value_name = "CLASS_NAME")]
        class_name: String,
    },
    /// Load, verify and link classes without running them
    Verify {
        #[clap(value_name = "CLASS_NAME", required = true)]
        class_names: Vec<String>,
    },
    /// Execute a diagnostic command, like "VM.class_hierarchy class=java.lang.String"
    Dcmd {
        /// Class to load and link before running the command
        #[clap(long = "load", value_name = "CLASS_NAME")]
        load: Vec<String>,
        #[clap(value_name = "COMMAND")]
        command: String,
    },
}

struct EmptyWriter;
impl std::io::Write for EmptyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).map(|x| x != "0").unwrap_or(default)
}

fn make_log_file() -> std::io::Result<Arc<std::fs::File>> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(LOG_FILE_PATH)?;
    Ok(Arc::new(log_file))
}

fn init_logging(conf: &StateConfig) {
    let should_log_console = env_flag(ENV_LOG_CONSOLE, true);
    let should_log_file = env_flag(ENV_LOG_FILE, false);

    let console_layer = if should_log_console {
        Some(
            tracing_subscriber::fmt::Layer::default()
                .with_writer(std::io::stderr)
                .without_time()
                .event_format(formatter::Formatter),
        )
    } else {
        None
    };
    let file_layer = if should_log_file {
        match make_log_file() {
            Ok(file) => Some(
                tracing_subscriber::fmt::Layer::default()
                    .with_writer(file)
                    .without_time()
                    .event_format(formatter::Formatter),
            ),
            Err(err) => {
                eprintln!("Failed to open log file {}: {}", LOG_FILE_PATH, err);
                None
            }
        }
    } else {
        None
    };

    let t_subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(conf.tracing_level)
        .without_time()
        .event_format(formatter::Formatter)
        .with_writer(|| EmptyWriter)
        .finish()
        .with(console_layer)
        .with(file_layer);

    if let Err(err) = tracing::subscriber::set_global_default(t_subscriber) {
        eprintln!("Failed to set the tracing subscriber: {}", err);
    }
}

fn main() -> ExitCode {
    // Note that clap autoexits if it didn't get a thing to do
    let args = CliArgs::parse();

    let mut conf = StateConfig::new();
    conf.max_call_depth = args
        .max_call_depth
        .or(NonZeroUsize::new(INTERPRETER_MAX_CALL_DEPTH));
    conf.log_instructions = args.log_instructions;
    init_logging(&conf);

    tracing::info!("Basalt Initializing");

    let class_directories = match make_class_directories(&args.class_path) {
        Ok(class_directories) => class_directories,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::FAILURE;
        }
    };
    let rt = Runtime::new(conf, class_directories);

    match args.command {
        CliCommands::Run { class_name } => {
            on_interpreter_thread(move || execute_class_name(&rt, &class_name))
        }
        CliCommands::Verify { class_names } => verify_classes(&rt, &class_names),
        CliCommands::Dcmd { load, command } => execute_diagnostic(&rt, &load, &command),
    }
}

fn make_class_directories(paths: &[PathBuf]) -> Result<ClassDirectories, String> {
    let mut class_directories = ClassDirectories::default();
    if paths.is_empty() {
        class_directories
            .add(Path::new("."))
            .map_err(|err| format!("Failed to use the current directory: {}", err))?;
    }
    for path in paths {
        class_directories
            .add(path)
            .map_err(|err| format!("Class path directory {}: {}", path.display(), err))?;
    }
    Ok(class_directories)
}

/// Class names can be given like `java.lang.String` on the command line
fn binary_name(class_name: &str) -> String {
    class_name.replace('.', "/")
}

/// Run `f` on a thread with a stack big enough for deep interpretation
fn on_interpreter_thread(f: impl FnOnce() -> ExitCode + Send + 'static) -> ExitCode {
    let thread = std::thread::Builder::new()
        .name("main".to_owned())
        .stack_size(INTERPRETER_STACK_SIZE)
        .spawn(f);
    match thread.map(std::thread::JoinHandle::join) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("The interpreter thread panicked");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("Failed to start the interpreter thread: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn execute_class_name(rt: &Arc<Runtime>, class_name: &str) -> ExitCode {
    let class_name = binary_name(class_name);
    match rt.run_main(&class_name) {
        Ok(EvalMethodValue::ReturnVoid) => ExitCode::SUCCESS,
        Ok(EvalMethodValue::Return(value)) => {
            tracing::warn!("Main returned a value: {:?}", value);
            ExitCode::SUCCESS
        }
        Ok(EvalMethodValue::Exception(exc)) => {
            eprintln!(
                "Exception in thread \"main\" {}",
                rt.describe_exception(exc)
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &GeneralError) {
    tracing::error!("There was an error in running the method: {:?}", err);
    eprintln!("Error: {}", err);
}

fn verify_classes(rt: &Runtime, class_names: &[String]) -> ExitCode {
    let mut code = ExitCode::SUCCESS;
    for class_name in class_names {
        let class_name = binary_name(class_name);
        let result = rt
            .classes
            .get_or_load(&class_name)
            .and_then(|class| rt.link(class.id()));
        match result {
            Ok(table) => println!("{}: ok ({} methods)", class_name, table.len()),
            Err(err) => {
                println!("{}: {}: {}", class_name, err.java_class_name(), err);
                code = ExitCode::FAILURE;
            }
        }
    }
    code
}

fn execute_diagnostic(rt: &Runtime, load: &[String], command: &str) -> ExitCode {
    // Diagnostic commands never load anything themselves
    for class_name in load {
        let class_name = binary_name(class_name);
        let result = rt
            .classes
            .get_or_load(&class_name)
            .and_then(|class| rt.link(class.id()));
        if let Err(err) = result {
            eprintln!("Failed to load {}: {}: {}", class_name, err.java_class_name(), err);
        }
    }

    match Diagnostics::new().execute(rt, command) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
