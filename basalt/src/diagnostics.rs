//! Diagnostic commands over the runtime's introspection surface.
//! Commands only read runtime state. Classes are looked up, never loaded, so running a command
//! can't cause class loading, linking or initialization.

use std::fmt::Write;

use basalt_base::{
    class::Class, default_methods::signature_path, default_methods::DefaultMethodState,
    util::to_dotted_name,
};
use basalt_dcmd::{ArgumentKind, ArgumentSpec, ArgumentValues, CommandSpec, DcmdParseError};
use itertools::Itertools;

use crate::{InitState, LinkState, Runtime, VERSION};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DiagnosticError {
    #[error("{0}")]
    Parse(#[from] DcmdParseError),
    #[error("unknown diagnostic command '{0}', see 'help'")]
    UnknownCommand(String),
    #[error("class {0} is not loaded")]
    ClassNotLoaded(String),
}

type CommandFn = fn(&Diagnostics, &Runtime, &ArgumentValues) -> Result<String, DiagnosticError>;

struct DiagnosticCommand {
    spec: CommandSpec,
    run: CommandFn,
}

/// The registry of diagnostic commands
pub struct Diagnostics {
    commands: Vec<DiagnosticCommand>,
}
impl Diagnostics {
    #[must_use]
    pub fn new() -> Diagnostics {
        let class_argument = || {
            ArgumentSpec::new(
                "class",
                ArgumentKind::String,
                "Name of the class, like java/lang/String or java.lang.String",
            )
            .mandatory()
        };

        let commands = vec![
            DiagnosticCommand {
                spec: CommandSpec::new("help", "List the commands, or describe one").with_argument(
                    ArgumentSpec::new("command", ArgumentKind::String, "Command to describe")
                        .positional(),
                ),
                run: help,
            },
            DiagnosticCommand {
                spec: CommandSpec::new("VM.version", "Print the version of the runtime"),
                run: version,
            },
            DiagnosticCommand {
                spec: CommandSpec::new(
                    "VM.classes",
                    "List the loaded classes with their link and initialization states",
                ),
                run: classes,
            },
            DiagnosticCommand {
                spec: CommandSpec::new(
                    "VM.class_hierarchy",
                    "Print the superclasses and interfaces of a class, and its loaded subclasses",
                )
                .with_argument(class_argument()),
                run: class_hierarchy,
            },
            DiagnosticCommand {
                spec: CommandSpec::new("Class.print_methods", "Print the method table of a class")
                    .with_argument(class_argument()),
                run: print_methods,
            },
            DiagnosticCommand {
                spec: CommandSpec::new(
                    "VM.default_methods",
                    "Print the memoized default method selections",
                ),
                run: default_methods,
            },
            DiagnosticCommand {
                spec: CommandSpec::new(
                    "GC.class_histogram",
                    "Print the number of heap objects and their size per class",
                ),
                run: class_histogram,
            },
        ];

        Diagnostics { commands }
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter().map(|command| &command.spec)
    }

    fn command(&self, name: &str) -> Option<&DiagnosticCommand> {
        self.commands.iter().find(|command| command.spec.name == name)
    }

    /// Parse and run a command line like `VM.class_hierarchy class=java/lang/String`
    pub fn execute(&self, rt: &Runtime, line: &str) -> Result<String, DiagnosticError> {
        let (name, arguments) = basalt_dcmd::split_command_name(line)?;
        let command = self
            .command(name)
            .ok_or_else(|| DiagnosticError::UnknownCommand(name.to_owned()))?;
        let values = basalt_dcmd::parse(arguments, &command.spec)?;

        tracing::info!("Executing diagnostic command {}", name);
        (command.run)(self, rt, &values)
    }
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a command line with the default commands
pub fn execute(rt: &Runtime, line: &str) -> Result<String, DiagnosticError> {
    Diagnostics::new().execute(rt, line)
}

/// Find a loaded class by its internal or dotted name
fn loaded_class(
    rt: &Runtime,
    values: &ArgumentValues,
) -> Result<std::sync::Arc<Class>, DiagnosticError> {
    let name = values.get_str("class").unwrap_or_default().replace('.', "/");
    rt.classes
        .names()
        .find(&name)
        .and_then(|id| rt.classes.get(id))
        .ok_or(DiagnosticError::ClassNotLoaded(name))
}

fn help(
    diagnostics: &Diagnostics,
    _rt: &Runtime,
    values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    let mut out = String::new();
    if let Some(name) = values.get_str("command") {
        let command = diagnostics
            .command(name)
            .ok_or_else(|| DiagnosticError::UnknownCommand(name.to_owned()))?;
        let spec = &command.spec;
        let _ = writeln!(out, "{}\n{}\n\nSyntax: {}", spec.name, spec.description, spec.syntax());
        if !spec.arguments.is_empty() {
            let _ = writeln!(out, "\nArguments:");
            for argument in &spec.arguments {
                let _ = write!(
                    out,
                    "\t{} : {}{} {}",
                    argument.name,
                    if argument.mandatory { "" } else { "[optional] " },
                    argument.description,
                    argument.kind
                );
                if let Some(default) = &argument.default {
                    let _ = write!(out, " (default: {})", default);
                }
                out.push('\n');
            }
        }
    } else {
        let _ = writeln!(out, "The following commands are available:");
        for spec in diagnostics.specs() {
            let _ = writeln!(out, "{}", spec.name);
        }
        let _ = writeln!(out, "\nFor more information about a command, use 'help <command>'.");
    }
    Ok(out)
}

fn version(
    _diagnostics: &Diagnostics,
    _rt: &Runtime,
    _values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    Ok(format!("basalt version {}\n", VERSION))
}

fn link_state_name(state: &LinkState) -> &'static str {
    match state {
        LinkState::Unlinked => "loaded",
        LinkState::Linking(_) => "linking",
        LinkState::Linked => "linked",
        LinkState::Failed(_) => "link failed",
    }
}

fn init_state_name(state: InitState) -> &'static str {
    match state {
        InitState::Uninitialized => "uninitialized",
        InitState::Initializing(_) => "initializing",
        InitState::Initialized => "initialized",
        InitState::Failed => "initialization failed",
    }
}

fn classes(
    _diagnostics: &Diagnostics,
    rt: &Runtime,
    _values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    let mut out = String::new();
    let loaded = rt.classes.loaded_classes();
    let _ = writeln!(out, "{} loaded classes", loaded.len());
    for class in &loaded {
        let info = rt.class_info(class.id());
        let _ = writeln!(
            out,
            "{} [{}, {}]",
            to_dotted_name(class.name()),
            link_state_name(&info.link),
            init_state_name(info.init)
        );
        if let LinkState::Failed(err) = &info.link {
            let _ = writeln!(out, "\t{}: {}", err.java_class_name(), err);
        }
    }

    let failed = rt.classes.failed_classes();
    if !failed.is_empty() {
        let _ = writeln!(out, "{} classes failed to load", failed.len());
        for (id, err) in failed {
            let _ = writeln!(
                out,
                "{}\n\t{}: {}",
                to_dotted_name(&rt.classes.names().tpath(id)),
                err.java_class_name(),
                err
            );
        }
    }
    Ok(out)
}

fn class_hierarchy(
    _diagnostics: &Diagnostics,
    rt: &Runtime,
    values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    let class = loaded_class(rt, values)?;
    let mut out = String::new();

    // Superclasses first, from java.lang.Object down
    let chain: Vec<_> = rt.classes.super_chain(std::sync::Arc::clone(&class)).collect();
    for (depth, super_class) in chain.iter().rev().enumerate() {
        let _ = writeln!(
            out,
            "{}{}",
            "  ".repeat(depth),
            to_dotted_name(super_class.name())
        );
    }

    if !class.all_interfaces().is_empty() {
        let interfaces = class
            .all_interfaces()
            .iter()
            .map(|id| to_dotted_name(&rt.classes.names().tpath(*id)))
            .join(", ");
        let _ = writeln!(out, "implements {}", interfaces);
    }

    let subclasses = rt
        .classes
        .loaded_classes()
        .into_iter()
        .filter(|other| other.id() != class.id())
        .filter(|other| {
            if class.is_interface() {
                other.all_interfaces().contains(&class.id())
            } else {
                rt.classes.is_same_or_subclass(other.id(), class.id())
            }
        })
        .map(|other| to_dotted_name(other.name()))
        .collect::<Vec<_>>();
    if !subclasses.is_empty() {
        let _ = writeln!(out, "loaded subtypes: {}", subclasses.join(", "));
    }
    Ok(out)
}

fn print_methods(
    _diagnostics: &Diagnostics,
    rt: &Runtime,
    values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    let class = loaded_class(rt, values)?;
    let mut out = String::new();

    let table = match rt.method_table(class.id()) {
        Some(table) => table,
        None => {
            let _ = writeln!(
                out,
                "{} is not linked, so it has no method table. Declared methods:",
                to_dotted_name(class.name())
            );
            for method in class.methods() {
                let _ = writeln!(out, "\t{}{}", method.name(), method.descriptor());
            }
            return Ok(out);
        }
    };

    let _ = writeln!(
        out,
        "Method table of {} ({} entries):",
        to_dotted_name(class.name()),
        table.len()
    );
    for (signature, method_id) in table.iter() {
        let _ = writeln!(
            out,
            "\t{}{} -> {}",
            signature.name,
            signature.descriptor,
            rt.classes.method_path(method_id)
        );
    }
    Ok(out)
}

fn default_methods(
    _diagnostics: &Diagnostics,
    rt: &Runtime,
    _values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    let entries = rt.classes.default_method_entries();
    let mut out = String::new();
    let _ = writeln!(out, "{} default method selections", entries.len());
    for (class_id, signature, state) in entries {
        let state = match state {
            DefaultMethodState::Unresolved => "unresolved".to_owned(),
            DefaultMethodState::Searching => "searching".to_owned(),
            DefaultMethodState::Resolved(id) => {
                format!("resolved to {}", rt.classes.method_path(id))
            }
            DefaultMethodState::Conflicted(ids) => format!(
                "conflict between {}",
                ids.iter().map(|id| rt.classes.method_path(*id)).join(" ")
            ),
            DefaultMethodState::Abstract => "abstract".to_owned(),
            DefaultMethodState::Missing => "missing".to_owned(),
        };
        let _ = writeln!(
            out,
            "{}: {}",
            signature_path(&rt.classes.names().tpath(class_id), &signature),
            state
        );
    }
    Ok(out)
}

fn class_histogram(
    _diagnostics: &Diagnostics,
    rt: &Runtime,
    _values: &ArgumentValues,
) -> Result<String, DiagnosticError> {
    let histogram = rt
        .gc
        .histogram()
        .into_iter()
        .map(|(id, (count, bytes))| (to_dotted_name(&rt.classes.names().tpath(id)), count, bytes))
        // Largest first, with names breaking ties so the output is stable
        .sorted_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)))
        .collect::<Vec<_>>();

    let mut out = String::new();
    let _ = writeln!(out, " num     #instances         #bytes  class name");
    let _ = writeln!(out, "----------------------------------------------");
    let (mut total_count, mut total_bytes) = (0, 0);
    for (num, (name, count, bytes)) in histogram.iter().enumerate() {
        let _ = writeln!(out, "{:4}: {:14} {:14}  {}", num + 1, count, bytes, name);
        total_count += count;
        total_bytes += bytes;
    }
    let _ = writeln!(out, "Total {:14} {:14}", total_count, total_bytes);
    Ok(out)
}
