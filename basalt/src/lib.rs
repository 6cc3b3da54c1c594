#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]
// Unfortunately, Clippy isn't smart enough to notice if a function call is trivial and so likely
// does not have an issue in being used in this position.
#![allow(clippy::or_fun_call)]
#![allow(clippy::module_name_repetitions)]
// TODO: Re-enabling these (or at least panic docs) would be nice, but they make active development
// harder since they highlight the entire function
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Too error prone
#![allow(clippy::similar_names)]
// Annoying. Really shouldn't highlight the entire thing.
#![allow(clippy::unnecessary_wraps)]

//! The interpreter and the runtime state it shares between threads.
//!
//! A [`Runtime`] owns the class registry, the heap and the per-class link and initialization
//! state. It is shared between interpreter threads as an `Arc<Runtime>`, while each thread
//! evaluates methods through its own [`util::Env`].

use std::{
    collections::HashMap,
    io::Write,
    num::NonZeroUsize,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use basalt_base::{
    class::Class, code::op_ex::InstructionParseError, id::ClassId, id::MethodId, ClassFileLoader,
    Classes, Config, LinkageError, LoaderChain,
};
use basalt_classfile::ClassFormatError;
use basalt_verifier::VerificationLogging;
use class_instance::{ClassInstance, Fields, StaticClassInstance};
use eval::{internal_repl::NativeMethods, EvalError, EvalMethodValue, Frame};
use gc::{Gc, GcRef};
use method::{CallSiteCache, MethodTable};
use rv::RuntimeValue;
use string_intern::StringInterner;
use util::Env;

pub mod bootstrap;
pub mod class_instance;
pub mod diagnostics;
pub mod eval;
pub mod gc;
pub mod method;
pub mod rv;
pub mod string_intern;
pub mod util;

#[cfg(test)]
mod tests;

pub const ENV_TRACING_LEVEL: &str = "BASALT_LOG_LEVEL";
pub const DEFAULT_TRACING_LEVEL: tracing::Level = tracing::Level::WARN;

/// The version reported by the diagnostic commands
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Each nested invocation recurses on the native stack, so the default keeps within the 2 MiB
/// stack that spawned threads get. Threads with a larger stack can allow more.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

pub struct StateConfig {
    pub tracing_level: tracing::Level,
    pub verification_logging: VerificationLogging,
    /// The number of nested method invocations allowed before `StackOverflowError` is thrown.
    /// `None`: No limit. The native stack of the interpreter thread still bounds it, so it is
    /// advised to have a limit.
    pub max_call_depth: Option<NonZeroUsize>,
    /// Log each instruction as it is executed, at the info level
    pub log_instructions: bool,
    /// Log each class as it is loaded
    pub log_class_loads: bool,
}
impl StateConfig {
    #[must_use]
    pub fn new() -> StateConfig {
        let tracing_level = StateConfig::compute_tracing_level();
        StateConfig {
            tracing_level,
            verification_logging: VerificationLogging::default(),
            max_call_depth: NonZeroUsize::new(DEFAULT_MAX_CALL_DEPTH),
            log_instructions: false,
            log_class_loads: true,
        }
    }

    #[must_use]
    pub fn compute_tracing_level() -> tracing::Level {
        let env_log = std::env::var(ENV_TRACING_LEVEL);
        if let Ok(env_log) = env_log {
            if env_log.eq_ignore_ascii_case("trace") || env_log == "*" {
                tracing::Level::TRACE
            } else if env_log.eq_ignore_ascii_case("info") {
                tracing::Level::INFO
            } else if env_log.eq_ignore_ascii_case("warn") {
                tracing::Level::WARN
            } else if env_log.eq_ignore_ascii_case("error") {
                tracing::Level::ERROR
            } else {
                DEFAULT_TRACING_LEVEL
            }
        } else {
            DEFAULT_TRACING_LEVEL
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the value out of a [`eval::ValueException`], returning the exception from the current
/// function if there was one.
/// `exc_value!(ret: expr)` returns `Ok(ValueException::Exception(exc))`, while
/// `exc_value!(ret_inst: expr)` returns `Ok(RunInstValue::Exception(exc))` for use inside
/// instructions.
#[macro_export]
macro_rules! exc_value {
    (ret: $v:expr) => {
        match $v {
            $crate::eval::ValueException::Value(v) => v,
            $crate::eval::ValueException::Exception(exc) => {
                return Ok($crate::eval::ValueException::Exception(exc))
            }
        }
    };
    (ret_inst: $v:expr) => {
        match $v {
            $crate::eval::ValueException::Value(v) => v,
            $crate::eval::ValueException::Exception(exc) => {
                return Ok($crate::eval::RunInstValue::Exception(exc))
            }
        }
    };
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GeneralError {
    #[error("{0}")]
    Eval(#[from] EvalError),
    /// A linkage error where there was no java code to throw it to, such as when verifying
    /// from the command line
    #[error("{}: {}", .0.java_class_name(), .0)]
    Linkage(#[from] LinkageError),
    #[error("{0}")]
    InstructionParse(#[from] InstructionParseError),
    #[error("{0}")]
    ClassFormat(#[from] ClassFormatError),
    /// We expected the class at this id to be loaded
    /// This likely points to an internal error
    #[error("class {0:?} was expected to be loaded")]
    MissingLoadedClass(ClassId),
    /// We expected the method at this id to exist
    /// This likely points to an internal error
    #[error("method {0:?} was expected to exist")]
    MissingLoadedMethod(MethodId),
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    Unlinked,
    /// The thread is verifying the class and building its method table
    Linking(ThreadId),
    Linked,
    /// Linking failed, and every later attempt fails the same way
    Failed(LinkageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    /// The thread is running the static initializers
    Initializing(ThreadId),
    Initialized,
    /// An initializer threw. Later attempts throw `NoClassDefFoundError`.
    Failed,
}

/// Information specific to each class
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub link: LinkState,
    pub init: InitState,
    /// Filled when linked
    pub methods: Option<Arc<MethodTable>>,
    /// Holds the static fields, allocated when linked
    pub statics: Option<GcRef<StaticClassInstance>>,
}
impl Default for ClassInfo {
    fn default() -> Self {
        ClassInfo {
            link: LinkState::Unlinked,
            init: InitState::Uninitialized,
            methods: None,
            statics: None,
        }
    }
}

pub struct Runtime {
    pub conf: StateConfig,
    pub classes: Classes,
    pub gc: Gc,
    pub strings: StringInterner,
    pub call_sites: CallSiteCache,
    pub(crate) natives: NativeMethods,
    output: Mutex<Box<dyn Write + Send>>,
    classes_info: Mutex<HashMap<ClassId, ClassInfo>>,
    info_changed: Condvar,
}
impl Runtime {
    /// Create a runtime loading user classes from `loader`, printing program output to stdout
    pub fn new(conf: StateConfig, loader: impl ClassFileLoader + 'static) -> Arc<Runtime> {
        Runtime::with_output(conf, loader, Box::new(std::io::stdout()))
    }

    /// Create a runtime which writes the program output to `output`
    pub fn with_output(
        conf: StateConfig,
        loader: impl ClassFileLoader + 'static,
        output: Box<dyn Write + Send>,
    ) -> Arc<Runtime> {
        // The bootstrap classes come first, so a class path can't replace them
        let loader = LoaderChain::new()
            .with(bootstrap::BootstrapClasses::new())
            .with(loader);
        let classes = Classes::new(
            Config {
                log_load: conf.log_class_loads,
            },
            Box::new(loader),
        );

        Arc::new(Runtime {
            conf,
            classes,
            gc: Gc::new(),
            strings: StringInterner::default(),
            call_sites: CallSiteCache::default(),
            natives: NativeMethods::new(),
            output: Mutex::new(output),
            classes_info: Mutex::new(HashMap::new()),
            info_changed: Condvar::new(),
        })
    }

    fn info(&self) -> MutexGuard<'_, HashMap<ClassId, ClassInfo>> {
        self.classes_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of the link and initialization state of the class
    #[must_use]
    pub fn class_info(&self, id: ClassId) -> ClassInfo {
        self.info().get(&id).cloned().unwrap_or_default()
    }

    pub(crate) fn write_output(&self, text: &str) -> Result<(), GeneralError> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output.write_all(text.as_bytes())?;
        output.flush()?;
        Ok(())
    }

    /// Link the class: verify it and its supertypes, build its method table and allocate its
    /// static fields. This is done at most once per class, with other threads waiting for the
    /// result.
    pub fn link(&self, id: ClassId) -> Result<Arc<MethodTable>, LinkageError> {
        let current = thread::current().id();
        let mut info = self.info();
        loop {
            let entry = info.entry(id).or_default();
            let (link, methods) = (entry.link.clone(), entry.methods.clone());
            match link {
                LinkState::Linked => {
                    // The table is always filled when linked
                    return methods.ok_or_else(|| {
                        LinkageError::NoClassDefFound(self.classes.names().tpath(id))
                    });
                }
                LinkState::Failed(err) => return Err(err),
                LinkState::Linking(owner) if owner == current => {
                    return Err(LinkageError::ClassCircularity(
                        self.classes.names().tpath(id),
                    ));
                }
                LinkState::Linking(_) => {
                    info = self
                        .info_changed
                        .wait(info)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                LinkState::Unlinked => break,
            }
        }
        info.entry(id).or_default().link = LinkState::Linking(current);
        drop(info);

        let result = self.link_class(id);

        let mut info = self.info();
        let entry = info.entry(id).or_default();
        match &result {
            Ok((methods, statics)) => {
                entry.link = LinkState::Linked;
                entry.methods = Some(Arc::clone(methods));
                entry.statics = Some(*statics);
            }
            Err(err) => {
                tracing::warn!(
                    "Failed to link class {}: {}",
                    self.classes.names().tpath(id),
                    err
                );
                entry.link = LinkState::Failed(err.clone());
            }
        }
        drop(info);
        self.info_changed.notify_all();

        result.map(|(methods, _)| methods)
    }

    fn link_class(
        &self,
        id: ClassId,
    ) -> Result<(Arc<MethodTable>, GcRef<StaticClassInstance>), LinkageError> {
        let class = self.classes.get_or_load_id(id)?;
        let _span = tracing::span!(tracing::Level::INFO, "link", class = class.name()).entered();

        let super_table = match class.super_id() {
            Some(super_id) => Some(self.link(super_id)?),
            None => None,
        };
        // Interfaces are linked as well, since their default methods may run on our instances
        for interface_id in class.interfaces() {
            self.link(*interface_id)?;
        }

        if !class.is_array() {
            basalt_verifier::verify_class(&self.classes, &class, self.conf.verification_logging)?;
        }

        let methods = Arc::new(MethodTable::build(&class, super_table.as_deref()));
        let statics = self.gc.alloc(StaticClassInstance::new(id, static_fields(&class)));

        tracing::info!("Linked class {}", class.name());
        Ok((methods, statics))
    }

    /// The static fields instance of a linked class
    #[must_use]
    pub fn statics(&self, id: ClassId) -> Option<GcRef<StaticClassInstance>> {
        self.info().get(&id).and_then(|info| info.statics)
    }

    /// The method table of a linked class
    #[must_use]
    pub fn method_table(&self, id: ClassId) -> Option<Arc<MethodTable>> {
        self.info().get(&id).and_then(|info| info.methods.clone())
    }

    /// Load, link and initialize the class and run its `public static void main(String[])` on
    /// the current thread.
    /// Every Java call nests a native call, so the thread's stack must fit `max_call_depth`
    /// invocations. See [`DEFAULT_MAX_CALL_DEPTH`].
    pub fn run_main(self: &Arc<Self>, class_name: &str) -> Result<EvalMethodValue, GeneralError> {
        let mut env = Env::new(Arc::clone(self));

        let class = match self.classes.get_or_load(class_name) {
            Ok(class) => class,
            Err(err) => return Ok(EvalMethodValue::Exception(env.throw_linkage(&err)?)),
        };
        let method_id = match class.find_method("main", "([Ljava/lang/String;)V") {
            Some(method) if method.is_static() => method.id(),
            _ => {
                let exc = env.throw_linkage(&LinkageError::NoSuchMethod(format!(
                    "{}.main([Ljava/lang/String;)V",
                    class_name
                )))?;
                return Ok(EvalMethodValue::Exception(exc));
            }
        };

        if let eval::ValueException::Exception(exc) = initialize_class(&mut env, class.id())? {
            return Ok(EvalMethodValue::Exception(exc));
        }

        // No command line arguments are passed, so main gets an empty array
        let string_type = basalt_classfile::FieldType::Object(basalt_base::STRING_NAME.to_owned());
        let args = match util::new_array(&mut env, &string_type, 0)? {
            eval::ValueException::Value(args) => args,
            eval::ValueException::Exception(exc) => return Ok(EvalMethodValue::Exception(exc)),
        };

        let mut frame = Frame::default();
        frame.locals.push_transform(RuntimeValue::Reference(args.into_generic()));
        eval::eval_method(&mut env, method_id, frame)
    }

    /// Format a thrown exception like `java.lang.RuntimeException: message`
    #[must_use]
    pub fn describe_exception(&self, exc: GcRef<ClassInstance>) -> String {
        let class_name = self
            .gc
            .class_of(exc)
            .map(|id| self.classes.names().tpath(id))
            .unwrap_or_default();
        let class_name = basalt_base::util::to_dotted_name(&class_name);
        match util::exception_message(self, exc) {
            Some(message) => format!("{}: {}", class_name, message),
            None => class_name,
        }
    }
}

/// The static fields of the class, holding their default values
fn static_fields(class: &Class) -> Fields {
    let mut fields = Fields::default();
    for field in class.fields().iter().filter(|field| field.is_static()) {
        fields.insert(field.id(), RuntimeValue::default_for(field.field_type()));
    }
    fields
}

/// Initialize a class
/// This links it, initializes its superclass and then runs its static initializer.
/// That does mean that this runs code.
/// # Returns
/// Returns the [`GcRef`] for the static-class instance, or the exception initialization threw
pub fn initialize_class(
    env: &mut Env,
    class_id: ClassId,
) -> Result<eval::ValueException<GcRef<StaticClassInstance>>, GeneralError> {
    let rt = Arc::clone(&env.rt);
    if let Err(err) = rt.link(class_id) {
        return Ok(eval::ValueException::Exception(env.throw_linkage(&err)?));
    }

    let current = env.thread_id;
    let mut info = rt.info();
    loop {
        let entry = info.entry(class_id).or_default();
        let (init, statics) = (entry.init, entry.statics);
        let statics = statics.ok_or(GeneralError::MissingLoadedClass(class_id))?;
        match init {
            InitState::Initialized => return Ok(eval::ValueException::Value(statics)),
            // A recursive request while running our own initializer sees the class as it is
            InitState::Initializing(owner) if owner == current => {
                return Ok(eval::ValueException::Value(statics))
            }
            InitState::Initializing(_) => {
                info = rt
                    .info_changed
                    .wait(info)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            InitState::Failed => {
                drop(info);
                let message = format!(
                    "Could not initialize class {}",
                    basalt_base::util::to_dotted_name(&rt.classes.names().tpath(class_id))
                );
                let exc = env.throw(bootstrap::NO_CLASS_DEF_FOUND_ERROR, Some(&message))?;
                return Ok(eval::ValueException::Exception(exc));
            }
            InitState::Uninitialized => break,
        }
    }
    info.entry(class_id).or_default().init = InitState::Initializing(current);
    let statics = info
        .get(&class_id)
        .and_then(|entry| entry.statics)
        .ok_or(GeneralError::MissingLoadedClass(class_id))?;
    drop(info);

    let result = run_initializers(env, class_id);

    let state = match &result {
        Ok(eval::ValueException::Value(())) => InitState::Initialized,
        Ok(eval::ValueException::Exception(_)) | Err(_) => InitState::Failed,
    };
    rt.info().entry(class_id).or_default().init = state;
    rt.info_changed.notify_all();

    Ok(result?.map(|()| statics))
}

fn run_initializers(
    env: &mut Env,
    class_id: ClassId,
) -> Result<eval::ValueException<()>, GeneralError> {
    let class = env
        .rt
        .classes
        .get(class_id)
        .ok_or(GeneralError::MissingLoadedClass(class_id))?;

    if !class.is_interface() {
        if let Some(super_id) = class.super_id() {
            exc_value!(ret: initialize_class(env, super_id)?);
        }
    }

    let clinit = class
        .find_method("<clinit>", "()V")
        .filter(|method| method.is_static())
        .map(basalt_base::class::Method::id);
    if let Some(clinit) = clinit {
        tracing::info!("Initializing class {}", class.name());
        match eval::eval_method(env, clinit, Frame::default())? {
            EvalMethodValue::ReturnVoid => (),
            EvalMethodValue::Return(_) => tracing::warn!("<clinit> method returned a value"),
            EvalMethodValue::Exception(exc) => {
                // Errors pass through as they are, anything else is wrapped
                let error_class = env.rt.classes.get_or_load(bootstrap::ERROR_NAME)?;
                let exc_class = env
                    .rt
                    .gc
                    .class_of(exc)
                    .ok_or(EvalError::InvalidGcRef(exc.into_generic()))?;
                if env.rt.classes.is_assignable(exc_class, error_class.id()) {
                    return Ok(eval::ValueException::Exception(exc));
                }

                let message = env.rt.describe_exception(exc);
                let wrapped = env.throw(bootstrap::EXCEPTION_IN_INITIALIZER_ERROR, Some(&message))?;
                return Ok(eval::ValueException::Exception(wrapped));
            }
        }
    }

    Ok(eval::ValueException::Value(()))
}
