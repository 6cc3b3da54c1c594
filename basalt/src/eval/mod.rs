//! Evaluation of method bodies.
//! Instructions have already been decoded and the class verified when it was linked, so most
//! failures here are either thrown java exceptions or internal [`EvalError`]s.

use std::sync::Arc;

use basalt_base::{
    class::{Class, Method},
    code::{op::Inst, CodeInfo, InstructionIndex},
    id::{ClassId, MethodId},
};
use usize_cast::IntoUsize;

use crate::{
    bootstrap::{ABSTRACT_METHOD_ERROR, ILLEGAL_MONITOR_STATE_EXCEPTION, STACK_OVERFLOW_ERROR},
    class_instance::{ClassInstance, Instance},
    gc::{GcRef, MonitorRef},
    rv::{RuntimeValue, RuntimeValuePrimitive},
    util::Env,
    GeneralError,
};

mod control_flow;
mod func;
pub mod instances;
pub mod internal_repl;
mod operation;
mod store_load;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum EvalError {
    /// The class that holds the method we are executing isn't loaded
    #[error("the class {0:?} of the method being executed is not loaded")]
    MissingMethodClass(ClassId),
    /// It was expected that this method should be loaded
    /// Likely because it was given to the function to evaluate
    #[error("the method {0:?} does not exist")]
    MissingMethod(MethodId),
    /// A method that is neither native nor abstract has no code
    #[error("the method {0:?} has no code")]
    MissingCode(MethodId),
    /// We tried continuing but the instruction at that index was missing, or it was in the middle
    /// of an instruction
    #[error("no instruction at {0}")]
    MissingInstruction(InstructionIndex),
    /// Expected there to be a static instance for the given class, which exists once linked
    #[error("the class {0:?} has no static instance")]
    MissingStatics(ClassId),
    /// We expected the field to exist on the instance but it did not
    #[error("the field {0} does not exist on the instance")]
    MissingField(String),

    #[error("invalid reference {0:?}")]
    InvalidGcRef(GcRef<Instance>),

    /// Expected a value on the top of the stack (probably for popping)
    #[error("expected a value on the stack")]
    ExpectedStackValue,
    #[error("expected a reference on the stack")]
    ExpectedStackValueReference,
    /// Expected a value that would be represented as an integer
    #[error("expected an int on the stack")]
    ExpectedStackValueIntRepr,
    #[error("expected a float on the stack")]
    ExpectedStackValueFloat,
    #[error("expected a long on the stack")]
    ExpectedStackValueLong,
    #[error("expected a double on the stack")]
    ExpectedStackValueDouble,
    #[error("expected a category 1 value on the stack")]
    ExpectedStackValueCategory1,

    /// It was expected that there would be a local variable at the given index
    #[error("expected a local variable at {0}")]
    ExpectedLocalVariable(u16),
    /// It was expected that the local variable would have a value
    #[error("expected the local variable at {0} to have a value")]
    ExpectedLocalVariableWithValue(u16),
    #[error("expected the local variable at {0} to be a reference")]
    ExpectedLocalVariableReference(u16),
    #[error("expected the local variable at {0} to be an int")]
    ExpectedLocalVariableIntRepr(u16),

    /// When getting an instance, we expected it to be [`ClassInstance`] specifically
    #[error("expected an instance of a class")]
    ExpectedClassInstance,
    /// When getting an instance, we expected it to be [`crate::class_instance::ArrayInstance`]
    #[error("expected an array")]
    ExpectedArrayInstance,
    /// When throwing an exception, we tried throwing a value which wasn't an instance of Throwable
    /// Should have been caught in verification
    #[error("expected a throwable")]
    ExpectedThrowable,
    /// The constant at the index can't be loaded by `ldc`
    #[error("the constant #{0} can't be loaded")]
    UnexpectedConstant(u16),
    /// Verification rejects these, so they can only be reached by unverified code
    #[error("unsupported instruction {0}")]
    UnsupportedInstruction(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum Local {
    /// The upper part of a Long/Double
    Top,
    /// No value
    Empty,
    Value(RuntimeValue),
}
impl Local {
    #[must_use]
    pub fn as_value(&self) -> Option<&RuntimeValue> {
        match self {
            Local::Value(v) => Some(v),
            _ => None,
        }
    }

    fn from_runtime_value(v: RuntimeValue) -> [Option<Local>; 2] {
        if v.is_category_2() {
            [Some(Local::Value(v)), Some(Local::Top)]
        } else {
            [Some(Local::Value(v)), None]
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct Locals {
    locals: Vec<Local>,
}
impl Locals {
    #[must_use]
    pub fn new_with_array<const N: usize>(locals: [RuntimeValue; N]) -> Locals {
        let locals = locals
            .into_iter()
            .flat_map(Local::from_runtime_value)
            .flatten()
            .collect();
        Locals { locals }
    }

    /// Push a value onto the locals stack, transforming it into as many instances as it needs.
    /// Because, values like Long/Double take up two indices on the local stack.
    pub fn push_transform(&mut self, value: RuntimeValue) {
        let local = Local::from_runtime_value(value);
        for l in local.into_iter().flatten() {
            self.locals.push(l);
        }
    }

    #[must_use]
    pub fn get(&self, index: u16) -> Option<&Local> {
        self.locals.get(index.into_usize())
    }

    /// Get the value of the local, which must have been set
    pub fn value_at(&self, index: u16) -> Result<RuntimeValue, EvalError> {
        self.get(index)
            .ok_or(EvalError::ExpectedLocalVariable(index))?
            .as_value()
            .copied()
            .ok_or(EvalError::ExpectedLocalVariableWithValue(index))
    }

    /// Set the local, along with the following slot for category 2 values
    pub fn set_value_at(&mut self, index: u16, value: RuntimeValue) {
        let index = index.into_usize();
        let needed = if value.is_category_2() { index + 2 } else { index + 1 };
        // If the index is out of bounds then resize the vec to include it
        if needed > self.locals.len() {
            self.locals.resize(needed, Local::Empty);
        }

        // Storing over the upper half of a long/double invalidates it
        if index > 0 && matches!(self.locals[index], Local::Top) {
            self.locals[index - 1] = Local::Empty;
        }
        self.locals[index] = Local::Value(value);
        if value.is_category_2() {
            self.locals[index + 1] = Local::Top;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}

/// The operand stack. Long and double values take one entry, unlike in the class file's
/// accounting, and the stack operations check the categories of what they move.
#[derive(Default, Debug, Clone)]
pub struct Stack {
    stack: Vec<RuntimeValue>,
}
impl Stack {
    pub fn push(&mut self, value: impl Into<RuntimeValue>) {
        self.stack.push(value.into());
    }

    pub fn pop(&mut self) -> Result<RuntimeValue, EvalError> {
        self.stack.pop().ok_or(EvalError::ExpectedStackValue)
    }

    /// Pop 2 values at once, returning the top of the stack first
    pub fn pop2(&mut self) -> Result<(RuntimeValue, RuntimeValue), EvalError> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        Ok((v1, v2))
    }

    #[must_use]
    pub fn peek(&self) -> Option<&RuntimeValue> {
        self.stack.last()
    }

    pub fn pop_int(&mut self) -> Result<i32, EvalError> {
        self.pop()?
            .into_int()
            .ok_or(EvalError::ExpectedStackValueIntRepr)
    }

    pub fn pop_long(&mut self) -> Result<i64, EvalError> {
        self.pop()?.into_i64().ok_or(EvalError::ExpectedStackValueLong)
    }

    pub fn pop_float(&mut self) -> Result<f32, EvalError> {
        self.pop()?.into_f32().ok_or(EvalError::ExpectedStackValueFloat)
    }

    pub fn pop_double(&mut self) -> Result<f64, EvalError> {
        self.pop()?
            .into_f64()
            .ok_or(EvalError::ExpectedStackValueDouble)
    }

    /// Pop a reference, `None` being null
    pub fn pop_reference(&mut self) -> Result<Option<GcRef<Instance>>, EvalError> {
        self.pop()?
            .into_reference()
            .ok_or(EvalError::ExpectedStackValueReference)
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[derive(Default, Debug, Clone)]
pub struct Frame {
    pub stack: Stack,
    pub locals: Locals,
}
impl Frame {
    #[must_use]
    pub fn new_locals(locals: Locals) -> Frame {
        Frame {
            stack: Stack::default(),
            locals,
        }
    }
}

/// Either a value or an exception
#[derive(Debug, Clone, Copy)]
pub enum ValueException<V> {
    Value(V),
    Exception(GcRef<ClassInstance>),
}
impl<V> ValueException<V> {
    pub fn map<A, F: FnOnce(V) -> A>(self, op: F) -> ValueException<A> {
        match self {
            ValueException::Value(v) => ValueException::Value((op)(v)),
            ValueException::Exception(exc) => ValueException::Exception(exc),
        }
    }
}
impl ValueException<GcRef<ClassInstance>> {
    #[must_use]
    pub fn flatten(self) -> GcRef<ClassInstance> {
        match self {
            ValueException::Value(v) | ValueException::Exception(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EvalMethodValue {
    /// We returned nothing
    ReturnVoid,
    /// We returned this value
    Return(RuntimeValue),
    /// There was an exception
    Exception(GcRef<ClassInstance>),
}

#[derive(Debug, Clone)]
pub enum RunInstValue {
    /// We returned nothing
    ReturnVoid,
    /// We returned with a value
    Return(RuntimeValue),
    /// There was an exception
    Exception(GcRef<ClassInstance>),
    /// Continue executing to the next instruction
    Continue,
    /// Continue executing at a specific instruction
    /// (such as, due to a goto)
    ContinueAt(InstructionIndex),
}
impl From<ValueException<()>> for RunInstValue {
    fn from(value: ValueException<()>) -> RunInstValue {
        match value {
            ValueException::Value(()) => RunInstValue::Continue,
            ValueException::Exception(exc) => RunInstValue::Exception(exc),
        }
    }
}

pub struct RunInstArgs<'e, 'c, 'f> {
    pub env: &'e mut Env,
    pub method_id: MethodId,
    /// The class declaring the method being executed
    pub class: &'c Arc<Class>,
    pub frame: &'f mut Frame,
    /// The offset of the instruction in the code
    pub inst_index: InstructionIndex,
}
impl RunInstArgs<'_, '_, '_> {
    /// Construct an exception to be thrown by the instruction
    pub(crate) fn throw(
        &mut self,
        class_name: &str,
        message: Option<&str>,
    ) -> Result<RunInstValue, GeneralError> {
        Ok(RunInstValue::Exception(self.env.throw(class_name, message)?))
    }

    pub(crate) fn throw_linkage(
        &mut self,
        err: &basalt_base::LinkageError,
    ) -> Result<RunInstValue, GeneralError> {
        Ok(RunInstValue::Exception(self.env.throw_linkage(err)?))
    }
}

pub trait RunInst {
    fn run(self, args: RunInstArgs) -> Result<RunInstValue, GeneralError>;
}

impl RunInst for &Inst {
    fn run(self, mut args: RunInstArgs) -> Result<RunInstValue, GeneralError> {
        match self {
            Inst::Nop => Ok(RunInstValue::Continue),
            Inst::AConstNull => {
                args.frame.stack.push(RuntimeValue::NullReference);
                Ok(RunInstValue::Continue)
            }
            Inst::IConst(v) => {
                args.frame.stack.push(RuntimeValuePrimitive::I32(*v));
                Ok(RunInstValue::Continue)
            }
            Inst::LConst(v) => {
                args.frame.stack.push(RuntimeValuePrimitive::I64(*v));
                Ok(RunInstValue::Continue)
            }
            Inst::FConst(v) => {
                args.frame.stack.push(RuntimeValuePrimitive::F32(*v));
                Ok(RunInstValue::Continue)
            }
            Inst::DConst(v) => {
                args.frame.stack.push(RuntimeValuePrimitive::F64(*v));
                Ok(RunInstValue::Continue)
            }
            Inst::Ldc(index) | Inst::Ldc2(index) => store_load::ldc(args, *index),
            Inst::Load(_, index) => store_load::load(args, *index),
            Inst::Store(_, index) => store_load::store(args, *index),
            Inst::IInc { index, delta } => operation::iinc(args, *index, *delta),
            Inst::ArrayLoad(kind) => store_load::array_load(args, *kind),
            Inst::ArrayStore(kind) => store_load::array_store(args, *kind),
            Inst::Stack(op) => store_load::stack_op(args, *op),
            Inst::Arith(kind, op) => operation::arith(args, *kind, *op),
            Inst::Convert(conversion) => operation::convert(args, *conversion),
            Inst::Compare(op) => operation::compare(args, *op),
            Inst::If(cond, target) => control_flow::if_zero(args, *cond, *target),
            Inst::IfICmp(cond, target) => control_flow::if_icmp(args, *cond, *target),
            Inst::IfACmp { equal, target } => control_flow::if_acmp(args, *equal, *target),
            Inst::IfNull { is_null, target } => control_flow::if_null(args, *is_null, *target),
            Inst::Goto(target) => Ok(RunInstValue::ContinueAt(*target)),
            Inst::TableSwitch {
                default,
                low,
                targets,
            } => control_flow::table_switch(args, *default, *low, targets),
            Inst::LookupSwitch { default, pairs } => {
                control_flow::lookup_switch(args, *default, pairs)
            }
            Inst::Return(kind) => control_flow::return_value(args, *kind),
            Inst::Field(access, index) => store_load::field(args, *access, *index),
            Inst::Invoke(kind, index) => func::invoke(args, *kind, *index),
            Inst::New(index) => instances::new_instance(args, *index),
            Inst::NewArray(element) => instances::new_array(args, element),
            Inst::ANewArray(index) => instances::new_reference_array(args, *index),
            Inst::ArrayLength => instances::array_length(args),
            Inst::AThrow => control_flow::athrow(args),
            Inst::CheckCast(index) => instances::check_cast(args, *index),
            Inst::InstanceOf(index) => instances::instance_of(args, *index),
            Inst::MonitorEnter => control_flow::monitor_enter(args),
            Inst::MonitorExit => control_flow::monitor_exit(args),
            Inst::Unsupported(name) => Err(EvalError::UnsupportedInstruction(name).into()),
        }
    }
}

/// Evaluate the method with the given frame, whose locals hold the receiver and arguments.
/// `method_id` should already be loaded, and its class linked.
pub fn eval_method(
    env: &mut Env,
    method_id: MethodId,
    frame: Frame,
) -> Result<EvalMethodValue, GeneralError> {
    let (class_id, method_index) = method_id.decompose();
    let class = env
        .rt
        .classes
        .get(class_id)
        .ok_or(EvalError::MissingMethodClass(class_id))?;
    let method = class
        .method(method_index)
        .ok_or(EvalError::MissingMethod(method_id))?;

    if let Some(max_depth) = env.rt.conf.max_call_depth {
        if env.depth >= max_depth.get() {
            let exc = env.throw(STACK_OVERFLOW_ERROR, None)?;
            return Ok(EvalMethodValue::Exception(exc));
        }
    }

    let span = tracing::span!(tracing::Level::INFO, "eval_method");
    let _guard = span.enter();
    tracing::info!(
        "Executing Method: {}::{} {}",
        class.name(),
        method.name(),
        method.descriptor()
    );

    let monitor = if method.is_synchronized() {
        let monitor = method_monitor(env, &class, method, &frame)?;
        monitor.enter(env.thread_id);
        Some(monitor)
    } else {
        None
    };

    env.depth += 1;
    let result = if method.is_native() {
        tracing::info!("\tNative Method");
        internal_repl::call_native(env, &class, method, &frame)
    } else if method.is_abstract() {
        env.throw(ABSTRACT_METHOD_ERROR, Some(&env.rt.classes.method_path(method_id)))
            .map(EvalMethodValue::Exception)
    } else {
        let code = method.code()?.ok_or(EvalError::MissingCode(method_id))?;
        run_code(env, &class, method_id, &code, frame)
    };
    env.depth -= 1;

    match (monitor, result) {
        (Some(monitor), Ok(value)) => {
            if monitor.exit(env.thread_id) {
                Ok(value)
            } else {
                // The body released the monitor itself
                let exc = env.throw(ILLEGAL_MONITOR_STATE_EXCEPTION, None)?;
                Ok(EvalMethodValue::Exception(exc))
            }
        }
        (Some(monitor), Err(err)) => {
            let _ = monitor.exit(env.thread_id);
            Err(err)
        }
        (None, result) => result,
    }
}

/// The monitor a synchronized method holds: the receiver's, or the class's for static methods
fn method_monitor(
    env: &Env,
    class: &Class,
    method: &Method,
    frame: &Frame,
) -> Result<MonitorRef, GeneralError> {
    let object = if method.is_static() {
        env.rt
            .statics(class.id())
            .ok_or(EvalError::MissingStatics(class.id()))?
            .into_generic()
    } else {
        frame
            .locals
            .value_at(0)?
            .into_reference()
            .flatten()
            .ok_or(EvalError::ExpectedLocalVariableReference(0))?
    };
    Ok(env
        .rt
        .gc
        .monitor(object)
        .ok_or(EvalError::InvalidGcRef(object))?)
}

fn run_code(
    env: &mut Env,
    class: &Arc<Class>,
    method_id: MethodId,
    code: &CodeInfo,
    mut frame: Frame,
) -> Result<EvalMethodValue, GeneralError> {
    let instructions = code.instructions();
    let mut pos = 0;

    loop {
        let (pc, inst) = instructions
            .get(pos)
            .ok_or(EvalError::MissingInstruction(InstructionIndex(code.code_length())))?;
        let pc = *pc;

        if env.rt.conf.log_instructions {
            tracing::info!("# ({}) {:?}", pc.0, inst);
        }

        let args = RunInstArgs {
            env,
            method_id,
            class,
            frame: &mut frame,
            inst_index: pc,
        };

        match RunInst::run(inst, args)? {
            RunInstValue::Continue => pos += 1,
            RunInstValue::ContinueAt(target) => {
                pos = code
                    .position_of(target)
                    .ok_or(EvalError::MissingInstruction(target))?;
            }
            RunInstValue::ReturnVoid => return Ok(EvalMethodValue::ReturnVoid),
            RunInstValue::Return(x) => return Ok(EvalMethodValue::Return(x)),
            RunInstValue::Exception(exc) => match find_handler(env, class, code, pc, exc)? {
                ValueException::Value(Some(handler)) => {
                    // The handler starts with only the exception on the stack
                    frame.stack.clear();
                    frame.stack.push(exc);
                    pos = code
                        .position_of(handler)
                        .ok_or(EvalError::MissingInstruction(handler))?;
                }
                // Otherwise, we bubble the exception up
                ValueException::Value(None) => return Ok(EvalMethodValue::Exception(exc)),
                ValueException::Exception(replaced) => {
                    return Ok(EvalMethodValue::Exception(replaced))
                }
            },
        }
    }
}

/// Find the handler for an exception thrown at `pc`, in exception table order.
/// A catch type that fails to resolve replaces the exception with the linkage error.
fn find_handler(
    env: &mut Env,
    class: &Arc<Class>,
    code: &CodeInfo,
    pc: InstructionIndex,
    exc: GcRef<ClassInstance>,
) -> Result<ValueException<Option<InstructionIndex>>, GeneralError> {
    let exception_id = env
        .rt
        .gc
        .class_of(exc)
        .ok_or(EvalError::InvalidGcRef(exc.into_generic()))?;

    for handler in code.handlers_for(pc) {
        let catch_type = match handler.catch_type {
            // It is for all exceptions
            None => return Ok(ValueException::Value(Some(handler.handler))),
            Some(catch_type) => catch_type,
        };

        let catch_class = match env.rt.classes.resolve_class(class, catch_type) {
            Ok(catch_class) => catch_class,
            Err(err) => return Ok(ValueException::Exception(env.throw_linkage(&err)?)),
        };
        if env.rt.classes.is_assignable(exception_id, catch_class.id()) {
            return Ok(ValueException::Value(Some(handler.handler)));
        }
    }

    Ok(ValueException::Value(None))
}
