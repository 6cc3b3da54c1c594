#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Not really useful.
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]

//! Type-inferencing bytecode verification.
//!
//! Every method is abstractly interpreted over [`FrameType`]s, starting from the types of its
//! parameters. The frame at the start of each instruction is computed with a worklist, merging
//! the frames flowing into join points until nothing changes. No `StackMapTable` is needed or
//! consulted.
//!
//! A class whose verification fails must never be linked, so none of its code can run.

use std::sync::Arc;

use basalt_base::{
    class::{Class, Method},
    code::{op_ex::InstructionParseError, CodeInfo, InstructionIndex},
    util::format_method,
    Classes, LinkageError, OBJECT_NAME, THROWABLE_NAME,
};
use basalt_classfile::{ClassFormatError, ConstantPool, DescriptorError};
use smallvec::SmallVec;
use tracing::Level;

use crate::{
    frame::{Frame, Locals},
    types::TypeContext,
};

mod frame;
mod inst;
mod types;

pub use types::FrameType;

/// Switches for logging the progress of verification, which is useful when tracking down why a
/// method was rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationLogging {
    pub log_method_name: bool,
    pub log_instruction: bool,
    /// Log the stack and locals each instruction starts with
    pub log_frames: bool,
}

/// A method failed verification
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{location}: {kind}")]
pub struct VerifyError {
    /// The method, and the instruction if the failure was at one
    pub location: String,
    pub at: Option<InstructionIndex>,
    pub kind: VerifyErrorKind,
}
impl From<VerifyError> for LinkageError {
    fn from(err: VerifyError) -> LinkageError {
        match err.kind {
            // Loading a class that the method mentions failed, which is not the fault of the
            // method
            VerifyErrorKind::Linkage(err) => err,
            _ => LinkageError::Verify(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum VerifyErrorKind {
    #[error("{0}")]
    Decode(#[from] InstructionParseError),
    #[error("{0}")]
    ConstantPool(#[from] ClassFormatError),
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),
    /// A class needed for checking assignability could not be loaded
    #[error("{0}")]
    Linkage(#[from] LinkageError),
    #[error("Arguments can't fit into locals: need {needed} but max_locals is {max_locals}")]
    ArgumentsExceedLocals { needed: usize, max_locals: u16 },
    #[error("Operand stack underflow in {inst_name}")]
    StackUnderflow { inst_name: &'static str },
    #[error("Operand stack overflow in {inst_name}, max_stack is {max_stack}")]
    StackOverflow {
        inst_name: &'static str,
        max_stack: u16,
    },
    #[error("Bad type on operand stack in {inst_name}: expected {expected}, got {got}")]
    ExpectedType {
        inst_name: &'static str,
        expected: String,
        got: FrameType,
    },
    #[error("Bad type on operand stack in {inst_name}: expected a category 1 value, got {got}")]
    ExpectedCategory1 {
        inst_name: &'static str,
        got: FrameType,
    },
    #[error("Illegal local variable number {index} in {inst_name}")]
    BadLocalIndex { inst_name: &'static str, index: u16 },
    #[error("Bad local variable type in {inst_name}: local {index} is {got}, expected {expected}")]
    BadLocalType {
        inst_name: &'static str,
        index: u16,
        expected: String,
        got: FrameType,
    },
    #[error("Uninitialized object {got} used in {inst_name}")]
    UninitializedUse {
        inst_name: &'static str,
        got: FrameType,
    },
    #[error("Bad {inst_name} on {got}: expected an array")]
    NotAnArray {
        inst_name: &'static str,
        got: FrameType,
    },
    #[error("Bad {inst_name} on {got}: wrong element type")]
    BadArrayElement {
        inst_name: &'static str,
        got: FrameType,
    },
    #[error("Branch to {target} is not the start of an instruction")]
    BadBranchTarget { target: InstructionIndex },
    #[error("Illegal exception table range {start}..{end}")]
    BadHandlerRange {
        start: InstructionIndex,
        end: InstructionIndex,
    },
    #[error("Illegal exception table handler {handler}")]
    BadHandlerTarget { handler: InstructionIndex },
    #[error("Catch type {name} is not a subclass of Throwable")]
    BadCatchType { name: String },
    #[error("Falling off the end of the code")]
    FallsOffEnd,
    #[error("Inconsistent stack height or types at merge")]
    StackShapeMismatch,
    #[error("Inconsistent monitor depth at merge: {existing} and {incoming}")]
    MonitorDepthMismatch { existing: u16, incoming: u16 },
    #[error("monitorexit without a matching monitorenter")]
    MonitorExitWithoutEnter,
    #[error("Returning while holding {depth} monitor(s)")]
    ReturnWithHeldMonitor { depth: u16 },
    #[error("Wrong return type in {inst_name}: method returns {expected}")]
    BadReturn {
        inst_name: &'static str,
        expected: String,
    },
    #[error("Constructor must call super() or this() before return")]
    ConstructorReturnsUninitialized,
    #[error("Bad <init> call: {reason}")]
    BadInitCall { reason: String },
    #[error("Constant #{index} can't be loaded by this ldc")]
    BadConstant { index: u16 },
    #[error("Illegal use of new on array class {name}")]
    NewArrayClass { name: String },
    #[error("Illegal call to {name}")]
    IllegalMethodName { name: String },
    #[error("Unsupported instruction {0}")]
    Unsupported(&'static str),
}

/// Verify every method of `class`. Array classes have no code and always pass.
pub fn verify_class(
    classes: &Classes,
    class: &Arc<Class>,
    logging: VerificationLogging,
) -> Result<(), VerifyError> {
    let _span = tracing::span!(Level::TRACE, "verify_class", class = class.name()).entered();

    for method in class.methods() {
        verify_method(classes, class, method, logging)?;
    }

    tracing::trace!("Verified {}", class.name());
    Ok(())
}

/// Verify a single method of `class`. Abstract and native methods have no code and pass.
pub fn verify_method(
    classes: &Classes,
    class: &Arc<Class>,
    method: &Method,
    logging: VerificationLogging,
) -> Result<(), VerifyError> {
    let location = format_method(class.name(), method.name(), method.descriptor());
    if logging.log_method_name {
        tracing::info!("Verifying {}", location);
    }

    let code = method.code().map_err(|err| VerifyError {
        location: location.clone(),
        at: None,
        kind: err.into(),
    })?;
    let (code, pool) = match (code, class.constant_pool()) {
        (Some(code), Some(pool)) => (code, pool),
        _ => return Ok(()),
    };

    let count = code.instructions().len();
    let mut verifier = MethodVerifier {
        ctx: TypeContext { classes },
        class,
        method,
        pool,
        code: &code,
        logging,
        in_frames: vec![None; count],
        queued: vec![false; count],
        worklist: Vec::new(),
    };
    verifier.run().map_err(|(at, kind)| {
        let location = match at {
            Some(at) => format!("{} {}", location, at),
            None => location,
        };
        VerifyError { location, at, kind }
    })
}

pub(crate) struct MethodVerifier<'a> {
    pub(crate) ctx: TypeContext<'a>,
    pub(crate) class: &'a Arc<Class>,
    pub(crate) method: &'a Method,
    pub(crate) pool: &'a ConstantPool,
    pub(crate) code: &'a CodeInfo,
    logging: VerificationLogging,
    /// The frame at the start of each instruction, by position in the instruction list.
    /// `None` for instructions not yet reached.
    in_frames: Vec<Option<Frame>>,
    queued: Vec<bool>,
    worklist: Vec<usize>,
}
impl<'a> MethodVerifier<'a> {
    fn run(&mut self) -> Result<(), (Option<InstructionIndex>, VerifyErrorKind)> {
        let initial = self.initial_frame().map_err(|kind| (None, kind))?;
        self.check_exception_table().map_err(|kind| (None, kind))?;

        self.in_frames[0] = Some(initial);
        self.queued[0] = true;
        self.worklist.push(0);

        let code = self.code;
        while let Some(pos) = self.worklist.pop() {
            self.queued[pos] = false;
            let idx = code.instructions()[pos].0;
            self.step(pos).map_err(|kind| (Some(idx), kind))?;
        }

        Ok(())
    }

    fn initial_frame(&self) -> Result<Frame, VerifyErrorKind> {
        let descriptor = self.method.parsed_descriptor();
        let max_locals = self.code.max_locals();
        let needed = descriptor.parameter_slots() + usize::from(!self.method.is_static());
        if needed > usize::from(max_locals) {
            return Err(VerifyErrorKind::ArgumentsExceedLocals { needed, max_locals });
        }

        let mut frame = Frame {
            stack: SmallVec::new(),
            locals: Locals::new(max_locals),
            monitor_depth: 0,
            this_initialized: true,
        };

        let mut index = 0;
        if !self.method.is_static() {
            let this = if self.method.is_init() && self.class.name() != OBJECT_NAME {
                frame.this_initialized = false;
                FrameType::UninitializedThis
            } else {
                FrameType::reference(self.class.name())
            };
            frame.locals.set("<entry>", index, this)?;
            index += 1;
        }

        for parameter in &descriptor.parameters {
            let typ = FrameType::from_field_type(parameter);
            let size = typ.size();
            frame.locals.set("<entry>", index, typ)?;
            index += size;
        }

        Ok(frame)
    }

    fn check_exception_table(&self) -> Result<(), VerifyErrorKind> {
        let code_length = self.code.code_length();
        for handler in self.code.exception_table() {
            let end_ok = handler.end.0 == code_length || self.code.has_instruction_at(handler.end);
            if handler.start >= handler.end
                || !self.code.has_instruction_at(handler.start)
                || !end_ok
            {
                return Err(VerifyErrorKind::BadHandlerRange {
                    start: handler.start,
                    end: handler.end,
                });
            }

            if !self.code.has_instruction_at(handler.handler) {
                return Err(VerifyErrorKind::BadHandlerTarget {
                    handler: handler.handler,
                });
            }

            if let Some(catch_type) = handler.catch_type {
                let name = self.pool.class_name(catch_type)?;
                let typ = FrameType::reference(name);
                if !self.ctx.is_assignable_to_class(&typ, THROWABLE_NAME)? {
                    return Err(VerifyErrorKind::BadCatchType {
                        name: name.to_owned(),
                    });
                }
            }
        }

        Ok(())
    }

    fn position_of(&self, target: InstructionIndex) -> Result<usize, VerifyErrorKind> {
        self.code
            .position_of(target)
            .ok_or(VerifyErrorKind::BadBranchTarget { target })
    }

    /// Run the instruction at `pos` over its in-frame, and push the result to every successor
    fn step(&mut self, pos: usize) -> Result<(), VerifyErrorKind> {
        let code = self.code;
        let (idx, inst) = &code.instructions()[pos];
        let frame = match &self.in_frames[pos] {
            Some(frame) => frame.clone(),
            None => return Ok(()),
        };

        if self.logging.log_instruction {
            tracing::info!("# ({}) {}", idx.0, inst.name());
        }
        if self.logging.log_frames {
            tracing::info!(
                "\tStack: [{}]",
                frame
                    .stack
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            tracing::info!(
                "\tLocals: [{}]",
                frame
                    .locals
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for handler in code.handlers_for(*idx) {
            let exception = match handler.catch_type {
                Some(catch_type) => FrameType::reference(self.pool.class_name(catch_type)?),
                None => FrameType::reference(THROWABLE_NAME),
            };
            let target = self.position_of(handler.handler)?;
            self.propagate(target, frame.handler_frame(exception))?;
        }

        let mut out = frame;
        self.execute(&mut out, *idx, inst)?;

        if inst.falls_through() {
            let next = pos + 1;
            if next >= code.instructions().len() {
                return Err(VerifyErrorKind::FallsOffEnd);
            }
            self.propagate(next, out.clone())?;
        }

        for target in inst.branch_targets() {
            let target = self.position_of(target)?;
            self.propagate(target, out.clone())?;
        }

        Ok(())
    }

    /// Merge `frame` into the in-frame of the instruction at `pos`, queueing the instruction if
    /// that changed anything
    fn propagate(&mut self, pos: usize, frame: Frame) -> Result<(), VerifyErrorKind> {
        let changed = match &self.in_frames[pos] {
            None => Some(frame),
            Some(existing) => existing.merge(&self.ctx, &frame)?,
        };

        if let Some(frame) = changed {
            self.in_frames[pos] = Some(frame);
            if !self.queued[pos] {
                self.queued[pos] = true;
                self.worklist.push(pos);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
