use smallvec::SmallVec;

use crate::{
    types::{FrameType, TypeContext},
    VerifyErrorKind,
};

/// The local variables of a frame. Unset locals are [`FrameType::Top`], and the slot after a
/// category 2 value is always Top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Locals {
    locals: SmallVec<[FrameType; 16]>,
}
impl Locals {
    pub(crate) fn new(max_locals: u16) -> Locals {
        Locals {
            locals: SmallVec::from_elem(FrameType::Top, usize::from(max_locals)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locals.len()
    }

    pub(crate) fn get(&self, index: u16) -> Option<&FrameType> {
        self.locals.get(usize::from(index))
    }

    pub(crate) fn set(
        &mut self,
        inst_name: &'static str,
        index: u16,
        value: FrameType,
    ) -> Result<(), VerifyErrorKind> {
        let idx = usize::from(index);
        let needed = if value.is_category_2() { 2 } else { 1 };
        if idx + needed > self.locals.len() {
            return Err(VerifyErrorKind::BadLocalIndex { inst_name, index });
        }

        // Overwriting the upper half of a category 2 value invalidates the lower half
        if idx > 0 && self.locals[idx - 1].is_category_2() {
            self.locals[idx - 1] = FrameType::Top;
        }

        let category_2 = value.is_category_2();
        self.locals[idx] = value;
        if category_2 {
            self.locals[idx + 1] = FrameType::Top;
        }

        Ok(())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut FrameType> {
        self.locals.iter_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &FrameType> {
        self.locals.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) stack: SmallVec<[FrameType; 20]>,
    pub(crate) locals: Locals,
    /// The number of monitors entered and not yet exited on this path
    pub(crate) monitor_depth: u16,
    /// Whether the superclass constructor has been called. Always true outside of constructors.
    pub(crate) this_initialized: bool,
}
impl Frame {
    /// The number of stack words in use
    pub(crate) fn stack_size(&self) -> u16 {
        self.stack.iter().map(FrameType::size).sum()
    }

    pub(crate) fn push(
        &mut self,
        inst_name: &'static str,
        max_stack: u16,
        value: FrameType,
    ) -> Result<(), VerifyErrorKind> {
        if self.stack_size() + value.size() > max_stack {
            return Err(VerifyErrorKind::StackOverflow {
                inst_name,
                max_stack,
            });
        }

        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self, inst_name: &'static str) -> Result<FrameType, VerifyErrorKind> {
        self.stack
            .pop()
            .ok_or(VerifyErrorKind::StackUnderflow { inst_name })
    }

    pub(crate) fn pop_category_1(
        &mut self,
        inst_name: &'static str,
    ) -> Result<FrameType, VerifyErrorKind> {
        let value = self.pop(inst_name)?;
        if value.is_category_1() {
            Ok(value)
        } else {
            Err(VerifyErrorKind::ExpectedCategory1 {
                inst_name,
                got: value,
            })
        }
    }

    /// Pop a value which must be exactly `expected`
    pub(crate) fn pop_exact(
        &mut self,
        inst_name: &'static str,
        expected: &FrameType,
    ) -> Result<(), VerifyErrorKind> {
        let value = self.pop(inst_name)?;
        if value == *expected {
            Ok(())
        } else {
            Err(VerifyErrorKind::ExpectedType {
                inst_name,
                expected: expected.to_string(),
                got: value,
            })
        }
    }

    /// Pop any reference, including uninitialized ones
    pub(crate) fn pop_any_reference(
        &mut self,
        inst_name: &'static str,
    ) -> Result<FrameType, VerifyErrorKind> {
        let value = self.pop(inst_name)?;
        if value.is_reference() {
            Ok(value)
        } else {
            Err(VerifyErrorKind::ExpectedType {
                inst_name,
                expected: "reference".to_owned(),
                got: value,
            })
        }
    }

    /// Pop an initialized reference or null
    pub(crate) fn pop_reference(
        &mut self,
        inst_name: &'static str,
    ) -> Result<FrameType, VerifyErrorKind> {
        let value = self.pop_any_reference(inst_name)?;
        if value.is_uninitialized() {
            Err(VerifyErrorKind::UninitializedUse {
                inst_name,
                got: value,
            })
        } else {
            Ok(value)
        }
    }

    /// Replace every copy of `from` in the stack and locals
    pub(crate) fn replace_all(&mut self, from: &FrameType, to: &FrameType) {
        for value in self.stack.iter_mut().chain(self.locals.iter_mut()) {
            if value == from {
                *value = to.clone();
            }
        }
    }

    /// The frame that an exception handler starts with, if the instruction covered by it throws
    pub(crate) fn handler_frame(&self, exception: FrameType) -> Frame {
        let mut stack = SmallVec::new();
        stack.push(exception);
        Frame {
            stack,
            locals: self.locals.clone(),
            monitor_depth: self.monitor_depth,
            this_initialized: self.this_initialized,
        }
    }

    /// Merge `incoming` into this frame, returning the merged frame if it differs
    pub(crate) fn merge(
        &self,
        ctx: &TypeContext,
        incoming: &Frame,
    ) -> Result<Option<Frame>, VerifyErrorKind> {
        if self.monitor_depth != incoming.monitor_depth {
            return Err(VerifyErrorKind::MonitorDepthMismatch {
                existing: self.monitor_depth,
                incoming: incoming.monitor_depth,
            });
        }

        if self.stack.len() != incoming.stack.len()
            || self.locals.len() != incoming.locals.len()
        {
            return Err(VerifyErrorKind::StackShapeMismatch);
        }

        let mut merged = self.clone();
        for (target, value) in merged.stack.iter_mut().zip(incoming.stack.iter()) {
            if target.size() != value.size() {
                return Err(VerifyErrorKind::StackShapeMismatch);
            }

            let result = ctx.merge(target, value)?;
            if result == FrameType::Top && *target != FrameType::Top {
                return Err(VerifyErrorKind::StackShapeMismatch);
            }
            *target = result;
        }

        for (target, value) in merged.locals.iter_mut().zip(incoming.locals.iter()) {
            *target = ctx.merge(target, value)?;
        }

        merged.this_initialized = self.this_initialized && incoming.this_initialized;

        if merged == *self {
            Ok(None)
        } else {
            Ok(Some(merged))
        }
    }
}
