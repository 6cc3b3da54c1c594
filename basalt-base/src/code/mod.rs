use std::fmt;

use basalt_classfile::{CodeAttribute, ConstantPoolIndex};

use self::{op::Inst, op_ex::InstructionParseError};

pub mod op;
pub mod op_ex;

/// An offset into the code array of a method
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstructionIndex(pub u16);
impl fmt::Display for InstructionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Inst with location
pub type InstL = (InstructionIndex, Inst);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Inclusive
    pub start: InstructionIndex,
    /// Exclusive
    pub end: InstructionIndex,
    pub handler: InstructionIndex,
    /// `None` catches everything
    pub catch_type: Option<ConstantPoolIndex>,
}
impl ExceptionHandler {
    #[must_use]
    pub fn covers(&self, idx: InstructionIndex) -> bool {
        self.start <= idx && idx < self.end
    }
}

/// The decoded code of a method
#[derive(Debug, Clone)]
pub struct CodeInfo {
    instructions: Vec<InstL>,
    max_locals: u16,
    max_stack: u16,
    exception_table: Vec<ExceptionHandler>,
    code_length: u16,
}
impl CodeInfo {
    pub fn decode(code: &CodeAttribute) -> Result<CodeInfo, InstructionParseError> {
        if code.code.is_empty() {
            return Err(InstructionParseError::Empty);
        }

        let mut instructions = Vec::new();
        let mut pos: usize = 0;
        while pos < code.code.len() {
            let idx = InstructionIndex(pos as u16);
            let (inst, size) = Inst::parse(&code.code, idx)?;
            instructions.push((idx, inst));
            pos += size;
        }

        let exception_table = code
            .exception_table
            .iter()
            .map(|entry| ExceptionHandler {
                start: InstructionIndex(entry.start_pc),
                end: InstructionIndex(entry.end_pc),
                handler: InstructionIndex(entry.handler_pc),
                catch_type: entry.catch_type,
            })
            .collect();

        Ok(CodeInfo {
            instructions,
            max_locals: code.max_locals,
            max_stack: code.max_stack,
            exception_table,
            code_length: code.code.len() as u16,
        })
    }

    #[must_use]
    pub fn instructions(&self) -> &[InstL] {
        &self.instructions
    }

    #[must_use]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[must_use]
    pub fn exception_table(&self) -> &[ExceptionHandler] {
        &self.exception_table
    }

    #[must_use]
    pub fn code_length(&self) -> u16 {
        self.code_length
    }

    /// Get the position in the instruction list of the instruction starting at `idx`.
    /// Returns `None` if `idx` is not the start of an instruction.
    #[must_use]
    pub fn position_of(&self, idx: InstructionIndex) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&idx, |(i, _)| *i)
            .ok()
    }

    #[must_use]
    pub fn has_instruction_at(&self, idx: InstructionIndex) -> bool {
        self.position_of(idx).is_some()
    }

    #[must_use]
    pub fn get_instruction_at(&self, idx: InstructionIndex) -> Option<&Inst> {
        self.position_of(idx).map(|pos| &self.instructions[pos].1)
    }

    /// The handlers covering `idx`, in table order
    pub fn handlers_for(&self, idx: InstructionIndex) -> impl Iterator<Item = &ExceptionHandler> {
        self.exception_table
            .iter()
            .filter(move |handler| handler.covers(idx))
    }
}

#[cfg(test)]
mod tests {
    use basalt_classfile::{builder::Code, opcode, CodeAttribute};

    use super::{
        op::{ArithOp, Condition, Inst, NumKind, ValueKind},
        op_ex::InstructionParseError,
        CodeInfo, InstructionIndex,
    };

    fn attribute(code: Code) -> CodeAttribute {
        CodeAttribute {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            code: code.bytes,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_decode_simple() {
        let mut code = Code::new(2, 2);
        code.op(opcode::ILOAD_1)
            .op_u8(opcode::BIPUSH, 0xFF)
            .op(opcode::IADD)
            .op(opcode::IRETURN);
        let info = CodeInfo::decode(&attribute(code)).unwrap();
        let insts: Vec<_> = info.instructions().iter().map(|(_, i)| i.clone()).collect();
        assert_eq!(
            insts,
            vec![
                Inst::Load(ValueKind::Int, 1),
                Inst::IConst(-1),
                Inst::Arith(NumKind::Int, ArithOp::Add),
                Inst::Return(Some(ValueKind::Int)),
            ]
        );
        assert_eq!(info.position_of(InstructionIndex(1)), Some(1));
        assert_eq!(info.position_of(InstructionIndex(2)), None);
        assert_eq!(info.code_length(), 5);
    }

    #[test]
    fn test_decode_branch() {
        let mut code = Code::new(1, 1);
        code.op(opcode::ILOAD_0);
        let patch = code.branch(opcode::IFNE);
        code.op(opcode::ICONST_0).op(opcode::IRETURN);
        code.patch(patch);
        code.op(opcode::ICONST_1).op(opcode::IRETURN);
        let info = CodeInfo::decode(&attribute(code)).unwrap();
        assert_eq!(
            info.instructions()[1].1,
            Inst::If(Condition::Ne, InstructionIndex(6))
        );
        assert!(info.has_instruction_at(InstructionIndex(6)));
    }

    #[test]
    fn test_decode_switch_padding() {
        let mut code = Code::new(1, 1);
        code.op(opcode::ILOAD_0);
        let switch = code.tableswitch(0, 1);
        code.patch_switch_default(&switch);
        code.op(opcode::ICONST_0).op(opcode::IRETURN);
        code.patch_switch_case(&switch, 0);
        code.patch_switch_case(&switch, 1);
        code.op(opcode::ICONST_1).op(opcode::IRETURN);
        let info = CodeInfo::decode(&attribute(code)).unwrap();
        match &info.instructions()[1].1 {
            Inst::TableSwitch {
                default,
                low,
                targets,
            } => {
                assert_eq!(*low, 0);
                assert_eq!(targets.len(), 2);
                assert!(info.has_instruction_at(*default));
                assert!(info.has_instruction_at(targets[0]));
            }
            inst => panic!("Expected tableswitch, got {:?}", inst),
        }
    }

    #[test]
    fn test_decode_errors() {
        let mut code = Code::new(0, 0);
        code.raw(&[0xBA + 0x20]);
        assert!(matches!(
            CodeInfo::decode(&attribute(code)),
            Err(InstructionParseError::UnknownOpcode { .. })
        ));

        let mut code = Code::new(0, 0);
        code.raw(&[opcode::SIPUSH, 0]);
        assert!(matches!(
            CodeInfo::decode(&attribute(code)),
            Err(InstructionParseError::Truncated { .. })
        ));

        let mut code = Code::new(0, 0);
        code.branch_to(opcode::GOTO, 40);
        assert!(matches!(
            CodeInfo::decode(&attribute(code)),
            Err(InstructionParseError::BranchOutOfRange { .. })
        ));
    }

    #[test]
    fn test_decode_wide() {
        let mut code = Code::new(0, 300);
        code.raw(&[opcode::WIDE, opcode::IINC, 0x01, 0x00, 0xFF, 0xFE]);
        code.op(opcode::RETURN);
        let info = CodeInfo::decode(&attribute(code)).unwrap();
        assert_eq!(
            info.instructions()[0].1,
            Inst::IInc {
                index: 256,
                delta: -2
            }
        );
        assert_eq!(info.instructions()[1].0, InstructionIndex(6));
    }
}
