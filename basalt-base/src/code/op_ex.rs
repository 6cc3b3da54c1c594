use super::{op::RawOpcode, InstructionIndex};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum InstructionParseError {
    #[error("unknown opcode {opcode:#04x} at {idx}")]
    UnknownOpcode {
        idx: InstructionIndex,
        opcode: RawOpcode,
    },
    #[error("instruction at {idx} runs past the end of the code")]
    Truncated { idx: InstructionIndex },
    #[error("branch at {idx} with offset {offset} leaves the code")]
    BranchOutOfRange {
        idx: InstructionIndex,
        offset: i32,
    },
    #[error("malformed switch at {idx}")]
    BadSwitch { idx: InstructionIndex },
    #[error("wide at {idx} applied to opcode {opcode:#04x}")]
    BadWide {
        idx: InstructionIndex,
        opcode: RawOpcode,
    },
    #[error("newarray at {idx} has bad array type {atype}")]
    BadNewArrayType { idx: InstructionIndex, atype: u8 },
    #[error("invokeinterface at {idx} has an argument count of zero")]
    ZeroInvokeInterfaceCount { idx: InstructionIndex },
    #[error("the code is empty")]
    Empty,
}
