//! The decoded form of JVM instructions.
//! Families of opcodes that only differ in the type they operate on are folded into one variant,
//! and implicit operands (`iload_2`, `iconst_m1`) are made explicit.

use basalt_classfile::{opcode, ConstantPoolIndex, FieldType};

use super::{op_ex::InstructionParseError, InstructionIndex};

pub type RawOpcode = u8;

/// The computational type of a value moved by loads, stores and returns
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}
impl ValueKind {
    #[must_use]
    pub fn is_category_2(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }

    #[must_use]
    pub fn from_field_type(typ: &FieldType) -> ValueKind {
        match typ {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Int
            | FieldType::Short
            | FieldType::Boolean => ValueKind::Int,
            FieldType::Long => ValueKind::Long,
            FieldType::Float => ValueKind::Float,
            FieldType::Double => ValueKind::Double,
            FieldType::Object(_) | FieldType::Array(_) => ValueKind::Reference,
        }
    }
}

/// The element family accessed by an array load or store.
/// `baload`/`bastore` work on both byte and boolean arrays.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    ByteOrBoolean,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}
impl ArrayKind {
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            ArrayKind::ByteOrBoolean | ArrayKind::Char | ArrayKind::Short | ArrayKind::Int => {
                ValueKind::Int
            }
            ArrayKind::Long => ValueKind::Long,
            ArrayKind::Float => ValueKind::Float,
            ArrayKind::Double => ValueKind::Double,
            ArrayKind::Reference => ValueKind::Reference,
        }
    }

    /// Whether an array with the given component type may be accessed with this kind
    #[must_use]
    pub fn accepts_component(self, component: &FieldType) -> bool {
        match (self, component) {
            (ArrayKind::ByteOrBoolean, FieldType::Byte | FieldType::Boolean)
            | (ArrayKind::Char, FieldType::Char)
            | (ArrayKind::Short, FieldType::Short)
            | (ArrayKind::Int, FieldType::Int)
            | (ArrayKind::Long, FieldType::Long)
            | (ArrayKind::Float, FieldType::Float)
            | (ArrayKind::Double, FieldType::Double)
            | (ArrayKind::Reference, FieldType::Object(_) | FieldType::Array(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NumKind {
    Int,
    Long,
    Float,
    Double,
}
impl NumKind {
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            NumKind::Int => ValueKind::Int,
            NumKind::Long => ValueKind::Long,
            NumKind::Float => ValueKind::Float,
            NumKind::Double => ValueKind::Double,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
}
impl ArithOp {
    /// Shifts take an int shift amount regardless of the kind of the value being shifted
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, ArithOp::Shl | ArithOp::Shr | ArithOp::UShr)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Conversion {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}
impl Conversion {
    #[must_use]
    pub fn from_kind(self) -> NumKind {
        match self {
            Conversion::I2L
            | Conversion::I2F
            | Conversion::I2D
            | Conversion::I2B
            | Conversion::I2C
            | Conversion::I2S => NumKind::Int,
            Conversion::L2I | Conversion::L2F | Conversion::L2D => NumKind::Long,
            Conversion::F2I | Conversion::F2L | Conversion::F2D => NumKind::Float,
            Conversion::D2I | Conversion::D2L | Conversion::D2F => NumKind::Double,
        }
    }

    #[must_use]
    pub fn to_kind(self) -> NumKind {
        match self {
            Conversion::L2I
            | Conversion::F2I
            | Conversion::D2I
            | Conversion::I2B
            | Conversion::I2C
            | Conversion::I2S => NumKind::Int,
            Conversion::I2L | Conversion::F2L | Conversion::D2L => NumKind::Long,
            Conversion::I2F | Conversion::L2F | Conversion::D2F => NumKind::Float,
            Conversion::I2D | Conversion::L2D | Conversion::F2D => NumKind::Double,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompareOp {
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
}
impl CompareOp {
    #[must_use]
    pub fn operand_kind(self) -> NumKind {
        match self {
            CompareOp::LCmp => NumKind::Long,
            CompareOp::FCmpL | CompareOp::FCmpG => NumKind::Float,
            CompareOp::DCmpL | CompareOp::DCmpG => NumKind::Double,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}
impl Condition {
    #[must_use]
    pub fn test(self, left: i32, right: i32) -> bool {
        match self {
            Condition::Eq => left == right,
            Condition::Ne => left != right,
            Condition::Lt => left < right,
            Condition::Ge => left >= right,
            Condition::Gt => left > right,
            Condition::Le => left <= right,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldAccess {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}
impl FieldAccess {
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(self, FieldAccess::GetStatic | FieldAccess::PutStatic)
    }

    #[must_use]
    pub fn is_put(self) -> bool {
        matches!(self, FieldAccess::PutStatic | FieldAccess::PutField)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Nop,
    AConstNull,
    /// `iconst_*`, `bipush` and `sipush`
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    /// `ldc` and `ldc_w`
    Ldc(ConstantPoolIndex),
    Ldc2(ConstantPoolIndex),
    Load(ValueKind, u16),
    Store(ValueKind, u16),
    IInc {
        index: u16,
        delta: i16,
    },
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    Stack(StackOp),
    Arith(NumKind, ArithOp),
    Convert(Conversion),
    Compare(CompareOp),
    /// Compare an int against zero
    If(Condition, InstructionIndex),
    IfICmp(Condition, InstructionIndex),
    IfACmp {
        equal: bool,
        target: InstructionIndex,
    },
    IfNull {
        is_null: bool,
        target: InstructionIndex,
    },
    /// `goto` and `goto_w`
    Goto(InstructionIndex),
    TableSwitch {
        default: InstructionIndex,
        low: i32,
        targets: Vec<InstructionIndex>,
    },
    LookupSwitch {
        default: InstructionIndex,
        pairs: Vec<(i32, InstructionIndex)>,
    },
    /// `None` is a void return
    Return(Option<ValueKind>),
    Field(FieldAccess, ConstantPoolIndex),
    Invoke(InvokeKind, ConstantPoolIndex),
    New(ConstantPoolIndex),
    /// A primitive array, with the component type
    NewArray(FieldType),
    ANewArray(ConstantPoolIndex),
    ArrayLength,
    AThrow,
    CheckCast(ConstantPoolIndex),
    InstanceOf(ConstantPoolIndex),
    MonitorEnter,
    MonitorExit,
    /// An instruction that decodes but which is not supported: `jsr`, `ret`, `invokedynamic`
    /// and `multianewarray`
    Unsupported(&'static str),
}
impl Inst {
    /// Decode the instruction starting at `at`, returning it along with its length in bytes
    pub(crate) fn parse(
        code: &[u8],
        at: InstructionIndex,
    ) -> Result<(Inst, usize), InstructionParseError> {
        let mut cursor = Cursor {
            code,
            start: at.0,
            pos: usize::from(at.0),
        };
        let opcode = cursor.u8()?;
        let inst = cursor.inst(opcode)?;
        Ok((inst, cursor.pos - usize::from(at.0)))
    }

    /// Whether execution can continue on to the next instruction after this one
    #[must_use]
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Inst::Goto(_)
                | Inst::TableSwitch { .. }
                | Inst::LookupSwitch { .. }
                | Inst::Return(_)
                | Inst::AThrow
                | Inst::Unsupported(_)
        )
    }

    /// The explicit branch targets of this instruction
    #[must_use]
    pub fn branch_targets(&self) -> Vec<InstructionIndex> {
        match self {
            Inst::If(_, target)
            | Inst::IfICmp(_, target)
            | Inst::IfACmp { target, .. }
            | Inst::IfNull { target, .. }
            | Inst::Goto(target) => vec![*target],
            Inst::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Inst::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, target)| *target))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Inst::Nop => "nop",
            Inst::AConstNull => "aconst_null",
            Inst::IConst(_) => "iconst",
            Inst::LConst(_) => "lconst",
            Inst::FConst(_) => "fconst",
            Inst::DConst(_) => "dconst",
            Inst::Ldc(_) => "ldc",
            Inst::Ldc2(_) => "ldc2_w",
            Inst::Load(..) => "load",
            Inst::Store(..) => "store",
            Inst::IInc { .. } => "iinc",
            Inst::ArrayLoad(_) => "arrayload",
            Inst::ArrayStore(_) => "arraystore",
            Inst::Stack(_) => "stack",
            Inst::Arith(..) => "arith",
            Inst::Convert(_) => "convert",
            Inst::Compare(_) => "compare",
            Inst::If(..) => "if",
            Inst::IfICmp(..) => "if_icmp",
            Inst::IfACmp { .. } => "if_acmp",
            Inst::IfNull { .. } => "ifnull",
            Inst::Goto(_) => "goto",
            Inst::TableSwitch { .. } => "tableswitch",
            Inst::LookupSwitch { .. } => "lookupswitch",
            Inst::Return(_) => "return",
            Inst::Field(FieldAccess::GetStatic, _) => "getstatic",
            Inst::Field(FieldAccess::PutStatic, _) => "putstatic",
            Inst::Field(FieldAccess::GetField, _) => "getfield",
            Inst::Field(FieldAccess::PutField, _) => "putfield",
            Inst::Invoke(InvokeKind::Virtual, _) => "invokevirtual",
            Inst::Invoke(InvokeKind::Special, _) => "invokespecial",
            Inst::Invoke(InvokeKind::Static, _) => "invokestatic",
            Inst::Invoke(InvokeKind::Interface, _) => "invokeinterface",
            Inst::New(_) => "new",
            Inst::NewArray(_) => "newarray",
            Inst::ANewArray(_) => "anewarray",
            Inst::ArrayLength => "arraylength",
            Inst::AThrow => "athrow",
            Inst::CheckCast(_) => "checkcast",
            Inst::InstanceOf(_) => "instanceof",
            Inst::MonitorEnter => "monitorenter",
            Inst::MonitorExit => "monitorexit",
            Inst::Unsupported(name) => name,
        }
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    /// Start of the instruction, which branch offsets are relative to
    start: u16,
    pos: usize,
}
impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], InstructionParseError> {
        let end = self.pos + n;
        let data = self
            .code
            .get(self.pos..end)
            .ok_or(InstructionParseError::Truncated {
                idx: InstructionIndex(self.start),
            })?;
        self.pos = end;
        Ok(data)
    }

    fn u8(&mut self) -> Result<u8, InstructionParseError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, InstructionParseError> {
        Ok(i8::from_be_bytes([self.u8()?]))
    }

    fn u16(&mut self) -> Result<u16, InstructionParseError> {
        let data = self.take(2)?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    fn i16(&mut self) -> Result<i16, InstructionParseError> {
        let data = self.take(2)?;
        Ok(i16::from_be_bytes([data[0], data[1]]))
    }

    fn i32(&mut self) -> Result<i32, InstructionParseError> {
        let data = self.take(4)?;
        Ok(i32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }

    fn index(&mut self) -> Result<ConstantPoolIndex, InstructionParseError> {
        self.u16().map(ConstantPoolIndex)
    }

    /// Turn a relative branch offset into an absolute index into the code
    fn target(&self, offset: i32) -> Result<InstructionIndex, InstructionParseError> {
        let target = i64::from(self.start) + i64::from(offset);
        if target < 0 || target >= self.code.len() as i64 {
            return Err(InstructionParseError::BranchOutOfRange {
                idx: InstructionIndex(self.start),
                offset,
            });
        }

        Ok(InstructionIndex(target as u16))
    }

    fn target16(&mut self) -> Result<InstructionIndex, InstructionParseError> {
        let offset = self.i16()?;
        self.target(i32::from(offset))
    }

    fn target32(&mut self) -> Result<InstructionIndex, InstructionParseError> {
        let offset = self.i32()?;
        self.target(offset)
    }

    /// Skip the padding that aligns switch operands to four bytes from the start of the code
    fn align(&mut self) -> Result<(), InstructionParseError> {
        let padding = (4 - (self.pos % 4)) % 4;
        self.take(padding).map(|_| ())
    }

    fn inst(&mut self, opcode: RawOpcode) -> Result<Inst, InstructionParseError> {
        use self::ValueKind as V;

        let idx = InstructionIndex(self.start);
        Ok(match opcode {
            opcode::NOP => Inst::Nop,
            opcode::ACONST_NULL => Inst::AConstNull,
            opcode::ICONST_M1..=opcode::ICONST_5 => {
                Inst::IConst(i32::from(opcode) - i32::from(opcode::ICONST_0))
            }
            opcode::LCONST_0 => Inst::LConst(0),
            opcode::LCONST_1 => Inst::LConst(1),
            opcode::FCONST_0 => Inst::FConst(0.0),
            opcode::FCONST_1 => Inst::FConst(1.0),
            opcode::FCONST_2 => Inst::FConst(2.0),
            opcode::DCONST_0 => Inst::DConst(0.0),
            opcode::DCONST_1 => Inst::DConst(1.0),
            opcode::BIPUSH => Inst::IConst(i32::from(self.i8()?)),
            opcode::SIPUSH => Inst::IConst(i32::from(self.i16()?)),
            opcode::LDC => Inst::Ldc(ConstantPoolIndex(u16::from(self.u8()?))),
            opcode::LDC_W => Inst::Ldc(self.index()?),
            opcode::LDC2_W => Inst::Ldc2(self.index()?),

            opcode::ILOAD => Inst::Load(V::Int, u16::from(self.u8()?)),
            opcode::LLOAD => Inst::Load(V::Long, u16::from(self.u8()?)),
            opcode::FLOAD => Inst::Load(V::Float, u16::from(self.u8()?)),
            opcode::DLOAD => Inst::Load(V::Double, u16::from(self.u8()?)),
            opcode::ALOAD => Inst::Load(V::Reference, u16::from(self.u8()?)),
            opcode::ILOAD_0..=opcode::ALOAD_3 => {
                let offset = opcode - opcode::ILOAD_0;
                let kind = [V::Int, V::Long, V::Float, V::Double, V::Reference]
                    [usize::from(offset / 4)];
                Inst::Load(kind, u16::from(offset % 4))
            }

            opcode::IALOAD => Inst::ArrayLoad(ArrayKind::Int),
            opcode::LALOAD => Inst::ArrayLoad(ArrayKind::Long),
            opcode::FALOAD => Inst::ArrayLoad(ArrayKind::Float),
            opcode::DALOAD => Inst::ArrayLoad(ArrayKind::Double),
            opcode::AALOAD => Inst::ArrayLoad(ArrayKind::Reference),
            opcode::BALOAD => Inst::ArrayLoad(ArrayKind::ByteOrBoolean),
            opcode::CALOAD => Inst::ArrayLoad(ArrayKind::Char),
            opcode::SALOAD => Inst::ArrayLoad(ArrayKind::Short),

            opcode::ISTORE => Inst::Store(V::Int, u16::from(self.u8()?)),
            opcode::LSTORE => Inst::Store(V::Long, u16::from(self.u8()?)),
            opcode::FSTORE => Inst::Store(V::Float, u16::from(self.u8()?)),
            opcode::DSTORE => Inst::Store(V::Double, u16::from(self.u8()?)),
            opcode::ASTORE => Inst::Store(V::Reference, u16::from(self.u8()?)),
            opcode::ISTORE_0..=opcode::ASTORE_3 => {
                let offset = opcode - opcode::ISTORE_0;
                let kind = [V::Int, V::Long, V::Float, V::Double, V::Reference]
                    [usize::from(offset / 4)];
                Inst::Store(kind, u16::from(offset % 4))
            }

            opcode::IASTORE => Inst::ArrayStore(ArrayKind::Int),
            opcode::LASTORE => Inst::ArrayStore(ArrayKind::Long),
            opcode::FASTORE => Inst::ArrayStore(ArrayKind::Float),
            opcode::DASTORE => Inst::ArrayStore(ArrayKind::Double),
            opcode::AASTORE => Inst::ArrayStore(ArrayKind::Reference),
            opcode::BASTORE => Inst::ArrayStore(ArrayKind::ByteOrBoolean),
            opcode::CASTORE => Inst::ArrayStore(ArrayKind::Char),
            opcode::SASTORE => Inst::ArrayStore(ArrayKind::Short),

            opcode::POP => Inst::Stack(StackOp::Pop),
            opcode::POP2 => Inst::Stack(StackOp::Pop2),
            opcode::DUP => Inst::Stack(StackOp::Dup),
            opcode::DUP_X1 => Inst::Stack(StackOp::DupX1),
            opcode::DUP_X2 => Inst::Stack(StackOp::DupX2),
            opcode::DUP2 => Inst::Stack(StackOp::Dup2),
            opcode::DUP2_X1 => Inst::Stack(StackOp::Dup2X1),
            opcode::DUP2_X2 => Inst::Stack(StackOp::Dup2X2),
            opcode::SWAP => Inst::Stack(StackOp::Swap),

            opcode::IADD..=opcode::DNEG => {
                let offset = opcode - opcode::IADD;
                let kind = [NumKind::Int, NumKind::Long, NumKind::Float, NumKind::Double]
                    [usize::from(offset % 4)];
                let op = [
                    ArithOp::Add,
                    ArithOp::Sub,
                    ArithOp::Mul,
                    ArithOp::Div,
                    ArithOp::Rem,
                    ArithOp::Neg,
                ][usize::from(offset / 4)];
                Inst::Arith(kind, op)
            }
            opcode::ISHL..=opcode::LXOR => {
                let offset = opcode - opcode::ISHL;
                let kind = if offset % 2 == 0 {
                    NumKind::Int
                } else {
                    NumKind::Long
                };
                let op = [
                    ArithOp::Shl,
                    ArithOp::Shr,
                    ArithOp::UShr,
                    ArithOp::And,
                    ArithOp::Or,
                    ArithOp::Xor,
                ][usize::from(offset / 2)];
                Inst::Arith(kind, op)
            }
            opcode::IINC => Inst::IInc {
                index: u16::from(self.u8()?),
                delta: i16::from(self.i8()?),
            },
            opcode::I2L..=opcode::I2S => Inst::Convert(
                [
                    Conversion::I2L,
                    Conversion::I2F,
                    Conversion::I2D,
                    Conversion::L2I,
                    Conversion::L2F,
                    Conversion::L2D,
                    Conversion::F2I,
                    Conversion::F2L,
                    Conversion::F2D,
                    Conversion::D2I,
                    Conversion::D2L,
                    Conversion::D2F,
                    Conversion::I2B,
                    Conversion::I2C,
                    Conversion::I2S,
                ][usize::from(opcode - opcode::I2L)],
            ),
            opcode::LCMP => Inst::Compare(CompareOp::LCmp),
            opcode::FCMPL => Inst::Compare(CompareOp::FCmpL),
            opcode::FCMPG => Inst::Compare(CompareOp::FCmpG),
            opcode::DCMPL => Inst::Compare(CompareOp::DCmpL),
            opcode::DCMPG => Inst::Compare(CompareOp::DCmpG),

            opcode::IFEQ..=opcode::IFLE => {
                Inst::If(condition(opcode - opcode::IFEQ), self.target16()?)
            }
            opcode::IF_ICMPEQ..=opcode::IF_ICMPLE => {
                Inst::IfICmp(condition(opcode - opcode::IF_ICMPEQ), self.target16()?)
            }
            opcode::IF_ACMPEQ | opcode::IF_ACMPNE => Inst::IfACmp {
                equal: opcode == opcode::IF_ACMPEQ,
                target: self.target16()?,
            },
            opcode::GOTO => Inst::Goto(self.target16()?),
            opcode::GOTO_W => Inst::Goto(self.target32()?),
            opcode::JSR => {
                self.i16()?;
                Inst::Unsupported("jsr")
            }
            opcode::JSR_W => {
                self.i32()?;
                Inst::Unsupported("jsr_w")
            }
            opcode::RET => {
                self.u8()?;
                Inst::Unsupported("ret")
            }
            opcode::TABLESWITCH => {
                self.align()?;
                let default = self.target32()?;
                let low = self.i32()?;
                let high = self.i32()?;
                if low > high {
                    return Err(InstructionParseError::BadSwitch { idx });
                }
                let count = i64::from(high) - i64::from(low) + 1;
                // Each entry takes four bytes, so a count that can't fit in the code is bogus
                if count * 4 > (self.code.len() - self.pos) as i64 {
                    return Err(InstructionParseError::Truncated { idx });
                }
                let targets = (0..count)
                    .map(|_| self.target32())
                    .collect::<Result<Vec<_>, _>>()?;
                Inst::TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            opcode::LOOKUPSWITCH => {
                self.align()?;
                let default = self.target32()?;
                let npairs = self.i32()?;
                if npairs < 0 {
                    return Err(InstructionParseError::BadSwitch { idx });
                }
                if i64::from(npairs) * 8 > (self.code.len() - self.pos) as i64 {
                    return Err(InstructionParseError::Truncated { idx });
                }
                let mut pairs: Vec<(i32, InstructionIndex)> = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = self.i32()?;
                    let target = self.target32()?;
                    // Keys must be sorted in increasing order
                    if pairs.last().map_or(false, |(prev, _)| *prev >= key) {
                        return Err(InstructionParseError::BadSwitch { idx });
                    }
                    pairs.push((key, target));
                }
                Inst::LookupSwitch { default, pairs }
            }
            opcode::IRETURN => Inst::Return(Some(V::Int)),
            opcode::LRETURN => Inst::Return(Some(V::Long)),
            opcode::FRETURN => Inst::Return(Some(V::Float)),
            opcode::DRETURN => Inst::Return(Some(V::Double)),
            opcode::ARETURN => Inst::Return(Some(V::Reference)),
            opcode::RETURN => Inst::Return(None),

            opcode::GETSTATIC => Inst::Field(FieldAccess::GetStatic, self.index()?),
            opcode::PUTSTATIC => Inst::Field(FieldAccess::PutStatic, self.index()?),
            opcode::GETFIELD => Inst::Field(FieldAccess::GetField, self.index()?),
            opcode::PUTFIELD => Inst::Field(FieldAccess::PutField, self.index()?),
            opcode::INVOKEVIRTUAL => Inst::Invoke(InvokeKind::Virtual, self.index()?),
            opcode::INVOKESPECIAL => Inst::Invoke(InvokeKind::Special, self.index()?),
            opcode::INVOKESTATIC => Inst::Invoke(InvokeKind::Static, self.index()?),
            opcode::INVOKEINTERFACE => {
                let index = self.index()?;
                let count = self.u8()?;
                // The trailing byte must be zero
                self.u8()?;
                if count == 0 {
                    return Err(InstructionParseError::ZeroInvokeInterfaceCount { idx });
                }
                Inst::Invoke(InvokeKind::Interface, index)
            }
            opcode::INVOKEDYNAMIC => {
                self.index()?;
                self.u16()?;
                Inst::Unsupported("invokedynamic")
            }
            opcode::NEW => Inst::New(self.index()?),
            opcode::NEWARRAY => {
                let atype = self.u8()?;
                Inst::NewArray(primitive_array_component(atype).ok_or(
                    InstructionParseError::BadNewArrayType { idx, atype },
                )?)
            }
            opcode::ANEWARRAY => Inst::ANewArray(self.index()?),
            opcode::ARRAYLENGTH => Inst::ArrayLength,
            opcode::ATHROW => Inst::AThrow,
            opcode::CHECKCAST => Inst::CheckCast(self.index()?),
            opcode::INSTANCEOF => Inst::InstanceOf(self.index()?),
            opcode::MONITORENTER => Inst::MonitorEnter,
            opcode::MONITOREXIT => Inst::MonitorExit,
            opcode::WIDE => self.wide()?,
            opcode::MULTIANEWARRAY => {
                self.index()?;
                self.u8()?;
                Inst::Unsupported("multianewarray")
            }
            opcode::IFNULL | opcode::IFNONNULL => Inst::IfNull {
                is_null: opcode == opcode::IFNULL,
                target: self.target16()?,
            },
            _ => return Err(InstructionParseError::UnknownOpcode { idx, opcode }),
        })
    }

    fn wide(&mut self) -> Result<Inst, InstructionParseError> {
        use self::ValueKind as V;

        let idx = InstructionIndex(self.start);
        let opcode = self.u8()?;
        let kind = match opcode {
            opcode::ILOAD | opcode::ISTORE => V::Int,
            opcode::LLOAD | opcode::LSTORE => V::Long,
            opcode::FLOAD | opcode::FSTORE => V::Float,
            opcode::DLOAD | opcode::DSTORE => V::Double,
            opcode::ALOAD | opcode::ASTORE => V::Reference,
            opcode::IINC => {
                let index = self.u16()?;
                let delta = self.i16()?;
                return Ok(Inst::IInc { index, delta });
            }
            opcode::RET => {
                self.u16()?;
                return Ok(Inst::Unsupported("ret"));
            }
            _ => return Err(InstructionParseError::BadWide { idx, opcode }),
        };
        let index = self.u16()?;
        if (opcode::ILOAD..=opcode::ALOAD).contains(&opcode) {
            Ok(Inst::Load(kind, index))
        } else {
            Ok(Inst::Store(kind, index))
        }
    }
}

fn condition(offset: u8) -> Condition {
    match offset {
        0 => Condition::Eq,
        1 => Condition::Ne,
        2 => Condition::Lt,
        3 => Condition::Ge,
        4 => Condition::Gt,
        _ => Condition::Le,
    }
}

/// The component type for a `newarray` atype
#[must_use]
pub fn primitive_array_component(atype: u8) -> Option<FieldType> {
    use basalt_classfile::opcode::array_type;
    Some(match atype {
        array_type::BOOLEAN => FieldType::Boolean,
        array_type::CHAR => FieldType::Char,
        array_type::FLOAT => FieldType::Float,
        array_type::DOUBLE => FieldType::Double,
        array_type::BYTE => FieldType::Byte,
        array_type::SHORT => FieldType::Short,
        array_type::INT => FieldType::Int,
        array_type::LONG => FieldType::Long,
        _ => return None,
    })
}
