//! Assembling class files from scratch.
//!
//! This is used to synthesize the bootstrap classes that the runtime provides itself, and to write
//! class files in tests without needing a java compiler around.

use byteorder::WriteBytesExt;
use indexmap::IndexMap;

use crate::{
    access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    binary_format::Serialize,
    constant_pool::ConstantTag,
    version::Version,
    MAGIC,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Utf8(String),
    Integer(i32),
    /// Floats are keyed by their bits so that they can be hashed
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
}
impl EntryKey {
    fn tag(&self) -> ConstantTag {
        match self {
            EntryKey::Utf8(_) => ConstantTag::Utf8,
            EntryKey::Integer(_) => ConstantTag::Integer,
            EntryKey::Float(_) => ConstantTag::Float,
            EntryKey::Long(_) => ConstantTag::Long,
            EntryKey::Double(_) => ConstantTag::Double,
            EntryKey::Class(_) => ConstantTag::Class,
            EntryKey::String(_) => ConstantTag::String,
            EntryKey::FieldRef(_, _) => ConstantTag::FieldRef,
            EntryKey::MethodRef(_, _) => ConstantTag::MethodRef,
            EntryKey::InterfaceMethodRef(_, _) => ConstantTag::InterfaceMethodRef,
            EntryKey::NameAndType(_, _) => ConstantTag::NameAndType,
        }
    }
}
impl Serialize for EntryKey {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.tag().as_u8().serialize(writer)?;
        match self {
            EntryKey::Utf8(text) => {
                let data = cesu8::to_java_cesu8(text);
                (data.len() as u16).serialize(writer)?;
                writer.write_all(&data)
            }
            EntryKey::Integer(value) => value.serialize(writer),
            EntryKey::Float(bits) => bits.serialize(writer),
            EntryKey::Long(value) => value.serialize(writer),
            EntryKey::Double(bits) => {
                ((bits >> 32) as u32).serialize(writer)?;
                (*bits as u32).serialize(writer)
            }
            EntryKey::Class(index) | EntryKey::String(index) => index.serialize(writer),
            EntryKey::FieldRef(a, b)
            | EntryKey::MethodRef(a, b)
            | EntryKey::InterfaceMethodRef(a, b)
            | EntryKey::NameAndType(a, b) => {
                a.serialize(writer)?;
                b.serialize(writer)
            }
        }
    }
}

/// Deduplicating constant pool writer
#[derive(Debug, Clone)]
pub struct ConstantPoolBuilder {
    entries: IndexMap<EntryKey, u16>,
    next_index: u16,
}
impl Default for ConstantPoolBuilder {
    fn default() -> Self {
        ConstantPoolBuilder {
            entries: IndexMap::new(),
            next_index: 1,
        }
    }
}
impl ConstantPoolBuilder {
    fn insert(&mut self, key: EntryKey) -> u16 {
        if let Some(index) = self.entries.get(&key) {
            return *index;
        }

        let index = self.next_index;
        self.next_index += if key.tag().is_wide() { 2 } else { 1 };
        self.entries.insert(key, index);
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.insert(EntryKey::Utf8(text.to_owned()))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.insert(EntryKey::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.insert(EntryKey::Float(value.to_bits()))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.insert(EntryKey::Long(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.insert(EntryKey::Double(value.to_bits()))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.insert(EntryKey::Class(name))
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let text = self.utf8(text);
        self.insert(EntryKey::String(text))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.insert(EntryKey::NameAndType(name, descriptor))
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        self.insert(EntryKey::FieldRef(class, nat))
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        self.insert(EntryKey::MethodRef(class, nat))
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        self.insert(EntryKey::InterfaceMethodRef(class, nat))
    }
}
impl Serialize for ConstantPoolBuilder {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.next_index.serialize(writer)?;
        for key in self.entries.keys() {
            key.serialize(writer)?;
        }
        Ok(())
    }
}

/// The position of a branch whose target is filled in later by [`Code::patch`]
#[derive(Debug, Clone, Copy)]
pub struct BranchPatch {
    opcode_pos: usize,
    operand_pos: usize,
    wide: bool,
}

/// The positions of a `tableswitch`/`lookupswitch` whose targets are filled in later
#[derive(Debug, Clone)]
pub struct SwitchPatch {
    opcode_pos: usize,
    default_pos: usize,
    case_pos: Vec<usize>,
}

/// The body of a `Code` attribute
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    exception_table: Vec<(u16, u16, u16, u16)>,
}
impl Code {
    #[must_use]
    pub fn new(max_stack: u16, max_locals: u16) -> Code {
        Code {
            max_stack,
            max_locals,
            bytes: Vec::new(),
            exception_table: Vec::new(),
        }
    }

    /// The offset the next instruction will be written at
    #[must_use]
    pub fn position(&self) -> u16 {
        self.bytes.len() as u16
    }

    pub fn op(&mut self, opcode: u8) -> &mut Code {
        self.bytes.push(opcode);
        self
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Code {
        self.bytes.extend_from_slice(&[opcode, operand]);
        self
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Code {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&operand.to_be_bytes());
        self
    }

    /// Raw bytes, for instructions with unusual encodings
    pub fn raw(&mut self, data: &[u8]) -> &mut Code {
        self.bytes.extend_from_slice(data);
        self
    }

    /// A branch to a known target
    pub fn branch_to(&mut self, opcode: u8, target: u16) -> &mut Code {
        let offset = i32::from(target) - i32::from(self.position());
        self.op_u16(opcode, offset as i16 as u16)
    }

    /// A branch whose target will be the position at the time [`Code::patch`] is called
    pub fn branch(&mut self, opcode: u8) -> BranchPatch {
        let opcode_pos = self.bytes.len();
        self.op_u16(opcode, 0);
        BranchPatch {
            opcode_pos,
            operand_pos: opcode_pos + 1,
            wide: false,
        }
    }

    /// `goto_w`, which has a 4 byte offset
    pub fn branch_wide(&mut self, opcode: u8) -> BranchPatch {
        let opcode_pos = self.bytes.len();
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&[0; 4]);
        BranchPatch {
            opcode_pos,
            operand_pos: opcode_pos + 1,
            wide: true,
        }
    }

    /// Point the branch at the current position
    pub fn patch(&mut self, patch: BranchPatch) {
        let offset = self.bytes.len() as i32 - patch.opcode_pos as i32;
        if patch.wide {
            self.bytes[patch.operand_pos..patch.operand_pos + 4]
                .copy_from_slice(&offset.to_be_bytes());
        } else {
            self.bytes[patch.operand_pos..patch.operand_pos + 2]
                .copy_from_slice(&(offset as i16).to_be_bytes());
        }
    }

    fn switch_padding(&mut self) {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    /// A `tableswitch` covering `low..=high`
    pub fn tableswitch(&mut self, low: i32, high: i32) -> SwitchPatch {
        let opcode_pos = self.bytes.len();
        self.bytes.push(crate::opcode::TABLESWITCH);
        self.switch_padding();
        let default_pos = self.bytes.len();
        self.bytes.extend_from_slice(&[0; 4]);
        self.bytes.extend_from_slice(&low.to_be_bytes());
        self.bytes.extend_from_slice(&high.to_be_bytes());
        let mut case_pos = Vec::new();
        for _ in low..=high {
            case_pos.push(self.bytes.len());
            self.bytes.extend_from_slice(&[0; 4]);
        }
        SwitchPatch {
            opcode_pos,
            default_pos,
            case_pos,
        }
    }

    /// A `lookupswitch` over the given keys, which must be sorted
    pub fn lookupswitch(&mut self, keys: &[i32]) -> SwitchPatch {
        let opcode_pos = self.bytes.len();
        self.bytes.push(crate::opcode::LOOKUPSWITCH);
        self.switch_padding();
        let default_pos = self.bytes.len();
        self.bytes.extend_from_slice(&[0; 4]);
        self.bytes
            .extend_from_slice(&(keys.len() as i32).to_be_bytes());
        let mut case_pos = Vec::new();
        for key in keys {
            self.bytes.extend_from_slice(&key.to_be_bytes());
            case_pos.push(self.bytes.len());
            self.bytes.extend_from_slice(&[0; 4]);
        }
        SwitchPatch {
            opcode_pos,
            default_pos,
            case_pos,
        }
    }

    fn write_switch_offset(&mut self, opcode_pos: usize, at: usize) {
        let offset = self.bytes.len() as i32 - opcode_pos as i32;
        self.bytes[at..at + 4].copy_from_slice(&offset.to_be_bytes());
    }

    /// Point the default of the switch at the current position
    pub fn patch_switch_default(&mut self, patch: &SwitchPatch) {
        self.write_switch_offset(patch.opcode_pos, patch.default_pos);
    }

    /// Point the case with the given ordinal at the current position
    pub fn patch_switch_case(&mut self, patch: &SwitchPatch, case: usize) {
        self.write_switch_offset(patch.opcode_pos, patch.case_pos[case]);
    }

    /// Add an exception handler, `catch_type` being a class constant or zero
    pub fn handler(&mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) {
        self.exception_table
            .push((start_pc, end_pc, handler_pc, catch_type));
    }
}

#[derive(Debug, Clone)]
struct MemberSpec<F> {
    flags: F,
    name: u16,
    descriptor: u16,
    code: Option<Code>,
}

/// Builder for a class file
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    version: Version,
    flags: ClassAccessFlags,
    this_class: u16,
    super_class: Option<u16>,
    interfaces: Vec<u16>,
    pool: ConstantPoolBuilder,
    fields: Vec<MemberSpec<FieldAccessFlags>>,
    methods: Vec<MemberSpec<MethodAccessFlags>>,
    code_name: u16,
}
impl ClassBuilder {
    /// A public class extending `java/lang/Object`
    #[must_use]
    pub fn new(name: &str) -> ClassBuilder {
        let mut pool = ConstantPoolBuilder::default();
        let this_class = pool.class(name);
        let super_class = Some(pool.class("java/lang/Object"));
        let code_name = pool.utf8("Code");
        ClassBuilder {
            version: Version::JAVA8,
            flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            pool,
            fields: Vec::new(),
            methods: Vec::new(),
            code_name,
        }
    }

    /// A public interface
    #[must_use]
    pub fn interface(name: &str) -> ClassBuilder {
        let mut builder = ClassBuilder::new(name);
        builder.flags =
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        builder
    }

    #[must_use]
    pub fn with_super(mut self, super_class: Option<&str>) -> ClassBuilder {
        self.super_class = super_class.map(|name| self.pool.class(name));
        self
    }

    pub fn flags(&mut self, flags: ClassAccessFlags) -> &mut ClassBuilder {
        self.flags = flags;
        self
    }

    pub fn version(&mut self, version: Version) -> &mut ClassBuilder {
        self.version = version;
        self
    }

    pub fn implements(&mut self, interface: &str) -> &mut ClassBuilder {
        let index = self.pool.class(interface);
        self.interfaces.push(index);
        self
    }

    /// Access the constant pool, for adding the constants that code refers to
    pub fn pool(&mut self) -> &mut ConstantPoolBuilder {
        &mut self.pool
    }

    pub fn field(
        &mut self,
        flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> &mut ClassBuilder {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.fields.push(MemberSpec {
            flags,
            name,
            descriptor,
            code: None,
        });
        self
    }

    pub fn method(
        &mut self,
        flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<Code>,
    ) -> &mut ClassBuilder {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.methods.push(MemberSpec {
            flags,
            name,
            descriptor,
            code,
        });
        self
    }

    fn write<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.pool.serialize(writer)?;
        self.flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.unwrap_or(0).serialize(writer)?;
        self.interfaces.serialize(writer)?;

        (self.fields.len() as u16).serialize(writer)?;
        for field in &self.fields {
            field.flags.serialize(writer)?;
            field.name.serialize(writer)?;
            field.descriptor.serialize(writer)?;
            // No attributes
            0u16.serialize(writer)?;
        }

        (self.methods.len() as u16).serialize(writer)?;
        for method in &self.methods {
            method.flags.serialize(writer)?;
            method.name.serialize(writer)?;
            method.descriptor.serialize(writer)?;
            if let Some(code) = &method.code {
                1u16.serialize(writer)?;
                self.code_name.serialize(writer)?;
                let length = 2 + 2 + 4 + code.bytes.len() + 2 + code.exception_table.len() * 8 + 2;
                (length as u32).serialize(writer)?;
                code.max_stack.serialize(writer)?;
                code.max_locals.serialize(writer)?;
                (code.bytes.len() as u32).serialize(writer)?;
                writer.write_all(&code.bytes)?;
                (code.exception_table.len() as u16).serialize(writer)?;
                for (start, end, handler, catch_type) in &code.exception_table {
                    start.serialize(writer)?;
                    end.serialize(writer)?;
                    handler.serialize(writer)?;
                    catch_type.serialize(writer)?;
                }
                // Code attribute's own attributes
                0u16.serialize(writer)?;
            } else {
                0u16.serialize(writer)?;
            }
        }

        // Class attributes
        0u16.serialize(writer)
    }

    /// Serialize the class file
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut data = Vec::new();
        // Writing into a Vec never fails
        let _ = self.write(&mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use crate::{opcode, parse, ConstantPoolEntry, ConstantPoolIndex, MethodAccessFlags};

    use super::{ClassBuilder, Code};

    #[test]
    fn test_pool_dedup() {
        let mut builder = ClassBuilder::new("Pool");
        let a = builder.pool().method_ref("Pool", "run", "()V");
        let b = builder.pool().method_ref("Pool", "run", "()V");
        assert_eq!(a, b);

        let long = builder.pool().long(5);
        let after = builder.pool().integer(1);
        assert_eq!(after, long + 2);

        let class = parse(&builder.build()).unwrap();
        assert_eq!(
            class.constant_pool.get(ConstantPoolIndex(long)).unwrap(),
            &ConstantPoolEntry::Long(5)
        );
        let method = class.constant_pool.method_ref(ConstantPoolIndex(a)).unwrap();
        assert_eq!(method.name, "run");
    }

    #[test]
    fn test_unicode_roundtrip() {
        let mut builder = ClassBuilder::new("Text");
        let index = builder.pool().string("nul\0 and \u{1F600}");
        let class = parse(&builder.build()).unwrap();
        match class.constant_pool.get(ConstantPoolIndex(index)).unwrap() {
            ConstantPoolEntry::String { string_index } => {
                assert_eq!(
                    class.constant_pool.utf8(*string_index).unwrap(),
                    "nul\0 and \u{1F600}"
                );
            }
            entry => panic!("unexpected entry {:?}", entry),
        }
    }

    #[test]
    fn test_branch_patch() {
        let mut code = Code::new(1, 1);
        code.op(opcode::ICONST_0);
        let jump = code.branch(opcode::IFEQ);
        code.op(opcode::NOP);
        code.patch(jump);
        code.op(opcode::RETURN);
        // ifeq at 1, target at 5
        assert_eq!(&code.bytes[1..4], &[opcode::IFEQ, 0, 4]);

        let mut builder = ClassBuilder::new("Branch");
        builder.method(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "run",
            "()V",
            Some(code),
        );
        assert!(parse(&builder.build()).is_ok());
    }
}
