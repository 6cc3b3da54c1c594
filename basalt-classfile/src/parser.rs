use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    access_flags::{
        is_legal_class_flags, is_legal_field_flags, is_legal_method_flags, ClassAccessFlags,
        FieldAccessFlags, MethodAccessFlags,
    },
    class_file::{
        AttributeInfo, ClassFile, CodeAttribute, ExceptionTableEntry, FieldInfo, MethodInfo,
    },
    constant_pool::{ConstantPool, ConstantPoolEntry, ConstantPoolIndex, ConstantTag, MemberRef},
    descriptor::{FieldType, MethodDescriptor},
    error::{ClassFormatError, ClassFormatErrorKind},
    names,
    version::Version,
    MAGIC,
};

/// A cursor over big-endian class file data.
/// `base` is the offset of `data` within the whole class file, so that errors from attribute
/// bodies still report an absolute offset.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}
impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], base: usize) -> ByteReader<'a> {
        ByteReader { data, pos: 0, base }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn err(&self, kind: ClassFormatErrorKind) -> ClassFormatError {
        ClassFormatError::at(self.offset(), kind)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        if self.remaining() < n {
            return Err(self.err(ClassFormatErrorKind::Truncated {
                needed: n - self.remaining(),
            }));
        }

        let data = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(data)
    }

    fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFormatError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32, ClassFormatError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn index(&mut self) -> Result<ConstantPoolIndex, ClassFormatError> {
        self.u16().map(ConstantPoolIndex)
    }
}

pub(crate) fn parse_class_file(data: &[u8]) -> Result<ClassFile, ClassFormatError> {
    let mut reader = ByteReader::new(data, 0);

    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::at(0, ClassFormatErrorKind::BadMagic(magic)));
    }

    let version_offset = reader.offset();
    let minor_version = reader.u16()?;
    let major_version = reader.u16()?;
    let version = Version {
        minor_version,
        major_version,
    };
    if !version.is_supported() {
        return Err(ClassFormatError::at(
            version_offset,
            ClassFormatErrorKind::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            },
        ));
    }

    let constant_pool = parse_constant_pool(&mut reader)?;
    validate_constant_pool(&constant_pool, version)?;

    let flags_offset = reader.offset();
    let access_flags = ClassAccessFlags::from_bits_truncate(reader.u16()?);
    let this_class = reader.index()?;
    let this_name = constant_pool.class_name(this_class)?.to_owned();
    if !names::is_valid_binary_class_name(&this_name) {
        return Err(ClassFormatErrorKind::InvalidName(this_name).into());
    }

    if !is_legal_class_flags(access_flags) {
        return Err(ClassFormatError::at(
            flags_offset,
            ClassFormatErrorKind::IllegalClassFlags {
                name: this_name,
                flags: access_flags.bits(),
            },
        ));
    }

    let super_class = reader.index()?;
    let super_class = if super_class.is_zero() {
        if this_name != "java/lang/Object" {
            return Err(ClassFormatErrorKind::MissingSuperClass(this_name).into());
        }
        None
    } else {
        let super_name = constant_pool.class_name(super_class)?;
        if !names::is_valid_binary_class_name(super_name) {
            return Err(ClassFormatErrorKind::InvalidName(super_name.to_owned()).into());
        }
        if access_flags.contains(ClassAccessFlags::INTERFACE) && super_name != "java/lang/Object"
        {
            return Err(ClassFormatErrorKind::InterfaceSuperClass(this_name).into());
        }
        Some(super_class)
    };

    let interface_count = reader.u16()?;
    let mut interfaces = Vec::with_capacity(usize::from(interface_count));
    for _ in 0..interface_count {
        let index = reader.index()?;
        let name = constant_pool.class_name(index)?;
        if !names::is_valid_binary_class_name(name) {
            return Err(ClassFormatErrorKind::InvalidName(name.to_owned()).into());
        }
        interfaces.push(index);
    }

    let field_count = reader.u16()?;
    let mut fields = Vec::with_capacity(usize::from(field_count));
    let mut seen_fields = HashSet::new();
    for _ in 0..field_count {
        let field = parse_field(&mut reader, &constant_pool, access_flags)?;
        if !seen_fields.insert((field.name.clone(), field.descriptor.clone())) {
            return Err(ClassFormatErrorKind::DuplicateField {
                name: field.name,
                descriptor: field.descriptor,
            }
            .into());
        }
        fields.push(field);
    }

    let method_count = reader.u16()?;
    let mut methods = Vec::with_capacity(usize::from(method_count));
    let mut seen_methods = HashSet::new();
    for _ in 0..method_count {
        let method = parse_method(&mut reader, &constant_pool, access_flags, version)?;
        if !seen_methods.insert((method.name.clone(), method.descriptor.clone())) {
            return Err(ClassFormatErrorKind::DuplicateMethod {
                name: method.name,
                descriptor: method.descriptor,
            }
            .into());
        }
        methods.push(method);
    }

    let attributes = parse_attributes(&mut reader, &constant_pool)?
        .into_iter()
        .map(|(_, attr)| attr)
        .collect();

    if reader.remaining() != 0 {
        return Err(reader.err(ClassFormatErrorKind::TrailingBytes(reader.remaining())));
    }

    tracing::trace!(
        "Parsed class {} ({} fields, {} methods)",
        this_name,
        fields.len(),
        methods.len()
    );

    Ok(ClassFile {
        version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn parse_constant_pool(reader: &mut ByteReader) -> Result<ConstantPool, ClassFormatError> {
    let count = reader.u16()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    entries.push(ConstantPoolEntry::Unusable);

    let mut index: u16 = 1;
    while index < count {
        let tag_offset = reader.offset();
        let raw_tag = reader.u8()?;
        let tag = ConstantTag::from_u8(raw_tag).ok_or_else(|| {
            ClassFormatError::at(
                tag_offset,
                ClassFormatErrorKind::BadConstantTag {
                    index,
                    tag: raw_tag,
                },
            )
        })?;

        let entry = match tag {
            ConstantTag::Utf8 => {
                let length = reader.u16()?;
                let data_offset = reader.offset();
                let data = reader.take(usize::from(length))?;
                let text = cesu8::from_java_cesu8(data).map_err(|_| {
                    ClassFormatError::at(data_offset, ClassFormatErrorKind::BadUtf8 { index })
                })?;
                ConstantPoolEntry::Utf8(text.into_owned())
            }
            ConstantTag::Integer => ConstantPoolEntry::Integer(reader.u32()? as i32),
            ConstantTag::Float => ConstantPoolEntry::Float(f32::from_bits(reader.u32()?)),
            ConstantTag::Long => {
                let high = u64::from(reader.u32()?);
                let low = u64::from(reader.u32()?);
                ConstantPoolEntry::Long(((high << 32) | low) as i64)
            }
            ConstantTag::Double => {
                let high = u64::from(reader.u32()?);
                let low = u64::from(reader.u32()?);
                ConstantPoolEntry::Double(f64::from_bits((high << 32) | low))
            }
            ConstantTag::Class => ConstantPoolEntry::Class {
                name_index: reader.index()?,
            },
            ConstantTag::String => ConstantPoolEntry::String {
                string_index: reader.index()?,
            },
            ConstantTag::FieldRef | ConstantTag::MethodRef | ConstantTag::InterfaceMethodRef => {
                let member = MemberRef {
                    class_index: reader.index()?,
                    name_and_type_index: reader.index()?,
                };
                match tag {
                    ConstantTag::FieldRef => ConstantPoolEntry::FieldRef(member),
                    ConstantTag::MethodRef => ConstantPoolEntry::MethodRef(member),
                    _ => ConstantPoolEntry::InterfaceMethodRef(member),
                }
            }
            ConstantTag::NameAndType => ConstantPoolEntry::NameAndType {
                name_index: reader.index()?,
                descriptor_index: reader.index()?,
            },
            ConstantTag::MethodHandle => ConstantPoolEntry::MethodHandle {
                reference_kind: reader.u8()?,
                reference_index: reader.index()?,
            },
            ConstantTag::MethodType => ConstantPoolEntry::MethodType {
                descriptor_index: reader.index()?,
            },
            ConstantTag::Dynamic => ConstantPoolEntry::Dynamic {
                bootstrap_method_attr_index: reader.u16()?,
                name_and_type_index: reader.index()?,
            },
            ConstantTag::InvokeDynamic => ConstantPoolEntry::InvokeDynamic {
                bootstrap_method_attr_index: reader.u16()?,
                name_and_type_index: reader.index()?,
            },
            ConstantTag::Module => ConstantPoolEntry::Module {
                name_index: reader.index()?,
            },
            ConstantTag::Package => ConstantPoolEntry::Package {
                name_index: reader.index()?,
            },
            ConstantTag::Unusable => unreachable!("from_u8 never produces Unusable"),
        };

        entries.push(entry);
        if tag.is_wide() {
            if index + 1 >= count {
                return Err(ClassFormatError::at(
                    tag_offset,
                    ClassFormatErrorKind::WideConstantOverflow { index },
                ));
            }
            entries.push(ConstantPoolEntry::Unusable);
            index += 2;
        } else {
            index += 1;
        }
    }

    Ok(ConstantPool::from_entries(entries))
}

/// Check that every reference between constant pool entries points at an entry of the right kind
fn validate_constant_pool(pool: &ConstantPool, version: Version) -> Result<(), ClassFormatError> {
    for (index, entry) in pool.iter() {
        match entry {
            ConstantPoolEntry::Class { name_index } => {
                pool.expect_tag(*name_index, ConstantTag::Utf8)?;
            }
            ConstantPoolEntry::String { string_index } => {
                pool.expect_tag(*string_index, ConstantTag::Utf8)?;
            }
            ConstantPoolEntry::FieldRef(member)
            | ConstantPoolEntry::MethodRef(member)
            | ConstantPoolEntry::InterfaceMethodRef(member) => {
                pool.expect_tag(member.class_index, ConstantTag::Class)?;
                pool.expect_tag(member.name_and_type_index, ConstantTag::NameAndType)?;
            }
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => {
                pool.expect_tag(*name_index, ConstantTag::Utf8)?;
                pool.expect_tag(*descriptor_index, ConstantTag::Utf8)?;
            }
            ConstantPoolEntry::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                let found = pool.tag(*reference_index)?;
                let valid = match reference_kind {
                    1..=4 => found == ConstantTag::FieldRef,
                    5 | 8 => found == ConstantTag::MethodRef,
                    6 | 7 => {
                        found == ConstantTag::MethodRef
                            || (version.major_version >= 52
                                && found == ConstantTag::InterfaceMethodRef)
                    }
                    9 => found == ConstantTag::InterfaceMethodRef,
                    _ => {
                        return Err(ClassFormatErrorKind::BadMethodHandleKind {
                            index: index.0,
                            kind: *reference_kind,
                        }
                        .into())
                    }
                };
                if !valid {
                    return Err(ClassFormatErrorKind::BadMethodHandleKind {
                        index: index.0,
                        kind: *reference_kind,
                    }
                    .into());
                }
            }
            ConstantPoolEntry::MethodType { descriptor_index } => {
                pool.expect_tag(*descriptor_index, ConstantTag::Utf8)?;
            }
            ConstantPoolEntry::Dynamic {
                name_and_type_index,
                ..
            }
            | ConstantPoolEntry::InvokeDynamic {
                name_and_type_index,
                ..
            } => {
                pool.expect_tag(*name_and_type_index, ConstantTag::NameAndType)?;
            }
            ConstantPoolEntry::Module { name_index } | ConstantPoolEntry::Package { name_index } => {
                pool.expect_tag(*name_index, ConstantTag::Utf8)?;
            }
            ConstantPoolEntry::Unusable
            | ConstantPoolEntry::Utf8(_)
            | ConstantPoolEntry::Integer(_)
            | ConstantPoolEntry::Float(_)
            | ConstantPoolEntry::Long(_)
            | ConstantPoolEntry::Double(_) => {}
        }
    }

    Ok(())
}

/// Parse the attribute table, returning each attribute along with the offset its body starts at
fn parse_attributes(
    reader: &mut ByteReader,
    pool: &ConstantPool,
) -> Result<Vec<(usize, AttributeInfo)>, ClassFormatError> {
    let count = reader.u16()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name_index = reader.index()?;
        let name = pool.utf8(name_index)?.to_owned();
        let length = reader.u32()?;
        let body_offset = reader.offset();
        let info = reader.take(length as usize)?.to_vec();
        attributes.push((body_offset, AttributeInfo { name, info }));
    }
    Ok(attributes)
}

fn parse_field(
    reader: &mut ByteReader,
    pool: &ConstantPool,
    class_flags: ClassAccessFlags,
) -> Result<FieldInfo, ClassFormatError> {
    let flags_offset = reader.offset();
    let access_flags = FieldAccessFlags::from_bits_truncate(reader.u16()?);
    let name = pool.utf8(reader.index()?)?.to_owned();
    let descriptor = pool.utf8(reader.index()?)?.to_owned();

    if !names::is_valid_unqualified_name(&name, false) {
        return Err(ClassFormatErrorKind::InvalidName(name).into());
    }

    if !is_legal_field_flags(class_flags, access_flags) {
        return Err(ClassFormatError::at(
            flags_offset,
            ClassFormatErrorKind::IllegalFieldFlags {
                name,
                flags: access_flags.bits(),
            },
        ));
    }

    let field_type = FieldType::parse(&descriptor).map_err(|source| {
        ClassFormatErrorKind::InvalidDescriptor {
            descriptor: descriptor.clone(),
            source,
        }
    })?;

    let attributes = parse_attributes(reader, pool)?
        .into_iter()
        .map(|(_, attr)| attr)
        .collect();

    Ok(FieldInfo {
        access_flags,
        name,
        descriptor,
        field_type,
        attributes,
    })
}

fn parse_method(
    reader: &mut ByteReader,
    pool: &ConstantPool,
    class_flags: ClassAccessFlags,
    version: Version,
) -> Result<MethodInfo, ClassFormatError> {
    let flags_offset = reader.offset();
    let access_flags = MethodAccessFlags::from_bits_truncate(reader.u16()?);
    let name = pool.utf8(reader.index()?)?.to_owned();
    let descriptor = pool.utf8(reader.index()?)?.to_owned();

    if !names::is_valid_unqualified_name(&name, true) {
        return Err(ClassFormatErrorKind::InvalidName(name).into());
    }

    let parsed_descriptor = MethodDescriptor::parse(&descriptor).map_err(|source| {
        ClassFormatErrorKind::InvalidDescriptor {
            descriptor: descriptor.clone(),
            source,
        }
    })?;

    let is_initializer = name == "<init>" || name == "<clinit>";
    if (is_initializer && parsed_descriptor.return_type.is_some())
        || (name == "<clinit>" && !parsed_descriptor.parameters.is_empty())
    {
        return Err(ClassFormatErrorKind::IllegalSignature { name, descriptor }.into());
    }

    if !is_legal_method_flags(class_flags, version, &name, access_flags) {
        return Err(ClassFormatError::at(
            flags_offset,
            ClassFormatErrorKind::IllegalMethodFlags {
                name,
                descriptor,
                flags: access_flags.bits(),
            },
        ));
    }

    let mut code = None;
    let mut attributes = Vec::new();
    for (body_offset, attr) in parse_attributes(reader, pool)? {
        if attr.name == "Code" {
            if code.is_some() {
                return Err(ClassFormatErrorKind::MultipleCode { name, descriptor }.into());
            }
            code = Some(parse_code_attribute(&attr.info, body_offset, pool)?);
        } else {
            attributes.push(attr);
        }
    }

    let needs_code = !access_flags.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE);
    match (&code, needs_code) {
        (None, true) => return Err(ClassFormatErrorKind::MissingCode { name, descriptor }.into()),
        (Some(_), false) => {
            return Err(ClassFormatErrorKind::UnexpectedCode { name, descriptor }.into())
        }
        (Some(code), true) => {
            let this_slot = usize::from(!access_flags.contains(MethodAccessFlags::STATIC));
            if parsed_descriptor.parameter_slots() + this_slot > usize::from(code.max_locals) {
                return Err(ClassFormatErrorKind::MalformedAttribute {
                    attribute: "Code",
                    reason: "arguments can't fit into locals",
                }
                .into());
            }
        }
        (None, false) => {}
    }

    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        parsed_descriptor,
        code,
        attributes,
    })
}

fn parse_code_attribute(
    data: &[u8],
    base: usize,
    pool: &ConstantPool,
) -> Result<CodeAttribute, ClassFormatError> {
    let mut reader = ByteReader::new(data, base);
    let max_stack = reader.u16()?;
    let max_locals = reader.u16()?;

    let code_length = reader.u32()? as usize;
    if code_length == 0 || code_length > usize::from(u16::MAX) {
        return Err(reader.err(ClassFormatErrorKind::MalformedAttribute {
            attribute: "Code",
            reason: "code length must be between 1 and 65535",
        }));
    }
    let code = reader.take(code_length)?.to_vec();

    let exception_count = reader.u16()?;
    let mut exception_table = Vec::with_capacity(usize::from(exception_count));
    for _ in 0..exception_count {
        let start_pc = reader.u16()?;
        let end_pc = reader.u16()?;
        let handler_pc = reader.u16()?;
        let catch_type = reader.index()?;
        let catch_type = if catch_type.is_zero() {
            None
        } else {
            pool.expect_tag(catch_type, ConstantTag::Class)?;
            Some(catch_type)
        };
        exception_table.push(ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
    }

    let attributes = parse_attributes(&mut reader, pool)?
        .into_iter()
        .map(|(_, attr)| attr)
        .collect();

    if reader.remaining() != 0 {
        return Err(reader.err(ClassFormatErrorKind::MalformedAttribute {
            attribute: "Code",
            reason: "attribute length does not match its contents",
        }));
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}
