use basalt_base::{
    code::{
        op::{ArithOp, ArrayKind, FieldAccess, Inst, InvokeKind, NumKind, StackOp, ValueKind},
        InstructionIndex,
    },
    STRING_NAME, THROWABLE_NAME,
};
use basalt_classfile::{ConstantPoolEntry, ConstantPoolIndex, FieldType, MethodDescriptor};

use crate::{frame::Frame, types::FrameType, MethodVerifier, VerifyErrorKind};

fn num_type(kind: NumKind) -> FrameType {
    match kind {
        NumKind::Int => FrameType::Int,
        NumKind::Long => FrameType::Long,
        NumKind::Float => FrameType::Float,
        NumKind::Double => FrameType::Double,
    }
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Int => "int",
        ValueKind::Long => "long",
        ValueKind::Float => "float",
        ValueKind::Double => "double",
        ValueKind::Reference => "reference",
    }
}

/// Whether `value` can be moved by a load or store of `kind`. Uninitialized references may be
/// moved around freely, just not used.
fn is_movable_as(value: &FrameType, kind: ValueKind) -> bool {
    match kind {
        ValueKind::Reference => value.is_reference(),
        _ => value.matches_primitive(kind),
    }
}

fn push_all(
    frame: &mut Frame,
    inst_name: &'static str,
    max_stack: u16,
    values: impl IntoIterator<Item = FrameType>,
) -> Result<(), VerifyErrorKind> {
    for value in values {
        frame.push(inst_name, max_stack, value)?;
    }
    Ok(())
}

impl<'a> MethodVerifier<'a> {
    /// Apply the effect of `inst` to `frame`
    pub(crate) fn execute(
        &self,
        frame: &mut Frame,
        idx: InstructionIndex,
        inst: &Inst,
    ) -> Result<(), VerifyErrorKind> {
        let name = inst.name();
        let max_stack = self.code.max_stack();

        match inst {
            Inst::Nop | Inst::Goto(_) => {}
            Inst::AConstNull => frame.push(name, max_stack, FrameType::Null)?,
            Inst::IConst(_) => frame.push(name, max_stack, FrameType::Int)?,
            Inst::LConst(_) => frame.push(name, max_stack, FrameType::Long)?,
            Inst::FConst(_) => frame.push(name, max_stack, FrameType::Float)?,
            Inst::DConst(_) => frame.push(name, max_stack, FrameType::Double)?,
            Inst::Ldc(index) => {
                let value = self.loadable_constant(*index, false)?;
                frame.push(name, max_stack, value)?;
            }
            Inst::Ldc2(index) => {
                let value = self.loadable_constant(*index, true)?;
                frame.push(name, max_stack, value)?;
            }
            Inst::Load(kind, index) => {
                let value = frame
                    .locals
                    .get(*index)
                    .cloned()
                    .ok_or(VerifyErrorKind::BadLocalIndex {
                        inst_name: name,
                        index: *index,
                    })?;
                if !is_movable_as(&value, *kind) {
                    return Err(VerifyErrorKind::BadLocalType {
                        inst_name: name,
                        index: *index,
                        expected: kind_name(*kind).to_owned(),
                        got: value,
                    });
                }
                frame.push(name, max_stack, value)?;
            }
            Inst::Store(kind, index) => {
                let value = frame.pop(name)?;
                if !is_movable_as(&value, *kind) {
                    return Err(VerifyErrorKind::ExpectedType {
                        inst_name: name,
                        expected: kind_name(*kind).to_owned(),
                        got: value,
                    });
                }
                frame.locals.set(name, *index, value)?;
            }
            Inst::IInc { index, .. } => match frame.locals.get(*index) {
                Some(FrameType::Int) => {}
                Some(got) => {
                    return Err(VerifyErrorKind::BadLocalType {
                        inst_name: name,
                        index: *index,
                        expected: "int".to_owned(),
                        got: got.clone(),
                    })
                }
                None => {
                    return Err(VerifyErrorKind::BadLocalIndex {
                        inst_name: name,
                        index: *index,
                    })
                }
            },
            Inst::ArrayLoad(kind) => {
                frame.pop_exact(name, &FrameType::Int)?;
                let array = frame.pop_reference(name)?;
                let element = self.array_element(name, &array, *kind)?;
                frame.push(name, max_stack, element)?;
            }
            Inst::ArrayStore(kind) => {
                let value = frame.pop(name)?;
                let element_ok = match kind {
                    // Stores into reference arrays are checked against the element type at runtime
                    ArrayKind::Reference => {
                        if value.is_uninitialized() {
                            return Err(VerifyErrorKind::UninitializedUse {
                                inst_name: name,
                                got: value,
                            });
                        }
                        value.matches_primitive(ValueKind::Reference)
                    }
                    _ => value.matches_primitive(kind.value_kind()),
                };
                if !element_ok {
                    return Err(VerifyErrorKind::ExpectedType {
                        inst_name: name,
                        expected: kind_name(kind.value_kind()).to_owned(),
                        got: value,
                    });
                }
                frame.pop_exact(name, &FrameType::Int)?;
                let array = frame.pop_reference(name)?;
                self.array_element(name, &array, *kind)?;
            }
            Inst::Stack(op) => Self::stack_op(frame, name, max_stack, *op)?,
            Inst::Arith(kind, op) => {
                let typ = num_type(*kind);
                if op.is_shift() {
                    frame.pop_exact(name, &FrameType::Int)?;
                    frame.pop_exact(name, &typ)?;
                } else if *op == ArithOp::Neg {
                    frame.pop_exact(name, &typ)?;
                } else {
                    frame.pop_exact(name, &typ)?;
                    frame.pop_exact(name, &typ)?;
                }
                frame.push(name, max_stack, typ)?;
            }
            Inst::Convert(conversion) => {
                frame.pop_exact(name, &num_type(conversion.from_kind()))?;
                frame.push(name, max_stack, num_type(conversion.to_kind()))?;
            }
            Inst::Compare(op) => {
                let typ = num_type(op.operand_kind());
                frame.pop_exact(name, &typ)?;
                frame.pop_exact(name, &typ)?;
                frame.push(name, max_stack, FrameType::Int)?;
            }
            Inst::If(..) | Inst::TableSwitch { .. } | Inst::LookupSwitch { .. } => {
                frame.pop_exact(name, &FrameType::Int)?;
            }
            Inst::IfICmp(..) => {
                frame.pop_exact(name, &FrameType::Int)?;
                frame.pop_exact(name, &FrameType::Int)?;
            }
            Inst::IfACmp { .. } => {
                frame.pop_any_reference(name)?;
                frame.pop_any_reference(name)?;
            }
            Inst::IfNull { .. } => {
                frame.pop_any_reference(name)?;
            }
            Inst::Return(kind) => self.check_return(frame, name, *kind)?,
            Inst::Field(access, index) => self.field_access(frame, name, *access, *index)?,
            Inst::Invoke(kind, index) => self.invoke(frame, name, *kind, *index)?,
            Inst::New(index) => {
                let class_name = self.pool.class_name(*index)?;
                if class_name.starts_with('[') {
                    return Err(VerifyErrorKind::NewArrayClass {
                        name: class_name.to_owned(),
                    });
                }

                let value = FrameType::Uninitialized(idx.0);
                // A copy left over from a previous iteration of a loop is no longer usable
                frame.replace_all(&value, &FrameType::Top);
                frame.push(name, max_stack, value)?;
            }
            Inst::NewArray(component) => {
                frame.pop_exact(name, &FrameType::Int)?;
                let array = FieldType::Array(Box::new(component.clone()));
                frame.push(name, max_stack, FrameType::from_field_type(&array))?;
            }
            Inst::ANewArray(index) => {
                frame.pop_exact(name, &FrameType::Int)?;
                let component = FieldType::from_class_name(self.pool.class_name(*index)?)?;
                let array = FieldType::Array(Box::new(component));
                frame.push(name, max_stack, FrameType::from_field_type(&array))?;
            }
            Inst::ArrayLength => {
                let array = frame.pop_reference(name)?;
                match &array {
                    FrameType::Null => {}
                    FrameType::Reference(class_name) if class_name.starts_with('[') => {}
                    _ => {
                        return Err(VerifyErrorKind::NotAnArray {
                            inst_name: name,
                            got: array,
                        })
                    }
                }
                frame.push(name, max_stack, FrameType::Int)?;
            }
            Inst::AThrow => {
                let value = frame.pop_reference(name)?;
                self.check_object(name, &value, THROWABLE_NAME)?;
            }
            Inst::CheckCast(index) => {
                frame.pop_reference(name)?;
                let class_name = self.pool.class_name(*index)?;
                FieldType::from_class_name(class_name)?;
                frame.push(name, max_stack, FrameType::reference(class_name))?;
            }
            Inst::InstanceOf(index) => {
                frame.pop_reference(name)?;
                FieldType::from_class_name(self.pool.class_name(*index)?)?;
                frame.push(name, max_stack, FrameType::Int)?;
            }
            Inst::MonitorEnter => {
                frame.pop_reference(name)?;
                frame.monitor_depth = frame.monitor_depth.saturating_add(1);
            }
            Inst::MonitorExit => {
                frame.pop_reference(name)?;
                frame.monitor_depth = frame
                    .monitor_depth
                    .checked_sub(1)
                    .ok_or(VerifyErrorKind::MonitorExitWithoutEnter)?;
            }
            Inst::Unsupported(name) => return Err(VerifyErrorKind::Unsupported(*name)),
        }

        Ok(())
    }

    fn loadable_constant(
        &self,
        index: ConstantPoolIndex,
        wide: bool,
    ) -> Result<FrameType, VerifyErrorKind> {
        Ok(match (self.pool.get(index)?, wide) {
            (ConstantPoolEntry::Integer(_), false) => FrameType::Int,
            (ConstantPoolEntry::Float(_), false) => FrameType::Float,
            (ConstantPoolEntry::String { .. }, false) => FrameType::reference(STRING_NAME),
            (ConstantPoolEntry::Long(_), true) => FrameType::Long,
            (ConstantPoolEntry::Double(_), true) => FrameType::Double,
            _ => return Err(VerifyErrorKind::BadConstant { index: index.0 }),
        })
    }

    /// Get the type of the elements of `array` when accessed with `kind`
    fn array_element(
        &self,
        inst_name: &'static str,
        array: &FrameType,
        kind: ArrayKind,
    ) -> Result<FrameType, VerifyErrorKind> {
        let class_name = match array {
            FrameType::Null => {
                // Always throws, but the type of the result still has to be something
                return Ok(match kind.value_kind() {
                    ValueKind::Int => FrameType::Int,
                    ValueKind::Long => FrameType::Long,
                    ValueKind::Float => FrameType::Float,
                    ValueKind::Double => FrameType::Double,
                    ValueKind::Reference => FrameType::Null,
                });
            }
            FrameType::Reference(class_name) if class_name.starts_with('[') => class_name,
            _ => {
                return Err(VerifyErrorKind::NotAnArray {
                    inst_name,
                    got: array.clone(),
                })
            }
        };

        match FieldType::from_class_name(class_name)? {
            FieldType::Array(component) if kind.accepts_component(&component) => {
                Ok(FrameType::from_field_type(&component))
            }
            _ => Err(VerifyErrorKind::BadArrayElement {
                inst_name,
                got: array.clone(),
            }),
        }
    }

    fn stack_op(
        frame: &mut Frame,
        name: &'static str,
        max_stack: u16,
        op: StackOp,
    ) -> Result<(), VerifyErrorKind> {
        match op {
            StackOp::Pop => {
                frame.pop_category_1(name)?;
            }
            StackOp::Pop2 => {
                let value1 = frame.pop(name)?;
                if value1.is_category_1() {
                    frame.pop_category_1(name)?;
                }
            }
            StackOp::Dup => {
                let value1 = frame.pop_category_1(name)?;
                push_all(frame, name, max_stack, [value1.clone(), value1])?;
            }
            StackOp::DupX1 => {
                let value1 = frame.pop_category_1(name)?;
                let value2 = frame.pop_category_1(name)?;
                push_all(frame, name, max_stack, [value1.clone(), value2, value1])?;
            }
            StackOp::DupX2 => {
                let value1 = frame.pop_category_1(name)?;
                let value2 = frame.pop(name)?;
                if value2.is_category_1() {
                    let value3 = frame.pop_category_1(name)?;
                    push_all(
                        frame,
                        name,
                        max_stack,
                        [value1.clone(), value3, value2, value1],
                    )?;
                } else {
                    push_all(frame, name, max_stack, [value1.clone(), value2, value1])?;
                }
            }
            StackOp::Dup2 => {
                let value1 = frame.pop(name)?;
                if value1.is_category_2() {
                    push_all(frame, name, max_stack, [value1.clone(), value1])?;
                } else {
                    let value2 = frame.pop_category_1(name)?;
                    push_all(
                        frame,
                        name,
                        max_stack,
                        [value2.clone(), value1.clone(), value2, value1],
                    )?;
                }
            }
            StackOp::Dup2X1 => {
                let value1 = frame.pop(name)?;
                if value1.is_category_2() {
                    let value2 = frame.pop_category_1(name)?;
                    push_all(frame, name, max_stack, [value1.clone(), value2, value1])?;
                } else {
                    let value2 = frame.pop_category_1(name)?;
                    let value3 = frame.pop_category_1(name)?;
                    push_all(
                        frame,
                        name,
                        max_stack,
                        [value2.clone(), value1.clone(), value3, value2, value1],
                    )?;
                }
            }
            StackOp::Dup2X2 => {
                let value1 = frame.pop(name)?;
                if value1.is_category_2() {
                    let value2 = frame.pop(name)?;
                    if value2.is_category_2() {
                        push_all(frame, name, max_stack, [value1.clone(), value2, value1])?;
                    } else {
                        let value3 = frame.pop_category_1(name)?;
                        push_all(
                            frame,
                            name,
                            max_stack,
                            [value1.clone(), value3, value2, value1],
                        )?;
                    }
                } else {
                    let value2 = frame.pop_category_1(name)?;
                    let value3 = frame.pop(name)?;
                    if value3.is_category_2() {
                        push_all(
                            frame,
                            name,
                            max_stack,
                            [value2.clone(), value1.clone(), value3, value2, value1],
                        )?;
                    } else {
                        let value4 = frame.pop_category_1(name)?;
                        push_all(
                            frame,
                            name,
                            max_stack,
                            [value2.clone(), value1.clone(), value4, value3, value2, value1],
                        )?;
                    }
                }
            }
            StackOp::Swap => {
                let value1 = frame.pop_category_1(name)?;
                let value2 = frame.pop_category_1(name)?;
                push_all(frame, name, max_stack, [value1, value2])?;
            }
        }

        Ok(())
    }

    fn check_return(
        &self,
        frame: &mut Frame,
        name: &'static str,
        kind: Option<ValueKind>,
    ) -> Result<(), VerifyErrorKind> {
        let expected = &self.method.parsed_descriptor().return_type;
        match (kind, expected) {
            (None, None) => {
                if self.method.is_init() && !frame.this_initialized {
                    return Err(VerifyErrorKind::ConstructorReturnsUninitialized);
                }
            }
            (Some(kind), Some(typ)) if ValueKind::from_field_type(typ) == kind => {
                let value = frame.pop(name)?;
                self.check_value(name, &value, typ)?;
            }
            _ => {
                return Err(VerifyErrorKind::BadReturn {
                    inst_name: name,
                    expected: expected
                        .as_ref()
                        .map_or_else(|| "void".to_owned(), ToString::to_string),
                })
            }
        }

        if frame.monitor_depth > 0 {
            return Err(VerifyErrorKind::ReturnWithHeldMonitor {
                depth: frame.monitor_depth,
            });
        }

        Ok(())
    }

    /// Check that `value` can be stored into something declared as `expected`
    fn check_value(
        &self,
        inst_name: &'static str,
        value: &FrameType,
        expected: &FieldType,
    ) -> Result<(), VerifyErrorKind> {
        if value.is_uninitialized() {
            return Err(VerifyErrorKind::UninitializedUse {
                inst_name,
                got: value.clone(),
            });
        }

        if self.ctx.is_assignable(value, expected)? {
            Ok(())
        } else {
            Err(VerifyErrorKind::ExpectedType {
                inst_name,
                expected: FrameType::from_field_type(expected).to_string(),
                got: value.clone(),
            })
        }
    }

    /// Check that `object` is an instance of `class_name`
    fn check_object(
        &self,
        inst_name: &'static str,
        object: &FrameType,
        class_name: &str,
    ) -> Result<(), VerifyErrorKind> {
        if self.ctx.is_assignable_to_class(object, class_name)? {
            Ok(())
        } else {
            Err(VerifyErrorKind::ExpectedType {
                inst_name,
                expected: FrameType::reference(class_name).to_string(),
                got: object.clone(),
            })
        }
    }

    fn field_access(
        &self,
        frame: &mut Frame,
        name: &'static str,
        access: FieldAccess,
        index: ConstantPoolIndex,
    ) -> Result<(), VerifyErrorKind> {
        let max_stack = self.code.max_stack();
        let field = self.pool.field_ref(index)?;
        let typ = FieldType::parse(field.descriptor)?;

        match access {
            FieldAccess::GetStatic => {
                frame.push(name, max_stack, FrameType::from_field_type(&typ))?;
            }
            FieldAccess::PutStatic => {
                let value = frame.pop(name)?;
                self.check_value(name, &value, &typ)?;
            }
            FieldAccess::GetField => {
                let object = frame.pop_reference(name)?;
                self.check_object(name, &object, field.class_name)?;
                frame.push(name, max_stack, FrameType::from_field_type(&typ))?;
            }
            FieldAccess::PutField => {
                let value = frame.pop(name)?;
                self.check_value(name, &value, &typ)?;
                let object = frame.pop_any_reference(name)?;
                // A constructor may set its own fields before calling the super constructor
                let own_field_of_this = object == FrameType::UninitializedThis
                    && field.class_name == self.class.name();
                if !own_field_of_this {
                    if object.is_uninitialized() {
                        return Err(VerifyErrorKind::UninitializedUse {
                            inst_name: name,
                            got: object,
                        });
                    }
                    self.check_object(name, &object, field.class_name)?;
                }
            }
        }

        Ok(())
    }

    fn invoke(
        &self,
        frame: &mut Frame,
        name: &'static str,
        kind: InvokeKind,
        index: ConstantPoolIndex,
    ) -> Result<(), VerifyErrorKind> {
        let method_ref = match kind {
            InvokeKind::Virtual => self.pool.method_ref(index)?,
            InvokeKind::Interface => self.pool.interface_method_ref(index)?,
            InvokeKind::Special | InvokeKind::Static => self.pool.any_method_ref(index)?.0,
        };

        let is_init = method_ref.name == "<init>";
        if method_ref.name == "<clinit>" || (is_init && kind != InvokeKind::Special) {
            return Err(VerifyErrorKind::IllegalMethodName {
                name: method_ref.name.to_owned(),
            });
        }

        let descriptor = MethodDescriptor::parse(method_ref.descriptor)?;
        for parameter in descriptor.parameters.iter().rev() {
            let value = frame.pop(name)?;
            self.check_value(name, &value, parameter)?;
        }

        if is_init {
            if descriptor.return_type.is_some() {
                return Err(VerifyErrorKind::BadInitCall {
                    reason: "constructors must return void".to_owned(),
                });
            }
            let receiver = frame.pop_any_reference(name)?;
            self.initialize(frame, &receiver, method_ref.class_name)?;
        } else if kind != InvokeKind::Static {
            let receiver = frame.pop_reference(name)?;
            // invokespecial can only be used on this class or its supertypes through `this`
            let expected = if kind == InvokeKind::Special {
                self.class.name()
            } else {
                method_ref.class_name
            };
            self.check_object(name, &receiver, expected)?;
        }

        if let Some(return_type) = &descriptor.return_type {
            frame.push(
                name,
                self.code.max_stack(),
                FrameType::from_field_type(return_type),
            )?;
        }

        Ok(())
    }

    /// Mark `receiver` as initialized by a call to `class_name.<init>`
    fn initialize(
        &self,
        frame: &mut Frame,
        receiver: &FrameType,
        class_name: &str,
    ) -> Result<(), VerifyErrorKind> {
        match receiver {
            FrameType::UninitializedThis => {
                let this_name = self.class.name();
                let super_name = self
                    .class
                    .super_id()
                    .and_then(|id| self.ctx.classes.names().name(id));
                if class_name != this_name && super_name.as_deref() != Some(class_name) {
                    return Err(VerifyErrorKind::BadInitCall {
                        reason: format!(
                            "{} is neither {} nor its direct superclass",
                            class_name, this_name
                        ),
                    });
                }

                frame.replace_all(receiver, &FrameType::reference(this_name));
                frame.this_initialized = true;
            }
            FrameType::Uninitialized(at) => {
                let new_class = match self.code.get_instruction_at(InstructionIndex(*at)) {
                    Some(Inst::New(index)) => self.pool.class_name(*index)?,
                    _ => {
                        return Err(VerifyErrorKind::BadInitCall {
                            reason: format!("no new instruction at @{}", at),
                        })
                    }
                };
                if new_class != class_name {
                    return Err(VerifyErrorKind::BadInitCall {
                        reason: format!(
                            "{}.<init> called on an uninitialized {}",
                            class_name, new_class
                        ),
                    });
                }

                frame.replace_all(receiver, &FrameType::reference(new_class));
            }
            _ => {
                return Err(VerifyErrorKind::BadInitCall {
                    reason: format!("called on already initialized {}", receiver),
                })
            }
        }

        Ok(())
    }
}
