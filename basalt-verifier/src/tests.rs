use std::collections::HashMap;

use basalt_base::{Classes, Config, LinkageError, OBJECT_NAME, STRING_NAME, THROWABLE_NAME};
use basalt_classfile::{
    builder::{ClassBuilder, Code},
    opcode, ClassAccessFlags, MethodAccessFlags,
};

use crate::{verify_class, VerificationLogging, VerifyError, VerifyErrorKind};

fn public_static() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
}

fn with_init(mut builder: ClassBuilder, super_name: &str) -> Vec<u8> {
    let init = builder.pool().method_ref(super_name, "<init>", "()V");
    let mut code = Code::new(1, 1);
    code.op(opcode::ALOAD_0)
        .op_u16(opcode::INVOKESPECIAL, init)
        .op(opcode::RETURN);
    builder.method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some(code));
    builder.build()
}

fn classes_with(extra: Vec<(&str, Vec<u8>)>) -> Classes {
    let mut files: HashMap<String, Vec<u8>> = HashMap::new();

    let mut object = ClassBuilder::new(OBJECT_NAME).with_super(None);
    let mut code = Code::new(0, 1);
    code.op(opcode::RETURN);
    object.method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some(code));
    files.insert(OBJECT_NAME.to_owned(), object.build());
    files.insert(
        THROWABLE_NAME.to_owned(),
        with_init(ClassBuilder::new(THROWABLE_NAME), OBJECT_NAME),
    );
    files.insert(
        STRING_NAME.to_owned(),
        with_init(ClassBuilder::new(STRING_NAME), OBJECT_NAME),
    );
    for (name, data) in extra {
        files.insert(name.to_owned(), data);
    }

    Classes::new(Config::default(), Box::new(files))
}

fn verify(classes: &Classes, name: &str) -> Result<(), VerifyError> {
    let class = classes.get_or_load(name).unwrap();
    verify_class(classes, &class, VerificationLogging::default())
}

/// Verify a class `Test` with a single static method `run` built by `make`
fn verify_static(
    descriptor: &str,
    make: impl FnOnce(&mut ClassBuilder) -> Code,
) -> Result<(), VerifyError> {
    verify_static_with(descriptor, Vec::new(), make)
}

fn verify_static_with(
    descriptor: &str,
    extra: Vec<(&str, Vec<u8>)>,
    make: impl FnOnce(&mut ClassBuilder) -> Code,
) -> Result<(), VerifyError> {
    let mut builder = ClassBuilder::new("Test");
    let code = make(&mut builder);
    builder.method(public_static(), "run", descriptor, Some(code));

    let mut extra = extra;
    extra.push(("Test", builder.build()));
    let classes = classes_with(extra);
    verify(&classes, "Test")
}

fn kind(result: Result<(), VerifyError>) -> VerifyErrorKind {
    result.unwrap_err().kind
}

#[test]
fn test_valid_arithmetic() {
    verify_static("(II)I", |_| {
        let mut code = Code::new(2, 2);
        code.op(opcode::ILOAD_0)
            .op(opcode::ILOAD_1)
            .op(opcode::IADD)
            .op(opcode::IRETURN);
        code
    })
    .unwrap();
}

#[test]
fn test_ill_typed_operands() {
    let err = verify_static("(IF)I", |_| {
        let mut code = Code::new(2, 2);
        code.op(opcode::ILOAD_0)
            .op(opcode::FLOAD_1)
            .op(opcode::IADD)
            .op(opcode::IRETURN);
        code
    })
    .unwrap_err();
    assert!(matches!(err.kind, VerifyErrorKind::ExpectedType { .. }));
    assert_eq!(err.at.map(|at| at.0), Some(2));

    let linkage = LinkageError::from(err);
    match linkage {
        LinkageError::Verify(message) => assert!(message.starts_with("Test.run(IF)I @2")),
        err => panic!("Expected a verify error, got {:?}", err),
    }
}

#[test]
fn test_stack_bounds() {
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.op(opcode::ICONST_1)
            .op(opcode::ICONST_2)
            .op(opcode::POP2)
            .op(opcode::RETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::StackOverflow { max_stack: 1, .. }
    ));

    let result = verify_static("()V", |_| {
        let mut code = Code::new(2, 0);
        code.op(opcode::ICONST_1).op(opcode::IADD).op(opcode::RETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::StackUnderflow { .. }
    ));

    // A long takes two words of stack
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.op(opcode::LCONST_1).op(opcode::POP2).op(opcode::RETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::StackOverflow { .. }));
}

#[test]
fn test_locals_bounds() {
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::ICONST_1)
            .op(opcode::ISTORE_1)
            .op(opcode::RETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::BadLocalIndex { index: 1, .. }
    ));

    // Reading a local that was never written
    let result = verify_static("()I", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::ILOAD_0).op(opcode::IRETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::BadLocalType { index: 0, .. }
    ));
}

#[test]
fn test_control_flow_targets() {
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.op(opcode::ICONST_0).op(opcode::POP);
        code
    });
    assert_eq!(kind(result), VerifyErrorKind::FallsOffEnd);

    // Jumping into the middle of the sipush
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.op_u16(opcode::SIPUSH, 1)
            .op(opcode::POP)
            .branch_to(opcode::GOTO, 1);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::BadBranchTarget { .. }
    ));
}

#[test]
fn test_unsupported_instruction() {
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.raw(&[opcode::INVOKEDYNAMIC, 0, 1, 0, 0])
            .op(opcode::RETURN);
        code
    });
    assert_eq!(kind(result), VerifyErrorKind::Unsupported("invokedynamic"));
}

#[test]
fn test_unknown_opcode() {
    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.raw(&[0xDA]);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::Decode(_)));
}

#[test]
fn test_return_type() {
    let result = verify_static("()I", |_| {
        let mut code = Code::new(1, 0);
        code.op(opcode::RETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::BadReturn { .. }));

    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 0);
        code.op(opcode::ICONST_0).op(opcode::IRETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::BadReturn { .. }));

    let result = verify_static("()Ljava/lang/Throwable;", |builder| {
        let string = builder.pool().string("hello");
        let mut code = Code::new(1, 0);
        code.op_u8(opcode::LDC, string as u8).op(opcode::ARETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::ExpectedType { .. }));
}

fn hierarchy() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("A", with_init(ClassBuilder::new("A"), OBJECT_NAME)),
        (
            "B",
            with_init(ClassBuilder::new("B").with_super(Some("A")), "A"),
        ),
        (
            "C",
            with_init(ClassBuilder::new("C").with_super(Some("A")), "A"),
        ),
    ]
}

/// `run(int, B, C)` returning either the B or the C
fn choose(code_return: &str) -> Result<(), VerifyError> {
    verify_static_with(&format!("(ILB;LC;){}", code_return), hierarchy(), |_| {
        let mut code = Code::new(1, 3);
        code.op(opcode::ILOAD_0);
        let otherwise = code.branch(opcode::IFEQ);
        code.op(opcode::ALOAD_1);
        let end = code.branch(opcode::GOTO);
        code.patch(otherwise);
        code.op(opcode::ALOAD_2);
        code.patch(end);
        code.op(opcode::ARETURN);
        code
    })
}

#[test]
fn test_merge_to_common_superclass() {
    choose("LA;").unwrap();
    choose("Ljava/lang/Object;").unwrap();
    assert!(matches!(
        kind(choose("LB;")),
        VerifyErrorKind::ExpectedType { .. }
    ));
}

#[test]
fn test_merge_conflicting_locals() {
    let result = verify_static("(I)V", |_| {
        let mut code = Code::new(1, 2);
        code.op(opcode::ILOAD_0);
        let otherwise = code.branch(opcode::IFEQ);
        code.op(opcode::ICONST_1).op(opcode::ISTORE_1);
        let end = code.branch(opcode::GOTO);
        code.patch(otherwise);
        code.op(opcode::FCONST_1).op(opcode::FSTORE_1);
        code.patch(end);
        code.op(opcode::ILOAD_1).op(opcode::POP).op(opcode::RETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::BadLocalType {
            index: 1,
            got: crate::FrameType::Top,
            ..
        }
    ));
}

#[test]
fn test_loop_reaches_fixpoint() {
    verify_static("(I)V", |_| {
        let mut code = Code::new(2, 1);
        let top = code.position();
        code.op(opcode::ILOAD_0);
        let exit = code.branch(opcode::IFEQ);
        code.raw(&[opcode::IINC, 0, 0xFF]);
        code.branch_to(opcode::GOTO, top);
        code.patch(exit);
        code.op(opcode::RETURN);
        code
    })
    .unwrap();
}

fn constructor_class(make: impl FnOnce(&mut ClassBuilder) -> Code) -> Result<(), VerifyError> {
    let mut builder = ClassBuilder::new("Test");
    let code = make(&mut builder);
    builder.method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some(code));
    builder.method(public_static(), "take", "(LTest;)V", Some({
        let mut code = Code::new(0, 1);
        code.op(opcode::RETURN);
        code
    }));
    let classes = classes_with(vec![("Test", builder.build())]);
    verify(&classes, "Test")
}

#[test]
fn test_uninitialized_this() {
    constructor_class(|builder| {
        let init = builder.pool().method_ref(OBJECT_NAME, "<init>", "()V");
        let mut code = Code::new(1, 1);
        code.op(opcode::ALOAD_0)
            .op_u16(opcode::INVOKESPECIAL, init)
            .op(opcode::RETURN);
        code
    })
    .unwrap();

    let result = constructor_class(|_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::RETURN);
        code
    });
    assert_eq!(kind(result), VerifyErrorKind::ConstructorReturnsUninitialized);

    let result = constructor_class(|builder| {
        let take = builder.pool().method_ref("Test", "take", "(LTest;)V");
        let mut code = Code::new(1, 1);
        code.op(opcode::ALOAD_0)
            .op_u16(opcode::INVOKESTATIC, take)
            .op(opcode::RETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::UninitializedUse { .. }
    ));

    // Only this class or the direct superclass may initialize `this`
    let result = constructor_class(|builder| {
        let init = builder.pool().method_ref(STRING_NAME, "<init>", "()V");
        let mut code = Code::new(1, 1);
        code.op(opcode::ALOAD_0)
            .op_u16(opcode::INVOKESPECIAL, init)
            .op(opcode::RETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::BadInitCall { .. }));
}

#[test]
fn test_new_must_be_initialized() {
    let result = verify_static_with("()LA;", hierarchy(), |builder| {
        let class = builder.pool().class("A");
        let init = builder.pool().method_ref("A", "<init>", "()V");
        let mut code = Code::new(2, 0);
        code.op_u16(opcode::NEW, class)
            .op(opcode::DUP)
            .op_u16(opcode::INVOKESPECIAL, init)
            .op(opcode::ARETURN);
        code
    });
    result.unwrap();

    let result = verify_static_with("()LA;", hierarchy(), |builder| {
        let class = builder.pool().class("A");
        let mut code = Code::new(1, 0);
        code.op_u16(opcode::NEW, class).op(opcode::ARETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::UninitializedUse { .. }
    ));

    let result = verify_static_with("()LA;", hierarchy(), |builder| {
        let class = builder.pool().class("B");
        let init = builder.pool().method_ref("A", "<init>", "()V");
        let mut code = Code::new(2, 0);
        code.op_u16(opcode::NEW, class)
            .op(opcode::DUP)
            .op_u16(opcode::INVOKESPECIAL, init)
            .op(opcode::ARETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::BadInitCall { .. }));
}

#[test]
fn test_monitors() {
    let result = verify_static("(Ljava/lang/Object;)V", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::ALOAD_0)
            .op(opcode::MONITORENTER)
            .op(opcode::RETURN);
        code
    });
    assert_eq!(
        kind(result),
        VerifyErrorKind::ReturnWithHeldMonitor { depth: 1 }
    );

    let result = verify_static("(Ljava/lang/Object;)V", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::ALOAD_0)
            .op(opcode::MONITOREXIT)
            .op(opcode::RETURN);
        code
    });
    assert_eq!(kind(result), VerifyErrorKind::MonitorExitWithoutEnter);

    let result = verify_static("(Ljava/lang/Object;I)V", |_| {
        let mut code = Code::new(1, 2);
        code.op(opcode::ILOAD_1);
        let end = code.branch(opcode::IFEQ);
        code.op(opcode::ALOAD_0).op(opcode::MONITORENTER);
        code.patch(end);
        code.op(opcode::RETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::MonitorDepthMismatch { .. }
    ));

    // The shape javac emits for a synchronized block
    verify_static("(Ljava/lang/Object;)V", |_| {
        let mut code = Code::new(2, 2);
        code.op(opcode::ALOAD_0)
            .op(opcode::DUP)
            .op(opcode::ASTORE_1)
            .op(opcode::MONITORENTER);
        let start = code.position();
        code.op(opcode::ALOAD_1).op(opcode::MONITOREXIT);
        let end = code.position();
        code.op(opcode::RETURN);
        let handler = code.position();
        code.op(opcode::ALOAD_1)
            .op(opcode::MONITOREXIT)
            .op(opcode::ATHROW);
        code.handler(start, end, handler, 0);
        code
    })
    .unwrap();
}

#[test]
fn test_exception_handlers() {
    verify_static("()V", |builder| {
        let thrower = builder.pool().method_ref("Test", "thrower", "()V");
        let throwable = builder.pool().class(THROWABLE_NAME);
        let mut code = Code::new(1, 1);
        let start = code.position();
        code.op_u16(opcode::INVOKESTATIC, thrower);
        let end = code.position();
        code.op(opcode::RETURN);
        let handler = code.position();
        code.op(opcode::ASTORE_0).op(opcode::RETURN);
        code.handler(start, end, handler, throwable);
        code
    })
    .unwrap();

    let result = verify_static("()V", |builder| {
        let string = builder.pool().class(STRING_NAME);
        let mut code = Code::new(1, 1);
        code.op(opcode::NOP).op(opcode::RETURN);
        code.op(opcode::POP).op(opcode::RETURN);
        code.handler(0, 1, 2, string);
        code
    });
    assert_eq!(
        kind(result),
        VerifyErrorKind::BadCatchType {
            name: STRING_NAME.to_owned()
        }
    );

    let result = verify_static("()V", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::NOP).op(opcode::RETURN);
        code.handler(0, 1, 7, 0);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::BadHandlerTarget { .. }
    ));
}

#[test]
fn test_array_elements() {
    let result = verify_static("([I)F", |_| {
        let mut code = Code::new(2, 1);
        code.op(opcode::ALOAD_0)
            .op(opcode::ICONST_0)
            .op(opcode::FALOAD)
            .op(opcode::FRETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::BadArrayElement { .. }
    ));

    verify_static("([Ljava/lang/String;)Ljava/lang/String;", |_| {
        let mut code = Code::new(2, 1);
        code.op(opcode::ALOAD_0)
            .op(opcode::ICONST_0)
            .op(opcode::AALOAD)
            .op(opcode::ARETURN);
        code
    })
    .unwrap();

    let result = verify_static("(Ljava/lang/String;)I", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::ALOAD_0)
            .op(opcode::ARRAYLENGTH)
            .op(opcode::IRETURN);
        code
    });
    assert!(matches!(kind(result), VerifyErrorKind::NotAnArray { .. }));
}

#[test]
fn test_category_2_stack_ops() {
    verify_static("(J)J", |_| {
        let mut code = Code::new(4, 2);
        code.op(opcode::LLOAD_0)
            .op(opcode::DUP2)
            .op(opcode::LADD)
            .op(opcode::LRETURN);
        code
    })
    .unwrap();

    let result = verify_static("(J)J", |_| {
        let mut code = Code::new(4, 2);
        code.op(opcode::LLOAD_0)
            .op(opcode::DUP)
            .op(opcode::LADD)
            .op(opcode::LRETURN);
        code
    });
    assert!(matches!(
        kind(result),
        VerifyErrorKind::ExpectedCategory1 { .. }
    ));
}

#[test]
fn test_abstract_methods_pass() {
    let mut builder = ClassBuilder::new("Test");
    builder.flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER | ClassAccessFlags::ABSTRACT);
    builder.method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        "run",
        "()V",
        None,
    );
    let classes = classes_with(vec![("Test", builder.build())]);
    verify(&classes, "Test").unwrap();
}
