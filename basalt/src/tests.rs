use std::{
    collections::HashMap,
    io::Write,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use basalt_base::{resolve::ExpectedKind, OBJECT_NAME, STRING_NAME, THROWABLE_NAME};
use basalt_classfile::{
    builder::{ClassBuilder, Code},
    opcode, ConstantPoolIndex, FieldAccessFlags, MethodAccessFlags,
};
use basalt_verifier::VerificationLogging;

use crate::{
    bootstrap::{ARITHMETIC_EXCEPTION, CONSOLE_NAME, NULL_POINTER_EXCEPTION},
    diagnostics::{self, DiagnosticError},
    eval::{eval_method, EvalMethodValue, Frame},
    rv::{RuntimeValue, RuntimeValuePrimitive},
    util::Env,
    InitState, LinkState, Runtime, StateConfig,
};

/// Program output shared with the test
#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);
impl Output {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}
impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn config() -> StateConfig {
    StateConfig {
        tracing_level: tracing::Level::WARN,
        verification_logging: VerificationLogging::default(),
        max_call_depth: NonZeroUsize::new(64),
        log_instructions: false,
        log_class_loads: false,
    }
}

fn runtime(classes: Vec<(&str, Vec<u8>)>) -> (Arc<Runtime>, Output) {
    let files: HashMap<String, Vec<u8>> = classes
        .into_iter()
        .map(|(name, data)| (name.to_owned(), data))
        .collect();
    let output = Output::default();
    let rt = Runtime::with_output(config(), files, Box::new(output.clone()));
    (rt, output)
}

fn public_static() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
}

/// A class `name` whose `main` is built by `make`
fn main_class(name: &str, make: impl FnOnce(&mut ClassBuilder) -> Code) -> Vec<u8> {
    let mut builder = ClassBuilder::new(name);
    let code = make(&mut builder);
    builder.method(public_static(), "main", "([Ljava/lang/String;)V", Some(code));
    builder.build()
}

fn add_constructor(builder: &mut ClassBuilder, super_name: &str) {
    let init = builder.pool().method_ref(super_name, "<init>", "()V");
    let mut code = Code::new(1, 1);
    code.op(opcode::ALOAD_0)
        .op_u16(opcode::INVOKESPECIAL, init)
        .op(opcode::RETURN);
    builder.method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some(code));
}

/// A method `()I` returning a constant
fn add_int_method(builder: &mut ClassBuilder, flags: MethodAccessFlags, name: &str, value: i8) {
    let mut code = Code::new(1, 1);
    code.op_u8(opcode::BIPUSH, value.to_be_bytes()[0])
        .op(opcode::IRETURN);
    builder.method(flags, name, "()I", Some(code));
}

fn println(builder: &mut ClassBuilder, descriptor: &str) -> u16 {
    builder.pool().method_ref(CONSOLE_NAME, "println", descriptor)
}

/// Push a new instance of `class`, constructed with `<init>()V`
fn construct(builder: &mut ClassBuilder, code: &mut Code, class: &str) {
    let class_index = builder.pool().class(class);
    let init = builder.pool().method_ref(class, "<init>", "()V");
    code.op_u16(opcode::NEW, class_index)
        .op(opcode::DUP)
        .op_u16(opcode::INVOKESPECIAL, init);
}

fn expect_exception(rt: &Runtime, value: EvalMethodValue) -> String {
    match value {
        EvalMethodValue::Exception(exc) => rt.describe_exception(exc),
        other => panic!("expected an exception, got {:?}", other),
    }
}

#[test]
fn test_arithmetic_and_output() {
    let main = main_class("Main", |builder| {
        let println_int = println(builder, "(I)V");
        let println_long = println(builder, "(J)V");
        let println_string = println(builder, "(Ljava/lang/String;)V");
        let hello = builder.pool().string("hello");
        let big = builder.pool().long(1 << 40);

        let mut code = Code::new(4, 3);
        code.op_u8(opcode::BIPUSH, 6)
            .op_u8(opcode::BIPUSH, 7)
            .op(opcode::IMUL)
            .op_u16(opcode::INVOKESTATIC, println_int)
            .op_u16(opcode::LDC_W, hello)
            .op_u16(opcode::INVOKESTATIC, println_string)
            .op_u16(opcode::LDC2_W, big)
            .op(opcode::LCONST_1)
            .op(opcode::LADD)
            .op_u16(opcode::INVOKESTATIC, println_long);

        // Sum 1 through 10
        code.op(opcode::ICONST_0)
            .op(opcode::ISTORE_1)
            .op(opcode::ICONST_1)
            .op(opcode::ISTORE_2);
        let loop_start = code.position();
        code.op(opcode::ILOAD_1)
            .op(opcode::ILOAD_2)
            .op(opcode::IADD)
            .op(opcode::ISTORE_1)
            .raw(&[opcode::IINC, 2, 1])
            .op(opcode::ILOAD_2)
            .op_u8(opcode::BIPUSH, 10)
            .branch_to(opcode::IF_ICMPLE, loop_start)
            .op(opcode::ILOAD_1)
            .op_u16(opcode::INVOKESTATIC, println_int)
            .op(opcode::RETURN);
        code
    });

    let (rt, output) = runtime(vec![("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert!(matches!(result, EvalMethodValue::ReturnVoid));
    assert_eq!(output.contents(), "42\nhello\n1099511627777\n55\n");
}

#[test]
fn test_table_switch() {
    let main = main_class("Main", |builder| {
        let println_int = println(builder, "(I)V");
        let mut code = Code::new(2, 1);
        code.op(opcode::ICONST_2);
        let switch = code.tableswitch(1, 3);
        for (case, value) in [10, 20, 30].into_iter().enumerate() {
            code.patch_switch_case(&switch, case);
            code.op_u8(opcode::BIPUSH, value)
                .op_u16(opcode::INVOKESTATIC, println_int)
                .op(opcode::RETURN);
        }
        code.patch_switch_default(&switch);
        code.op(opcode::RETURN);
        code
    });

    let (rt, output) = runtime(vec![("Main", main)]);
    rt.run_main("Main").unwrap();
    assert_eq!(output.contents(), "20\n");
}

#[test]
fn test_uncaught_exception() {
    let main = main_class("Main", |_| {
        let mut code = Code::new(2, 1);
        code.op(opcode::ICONST_1)
            .op(opcode::ICONST_0)
            .op(opcode::IDIV)
            .op(opcode::POP)
            .op(opcode::RETURN);
        code
    });

    let (rt, _) = runtime(vec![("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert_eq!(
        expect_exception(&rt, result),
        "java.lang.ArithmeticException: / by zero"
    );
}

#[test]
fn test_caught_exception() {
    let main = main_class("Main", |builder| {
        let println_string = println(builder, "(Ljava/lang/String;)V");
        let get_message = builder
            .pool()
            .method_ref(THROWABLE_NAME, "getMessage", "()Ljava/lang/String;");
        let npe = builder.pool().class(NULL_POINTER_EXCEPTION);
        let arithmetic = builder.pool().class(ARITHMETIC_EXCEPTION);

        let mut code = Code::new(2, 2);
        let start = code.position();
        code.op(opcode::ICONST_1)
            .op(opcode::ICONST_0)
            .op(opcode::IDIV)
            .op(opcode::POP);
        let end = code.position();
        let skip = code.branch(opcode::GOTO);

        // Doesn't match, so the next entry is tried
        let npe_handler = code.position();
        code.op(opcode::POP).op(opcode::RETURN);

        let handler = code.position();
        code.op(opcode::ASTORE_1)
            .op(opcode::ALOAD_1)
            .op_u16(opcode::INVOKEVIRTUAL, get_message)
            .op_u16(opcode::INVOKESTATIC, println_string);
        code.patch(skip);
        code.op(opcode::RETURN);

        code.handler(start, end, npe_handler, npe);
        code.handler(start, end, handler, arithmetic);
        code
    });

    let (rt, output) = runtime(vec![("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert!(matches!(result, EvalMethodValue::ReturnVoid));
    assert_eq!(output.contents(), "/ by zero\n");
}

/// `Named` has a default `id`, `Base` implements it, `Derived` overrides both of its methods and
/// `Plain` overrides neither
fn dispatch_classes() -> Vec<(&'static str, Vec<u8>)> {
    let mut named = ClassBuilder::interface("Named");
    add_int_method(&mut named, MethodAccessFlags::PUBLIC, "id", 1);

    let mut base = ClassBuilder::new("Base");
    base.implements("Named");
    add_constructor(&mut base, OBJECT_NAME);
    add_int_method(&mut base, MethodAccessFlags::PUBLIC, "value", 10);

    let mut derived = ClassBuilder::new("Derived").with_super(Some("Base"));
    add_constructor(&mut derived, "Base");
    add_int_method(&mut derived, MethodAccessFlags::PUBLIC, "value", 20);
    add_int_method(&mut derived, MethodAccessFlags::PUBLIC, "id", 2);

    let mut plain = ClassBuilder::new("Plain").with_super(Some("Base"));
    add_constructor(&mut plain, "Base");

    let main = main_class("Main", |builder| {
        let println_int = println(builder, "(I)V");
        let value = builder.pool().method_ref("Base", "value", "()I");
        let id = builder.pool().interface_method_ref("Named", "id", "()I");

        let mut code = Code::new(2, 1);
        for class in ["Derived", "Plain"] {
            construct(builder, &mut code, class);
            code.op(opcode::ASTORE_0)
                .op(opcode::ALOAD_0)
                .op_u16(opcode::INVOKEVIRTUAL, value)
                .op_u16(opcode::INVOKESTATIC, println_int)
                .op(opcode::ALOAD_0)
                .op_u16(opcode::INVOKEINTERFACE, id)
                .raw(&[1, 0])
                .op_u16(opcode::INVOKESTATIC, println_int);
        }
        code.op(opcode::RETURN);
        code
    });

    vec![
        ("Named", named.build()),
        ("Base", base.build()),
        ("Derived", derived.build()),
        ("Plain", plain.build()),
        ("Main", main),
    ]
}

#[test]
fn test_virtual_and_interface_dispatch() {
    let (rt, output) = runtime(dispatch_classes());
    let result = rt.run_main("Main").unwrap();
    assert!(matches!(result, EvalMethodValue::ReturnVoid));
    assert_eq!(output.contents(), "20\n2\n10\n1\n");

    // Running again goes through the call site caches
    rt.run_main("Main").unwrap();
    assert_eq!(output.contents(), "20\n2\n10\n1\n20\n2\n10\n1\n");
    assert!(!rt.call_sites.is_empty());
}

#[test]
fn test_default_method_conflict() {
    let mut i1 = ClassBuilder::interface("I1");
    add_int_method(&mut i1, MethodAccessFlags::PUBLIC, "m", 1);
    let mut i2 = ClassBuilder::interface("I2");
    add_int_method(&mut i2, MethodAccessFlags::PUBLIC, "m", 2);
    let mut c = ClassBuilder::new("C");
    c.implements("I1").implements("I2");
    add_constructor(&mut c, OBJECT_NAME);

    let main = main_class("Main", |builder| {
        let m = builder.pool().interface_method_ref("I1", "m", "()I");
        let mut code = Code::new(2, 1);
        construct(builder, &mut code, "C");
        code.op_u16(opcode::INVOKEINTERFACE, m)
            .raw(&[1, 0])
            .op(opcode::POP)
            .op(opcode::RETURN);
        code
    });

    let (rt, _) = runtime(vec![
        ("I1", i1.build()),
        ("I2", i2.build()),
        ("C", c.build()),
        ("Main", main),
    ]);
    for _ in 0..2 {
        let result = rt.run_main("Main").unwrap();
        assert_eq!(
            expect_exception(&rt, result),
            "java.lang.IncompatibleClassChangeError: Conflicting default methods: I1.m I2.m"
        );
    }
}

#[test]
fn test_static_initialization_once_across_threads() {
    let mut lazy = ClassBuilder::new("Lazy");
    lazy.field(FieldAccessFlags::STATIC, "value", "I");
    let value = lazy.pool().field_ref("Lazy", "value", "I");
    let println_string = println(&mut lazy, "(Ljava/lang/String;)V");
    let init = lazy.pool().string("init");
    let mut code = Code::new(1, 0);
    code.op_u16(opcode::LDC_W, init)
        .op_u16(opcode::INVOKESTATIC, println_string)
        .op_u8(opcode::BIPUSH, 42)
        .op_u16(opcode::PUTSTATIC, value)
        .op(opcode::RETURN);
    lazy.method(MethodAccessFlags::STATIC, "<clinit>", "()V", Some(code));
    let mut code = Code::new(1, 0);
    code.op_u16(opcode::GETSTATIC, value).op(opcode::IRETURN);
    lazy.method(public_static(), "get", "()I", Some(code));

    let mut reader = ClassBuilder::new("Reader");
    let get = reader.pool().method_ref("Lazy", "get", "()I");
    let mut code = Code::new(1, 0);
    code.op_u16(opcode::INVOKESTATIC, get).op(opcode::IRETURN);
    reader.method(public_static(), "run", "()I", Some(code));

    let (rt, output) = runtime(vec![("Lazy", lazy.build()), ("Reader", reader.build())]);
    let reader = rt.classes.get_or_load("Reader").unwrap();
    rt.link(reader.id()).unwrap();
    let run = reader.find_method("run", "()I").unwrap().id();

    let threads = (0..8)
        .map(|_| {
            let rt = Arc::clone(&rt);
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                let symbol = rt
                    .classes
                    .resolve(&reader, ConstantPoolIndex(get), ExpectedKind::AnyMethod)
                    .unwrap();
                let mut env = Env::new(Arc::clone(&rt));
                let value = eval_method(&mut env, run, Frame::default()).unwrap();
                (symbol, value)
            })
        })
        .collect::<Vec<_>>();
    let results = threads
        .into_iter()
        .map(|thread| thread.join().unwrap())
        .collect::<Vec<_>>();

    let first = results[0].0;
    for (symbol, value) in results {
        assert_eq!(symbol, first);
        assert!(matches!(
            value,
            EvalMethodValue::Return(RuntimeValue::Primitive(RuntimeValuePrimitive::I32(42)))
        ));
    }
    assert_eq!(output.contents(), "init\n");

    let lazy = rt.classes.names().find("Lazy").unwrap();
    assert_eq!(rt.class_info(lazy).init, InitState::Initialized);
}

#[test]
fn test_failed_initialization() {
    let mut broken = ClassBuilder::new("Broken");
    let mut code = Code::new(2, 0);
    code.op(opcode::ICONST_1)
        .op(opcode::ICONST_0)
        .op(opcode::IDIV)
        .op(opcode::POP)
        .op(opcode::RETURN);
    broken.method(MethodAccessFlags::STATIC, "<clinit>", "()V", Some(code));
    let mut code = Code::new(0, 0);
    code.op(opcode::RETURN);
    broken.method(public_static(), "touch", "()V", Some(code));

    let main = main_class("Main", |builder| {
        let touch = builder.pool().method_ref("Broken", "touch", "()V");
        let mut code = Code::new(0, 1);
        code.op_u16(opcode::INVOKESTATIC, touch).op(opcode::RETURN);
        code
    });

    let (rt, _) = runtime(vec![("Broken", broken.build()), ("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert_eq!(
        expect_exception(&rt, result),
        "java.lang.ExceptionInInitializerError: java.lang.ArithmeticException: / by zero"
    );
    let result = rt.run_main("Main").unwrap();
    assert_eq!(
        expect_exception(&rt, result),
        "java.lang.NoClassDefFoundError: Could not initialize class Broken"
    );
}

#[test]
fn test_stack_overflow() {
    let mut deep = ClassBuilder::new("Deep");
    let recurse = deep.pool().method_ref("Deep", "recurse", "()V");
    let mut code = Code::new(0, 0);
    code.op_u16(opcode::INVOKESTATIC, recurse).op(opcode::RETURN);
    deep.method(public_static(), "recurse", "()V", Some(code));

    let main = main_class("Main", |builder| {
        let recurse = builder.pool().method_ref("Deep", "recurse", "()V");
        let mut code = Code::new(0, 1);
        code.op_u16(opcode::INVOKESTATIC, recurse).op(opcode::RETURN);
        code
    });

    let (rt, _) = runtime(vec![("Deep", deep.build()), ("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert_eq!(expect_exception(&rt, result), "java.lang.StackOverflowError");
}

#[test]
fn test_default_call_depth_fits_thread_stack() {
    let mut deep = ClassBuilder::new("Deep");
    let recurse = deep.pool().method_ref("Deep", "recurse", "(I)V");
    let mut code = Code::new(1, 1);
    code.op_u8(opcode::ILOAD, 0)
        .op_u16(opcode::INVOKESTATIC, recurse)
        .op(opcode::RETURN);
    deep.method(public_static(), "recurse", "(I)V", Some(code));

    let main = main_class("Main", |builder| {
        let recurse = builder.pool().method_ref("Deep", "recurse", "(I)V");
        let mut code = Code::new(1, 1);
        code.op(opcode::ICONST_0)
            .op_u16(opcode::INVOKESTATIC, recurse)
            .op(opcode::RETURN);
        code
    });

    let mut conf = StateConfig::new();
    conf.tracing_level = tracing::Level::WARN;
    conf.log_class_loads = false;
    assert_eq!(
        conf.max_call_depth,
        NonZeroUsize::new(crate::DEFAULT_MAX_CALL_DEPTH)
    );
    let files: HashMap<String, Vec<u8>> = vec![("Deep", deep.build()), ("Main", main)]
        .into_iter()
        .map(|(name, data)| (name.to_owned(), data))
        .collect();
    let rt = Runtime::with_output(conf, files, Box::new(Output::default()));

    let thread = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(move || {
            let result = rt.run_main("Main").unwrap();
            expect_exception(&rt, result)
        })
        .unwrap();
    assert_eq!(thread.join().unwrap(), "java.lang.StackOverflowError");
}

#[test]
fn test_runtime_exceptions() {
    let null_length = main_class("NullLength", |_| {
        let mut code = Code::new(1, 1);
        code.op(opcode::ACONST_NULL)
            .op(opcode::ARRAYLENGTH)
            .op(opcode::POP)
            .op(opcode::RETURN);
        code
    });
    let out_of_bounds = main_class("OutOfBounds", |_| {
        let mut code = Code::new(2, 1);
        // new int[2]
        code.op(opcode::ICONST_2)
            .op_u8(opcode::NEWARRAY, 10)
            .op(opcode::ICONST_5)
            .op(opcode::IALOAD)
            .op(opcode::POP)
            .op(opcode::RETURN);
        code
    });
    let negative = main_class("Negative", |builder| {
        let string = builder.pool().class(STRING_NAME);
        let mut code = Code::new(1, 1);
        code.op(opcode::ICONST_M1)
            .op_u16(opcode::ANEWARRAY, string)
            .op(opcode::POP)
            .op(opcode::RETURN);
        code
    });
    let bad_cast = main_class("BadCast", |builder| {
        let string = builder.pool().class(STRING_NAME);
        let mut code = Code::new(2, 1);
        construct(builder, &mut code, OBJECT_NAME);
        code.op_u16(opcode::CHECKCAST, string)
            .op(opcode::POP)
            .op(opcode::RETURN);
        code
    });
    let bad_exit = main_class("BadExit", |builder| {
        let mut code = Code::new(2, 1);
        construct(builder, &mut code, OBJECT_NAME);
        // Exits before entering
        code.op(opcode::DUP)
            .op(opcode::MONITOREXIT)
            .op(opcode::MONITORENTER)
            .op(opcode::RETURN);
        code
    });

    let (rt, _) = runtime(vec![
        ("NullLength", null_length),
        ("OutOfBounds", out_of_bounds),
        ("Negative", negative),
        ("BadCast", bad_cast),
    ]);
    let cases = [
        (
            "NullLength",
            "java.lang.NullPointerException: Cannot read the array length because value is null",
        ),
        (
            "OutOfBounds",
            "java.lang.ArrayIndexOutOfBoundsException: Index 5 out of bounds for length 2",
        ),
        ("Negative", "java.lang.NegativeArraySizeException: -1"),
        (
            "BadCast",
            "java.lang.ClassCastException: class java.lang.Object cannot be cast to class java.lang.String",
        ),
    ];
    for (class, expected) in cases {
        let result = rt.run_main(class).unwrap();
        assert_eq!(expect_exception(&rt, result), expected, "running {}", class);
    }

    // The verifier tracks the monitor depth, so this never runs
    let (rt, _) = runtime(vec![("BadExit", bad_exit)]);
    let result = rt.run_main("BadExit").unwrap();
    assert!(expect_exception(&rt, result).starts_with("java.lang.VerifyError"));
}

#[test]
fn test_synchronized_block() {
    let main = main_class("Main", |builder| {
        let println_string = println(builder, "(Ljava/lang/String;)V");
        let locked = builder.pool().string("locked");
        let mut code = Code::new(2, 2);
        construct(builder, &mut code, OBJECT_NAME);
        code.op(opcode::DUP)
            .op(opcode::ASTORE_1)
            .op(opcode::MONITORENTER)
            .op_u16(opcode::LDC_W, locked)
            .op_u16(opcode::INVOKESTATIC, println_string)
            .op(opcode::ALOAD_1)
            .op(opcode::MONITOREXIT)
            .op(opcode::RETURN);
        code
    });

    let (rt, output) = runtime(vec![("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert!(matches!(result, EvalMethodValue::ReturnVoid));
    assert_eq!(output.contents(), "locked\n");
}

#[test]
fn test_string_natives() {
    let main = main_class("Main", |builder| {
        let println_int = println(builder, "(I)V");
        let println_string = println(builder, "(Ljava/lang/String;)V");
        let concat = builder.pool().method_ref(
            STRING_NAME,
            "concat",
            "(Ljava/lang/String;)Ljava/lang/String;",
        );
        let length = builder.pool().method_ref(STRING_NAME, "length", "()I");
        let value_of = builder
            .pool()
            .method_ref(STRING_NAME, "valueOf", "(I)Ljava/lang/String;");
        let ab = builder.pool().string("ab");
        let cd = builder.pool().string("cd");

        let mut code = Code::new(2, 1);
        code.op_u16(opcode::LDC_W, ab)
            .op_u16(opcode::LDC_W, cd)
            .op_u16(opcode::INVOKEVIRTUAL, concat)
            .op_u16(opcode::INVOKEVIRTUAL, length)
            .op_u16(opcode::INVOKESTATIC, println_int)
            .op_u8(opcode::BIPUSH, (-5i8).to_be_bytes()[0])
            .op_u16(opcode::INVOKESTATIC, value_of)
            .op_u16(opcode::LDC_W, ab)
            .op_u16(opcode::INVOKEVIRTUAL, concat)
            .op_u16(opcode::INVOKESTATIC, println_string)
            .op(opcode::RETURN);
        code
    });

    let (rt, output) = runtime(vec![("Main", main)]);
    rt.run_main("Main").unwrap();
    assert_eq!(output.contents(), "4\n-5ab\n");
}

#[test]
fn test_ill_typed_code_never_runs() {
    let main = main_class("Main", |builder| {
        let println_string = println(builder, "(Ljava/lang/String;)V");
        let ran = builder.pool().string("ran");
        let mut code = Code::new(1, 1);
        code.op_u16(opcode::LDC_W, ran)
            .op_u16(opcode::INVOKESTATIC, println_string)
            // An int where a string is expected
            .op(opcode::ICONST_0)
            .op_u16(opcode::INVOKESTATIC, println_string)
            .op(opcode::RETURN);
        code
    });

    let (rt, output) = runtime(vec![("Main", main)]);
    let result = rt.run_main("Main").unwrap();
    assert!(expect_exception(&rt, result).starts_with("java.lang.VerifyError"));
    assert_eq!(output.contents(), "");

    let main = rt.classes.names().find("Main").unwrap();
    assert!(matches!(rt.class_info(main).link, LinkState::Failed(_)));
    // The failure is remembered
    let result = rt.run_main("Main").unwrap();
    assert!(expect_exception(&rt, result).starts_with("java.lang.VerifyError"));
    assert_eq!(output.contents(), "");
}

#[test]
fn test_empty_class_has_empty_method_table() {
    let empty = ClassBuilder::new("Empty").build();
    let (rt, _) = runtime(vec![("Empty", empty)]);
    let class = rt.classes.get_or_load("Empty").unwrap();
    assert!(class.methods().is_empty());
    assert!(class.fields().is_empty());

    // Only what java.lang.Object declares
    let table = rt.link(class.id()).unwrap();
    let object = rt.classes.get_or_load(OBJECT_NAME).unwrap();
    assert_eq!(table.len(), 3);
    assert!(table
        .iter()
        .all(|(_, method_id)| method_id.decompose().0 == object.id()));
}

#[test]
fn test_diagnostics() {
    let (rt, _) = runtime(dispatch_classes());
    rt.run_main("Main").unwrap();

    let version = diagnostics::execute(&rt, "VM.version").unwrap();
    assert!(version.starts_with("basalt version "));

    let hierarchy = diagnostics::execute(&rt, "VM.class_hierarchy class=Derived").unwrap();
    assert!(hierarchy.starts_with("java.lang.Object\n  Base\n    Derived\n"));
    assert!(hierarchy.contains("implements Named"));
    let hierarchy = diagnostics::execute(&rt, "VM.class_hierarchy class=Base").unwrap();
    assert!(hierarchy.contains("loaded subtypes: Derived, Plain"));

    let methods = diagnostics::execute(&rt, "Class.print_methods class=Plain").unwrap();
    assert!(methods.contains("\tvalue()I -> Base.value()I\n"));
    let methods = diagnostics::execute(&rt, "Class.print_methods class=Derived").unwrap();
    assert!(methods.contains("\tid()I -> Derived.id()I\n"));

    let defaults = diagnostics::execute(&rt, "VM.default_methods").unwrap();
    assert!(defaults.contains("Plain.id()I: resolved to Named.id()I"));

    let classes = diagnostics::execute(&rt, "VM.classes").unwrap();
    assert!(classes.contains("Derived [linked, initialized]"));
    assert!(classes.contains("Named [linked, uninitialized]"));

    let histogram = diagnostics::execute(&rt, "GC.class_histogram").unwrap();
    assert!(histogram.contains("  Derived\n"));
    assert!(histogram.contains("  Plain\n"));

    let help = diagnostics::execute(&rt, "help GC.class_histogram").unwrap();
    assert!(help.starts_with("GC.class_histogram\n"));

    assert_eq!(
        diagnostics::execute(&rt, "VM.nothing"),
        Err(DiagnosticError::UnknownCommand("VM.nothing".to_owned()))
    );
    assert!(matches!(
        diagnostics::execute(&rt, "VM.class_hierarchy"),
        Err(DiagnosticError::Parse(_))
    ));
    assert_eq!(
        diagnostics::execute(&rt, "VM.class_hierarchy class=Missing"),
        Err(DiagnosticError::ClassNotLoaded("Missing".to_owned()))
    );
    // Looking a class up doesn't load it
    let missing = rt.classes.names().find("Missing");
    assert!(missing.and_then(|id| rt.classes.get(id)).is_none());
}
