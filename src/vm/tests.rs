//! Language tests for the VM: one group per opcode family, plus the helpers
//! the per-module test blocks share.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use crate::error::{GearsError, RuntimeError};
use crate::interop::{HostClass, HostType, HostValue};
use crate::lexer::Scanner;

use super::chunk::FunctionProto;
use super::compiler::Compiler;
use super::config::VmConfig;
use super::heap::Object;
use super::value::Value;
use super::vm::Vm;

pub(crate) fn compile_source(source: &str) -> Rc<FunctionProto> {
    let tokens = Scanner::new(source).scan_tokens().expect("lexer error");
    match Compiler::compile(tokens) {
        Ok(function) => function,
        Err(errs) => panic!("compile errors in {:?}:\n{}", source, errs),
    }
}

/// Compile-time diagnostics for `source`, in order; empty when it compiles.
pub(crate) fn compile_errors(source: &str) -> Vec<String> {
    let tokens = Scanner::new(source).scan_tokens().expect("lexer error");
    match Compiler::compile(tokens) {
        Ok(_) => Vec::new(),
        Err(errs) => errs.iter().map(|e| e.message.clone()).collect(),
    }
}

/// Run `source` and return the printed lines.
pub(crate) fn run_captured(source: &str) -> Vec<String> {
    let mut vm = Vm::with_config(VmConfig::captured());
    if let Err(err) = vm.interpret_source(source) {
        panic!("{:?} failed: {}", source, err);
    }
    vm.output
}

/// Run `source`, expecting it to compile and then fail at runtime.
pub(crate) fn run_err(source: &str) -> RuntimeError {
    let mut vm = Vm::with_config(VmConfig::captured());
    match vm.interpret_source(source) {
        Err(GearsError::Runtime(err)) => err,
        Err(other) => panic!("expected a runtime error from {:?}, got {}", source, other),
        Ok(()) => panic!("expected a runtime error from {:?}", source),
    }
}

fn type_error_message(err: RuntimeError) -> String {
    match err {
        RuntimeError::TypeError { message, .. } => message,
        other => panic!("expected a type error, got {}", other),
    }
}

// --- Literals, constants, pop ---

#[test]
fn test_literals() {
    assert_eq!(
        run_captured("print 1; print 2.5; print true; print false; print nil; print \"s\";"),
        vec!["1", "2.5", "true", "false", "nil", "s"]
    );
}

#[test]
fn test_string_literal_with_nul_byte_is_rejected() {
    assert_eq!(
        compile_errors("print \"a\0b\"; print \"ok\";"),
        vec!["String constant contains a NUL byte."]
    );
}

#[test]
fn test_expression_statement_pops() {
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.interpret_source("1 + 2; \"x\"; nil;").unwrap();
    assert!(vm.stack.is_empty());
}

// --- Arithmetic and comparison ---

#[test]
fn test_arithmetic_matches_host_floats() {
    let pairs = [
        (1.5, 2.25),
        (10.0, 3.0),
        (0.1, 0.2),
        (-7.0, 2.0),
        (1e10, 3.0),
        (0.0, 5.0),
    ];
    for (a, b) in pairs {
        let source = format!(
            "print ({a}) + ({b}); print ({a}) - ({b}); print ({a}) * ({b}); print ({a}) / ({b});"
        );
        let expected = vec![
            format!("{}", a + b),
            format!("{}", a - b),
            format!("{}", a * b),
            format!("{}", a / b),
        ];
        assert_eq!(run_captured(&source), expected, "operands {} and {}", a, b);
    }
}

#[test]
fn test_division_by_zero_is_infinity() {
    assert_eq!(run_captured("print 1 / 0; print -1 / 0;"), vec!["inf", "-inf"]);
}

#[test]
fn test_comparisons() {
    assert_eq!(
        run_captured("print 1 < 2; print 2 < 1; print 2 > 1; print 1 >= 1; print 1 <= 0;"),
        vec!["true", "false", "true", "true", "false"]
    );
}

#[test]
fn test_arithmetic_type_errors() {
    assert_eq!(
        type_error_message(run_err("print 1 - \"a\";")),
        "Operands must be numbers."
    );
    assert_eq!(
        type_error_message(run_err("print nil < 1;")),
        "Operands must be numbers."
    );
    assert_eq!(
        type_error_message(run_err("print -\"a\";")),
        "Operand must be a number."
    );
}

#[test]
fn test_string_concatenation() {
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.interpret_source("var s = \"ab\" + \"cd\"; print s;").unwrap();
    assert_eq!(vm.output, vec!["abcd"]);
    let s = vm.global("s").unwrap();
    assert_eq!(vm.heap.as_str(s), Some("abcd"));

    assert_eq!(
        type_error_message(run_err("print \"a\" + 1;")),
        "Operands must be two numbers or two strings."
    );
    assert!(matches!(run_err("print 1 + \"a\";"), RuntimeError::TypeError { .. }));
}

// --- Equality and truthiness ---

#[test]
fn test_truthiness_table() {
    assert_eq!(
        run_captured("print !nil; print !false; print !0; print !\"\";"),
        vec!["true", "true", "false", "false"]
    );
}

#[test]
fn test_equality_is_per_variant() {
    assert_eq!(
        run_captured(
            "print 1 == 1; print nil == nil; print true == true; print 1 == true; print nil == false; print 0 == nil;"
        ),
        vec!["true", "true", "true", "false", "false", "false"]
    );
}

#[test]
fn test_object_pointers_never_compare_equal() {
    assert_eq!(
        run_captured("print \"a\" == \"a\"; class A {} print A == A; print A != A;"),
        vec!["false", "false", "true"]
    );
}

// --- Variables ---

#[test]
fn test_globals() {
    assert_eq!(
        run_captured("var a = 1; var b; print b; a = a + 1; print a; var a = 10; print a;"),
        vec!["nil", "2", "10"]
    );
}

#[test]
fn test_undefined_globals() {
    assert!(matches!(
        run_err("print missing;"),
        RuntimeError::UndefinedVariable(ref name, _) if name == "missing"
    ));
    assert!(matches!(
        run_err("missing = 1;"),
        RuntimeError::UndefinedVariable(ref name, _) if name == "missing"
    ));
}

#[test]
fn test_locals_and_nested_shadowing() {
    assert_eq!(
        run_captured("{ var x = 1; { var x = 2; print x; } print x; x = 3; print x; }"),
        vec!["2", "1", "3"]
    );
}

#[test]
fn test_redeclared_local_is_compile_error() {
    assert_eq!(
        compile_errors("{ var x = 1; var x = 2; }"),
        vec!["Cannot redefine a local variable in the same scope.".to_string()]
    );
    assert!(compile_errors("{ var x = 1; { var x = 2; } }").is_empty());
}

#[test]
fn test_local_in_own_initializer() {
    assert_eq!(
        compile_errors("{ var x = x; }"),
        vec!["Cannot read local variable in its own initializer.".to_string()]
    );
}

// --- Control flow ---

#[test]
fn test_jumps_and_loops() {
    assert_eq!(
        run_captured(
            r#"
            var n = 0;
            while (n < 3) n = n + 1;
            print n;
            for (var i = 0; i < 5; i = i + 2) print i;
            if (n == 3) print "three"; else print "other";
            "#
        ),
        vec!["3", "0", "2", "4", "three"]
    );
}

#[test]
fn test_nested_loops_leave_stack_balanced() {
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.interpret_source(
        "var total = 0; for (var i = 0; i < 3; i = i + 1) { for (var j = 0; j < 3; j = j + 1) { var k = i * j; total = total + k; } } print total;",
    )
    .unwrap();
    assert_eq!(vm.output, vec!["9"]);
    assert!(vm.stack.is_empty());
}

// --- Functions and calls ---

#[test]
fn test_function_calls_and_returns() {
    assert_eq!(
        run_captured(
            r#"
            fun add(a, b) { return a + b; }
            fun noop() {}
            print add(1, 2);
            print noop();
            print add;
            print clock;
            "#
        ),
        vec!["3", "nil", "<fn add>", "<native fn clock>"]
    );
}

#[test]
fn test_recursion() {
    assert_eq!(
        run_captured("fun fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(10);"),
        vec!["3628800"]
    );
}

#[test]
fn test_local_functions_are_closures() {
    assert_eq!(
        run_captured("{ fun twice(x) { return x * 2; } print twice(21); }"),
        vec!["42"]
    );
}

// --- Closures and upvalues ---

#[test]
fn test_counter_closure_shares_one_upvalue() {
    let source = r#"
        fun makeCounter() {
            var i = 0;
            fun count() { i = i + 1; return i; }
            return count;
        }
        var c = makeCounter();
        print c();
        print c();
    "#;
    assert_eq!(run_captured(source), vec!["1", "2"]);
}

#[test]
fn test_separate_counters_do_not_share_state() {
    let source = r#"
        fun makeCounter() {
            var i = 0;
            fun count() { i = i + 1; return i; }
            return count;
        }
        var a = makeCounter();
        var b = makeCounter();
        print a();
        print a();
        print b();
    "#;
    assert_eq!(run_captured(source), vec!["1", "2", "1"]);
}

#[test]
fn test_sibling_closures_see_the_same_variable() {
    let source = r#"
        var get;
        fun make() {
            var x = 0;
            fun inc() { x = x + 1; }
            fun read() { return x; }
            get = read;
            return inc;
        }
        var inc = make();
        inc();
        inc();
        print get();
    "#;
    assert_eq!(run_captured(source), vec!["2"]);
}

#[test]
fn test_block_exit_closes_upvalue() {
    let source = r#"
        var f;
        {
            var a = "before";
            fun show() { return a; }
            a = "after";
            f = show;
        }
        print f();
    "#;
    assert_eq!(run_captured(source), vec!["after"]);
}

#[test]
fn test_upvalue_threads_through_nesting() {
    let source = r#"
        fun outer() {
            var x = "x";
            fun middle() {
                fun inner() { return x; }
                return inner;
            }
            return middle;
        }
        print outer()()();
    "#;
    assert_eq!(run_captured(source), vec!["x"]);
}

#[test]
fn test_open_upvalues_are_closed_after_return() {
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.interpret_source("fun f() { var a = 1; fun g() { return a; } return g; } var g = f(); print g();")
        .unwrap();
    assert!(vm.open_upvalues.is_none());
    assert_eq!(vm.output, vec!["1"]);
}

// --- Classes ---

#[test]
fn test_class_and_instance_rendering() {
    assert_eq!(
        run_captured("class Box {} print Box; print Box();"),
        vec!["Box", "<Box instance>"]
    );
}

#[test]
fn test_initializer() {
    assert_eq!(
        run_captured(
            r#"
            class P {
                init(x) { this.x = x; if (x > 10) return; this.small = true; }
            }
            var p = P(3);
            print p.x;
            print p.small;
            print p.init(50).x;
            "#
        ),
        vec!["3", "true", "50"]
    );
}

#[test]
fn test_init_arity_is_checked() {
    assert!(matches!(
        run_err("class P { init(a, b) {} } P(1);"),
        RuntimeError::WrongArity {
            expected: 2,
            got: 1,
            ..
        }
    ));
}

#[test]
fn test_methods_and_this() {
    assert_eq!(
        run_captured(
            r#"
            class Counter {
                init() { this.n = 0; }
                bump() { this.n = this.n + 1; return this; }
            }
            var c = Counter();
            c.bump().bump().bump();
            print c.n;
            "#
        ),
        vec!["3"]
    );
}

#[test]
fn test_field_shadows_method() {
    assert_eq!(
        run_captured(
            r#"
            class A { m() { return "method"; } }
            fun f() { return "field"; }
            var a = A();
            print a.m();
            a.m = f;
            print a.m();
            print A().m();
            "#
        ),
        vec!["method", "field", "method"]
    );
    assert!(matches!(
        run_err("class A { m() {} } var a = A(); a.m = 1; a.m();"),
        RuntimeError::NotCallable(_)
    ));
}

#[test]
fn test_this_captured_by_closure() {
    assert_eq!(
        run_captured(
            r#"
            class Thing {
                getCallback() {
                    fun localFunction() { return this; }
                    return localFunction;
                }
            }
            print Thing().getCallback()();
            "#
        ),
        vec!["<Thing instance>"]
    );
}

#[test]
fn test_inheritance_copies_methods() {
    assert_eq!(
        run_captured(
            r#"
            class A { m() { return "A.m"; } }
            class B < A {}
            print B().m();
            "#
        ),
        vec!["A.m"]
    );
}

#[test]
fn test_inheritance_is_a_snapshot() {
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.interpret_source("class A { m() { return \"m\"; } } class B < A {}")
        .unwrap();

    // Grow A's method table after B was declared.
    let a = match vm.global("A") {
        Some(Value::Object(ptr)) => ptr,
        other => panic!("A is not a class: {:?}", other),
    };
    match vm.heap.get_mut(a).unwrap() {
        Object::Class(class) => {
            let m = class.methods["m"];
            class.methods.insert("late".to_string(), m);
        }
        other => panic!("expected a class, got {}", other.kind()),
    }

    vm.interpret_source("print A().late();").unwrap();
    assert_eq!(vm.output, vec!["m"]);

    let err = vm.interpret_source("B().late();").unwrap_err();
    assert!(matches!(
        err,
        GearsError::Runtime(RuntimeError::UndefinedProperty(ref name, _)) if name == "late"
    ));
}

#[test]
fn test_super_calls() {
    assert_eq!(
        run_captured(
            r#"
            class A {
                greet() { return "A"; }
                name() { return "a"; }
            }
            class B < A {
                greet() { return "B+" + super.greet(); }
                bound() { var g = super.greet; return g(); }
            }
            class C < B {
                greet() { return "C+" + super.greet(); }
            }
            print B().greet();
            print B().bound();
            print C().greet();
            print C().name();
            "#
        ),
        vec!["B+A", "A", "C+B+A", "a"]
    );
}

#[test]
fn test_super_init() {
    assert_eq!(
        run_captured(
            r#"
            class Base { init(x) { this.x = x; } }
            class Derived < Base { init(x, y) { super.init(x); this.y = y; } }
            var d = Derived(1, 2);
            print d.x + d.y;
            "#
        ),
        vec!["3"]
    );
}

#[test]
fn test_undefined_method() {
    assert!(matches!(
        run_err("class A {} A().nope();"),
        RuntimeError::UndefinedProperty(ref name, _) if name == "nope"
    ));
    assert!(matches!(
        run_err("class A {} class B < A { m() { return super.nope(); } } B().m();"),
        RuntimeError::UndefinedProperty(ref name, _) if name == "nope"
    ));
    assert_eq!(
        type_error_message(run_err("var s = \"x\"; s.len();")),
        "Only instances have methods."
    );
}

// --- Host interop ---

struct Anchor {
    id: f64,
}

struct Point {
    x: f64,
    y: f64,
    label: Option<String>,
    anchor: Rc<std::cell::RefCell<Anchor>>,
}

fn norm(p: &Point) -> f64 {
    (p.x * p.x + p.y * p.y).sqrt()
}

fn host_vm() -> (Vm, Value) {
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.register_host_class(HostClass::<Anchor>::new().number_field(
        "id",
        |a| a.id,
        |a, v| a.id = v,
    ));
    vm.register_host_class(
        HostClass::<Point>::new()
            .number_field("x", |p| p.x, |p, v| p.x = v)
            .number_field("y", |p| p.y, |p, v| p.y = v)
            .string_field("label", |p| p.label.clone(), |p, v| p.label = v)
            .object_field("anchor", |p| p.anchor.clone())
            .number_property("norm", Some(norm as fn(&Point) -> f64), None)
            .method("scale", &[HostType::Number], HostType::Void, |p, args| {
                if let [HostValue::Number(k)] = args {
                    p.x *= k;
                    p.y *= k;
                }
                HostValue::Nil
            })
            .method("sum", &[], HostType::Number, |p, _| HostValue::Number(p.x + p.y))
            .method(
                "isAnchor",
                &[HostType::object::<Anchor>()],
                HostType::Bool,
                |_, args| HostValue::Bool(matches!(args, [HostValue::Object(o)] if o.is::<Anchor>())),
            ),
    );
    let point = vm
        .wrap_host(Point {
            x: 3.0,
            y: 4.0,
            label: None,
            anchor: Rc::new(std::cell::RefCell::new(Anchor { id: 7.0 })),
        })
        .unwrap();
    vm.globals.insert("p".to_string(), point);
    (vm, point)
}

#[test]
fn test_host_members() {
    let (mut vm, point) = host_vm();
    vm.interpret_source(
        r#"
        print p.x;
        print p.norm;
        p.scale(2);
        print p.sum();
        print p.label;
        p.label = "hi";
        print p.label;
        var s = p.sum;
        print s();
        print p.anchor.id;
        print p.isAnchor(p.anchor);
        print p;
        "#,
    )
    .unwrap();
    assert_eq!(
        vm.output,
        vec!["3", "5", "14", "nil", "hi", "14", "7", "true", "<host Point>"]
    );
    assert_eq!(vm.with_host::<Point, _>(point, |p| p.x).unwrap(), 6.0);
    assert_eq!(
        vm.with_host::<Point, _>(point, |p| p.label.clone()).unwrap(),
        Some("hi".to_string())
    );
}

#[test]
fn test_host_nil_writes_null_string() {
    let (mut vm, point) = host_vm();
    vm.interpret_source("p.label = \"x\"; p.label = nil;").unwrap();
    assert_eq!(vm.with_host::<Point, _>(point, |p| p.label.clone()).unwrap(), None);
}

#[test]
fn test_host_errors() {
    let (mut vm, _) = host_vm();
    let interop = |result: Result<(), GearsError>| {
        matches!(result, Err(GearsError::Runtime(RuntimeError::Interop { .. })))
    };
    assert!(interop(vm.interpret_source("p.x = \"str\";")));
    assert!(interop(vm.interpret_source("p.norm = 1;")));
    assert!(interop(vm.interpret_source("p.scale(\"a\");")));
    assert!(interop(vm.interpret_source("p.isAnchor(p);")));
    assert!(matches!(
        vm.interpret_source("p.scale();"),
        Err(GearsError::Runtime(RuntimeError::WrongArity { expected: 1, got: 0, .. }))
    ));
    assert!(matches!(
        vm.interpret_source("print p.missing;"),
        Err(GearsError::Runtime(RuntimeError::UndefinedProperty(..)))
    ));
}

#[test]
fn test_host_method_result_must_match_declared_type() {
    struct Ticket;
    let mut vm = Vm::with_config(VmConfig::captured());
    vm.register_host_class(
        HostClass::<Ticket>::new()
            .method("id", &[], HostType::Number, |_, _| {
                HostValue::Str(Some("not a number".into()))
            })
            .method("label", &[], HostType::String, |_, _| HostValue::Str(None)),
    );
    let ticket = vm.wrap_host(Ticket).unwrap();
    vm.globals.insert("t".to_string(), ticket);

    match vm.interpret_source("print t.id();") {
        Err(GearsError::Runtime(err @ RuntimeError::Interop { .. })) => assert!(err
            .to_string()
            .contains("Unsupported native conversion from string to number.")),
        other => panic!("expected interop error, got {:?}", other),
    }
    assert!(vm.output.is_empty());

    vm.interpret_source("print t.label();").unwrap();
    assert_eq!(vm.output, vec!["nil"]);
}

#[test]
fn test_unregistered_host_type() {
    struct Unknown;
    let mut vm = Vm::new();
    assert!(matches!(
        vm.wrap_host(Unknown),
        Err(RuntimeError::Interop { .. })
    ));
}

// --- Diagnostics ---

#[test]
fn test_deep_nesting_is_a_compile_error() {
    let parens = format!("print {}1{};", "(".repeat(5000), ")".repeat(5000));
    assert_eq!(compile_errors(&parens), vec!["Expression nested too deeply."]);

    let negations = format!("print {}1;", "-".repeat(5000));
    assert_eq!(compile_errors(&negations), vec!["Expression nested too deeply."]);

    let blocks = format!("{}{}", "{".repeat(5000), "}".repeat(5000));
    assert_eq!(compile_errors(&blocks)[0], "Statement nested too deeply.");

    let functions = format!("{}{}", "fun f() {".repeat(500), "}".repeat(500));
    assert_eq!(compile_errors(&functions)[0], "Function nested too deeply.");
}

#[test]
fn test_moderate_nesting_still_runs() {
    let source = format!("print {}1{};", "(".repeat(100), ")".repeat(100));
    assert_eq!(run_captured(&source), vec!["1"]);
    let source = format!("{}print 2;{}", "{".repeat(100), "}".repeat(100));
    assert_eq!(run_captured(&source), vec!["2"]);
}

#[test]
fn test_trace_execution_does_not_change_results() {
    let config = VmConfig {
        trace_execution: true,
        ..VmConfig::captured()
    };
    let mut vm = Vm::with_config(config);
    vm.interpret_source("fun f(a) { return a * 2; } print f(4);").unwrap();
    assert_eq!(vm.output, vec!["8"]);
}

#[test]
fn test_frame_limit_is_configurable() {
    let config = VmConfig {
        max_frames: 4,
        ..VmConfig::captured()
    };
    let mut vm = Vm::with_config(config);
    let source = "fun depth(n) { if (n == 0) return 0; return depth(n - 1); }";
    vm.interpret_source(&format!("{} print depth(2);", source)).unwrap();
    assert!(matches!(
        vm.interpret_source("print depth(5);"),
        Err(GearsError::Runtime(RuntimeError::StackOverflow(_)))
    ));
}
