//! Gears: a small dynamically-typed, class-based scripting language.
//!
//! Source is compiled in a single pass straight to bytecode and executed on a
//! stack VM with closures, classes and single inheritance. Rust values can be
//! exposed to scripts through the [`interop`] registry.

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::collapsible_match)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::redundant_closure)]
#![allow(clippy::too_many_arguments)]

pub mod error;
pub mod interop;
pub mod lexer;
pub mod span;
pub mod vm;

use std::rc::Rc;

use error::GearsError;
use lexer::Scanner;
use vm::{Compiler, FunctionProto};

pub use interop::{HostClass, HostObject, HostType, HostValue};
pub use vm::{Value, Vm, VmConfig};

/// Compile source code to a top-level function without running it.
pub fn compile(source: &str) -> Result<Rc<FunctionProto>, GearsError> {
    let tokens = Scanner::new(source).scan_tokens()?;
    Ok(Compiler::compile(tokens)?)
}

/// Run a program, printing to stdout.
pub fn run(source: &str) -> Result<(), GearsError> {
    run_with_config(source, VmConfig::from_env()).map(|_| ())
}

/// Run a program on a fresh VM built from `config`, returning the VM so
/// callers can inspect globals and captured output.
pub fn run_with_config(source: &str, config: VmConfig) -> Result<Vm, GearsError> {
    let function = compile(source)?;
    let mut vm = Vm::with_config(config);
    vm.interpret(function)?;
    Ok(vm)
}

/// Compile source and render its bytecode listing.
pub fn disassemble(source: &str) -> Result<String, GearsError> {
    let function = compile(source)?;
    Ok(vm::disassemble(&function))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_with_config_returns_vm() {
        let vm = run_with_config("var x = 40 + 2; print x;", VmConfig::captured()).unwrap();
        assert_eq!(vm.output, vec!["42"]);
        assert_eq!(vm.global("x"), Some(Value::Number(42.0)));
    }

    #[test]
    fn test_compile_reports_every_error() {
        match compile("var = 1; print ; var ok = 2;") {
            Err(GearsError::Compile(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("expected compile errors, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_lexer_errors_surface() {
        assert!(matches!(compile("var x = @;"), Err(GearsError::Lexer(_))));
    }

    #[test]
    fn test_disassemble_lists_script() {
        let text = disassemble("print 1 + 2;").unwrap();
        assert!(text.starts_with("== <script>"));
        assert!(text.contains("ADD"));
        assert!(text.contains("PRINT"));
    }
}
