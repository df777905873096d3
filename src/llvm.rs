//! [`Backend`] over LLVM 8, run with LLVM's IR interpreter.

use super::backend::{Backend, Execute, FloatOp, Predicate};
use super::error::{ErrorKind, Result};
use libc::{c_char, c_uint, c_void};
use llvm_sys::analysis::{LLVMVerifierFailureAction, LLVMVerifyFunction};
use llvm_sys::execution_engine::{self, LLVMExecutionEngineRef};
use llvm_sys::prelude::*;
use llvm_sys::{core, support, LLVMRealPredicate};
use log::debug;
use std::ffi::{CStr, CString};
use std::io::Write;
use std::ptr::null_mut;

#[no_mangle]
pub extern "C" fn putchard(x: f64) -> f64 {
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(&[x as u8]);
    let _ = stderr.flush();
    0.0
}

#[no_mangle]
pub extern "C" fn printd(x: f64) -> f64 {
    eprintln!("{:.6}", x);
    0.0
}

fn cstring(s: &str) -> CString {
    // Identifiers never contain NUL; anything else is truncated at it.
    CString::new(s).unwrap_or_else(|e| {
        let end = e.nul_position();
        CString::new(&s[..end]).unwrap_or_default()
    })
}

pub struct LlvmBackend {
    context: LLVMContextRef,
    module: LLVMModuleRef,
    builder: LLVMBuilderRef,
    engine: LLVMExecutionEngineRef,
    double_type: LLVMTypeRef,
}

impl LlvmBackend {
    pub fn new() -> Result<LlvmBackend> {
        unsafe {
            execution_engine::LLVMLinkInInterpreter();
            support::LLVMAddSymbol(
                b"putchard\0".as_ptr() as *const c_char,
                putchard as *mut c_void,
            );
            support::LLVMAddSymbol(b"printd\0".as_ptr() as *const c_char, printd as *mut c_void);

            let context = core::LLVMContextCreate();
            let module = core::LLVMModuleCreateWithNameInContext(
                b"my cool jit\0".as_ptr() as *const c_char,
                context,
            );
            let builder = core::LLVMCreateBuilderInContext(context);
            let double_type = core::LLVMDoubleTypeInContext(context);

            // The engine takes ownership of the module.
            let mut engine = null_mut();
            let mut message = null_mut();
            if execution_engine::LLVMCreateInterpreterForModule(&mut engine, module, &mut message)
                != 0
            {
                let text = CStr::from_ptr(message).to_string_lossy().into_owned();
                core::LLVMDisposeMessage(message);
                core::LLVMDisposeBuilder(builder);
                core::LLVMDisposeModule(module);
                core::LLVMContextDispose(context);
                return Err(ErrorKind::Engine(text).into());
            }

            Ok(LlvmBackend {
                context,
                module,
                builder,
                engine,
                double_type,
            })
        }
    }

    pub fn print_module(&self) -> String {
        unsafe { take_message(core::LLVMPrintModuleToString(self.module)) }
    }
}

unsafe fn take_message(message: *mut c_char) -> String {
    let text = CStr::from_ptr(message).to_string_lossy().into_owned();
    core::LLVMDisposeMessage(message);
    text
}

impl Drop for LlvmBackend {
    fn drop(&mut self) {
        unsafe {
            core::LLVMDisposeBuilder(self.builder);
            execution_engine::LLVMDisposeExecutionEngine(self.engine);
            core::LLVMContextDispose(self.context);
        }
    }
}

impl Backend for LlvmBackend {
    type Value = LLVMValueRef;
    type Block = LLVMBasicBlockRef;
    type Function = LLVMValueRef;
    type Slot = LLVMValueRef;

    fn get_function(&self, name: &str) -> Option<LLVMValueRef> {
        let name = cstring(name);
        let f = unsafe { core::LLVMGetNamedFunction(self.module, name.as_ptr()) };
        if f.is_null() {
            None
        } else {
            Some(f)
        }
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> LLVMValueRef {
        unsafe {
            let mut doubles = vec![self.double_type; params.len()];
            let ty = core::LLVMFunctionType(
                self.double_type,
                doubles.as_mut_ptr(),
                params.len() as c_uint,
                0,
            );
            let f = core::LLVMAddFunction(self.module, cstring(name).as_ptr(), ty);
            for (i, param) in params.iter().enumerate() {
                let arg = core::LLVMGetParam(f, i as c_uint);
                core::LLVMSetValueName(arg, cstring(param).as_ptr());
            }
            f
        }
    }

    fn arity(&self, function: LLVMValueRef) -> usize {
        unsafe { core::LLVMCountParams(function) as usize }
    }

    fn has_body(&self, function: LLVMValueRef) -> bool {
        unsafe { core::LLVMCountBasicBlocks(function) > 0 }
    }

    fn append_block(&mut self, function: LLVMValueRef, name: &str) -> LLVMBasicBlockRef {
        unsafe {
            core::LLVMAppendBasicBlockInContext(self.context, function, cstring(name).as_ptr())
        }
    }

    fn position_at_end(&mut self, block: LLVMBasicBlockRef) {
        unsafe { core::LLVMPositionBuilderAtEnd(self.builder, block) }
    }

    fn insert_block(&self) -> LLVMBasicBlockRef {
        unsafe { core::LLVMGetInsertBlock(self.builder) }
    }

    fn param(&self, function: LLVMValueRef, index: usize) -> LLVMValueRef {
        unsafe { core::LLVMGetParam(function, index as c_uint) }
    }

    fn entry_slot(&mut self, function: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe {
            let builder = core::LLVMCreateBuilderInContext(self.context);
            let entry = core::LLVMGetEntryBasicBlock(function);
            let first = core::LLVMGetFirstInstruction(entry);
            if first.is_null() {
                core::LLVMPositionBuilderAtEnd(builder, entry);
            } else {
                core::LLVMPositionBuilderBefore(builder, first);
            }
            let slot = core::LLVMBuildAlloca(builder, self.double_type, cstring(name).as_ptr());
            core::LLVMDisposeBuilder(builder);
            slot
        }
    }

    fn load(&mut self, slot: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe { core::LLVMBuildLoad(self.builder, slot, cstring(name).as_ptr()) }
    }

    fn store(&mut self, slot: LLVMValueRef, value: LLVMValueRef) {
        unsafe {
            core::LLVMBuildStore(self.builder, value, slot);
        }
    }

    fn constant(&mut self, value: f64) -> LLVMValueRef {
        unsafe { core::LLVMConstReal(self.double_type, value) }
    }

    fn float_op(&mut self, op: FloatOp, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            match op {
                FloatOp::Add => {
                    core::LLVMBuildFAdd(self.builder, lhs, rhs, b"addtmp\0".as_ptr() as *const _)
                }
                FloatOp::Sub => {
                    core::LLVMBuildFSub(self.builder, lhs, rhs, b"subtmp\0".as_ptr() as *const _)
                }
                FloatOp::Mul => {
                    core::LLVMBuildFMul(self.builder, lhs, rhs, b"multmp\0".as_ptr() as *const _)
                }
            }
        }
    }

    fn compare(
        &mut self,
        predicate: Predicate,
        lhs: LLVMValueRef,
        rhs: LLVMValueRef,
    ) -> LLVMValueRef {
        let (predicate, name): (_, &[u8]) = match predicate {
            Predicate::Lt => (LLVMRealPredicate::LLVMRealULT, b"cmptmp\0"),
            Predicate::Ne => (LLVMRealPredicate::LLVMRealONE, b"cond\0"),
        };
        unsafe { core::LLVMBuildFCmp(self.builder, predicate, lhs, rhs, name.as_ptr() as *const _) }
    }

    fn bool_to_float(&mut self, value: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            core::LLVMBuildUIToFP(
                self.builder,
                value,
                self.double_type,
                b"booltmp\0".as_ptr() as *const _,
            )
        }
    }

    fn call(&mut self, callee: LLVMValueRef, args: &[LLVMValueRef]) -> LLVMValueRef {
        let mut args = args.to_vec();
        unsafe {
            core::LLVMBuildCall(
                self.builder,
                callee,
                args.as_mut_ptr(),
                args.len() as c_uint,
                b"calltmp\0".as_ptr() as *const _,
            )
        }
    }

    fn br(&mut self, target: LLVMBasicBlockRef) {
        unsafe {
            core::LLVMBuildBr(self.builder, target);
        }
    }

    fn cond_br(&mut self, cond: LLVMValueRef, then: LLVMBasicBlockRef, otherwise: LLVMBasicBlockRef) {
        unsafe {
            core::LLVMBuildCondBr(self.builder, cond, then, otherwise);
        }
    }

    fn phi(&mut self, incoming: &[(LLVMValueRef, LLVMBasicBlockRef)]) -> LLVMValueRef {
        let (mut values, mut blocks): (Vec<_>, Vec<_>) = incoming.iter().cloned().unzip();
        unsafe {
            let phi = core::LLVMBuildPhi(self.builder, self.double_type, b"iftmp\0".as_ptr() as *const _);
            core::LLVMAddIncoming(
                phi,
                values.as_mut_ptr(),
                blocks.as_mut_ptr(),
                values.len() as c_uint,
            );
            phi
        }
    }

    fn ret(&mut self, value: LLVMValueRef) {
        unsafe {
            core::LLVMBuildRet(self.builder, value);
        }
    }

    fn discard_function(&mut self, function: LLVMValueRef, keep_declaration: bool) {
        unsafe {
            if keep_declaration {
                debug!("discarding body of function");
                loop {
                    let block = core::LLVMGetFirstBasicBlock(function);
                    if block.is_null() {
                        break;
                    }
                    core::LLVMDeleteBasicBlock(block);
                }
            } else {
                debug!("discarding function");
                core::LLVMDeleteFunction(function);
            }
        }
    }

    fn verify_function(&self, function: LLVMValueRef) -> Result<()> {
        let failed = unsafe {
            LLVMVerifyFunction(function, LLVMVerifierFailureAction::LLVMReturnStatusAction) != 0
        };
        if failed {
            let name = unsafe { CStr::from_ptr(core::LLVMGetValueName(function)) };
            let name = name.to_string_lossy().into_owned();
            return Err(ErrorKind::Verify {
                function: name,
                message: "function failed LLVM verification".to_owned(),
            }
            .into());
        }
        Ok(())
    }

    fn print_function(&self, function: LLVMValueRef) -> String {
        let text = unsafe { take_message(core::LLVMPrintValueToString(function)) };
        text.trim().to_owned()
    }
}

impl Execute for LlvmBackend {
    fn execute(&mut self, function: LLVMValueRef) -> Result<f64> {
        if !self.has_body(function) {
            let name = unsafe { CStr::from_ptr(core::LLVMGetValueName(function)) };
            return Err(ErrorKind::NotExecutable(name.to_string_lossy().into_owned()).into());
        }
        unsafe {
            let result = execution_engine::LLVMRunFunction(self.engine, function, 0, null_mut());
            let value = execution_engine::LLVMGenericValueToFloat(self.double_type, result);
            execution_engine::LLVMDisposeGenericValue(result);
            Ok(value)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Options;
    use crate::toplevel::{Outcome, Session};

    #[test]
    fn test_evaluate() {
        let mut s = Session::new(LlvmBackend::new().unwrap(), Options::default());
        let outcomes = s.evaluate("def f(x) if x < 3 then 1 else x * f(x - 1); f(5)");
        assert!(matches!(outcomes[0], Ok(Outcome::Definition { .. })));
        assert!(matches!(outcomes[1], Ok(Outcome::Expression { value: Some(v), .. }) if v == 60.0));
    }
}
