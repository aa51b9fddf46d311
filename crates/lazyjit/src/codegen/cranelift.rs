//! Cranelift lowering for the unit IR.
//!
//! # Calling Convention
//!
//! Every function takes `arity` i64 parameters and returns one i64 using the
//! target's default C convention, so compiled functions, trampolines and host
//! functions are interchangeable behind a pointer. Booleans are 0 or 1.

use std::collections::{HashMap, HashSet};

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, MemFlags, Signature, Type, UserFuncName, Value};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{DataDescription, DataId, FuncId, Linkage as ModuleLinkage, Module};
use lazyjit_core::{CompilationUnit, Expr, JitError, JitResult, Linkage, Mangler};
use smallvec::SmallVec;
use tracing::trace;

use super::{CodeGenerator, DefinedSymbol, DefinitionId, ObjectCode};

/// The default code generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CraneliftCodeGen;

impl CraneliftCodeGen {
    pub fn new() -> Self {
        Self
    }
}

impl CodeGenerator for CraneliftCodeGen {
    fn compile(
        &self,
        unit: &CompilationUnit,
        mangler: &Mangler,
        module: &mut JITModule,
    ) -> JitResult<ObjectCode> {
        UnitLowering::new(unit, mangler, module).lower()
    }
}

/// Signature of an IR function with `arity` parameters.
pub(crate) fn int_signature(module: &JITModule, arity: usize) -> Signature {
    let mut sig = module.make_signature();
    for _ in 0..arity {
        sig.params.push(AbiParam::new(I64));
    }
    sig.returns.push(AbiParam::new(I64));
    sig
}

fn module_linkage(linkage: Linkage) -> ModuleLinkage {
    match linkage {
        Linkage::Export => ModuleLinkage::Export,
        Linkage::Internal => ModuleLinkage::Local,
    }
}

// ---------------------------------------------------------------------------
// Unit lowering
// ---------------------------------------------------------------------------

struct UnitLowering<'a> {
    unit: &'a CompilationUnit,
    mangler: &'a Mangler,
    module: &'a mut JITModule,
    functions: HashMap<&'a str, FuncId>,
    data: HashMap<&'a str, DataId>,
    code: ObjectCode,
}

impl<'a> UnitLowering<'a> {
    fn new(unit: &'a CompilationUnit, mangler: &'a Mangler, module: &'a mut JITModule) -> Self {
        Self {
            unit,
            mangler,
            module,
            functions: HashMap::new(),
            data: HashMap::new(),
            code: ObjectCode::new(unit.name.clone()),
        }
    }

    fn structural(&self, reason: impl std::fmt::Display) -> JitError {
        JitError::structural(&self.unit.name, reason.to_string())
    }

    fn lower(mut self) -> JitResult<ObjectCode> {
        self.declare()?;

        let ptr_type = self.module.target_config().pointer_type();
        let mut ctx = self.module.make_context();
        let mut builder_ctx = FunctionBuilderContext::new();

        for function in &self.unit.functions {
            let func_id = self.functions[function.name.as_str()];
            ctx.func.signature = int_signature(self.module, function.arity);
            ctx.func.name = UserFuncName::user(0, func_id.as_u32());

            {
                let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
                let entry = builder.create_block();
                builder.append_block_params_for_function_params(entry);
                builder.switch_to_block(entry);
                builder.seal_block(entry);
                let params = builder.block_params(entry).to_vec();

                let mut emitter = BodyEmitter {
                    builder,
                    module: &mut *self.module,
                    functions: &self.functions,
                    data: &self.data,
                    params,
                    ptr_type,
                    unit_name: &self.unit.name,
                    function_name: &function.name,
                };
                let result = emitter.emit(&function.body)?;
                emitter.builder.ins().return_(&[result]);
                emitter.builder.finalize();
            }

            self.module
                .define_function(func_id, &mut ctx)
                .map_err(|e| self.structural(format!("function '{}': {e}", function.name)))?;
            self.module.clear_context(&mut ctx);
            trace!(unit = %self.unit.name, function = %function.name, "function lowered");
        }

        Ok(self.code)
    }

    /// Declares imports, defines globals and declares functions.
    ///
    /// Externals that no body references are skipped so that linking never
    /// demands a symbol the code cannot reach.
    fn declare(&mut self) -> JitResult<()> {
        let unit = self.unit;
        let mut referenced_functions = HashSet::new();
        let mut referenced_globals = HashSet::new();
        for function in &unit.functions {
            referenced_functions.extend(function.body.referenced_functions());
            referenced_globals.extend(function.body.referenced_globals());
        }

        for ext in &unit.extern_functions {
            if !referenced_functions.contains(ext.name.as_str()) || unit.function(&ext.name).is_some()
            {
                continue;
            }
            let mangled = self.mangler.mangle(&ext.name);
            let sig = int_signature(self.module, ext.arity);
            let id = self
                .module
                .declare_function(&mangled, ModuleLinkage::Import, &sig)
                .map_err(|e| self.structural(e))?;
            self.functions.insert(ext.name.as_str(), id);
            self.code.imports.push(mangled);
        }

        for ext in &unit.extern_globals {
            if !referenced_globals.contains(ext.name.as_str()) || unit.global(&ext.name).is_some() {
                continue;
            }
            let mangled = self.mangler.mangle(&ext.name);
            let id = self
                .module
                .declare_data(&mangled, ModuleLinkage::Import, true, false)
                .map_err(|e| self.structural(e))?;
            self.data.insert(ext.name.as_str(), id);
            self.code.imports.push(mangled);
        }

        for global in &unit.globals {
            let mangled = self.mangler.mangle(&global.name);
            let id = self
                .module
                .declare_data(&mangled, module_linkage(global.linkage), true, false)
                .map_err(|e| self.structural(e))?;
            let mut desc = DataDescription::new();
            desc.define(global.initial.to_ne_bytes().to_vec().into_boxed_slice());
            desc.set_align(8);
            self.module
                .define_data(id, &desc)
                .map_err(|e| self.structural(format!("global '{}': {e}", global.name)))?;
            self.data.insert(global.name.as_str(), id);
            self.code.definitions.push(DefinedSymbol {
                name: mangled,
                id: DefinitionId::Data(id),
                exported: global.linkage.is_exported(),
            });
        }

        for function in &unit.functions {
            let mangled = self.mangler.mangle(&function.name);
            let sig = int_signature(self.module, function.arity);
            let id = self
                .module
                .declare_function(&mangled, module_linkage(function.linkage), &sig)
                .map_err(|e| self.structural(e))?;
            self.functions.insert(function.name.as_str(), id);
            self.code.definitions.push(DefinedSymbol {
                name: mangled,
                id: DefinitionId::Function(id),
                exported: function.linkage.is_exported(),
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Expression emission
// ---------------------------------------------------------------------------

struct BodyEmitter<'f, 'm> {
    builder: FunctionBuilder<'f>,
    module: &'m mut JITModule,
    functions: &'m HashMap<&'m str, FuncId>,
    data: &'m HashMap<&'m str, DataId>,
    params: Vec<Value>,
    ptr_type: Type,
    unit_name: &'m str,
    function_name: &'m str,
}

impl BodyEmitter<'_, '_> {
    fn error(&self, reason: impl std::fmt::Display) -> JitError {
        JitError::structural(
            self.unit_name,
            format!("function '{}': {reason}", self.function_name),
        )
    }

    fn emit(&mut self, expr: &Expr) -> JitResult<Value> {
        use Expr::*;
        let value = match expr {
            Int(n) => self.builder.ins().iconst(I64, *n),
            Param(idx) => *self
                .params
                .get(*idx)
                .ok_or_else(|| self.error(format!("parameter {idx} out of range")))?,

            Add(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                self.builder.ins().iadd(l, r)
            }
            Sub(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                self.builder.ins().isub(l, r)
            }
            Mul(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                self.builder.ins().imul(l, r)
            }
            Div(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                let (divisor, by_zero) = self.checked_divisor(l, r);
                let quotient = self.builder.ins().sdiv(l, divisor);
                let zero = self.builder.ins().iconst(I64, 0);
                self.builder.ins().select(by_zero, zero, quotient)
            }
            Rem(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                let (divisor, _) = self.checked_divisor(l, r);
                self.builder.ins().srem(l, divisor)
            }
            Neg(e) => {
                let v = self.emit(e)?;
                self.builder.ins().ineg(v)
            }

            Eq(l, r) => self.emit_compare(IntCC::Equal, l, r)?,
            Ne(l, r) => self.emit_compare(IntCC::NotEqual, l, r)?,
            Lt(l, r) => self.emit_compare(IntCC::SignedLessThan, l, r)?,
            Le(l, r) => self.emit_compare(IntCC::SignedLessThanOrEqual, l, r)?,
            Gt(l, r) => self.emit_compare(IntCC::SignedGreaterThan, l, r)?,
            Ge(l, r) => self.emit_compare(IntCC::SignedGreaterThanOrEqual, l, r)?,

            And(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                let l = self.truthy(l);
                let r = self.truthy(r);
                let both = self.builder.ins().band(l, r);
                self.builder.ins().uextend(I64, both)
            }
            Or(l, r) => {
                let (l, r) = self.emit_pair(l, r)?;
                let l = self.truthy(l);
                let r = self.truthy(r);
                let either = self.builder.ins().bor(l, r);
                self.builder.ins().uextend(I64, either)
            }
            Not(e) => {
                let v = self.emit(e)?;
                let zero = self.builder.ins().icmp_imm(IntCC::Equal, v, 0);
                self.builder.ins().uextend(I64, zero)
            }

            If {
                cond,
                then_expr,
                else_expr,
            } => self.emit_if(cond, then_expr, else_expr)?,

            Call { callee, args } => {
                let func_id = *self
                    .functions
                    .get(callee.as_str())
                    .ok_or_else(|| self.error(format!("call to undeclared function '{callee}'")))?;
                let args = self.emit_args(args)?;
                let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
                let call = self.builder.ins().call(func_ref, &args);
                self.builder.inst_results(call)[0]
            }
            CallIndirect { slot, args } => {
                let args = self.emit_args(args)?;
                let slot = self.builder.ins().iconst(self.ptr_type, *slot as i64);
                let target = self
                    .builder
                    .ins()
                    .atomic_load(self.ptr_type, MemFlags::trusted(), slot);
                let sig = int_signature(self.module, args.len());
                let sig_ref = self.builder.import_signature(sig);
                let call = self.builder.ins().call_indirect(sig_ref, target, &args);
                self.builder.inst_results(call)[0]
            }

            LoadGlobal(name) => {
                let addr = self.global_address(name)?;
                self.builder.ins().load(I64, MemFlags::trusted(), addr, 0)
            }
            StoreGlobal { name, value } => {
                let v = self.emit(value)?;
                let addr = self.global_address(name)?;
                self.builder.ins().store(MemFlags::trusted(), v, addr, 0);
                v
            }
            GlobalAddr(name) => {
                let addr = self.global_address(name)?;
                self.widen_pointer(addr)
            }
            FuncAddr(name) => {
                let func_id = *self
                    .functions
                    .get(name.as_str())
                    .ok_or_else(|| self.error(format!("address of undeclared function '{name}'")))?;
                let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
                let addr = self.builder.ins().func_addr(self.ptr_type, func_ref);
                self.widen_pointer(addr)
            }

            Seq(exprs) => {
                let mut last = None;
                for e in exprs {
                    last = Some(self.emit(e)?);
                }
                match last {
                    Some(v) => v,
                    None => self.builder.ins().iconst(I64, 0),
                }
            }
        };
        Ok(value)
    }

    fn emit_pair(&mut self, l: &Expr, r: &Expr) -> JitResult<(Value, Value)> {
        let l = self.emit(l)?;
        let r = self.emit(r)?;
        Ok((l, r))
    }

    fn emit_args(&mut self, args: &[Expr]) -> JitResult<SmallVec<[Value; 8]>> {
        let mut values = SmallVec::new();
        for arg in args {
            values.push(self.emit(arg)?);
        }
        Ok(values)
    }

    fn emit_compare(&mut self, cc: IntCC, l: &Expr, r: &Expr) -> JitResult<Value> {
        let (l, r) = self.emit_pair(l, r)?;
        let flag = self.builder.ins().icmp(cc, l, r);
        Ok(self.builder.ins().uextend(I64, flag))
    }

    /// Replaces a divisor that would trap (zero, or -1 under `i64::MIN`) by 1.
    ///
    /// With divisor 1 the quotient is the dividend, which is the wrapping
    /// result of `MIN / -1`, and the remainder is 0. Returns the flag for a
    /// zero divisor so `Div` can yield 0.
    fn checked_divisor(&mut self, l: Value, r: Value) -> (Value, Value) {
        let by_zero = self.builder.ins().icmp_imm(IntCC::Equal, r, 0);
        let l_is_min = self.builder.ins().icmp_imm(IntCC::Equal, l, i64::MIN);
        let r_is_neg_one = self.builder.ins().icmp_imm(IntCC::Equal, r, -1);
        let overflow = self.builder.ins().band(l_is_min, r_is_neg_one);
        let trapping = self.builder.ins().bor(by_zero, overflow);
        let one = self.builder.ins().iconst(I64, 1);
        let divisor = self.builder.ins().select(trapping, one, r);
        (divisor, by_zero)
    }

    /// `v != 0` as an i8 flag.
    fn truthy(&mut self, v: Value) -> Value {
        self.builder.ins().icmp_imm(IntCC::NotEqual, v, 0)
    }

    fn emit_if(&mut self, cond: &Expr, then_expr: &Expr, else_expr: &Expr) -> JitResult<Value> {
        let c = self.emit(cond)?;
        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let merge = self.builder.create_block();
        self.builder.append_block_param(merge, I64);

        self.builder.ins().brif(c, then_block, &[], else_block, &[]);

        self.builder.switch_to_block(then_block);
        self.builder.seal_block(then_block);
        let t = self.emit(then_expr)?;
        self.builder.ins().jump(merge, &[t]);

        self.builder.switch_to_block(else_block);
        self.builder.seal_block(else_block);
        let e = self.emit(else_expr)?;
        self.builder.ins().jump(merge, &[e]);

        self.builder.switch_to_block(merge);
        self.builder.seal_block(merge);
        Ok(self.builder.block_params(merge)[0])
    }

    fn global_address(&mut self, name: &str) -> JitResult<Value> {
        let data_id = *self
            .data
            .get(name)
            .ok_or_else(|| self.error(format!("undeclared global '{name}'")))?;
        let gv = self.module.declare_data_in_func(data_id, self.builder.func);
        Ok(self.builder.ins().global_value(self.ptr_type, gv))
    }

    fn widen_pointer(&mut self, addr: Value) -> Value {
        if self.ptr_type == I64 {
            addr
        } else {
            self.builder.ins().uextend(I64, addr)
        }
    }
}
