//! Code generation: AST → a textual virtual-machine instruction listing.
//!
//! Builds its own symbol table during a single depth-first walk (each phase
//! owns its own table; nothing is carried over from the analyzer), handing
//! out a concrete global-memory address to every declared scalar, array,
//! parameter, and function return slot as it is encountered. The listing is
//! three sections concatenated together: a zero-init prelude for every
//! declared cell, the `start … stop`-bracketed main program, and the
//! callable bodies, which are placed after `stop` and are reachable only
//! via `call` — never by fallthrough.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::CodegenError;
use crate::symbol::{Symbol, SymbolKind, SymbolTable};

pub fn generate(program: &Program) -> Result<String, CodegenError> {
    let mut gen = Codegen::new();
    gen.compile_program(program)?;
    Ok(gen.finish())
}

#[derive(Debug, Clone)]
struct RoutineParam {
    addr: usize,
    by_reference: bool,
}

#[derive(Debug, Clone)]
struct RoutineInfo {
    entry_label: String,
    params: Vec<RoutineParam>,
    return_addr: Option<usize>,
    return_type: Option<ScalarType>,
}

struct Codegen {
    table: SymbolTable,
    next_addr: usize,
    prelude: Vec<String>,
    main: Vec<String>,
    routine_code: Vec<String>,
    routines: HashMap<String, RoutineInfo>,
    label_counter: usize,
    /// (function name, return-slot address), innermost last.
    current_function: Vec<(String, usize)>,
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

impl Codegen {
    fn new() -> Self {
        Codegen {
            table: SymbolTable::new(),
            next_addr: 0,
            prelude: Vec::new(),
            main: Vec::new(),
            routine_code: Vec::new(),
            routines: HashMap::new(),
            label_counter: 0,
            current_function: Vec::new(),
        }
    }

    fn alloc(&mut self, n: usize) -> usize {
        let base = self.next_addr;
        self.next_addr += n;
        base
    }

    fn label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{prefix}{}", self.label_counter)
    }

    fn finish(self) -> String {
        let mut lines = Vec::new();
        lines.extend(self.prelude);
        lines.push("start".to_string());
        lines.extend(self.main);
        lines.push("stop".to_string());
        lines.extend(self.routine_code);
        lines.join("\n")
    }

    fn compile_program(&mut self, program: &Program) -> Result<(), CodegenError> {
        self.register_declarations(&program.block.declarations)?;
        let mut main = Vec::new();
        for stmt in &program.block.compound {
            self.compile_stmt(stmt, &mut main)?;
        }
        self.main = main;
        Ok(())
    }

    // ---- declarations ----------------------------------------------------

    fn register_declarations(&mut self, decls: &[Declaration]) -> Result<(), CodegenError> {
        for decl in decls {
            match decl {
                Declaration::Var(v) => self.register_var_decl(v),
                Declaration::Function(f) => self.register_function(f)?,
                Declaration::Procedure(p) => self.register_procedure(p)?,
            }
        }
        Ok(())
    }

    fn register_var_decl(&mut self, decl: &VarDecl) {
        for name in &decl.names {
            let addr = self.alloc(decl.var_type.size());
            let mut sym = Symbol::variable(name.clone(), decl.var_type);
            sym.address = Some(addr);
            self.table.add_symbol(sym);
            self.emit_zero_init(decl.var_type, addr);
        }
    }

    /// Every declared cell — scalar, array, parameter, or return slot — is
    /// zero-initialized once, here, before `start`; the VM has no implicit
    /// zero-initialization and a cell read before any write halts with
    /// `OutOfRange`.
    fn emit_zero_init(&mut self, ty: Type, addr: usize) {
        match ty {
            Type::Scalar(_) => {
                self.prelude.push("pushi 0".to_string());
                self.prelude.push(format!("storeg {addr}"));
            }
            Type::Array { .. } => {
                let size = ty.size();
                self.prelude.push(format!("pushi {size}"));
                self.prelude.push("allocn".to_string());
                self.prelude.push(format!("storeg {addr}"));
                for i in 0..size {
                    self.prelude.push(format!("pushst {addr}"));
                    self.prelude.push("pushi 0".to_string());
                    self.prelude.push(format!("store {i}"));
                }
            }
        }
    }

    fn register_params(&mut self, params: &[Param]) -> Vec<RoutineParam> {
        let mut result = Vec::new();
        for p in params {
            for name in &p.names {
                let addr = self.alloc(p.param_type.size());
                self.emit_zero_init(p.param_type, addr);
                let mut sym = Symbol::parameter(name.clone(), p.param_type, p.by_reference);
                sym.address = Some(addr);
                self.table.add_symbol(sym);
                result.push(RoutineParam {
                    addr,
                    by_reference: p.by_reference,
                });
            }
        }
        result
    }

    fn register_function(&mut self, decl: &FunctionDecl) -> Result<(), CodegenError> {
        let entry_label = format!("FUNC_{}", decl.name.to_uppercase());
        self.table.add_symbol(Symbol::callable(
            decl.name.clone(),
            SymbolKind::Function,
            Some(Type::Scalar(decl.return_type)),
            decl.params.clone(),
        ));

        self.table.enter_scope();
        let params = self.register_params(&decl.params);

        let return_addr = self.alloc(1);
        self.emit_zero_init(Type::Scalar(decl.return_type), return_addr);
        let mut return_sym = Symbol::variable(decl.name.clone(), Type::Scalar(decl.return_type));
        return_sym.address = Some(return_addr);
        self.table.add_symbol(return_sym);

        self.routines.insert(
            decl.name.to_lowercase(),
            RoutineInfo {
                entry_label: entry_label.clone(),
                params,
                return_addr: Some(return_addr),
                return_type: Some(decl.return_type),
            },
        );

        self.current_function.push((decl.name.clone(), return_addr));
        self.register_declarations(&decl.body.declarations)?;
        let mut body = vec![format!("{entry_label}:")];
        for stmt in &decl.body.compound {
            self.compile_stmt(stmt, &mut body)?;
        }
        body.push("return".to_string());
        self.routine_code.extend(body);
        self.current_function.pop();
        self.table.exit_scope();
        Ok(())
    }

    fn register_procedure(&mut self, decl: &ProcedureDecl) -> Result<(), CodegenError> {
        let entry_label = format!("PROC_{}", decl.name.to_uppercase());
        self.table.add_symbol(Symbol::callable(
            decl.name.clone(),
            SymbolKind::Procedure,
            None,
            decl.params.clone(),
        ));

        self.table.enter_scope();
        let params = self.register_params(&decl.params);

        self.routines.insert(
            decl.name.to_lowercase(),
            RoutineInfo {
                entry_label: entry_label.clone(),
                params,
                return_addr: None,
                return_type: None,
            },
        );

        self.register_declarations(&decl.body.declarations)?;
        let mut body = vec![format!("{entry_label}:")];
        for stmt in &decl.body.compound {
            self.compile_stmt(stmt, &mut body)?;
        }
        body.push("return".to_string());
        self.routine_code.extend(body);
        self.table.exit_scope();
        Ok(())
    }

    // ---- statements --------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt, out: &mut Vec<String>) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Compound(stmts) => {
                for s in stmts {
                    self.compile_stmt(s, out)?;
                }
                Ok(())
            }
            Stmt::Assignment { target, value, line } => self.compile_assignment(target, value, *line, out),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let lelse = self.label("ELSE");
                let lend = self.label("ENDIF");
                self.compile_expr(cond, out)?;
                out.push(format!("jz {lelse}"));
                self.compile_stmt(then_branch, out)?;
                out.push(format!("jump {lend}"));
                out.push(format!("{lelse}:"));
                if let Some(e) = else_branch {
                    self.compile_stmt(e, out)?;
                }
                out.push(format!("{lend}:"));
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                let lstart = self.label("WHILE");
                let lend = self.label("ENDWHILE");
                out.push(format!("{lstart}:"));
                self.compile_expr(cond, out)?;
                out.push(format!("jz {lend}"));
                self.compile_stmt(body, out)?;
                out.push(format!("jump {lstart}"));
                out.push(format!("{lend}:"));
                Ok(())
            }
            Stmt::For {
                var,
                init,
                limit,
                direction,
                body,
                line,
            } => self.compile_for(var, init, limit, *direction, body, *line, out),
            Stmt::ProcedureCall { name, args, line } => self.compile_call(name, args, *line, out, false),
            Stmt::Writeln { args, newline, .. } => self.compile_writeln(args, *newline, out),
            Stmt::Readln { targets, line } => self.compile_readln(targets, *line, out),
            Stmt::Halt { .. } => {
                out.push("stop".to_string());
                Ok(())
            }
            Stmt::FunctionReturn { value, line } => self.compile_function_return(value, *line, out),
            Stmt::Empty => Ok(()),
        }
    }

    fn compile_assignment(
        &mut self,
        target: &LValue,
        value: &Expr,
        line: usize,
        out: &mut Vec<String>,
    ) -> Result<(), CodegenError> {
        match target {
            LValue::Variable { name, .. } => {
                let addr = self.scalar_addr(name, line)?;
                self.compile_expr(value, out)?;
                out.push(format!("storeg {addr}"));
                Ok(())
            }
            LValue::ArrayElement { name, index, .. } => self.compile_indexed_store(name, index, value, line, out),
        }
    }

    fn compile_for(
        &mut self,
        var: &str,
        init: &Expr,
        limit: &Expr,
        direction: ForDirection,
        body: &Stmt,
        line: usize,
        out: &mut Vec<String>,
    ) -> Result<(), CodegenError> {
        let var_addr = self.scalar_addr(var, line)?;
        let limit_addr = self.alloc(1);

        self.compile_expr(init, out)?;
        out.push(format!("storeg {var_addr}"));
        self.compile_expr(limit, out)?;
        out.push(format!("storeg {limit_addr}"));

        let lstart = self.label("FOR");
        let lend = self.label("ENDFOR");
        out.push(format!("{lstart}:"));
        out.push(format!("pushg {var_addr}"));
        out.push(format!("pushg {limit_addr}"));
        out.push(
            match direction {
                ForDirection::To => "sup",
                ForDirection::Downto => "inf",
            }
            .to_string(),
        );
        out.push("not".to_string());
        out.push(format!("jz {lend}"));
        self.compile_stmt(body, out)?;
        out.push(format!("pushg {var_addr}"));
        out.push(format!("pushi {}", match direction {
            ForDirection::To => 1,
            ForDirection::Downto => -1,
        }));
        out.push("add".to_string());
        out.push(format!("storeg {var_addr}"));
        out.push(format!("jump {lstart}"));
        out.push(format!("{lend}:"));
        Ok(())
    }

    fn compile_writeln(&mut self, args: &[Expr], newline: bool, out: &mut Vec<String>) -> Result<(), CodegenError> {
        for arg in args {
            self.compile_writeln_arg(arg, out)?;
        }
        if newline {
            out.push("writeln".to_string());
        }
        Ok(())
    }

    fn compile_writeln_arg(&mut self, arg: &Expr, out: &mut Vec<String>) -> Result<(), CodegenError> {
        if let Expr::FormattedOutput { value, decimals, .. } = arg {
            self.compile_expr(value, out)?;
            let ty = self.infer_type(value)?;
            if ty == ScalarType::Real && decimals.is_some() {
                // No width-aware format opcode exists; `strf`'s fixed
                // two-decimal formatting is the closest the VM offers.
                out.push("strf".to_string());
                out.push("writes".to_string());
            } else {
                out.push(self.write_opcode(ty).to_string());
            }
            return Ok(());
        }
        self.compile_expr(arg, out)?;
        let ty = self.infer_type(arg)?;
        out.push(self.write_opcode(ty).to_string());
        Ok(())
    }

    fn write_opcode(&self, ty: ScalarType) -> &'static str {
        match ty {
            ScalarType::Integer | ScalarType::Boolean => "writei",
            ScalarType::Real => "writef",
            ScalarType::StringT | ScalarType::Char => "writes",
        }
    }

    fn compile_readln(&mut self, targets: &[LValue], line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        for target in targets {
            self.compile_readln_target(target, line, out)?;
        }
        Ok(())
    }

    fn compile_readln_target(
        &mut self,
        target: &LValue,
        line: usize,
        out: &mut Vec<String>,
    ) -> Result<(), CodegenError> {
        match target {
            LValue::Variable { name, .. } => {
                let sym = self.lookup(name, line)?;
                let ty = match sym.ty {
                    Some(Type::Scalar(s)) => s,
                    _ => return Err(CodegenError::internal(format!("'{name}' cannot be a readln target"))),
                };
                let addr = sym.address.expect("declared variable always has an address");
                out.push("read".to_string());
                self.push_conversion(ty, line, out)?;
                out.push(format!("storeg {addr}"));
                Ok(())
            }
            LValue::ArrayElement { name, index, .. } => {
                let sym = self.lookup(name, line)?;
                let (lower, element) = match sym.ty {
                    Some(Type::Array { lower, element, .. }) => (lower, element),
                    _ => return Err(CodegenError::internal(format!("'{name}' cannot be indexed"))),
                };
                let addr = sym.address.expect("array symbol always has an address");
                out.push(format!("pushst {addr}"));
                self.compile_expr(index, out)?;
                if lower != 0 {
                    out.push(format!("pushi {lower}"));
                    out.push("sub".to_string());
                }
                out.push("read".to_string());
                self.push_conversion(element, line, out)?;
                out.push("storen".to_string());
                Ok(())
            }
        }
    }

    /// Converts the string `read` just pushed to the target's scalar type.
    /// `string`/`char` targets take the line as-is; there is no opcode to
    /// read a single boolean token.
    fn push_conversion(&self, ty: ScalarType, line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        match ty {
            ScalarType::Integer => out.push("atoi".to_string()),
            ScalarType::Real => out.push("atof".to_string()),
            ScalarType::StringT | ScalarType::Char => {}
            ScalarType::Boolean => {
                return Err(CodegenError::internal(format!("line {line}: cannot read a boolean value")))
            }
        }
        Ok(())
    }

    fn compile_function_return(&mut self, value: &Expr, line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        let (_, addr) = self
            .current_function
            .last()
            .cloned()
            .ok_or_else(|| CodegenError::internal(format!("line {line}: return statement outside of a function")))?;
        self.compile_expr(value, out)?;
        out.push(format!("storeg {addr}"));
        Ok(())
    }

    // ---- calls ---------------------------------------------------------

    /// Shared by a bare `id(args)` statement and a function call used as an
    /// expression. Arguments are written directly into the callee's
    /// parameter cells with `storeg` immediately before `pusha`/`call`,
    /// rather than pushed on the operand stack and popped by a prologue:
    /// every parameter's address is already known at the call site (one
    /// whole-program symbol table), so there is no need to thread the
    /// return address underneath still-unconsumed arguments.
    fn compile_call(
        &mut self,
        name: &str,
        args: &[Expr],
        line: usize,
        out: &mut Vec<String>,
        as_expression: bool,
    ) -> Result<(), CodegenError> {
        let info = self
            .routines
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| CodegenError::internal(format!("undeclared routine '{name}' at line {line}")))?;

        if args.len() != info.params.len() {
            return Err(CodegenError::internal(format!(
                "line {line}: '{name}' expects {} argument(s), found {}",
                info.params.len(),
                args.len()
            )));
        }

        for (arg, param) in args.iter().zip(&info.params) {
            self.compile_expr(arg, out)?;
            out.push(format!("storeg {}", param.addr));
        }
        out.push(format!("pusha {}", info.entry_label));
        out.push("call".to_string());

        // Copy-out: the fixed calling convention gives each callable a
        // private parameter cell rather than true aliasing, so reference
        // semantics are approximated by copying the callee's final value
        // back into the caller's argument once the call returns. Sound as
        // long as nothing recurses or aliases the same cell concurrently,
        // which this convention already rules out.
        for (arg, param) in args.iter().zip(&info.params) {
            if param.by_reference {
                out.push(format!("pushg {}", param.addr));
                self.store_back(arg, line, out)?;
            }
        }

        if as_expression {
            let ret_addr = info
                .return_addr
                .ok_or_else(|| CodegenError::internal(format!("line {line}: '{name}' is a procedure and has no value")))?;
            out.push(format!("pushg {ret_addr}"));
        }
        Ok(())
    }

    fn store_back(&mut self, arg: &Expr, line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        match arg {
            Expr::Variable { name, .. } => {
                let addr = self.scalar_addr(name, line)?;
                out.push(format!("storeg {addr}"));
                Ok(())
            }
            Expr::ArrayAccess { name, index, .. } => {
                let sym = self.lookup(name, line)?;
                let (addr, lower) = match sym.ty {
                    Some(Type::Array { lower, .. }) => (
                        sym.address.expect("array symbol always has an address"),
                        lower,
                    ),
                    _ => return Err(CodegenError::internal(format!("'{name}' cannot be indexed"))),
                };
                // The reference value is already on top of the stack;
                // stash it so the index computation doesn't have to run
                // underneath it, then restore it for `storen`.
                let tmp = self.alloc(1);
                out.push(format!("storeg {tmp}"));
                out.push(format!("pushst {addr}"));
                self.compile_expr(index, out)?;
                if lower != 0 {
                    out.push(format!("pushi {lower}"));
                    out.push("sub".to_string());
                }
                out.push(format!("pushg {tmp}"));
                out.push("storen".to_string());
                Ok(())
            }
            _ => Err(CodegenError::internal(format!(
                "line {line}: reference argument must be a variable or array element"
            ))),
        }
    }

    // ---- expressions -----------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr, out: &mut Vec<String>) -> Result<(), CodegenError> {
        match expr {
            Expr::IntLiteral { value, .. } => {
                out.push(format!("pushi {value}"));
                Ok(())
            }
            Expr::RealLiteral { value, .. } => {
                out.push(format!("pushf {value}"));
                Ok(())
            }
            Expr::StringLiteral { value, .. } => {
                out.push(format!("pushs {}", quote_string(value)));
                Ok(())
            }
            Expr::BoolLiteral { value, .. } => {
                out.push(format!("pushi {}", i32::from(*value)));
                Ok(())
            }
            Expr::Variable { name, line } => {
                let addr = self.scalar_addr(name, *line)?;
                out.push(format!("pushg {addr}"));
                Ok(())
            }
            Expr::ArrayAccess { name, index, line } => self.compile_indexed_load(name, index, *line, out),
            Expr::BinaryOp { op, lhs, rhs, line } => self.compile_binary(*op, lhs, rhs, *line, out),
            Expr::UnaryOp { op, operand, line } => self.compile_unary(*op, operand, *line, out),
            Expr::FunctionCall { name, args, line } => self.compile_call(name, args, *line, out, true),
            Expr::Length { arg, line } => self.compile_length(arg, *line, out),
            Expr::FormattedOutput { value, .. } => self.compile_expr(value, out),
        }
    }

    fn compile_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
        out: &mut Vec<String>,
    ) -> Result<(), CodegenError> {
        if op == BinOp::Add {
            let l = self.infer_type(lhs)?;
            let r = self.infer_type(rhs)?;
            if l == ScalarType::StringT || r == ScalarType::StringT {
                return Err(CodegenError::internal(format!(
                    "line {line}: string concatenation has no supported instruction on this virtual machine"
                )));
            }
        }
        self.compile_expr(lhs, out)?;
        self.compile_expr(rhs, out)?;
        let mnemonic = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::FDiv => "fdiv",
            BinOp::Mod => "mod",
            BinOp::Eq | BinOp::Neq => "equal",
            BinOp::Lt => "inf",
            BinOp::Le => "infeq",
            BinOp::Gt => "sup",
            BinOp::Ge => "supeq",
            BinOp::And => "and",
            BinOp::Or => "or",
        };
        out.push(mnemonic.to_string());
        if op == BinOp::Neq {
            out.push("not".to_string());
        }
        Ok(())
    }

    fn compile_unary(&mut self, op: UnOp, operand: &Expr, _line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        self.compile_expr(operand, out)?;
        match op {
            UnOp::Not => out.push("not".to_string()),
            UnOp::Neg => {
                out.push("pushi -1".to_string());
                out.push("mul".to_string());
            }
        }
        Ok(())
    }

    /// Array length is a compile-time constant (bounds are static). String
    /// length has no backing opcode — the instruction set has no way to
    /// measure a `Value::Str` — so it is rejected here rather than silently
    /// mis-lowered.
    fn compile_length(&mut self, arg: &Expr, line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        if let Expr::Variable { name, .. } = arg {
            if let Some(Type::Array { lower, upper, .. }) = self.table.lookup(name).and_then(|s| s.ty) {
                out.push(format!("pushi {}", (upper - lower + 1).max(0)));
                return Ok(());
            }
        }
        Err(CodegenError::internal(format!(
            "line {line}: 'length' of a string has no supported instruction on this virtual machine"
        )))
    }

    fn compile_indexed_load(&mut self, name: &str, index: &Expr, line: usize, out: &mut Vec<String>) -> Result<(), CodegenError> {
        let sym = self.lookup(name, line)?;
        match sym.ty {
            Some(Type::Array { lower, .. }) => {
                let addr = sym.address.expect("array symbol always has an address");
                out.push(format!("pushst {addr}"));
                self.compile_expr(index, out)?;
                if lower != 0 {
                    out.push(format!("pushi {lower}"));
                    out.push("sub".to_string());
                }
                out.push("loadn".to_string());
                Ok(())
            }
            Some(Type::Scalar(ScalarType::StringT)) => Err(CodegenError::internal(format!(
                "line {line}: indexing a string has no supported instruction on this virtual machine"
            ))),
            _ => Err(CodegenError::internal(format!("'{name}' cannot be indexed"))),
        }
    }

    fn compile_indexed_store(
        &mut self,
        name: &str,
        index: &Expr,
        value: &Expr,
        line: usize,
        out: &mut Vec<String>,
    ) -> Result<(), CodegenError> {
        let sym = self.lookup(name, line)?;
        match sym.ty {
            Some(Type::Array { lower, .. }) => {
                let addr = sym.address.expect("array symbol always has an address");
                out.push(format!("pushst {addr}"));
                self.compile_expr(index, out)?;
                if lower != 0 {
                    out.push(format!("pushi {lower}"));
                    out.push("sub".to_string());
                }
                // The value must land on top of the stack last, so `storen`
                // (which pops value, then index, then base) sees the right
                // operand order.
                self.compile_expr(value, out)?;
                out.push("storen".to_string());
                Ok(())
            }
            _ => Err(CodegenError::internal(format!("'{name}' cannot be indexed for assignment"))),
        }
    }

    // ---- shared lookups ----------------------------------------------

    fn lookup(&self, name: &str, line: usize) -> Result<Symbol, CodegenError> {
        self.table
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodegenError::internal(format!("undeclared identifier '{name}' at line {line}")))
    }

    fn scalar_addr(&self, name: &str, line: usize) -> Result<usize, CodegenError> {
        let sym = self.lookup(name, line)?;
        sym.address
            .ok_or_else(|| CodegenError::internal(format!("'{name}' has no assigned address")))
    }

    fn symbol_scalar_type(&self, name: &str, line: usize) -> Result<ScalarType, CodegenError> {
        match self.lookup(name, line)?.ty {
            Some(Type::Scalar(s)) => Ok(s),
            _ => Err(CodegenError::internal(format!("'{name}' is not a scalar value"))),
        }
    }

    fn indexed_scalar_type(&self, name: &str, line: usize) -> Result<ScalarType, CodegenError> {
        match self.lookup(name, line)?.ty {
            Some(Type::Array { element, .. }) => Ok(element),
            Some(Type::Scalar(ScalarType::StringT)) => Ok(ScalarType::Char),
            _ => Err(CodegenError::internal(format!("'{name}' cannot be indexed"))),
        }
    }

    fn infer_type(&self, expr: &Expr) -> Result<ScalarType, CodegenError> {
        match expr {
            Expr::IntLiteral { .. } => Ok(ScalarType::Integer),
            Expr::RealLiteral { .. } => Ok(ScalarType::Real),
            Expr::StringLiteral { .. } => Ok(ScalarType::StringT),
            Expr::BoolLiteral { .. } => Ok(ScalarType::Boolean),
            Expr::Variable { name, line } => self.symbol_scalar_type(name, *line),
            Expr::ArrayAccess { name, line, .. } => self.indexed_scalar_type(name, *line),
            Expr::BinaryOp { op, lhs, rhs, .. } => self.infer_binary_type(*op, lhs, rhs),
            Expr::UnaryOp { operand, .. } => self.infer_type(operand),
            Expr::FunctionCall { name, line, .. } => {
                let info = self
                    .routines
                    .get(&name.to_lowercase())
                    .ok_or_else(|| CodegenError::internal(format!("undeclared routine '{name}' at line {line}")))?;
                info.return_type
                    .ok_or_else(|| CodegenError::internal(format!("'{name}' is a procedure, not a function")))
            }
            Expr::Length { .. } => Ok(ScalarType::Integer),
            Expr::FormattedOutput { value, .. } => self.infer_type(value),
        }
    }

    fn infer_binary_type(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<ScalarType, CodegenError> {
        match op {
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::And | BinOp::Or => {
                Ok(ScalarType::Boolean)
            }
            BinOp::FDiv => Ok(ScalarType::Real),
            BinOp::Div | BinOp::Mod => Ok(ScalarType::Integer),
            BinOp::Add | BinOp::Sub | BinOp::Mul => {
                let l = self.infer_type(lhs)?;
                let r = self.infer_type(rhs)?;
                if l == ScalarType::Real || r == ScalarType::Real {
                    Ok(ScalarType::Real)
                } else {
                    Ok(ScalarType::Integer)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::{analyzer, parser};

    fn gen_src(src: &str) -> String {
        let (tokens, errors) = Lexer::new(src).tokenize();
        assert!(errors.is_empty(), "lex errors: {errors:?}");
        let (program, table) = parser::parse(tokens).expect("parse should succeed");
        analyzer::analyze(&program, table).expect("analysis should succeed");
        generate(&program).expect("codegen should succeed")
    }

    #[test]
    fn hello_world_brackets_main_with_start_and_stop() {
        let listing = gen_src("program Hello; begin writeln('Hello, World!') end.");
        assert!(listing.contains("start"));
        assert!(listing.contains("stop"));
        assert!(listing.contains("pushs \"Hello, World!\""));
        assert!(listing.contains("writes"));
        assert!(listing.contains("writeln"));
    }

    #[test]
    fn write_without_newline_omits_writeln_opcode() {
        let listing = gen_src("program P; begin write('x') end.");
        assert!(!listing.lines().any(|l| l.trim() == "writeln"));
    }

    #[test]
    fn for_loop_uses_not_then_jz_never_bare_jnz() {
        let listing = gen_src("program P; var i: integer; begin for i := 1 to 3 do write(i) end.");
        assert!(listing.contains("sup"));
        assert!(listing.contains("not"));
        assert!(!listing.contains("jnz"));
    }

    #[test]
    fn array_element_access_uses_pushst_and_indexed_ops() {
        let listing = gen_src(
            "program P; var a: array[1..3] of integer; i: integer; \
             begin for i := 1 to 3 do a[i] := i * i; for i := 1 to 3 do write(a[i]) end.",
        );
        assert!(listing.contains("allocn"));
        assert!(listing.contains("storen"));
        assert!(listing.contains("loadn"));
    }

    #[test]
    fn function_call_emits_linkage_and_argument_cells() {
        let listing = gen_src(
            "program P; \
             function square(n: integer): integer; begin square := n * n end; \
             var r: integer; \
             begin r := square(5) end.",
        );
        assert!(listing.contains("FUNC_SQUARE:"));
        assert!(listing.contains("pusha FUNC_SQUARE"));
        assert!(listing.lines().any(|l| l.trim() == "call"));
        assert!(listing.lines().any(|l| l.trim() == "return"));
    }

    #[test]
    fn reference_parameter_copies_result_back_to_caller_argument() {
        let listing = gen_src(
            "program P; var a: integer; \
             procedure inc(var x: integer); begin x := x + 1 end; \
             begin a := 1; inc(a) end.",
        );
        let call_idx = listing.lines().position(|l| l.trim() == "call").unwrap();
        let after: Vec<_> = listing.lines().skip(call_idx + 1).take(2).collect();
        assert_eq!(after[0].trim().split_whitespace().next(), Some("pushg"));
        assert_eq!(after[1].trim().split_whitespace().next(), Some("storeg"));
    }

    #[test]
    fn string_length_has_no_vm_instruction_and_is_rejected() {
        let (tokens, errors) =
            Lexer::new("program P; var s: string; n: integer; begin s := 'hi'; n := length(s) end.").tokenize();
        assert!(errors.is_empty());
        let (program, table) = parser::parse(tokens).expect("parse should succeed");
        analyzer::analyze(&program, table).expect("analysis should succeed");
        assert!(generate(&program).is_err());
    }

    #[test]
    fn array_length_is_a_compile_time_constant() {
        let listing = gen_src("program P; var a: array[1..5] of integer; n: integer; begin n := length(a) end.");
        assert!(listing.contains("pushi 5"));
    }

    #[test]
    fn global_scalars_are_zero_initialized_before_start() {
        let listing = gen_src("program P; var a: integer; begin a := a + 1 end.");
        let start_idx = listing.lines().position(|l| l.trim() == "start").unwrap();
        let prelude: Vec<_> = listing.lines().take(start_idx).collect();
        assert!(prelude.iter().any(|l| l.trim() == "storeg 0"));
    }

    #[test]
    fn if_else_uses_distinct_labels() {
        let listing = gen_src("program P; var x: integer; begin x := 10; if x > 5 then writeln('big') else writeln('small') end.");
        assert!(listing.contains("jz ELSE"));
        assert!(listing.contains("ELSE1:") || listing.contains("ELSE2:"));
    }
}
