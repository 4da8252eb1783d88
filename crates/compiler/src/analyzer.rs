//! Semantic analysis: walks the AST once, completing the symbol table the
//! parser seeded with top-level declarations, and collects every type error
//! it finds rather than stopping at the first one.

use crate::ast::*;
use crate::error::SemanticError;
use crate::symbol::{Symbol, SymbolKind, SymbolTable};

/// Check a program against the symbol table the parser seeded with its
/// top-level declarations. Entering a routine's body adds its parameters,
/// return slot, and any local declarations to a nested scope — the parser
/// never seeds those, since they're out of scope everywhere else. On
/// success, returns the now-fully-populated table (handed to nothing
/// further; the code generator's address allocation needs its own scope
/// walk, not this one's types). On failure, returns every error found.
pub fn analyze(program: &Program, table: SymbolTable) -> Result<SymbolTable, Vec<SemanticError>> {
    let mut analyzer = Analyzer::new(table);
    analyzer.check_block(&program.block);
    if analyzer.errors.is_empty() {
        Ok(analyzer.table)
    } else {
        Err(analyzer.errors)
    }
}

struct Analyzer {
    table: SymbolTable,
    errors: Vec<SemanticError>,
    /// (function name, return type), innermost last. Empty outside any
    /// function body.
    current_function_return: Vec<(String, ScalarType)>,
}

fn is_numeric(t: ScalarType) -> bool {
    matches!(t, ScalarType::Integer | ScalarType::Real)
}

fn numeric_result(l: ScalarType, r: ScalarType) -> Option<ScalarType> {
    if !is_numeric(l) || !is_numeric(r) {
        return None;
    }
    if l == ScalarType::Real || r == ScalarType::Real {
        Some(ScalarType::Real)
    } else {
        Some(ScalarType::Integer)
    }
}

fn comparable(l: ScalarType, r: ScalarType) -> bool {
    (is_numeric(l) && is_numeric(r)) || l == r
}

/// Whether a value of type `value` may be assigned/passed/returned where
/// `target` is expected. The only implicit widening is integer-to-real.
fn assignable(target: ScalarType, value: ScalarType) -> bool {
    target == value || (target == ScalarType::Real && value == ScalarType::Integer)
}

impl Analyzer {
    fn new(table: SymbolTable) -> Self {
        Analyzer {
            table,
            errors: Vec::new(),
            current_function_return: Vec::new(),
        }
    }

    fn check_block(&mut self, block: &Block) {
        for decl in &block.declarations {
            self.check_declaration(decl);
        }
        for stmt in &block.compound {
            self.check_stmt(stmt);
        }
    }

    fn check_declaration(&mut self, decl: &Declaration) {
        match decl {
            Declaration::Var(v) => self.check_var_decl(v),
            Declaration::Function(f) => self.check_function_decl(f),
            Declaration::Procedure(p) => self.check_procedure_decl(p),
        }
    }

    fn check_var_decl(&mut self, decl: &VarDecl) {
        // Top-level var decls are already in the table — the parser seeded
        // them as it reduced them. Only a routine-local decl (depth > 1)
        // needs inserting here.
        if self.table.depth() == 1 {
            return;
        }
        for name in &decl.names {
            let sym = Symbol::variable(name.clone(), decl.var_type);
            if !self.table.add_symbol(sym) {
                self.errors.push(SemanticError::new(
                    decl.line,
                    format!("'{name}' is already declared in this scope"),
                ));
            }
        }
    }

    fn add_params(&mut self, params: &[Param], line: usize) {
        for p in params {
            for name in &p.names {
                let sym = Symbol::parameter(name.clone(), p.param_type, p.by_reference);
                if !self.table.add_symbol(sym) {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("duplicate parameter name '{name}'"),
                    ));
                }
            }
        }
    }

    fn check_function_decl(&mut self, decl: &FunctionDecl) {
        // A top-level function's own name is already bound — the parser
        // registered it before parsing the body, so a call site declared
        // above it in the same scope can already resolve it. A nested
        // function declared inside a routine body isn't seeded, so it's
        // bound here instead.
        if self.table.depth() > 1 {
            let sym = Symbol::callable(
                decl.name.clone(),
                SymbolKind::Function,
                Some(Type::Scalar(decl.return_type)),
                decl.params.clone(),
            );
            if !self.table.add_symbol(sym) {
                self.errors.push(SemanticError::new(
                    decl.line,
                    format!("'{}' is already declared", decl.name),
                ));
            }
        }
        self.table.enter_scope();
        self.add_params(&decl.params, decl.line);
        // The function's own name, inside its own scope, is the implicit
        // return-value slot assignment targets when `name := expr` turns
        // into `Stmt::FunctionReturn`.
        self.table
            .add_symbol(Symbol::variable(decl.name.clone(), Type::Scalar(decl.return_type)));
        self.current_function_return
            .push((decl.name.clone(), decl.return_type));
        self.check_block(&decl.body);
        self.current_function_return.pop();
        self.table.exit_scope();
    }

    fn check_procedure_decl(&mut self, decl: &ProcedureDecl) {
        // See check_function_decl: top-level procedures are already seeded.
        if self.table.depth() > 1 {
            let sym = Symbol::callable(decl.name.clone(), SymbolKind::Procedure, None, decl.params.clone());
            if !self.table.add_symbol(sym) {
                self.errors.push(SemanticError::new(
                    decl.line,
                    format!("'{}' is already declared", decl.name),
                ));
            }
        }
        self.table.enter_scope();
        self.add_params(&decl.params, decl.line);
        self.check_block(&decl.body);
        self.table.exit_scope();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Compound(stmts) => {
                for s in stmts {
                    self.check_stmt(s);
                }
            }
            Stmt::Assignment { target, value, line } => {
                let target_ty = self.lvalue_type(target);
                let value_ty = self.infer(value);
                if let (Some(t), Some(v)) = (target_ty, value_ty) {
                    if !assignable(t, v) {
                        self.errors.push(SemanticError::new(
                            *line,
                            format!("cannot assign a value of type {v} to a variable of type {t}"),
                        ));
                    }
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                line,
            } => {
                self.expect_boolean(cond, *line);
                self.check_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.check_stmt(e);
                }
            }
            Stmt::While { cond, body, line } => {
                self.expect_boolean(cond, *line);
                self.check_stmt(body);
            }
            Stmt::For {
                var,
                init,
                limit,
                body,
                line,
                ..
            } => {
                match self.table.lookup(var) {
                    Some(sym) if sym.ty == Some(Type::Scalar(ScalarType::Integer)) => {}
                    Some(sym) => self.errors.push(SemanticError::new(
                        *line,
                        format!(
                            "for-loop variable '{var}' must be integer, found {}",
                            describe_ty(&sym.ty)
                        ),
                    )),
                    None => self
                        .errors
                        .push(SemanticError::new(*line, format!("undeclared identifier '{var}'"))),
                }
                self.expect_type(init, ScalarType::Integer, *line);
                self.expect_type(limit, ScalarType::Integer, *line);
                self.check_stmt(body);
            }
            Stmt::ProcedureCall { name, args, line } => {
                self.check_call(name, args, *line);
            }
            Stmt::Writeln { args, .. } => {
                for a in args {
                    self.infer(a);
                }
            }
            Stmt::Readln { targets, line } => {
                for t in targets {
                    match self.lvalue_type(t) {
                        Some(ty)
                            if matches!(
                                ty,
                                ScalarType::Integer
                                    | ScalarType::Real
                                    | ScalarType::StringT
                                    | ScalarType::Char
                            ) => {}
                        Some(ty) => self.errors.push(SemanticError::new(
                            *line,
                            format!("cannot read a value of type {ty}"),
                        )),
                        None => {}
                    }
                }
            }
            Stmt::Halt { .. } | Stmt::Empty => {}
            Stmt::FunctionReturn { value, line } => {
                let value_ty = self.infer(value);
                match self.current_function_return.last() {
                    Some((_, ret_ty)) => {
                        if let Some(v) = value_ty {
                            if !assignable(*ret_ty, v) {
                                self.errors.push(SemanticError::new(
                                    *line,
                                    format!(
                                        "cannot return a value of type {v} from a function declared to return {ret_ty}"
                                    ),
                                ));
                            }
                        }
                    }
                    None => self
                        .errors
                        .push(SemanticError::new(*line, "return statement outside of a function")),
                }
            }
        }
    }

    fn expect_boolean(&mut self, expr: &Expr, line: usize) {
        if let Some(ty) = self.infer(expr) {
            if ty != ScalarType::Boolean {
                self.errors.push(SemanticError::new(
                    line,
                    format!("expected a boolean expression, found {ty}"),
                ));
            }
        }
    }

    fn expect_type(&mut self, expr: &Expr, expected: ScalarType, line: usize) {
        if let Some(ty) = self.infer(expr) {
            if !assignable(expected, ty) {
                self.errors
                    .push(SemanticError::new(line, format!("expected {expected}, found {ty}")));
            }
        }
    }

    fn lvalue_type(&mut self, lv: &LValue) -> Option<ScalarType> {
        match lv {
            LValue::Variable { name, line } => self.variable_type(name, *line),
            LValue::ArrayElement { name, index, line } => self.indexed_type(name, index, *line),
        }
    }

    fn variable_type(&mut self, name: &str, line: usize) -> Option<ScalarType> {
        match self.table.lookup(name) {
            Some(sym) => match sym.ty {
                Some(Type::Scalar(s)) => Some(s),
                Some(Type::Array { .. }) => {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("'{name}' is an array and cannot be used as a scalar value"),
                    ));
                    None
                }
                None => None,
            },
            None => {
                self.errors
                    .push(SemanticError::new(line, format!("undeclared identifier '{name}'")));
                None
            }
        }
    }

    fn indexed_type(&mut self, name: &str, index: &Expr, line: usize) -> Option<ScalarType> {
        if let Some(ty) = self.infer(index) {
            if ty != ScalarType::Integer {
                self.errors
                    .push(SemanticError::new(line, "array index must be an integer"));
            }
        }
        match self.table.lookup(name) {
            Some(sym) => match &sym.ty {
                Some(Type::Array { element, .. }) => Some(*element),
                Some(Type::Scalar(ScalarType::StringT)) => Some(ScalarType::Char),
                Some(_) => {
                    self.errors
                        .push(SemanticError::new(line, format!("'{name}' cannot be indexed")));
                    None
                }
                None => None,
            },
            None => {
                self.errors
                    .push(SemanticError::new(line, format!("undeclared identifier '{name}'")));
                None
            }
        }
    }

    fn infer(&mut self, expr: &Expr) -> Option<ScalarType> {
        match expr {
            Expr::IntLiteral { .. } => Some(ScalarType::Integer),
            Expr::RealLiteral { .. } => Some(ScalarType::Real),
            Expr::StringLiteral { .. } => Some(ScalarType::StringT),
            Expr::BoolLiteral { .. } => Some(ScalarType::Boolean),
            Expr::Variable { name, line } => self.variable_type(name, *line),
            Expr::ArrayAccess { name, index, line } => self.indexed_type(name, index, *line),
            Expr::BinaryOp { op, lhs, rhs, line } => self.infer_binary(*op, lhs, rhs, *line),
            Expr::UnaryOp { op, operand, line } => self.infer_unary(*op, operand, *line),
            Expr::FunctionCall { name, args, line } => self.check_call(name, args, *line),
            Expr::Length { arg, line } => {
                if let Some(ty) = self.infer(arg) {
                    if ty != ScalarType::StringT {
                        self.errors.push(SemanticError::new(
                            *line,
                            format!("length expects a string argument, found {ty}"),
                        ));
                    }
                }
                Some(ScalarType::Integer)
            }
            Expr::FormattedOutput { value, .. } => self.infer(value),
        }
    }

    fn infer_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, line: usize) -> Option<ScalarType> {
        let l = self.infer(lhs);
        let r = self.infer(rhs);
        let (l, r) = (l?, r?);
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul => numeric_result(l, r).or_else(|| {
                self.errors.push(SemanticError::new(
                    line,
                    format!("operator '{op}' requires numeric operands, found {l} and {r}"),
                ));
                None
            }),
            BinOp::FDiv => {
                if is_numeric(l) && is_numeric(r) {
                    Some(ScalarType::Real)
                } else {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("operator '/' requires numeric operands, found {l} and {r}"),
                    ));
                    None
                }
            }
            BinOp::Div | BinOp::Mod => {
                if l == ScalarType::Integer && r == ScalarType::Integer {
                    Some(ScalarType::Integer)
                } else {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("operator '{op}' requires integer operands, found {l} and {r}"),
                    ));
                    None
                }
            }
            BinOp::And | BinOp::Or => {
                if l == ScalarType::Boolean && r == ScalarType::Boolean {
                    Some(ScalarType::Boolean)
                } else {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("operator '{op}' requires boolean operands, found {l} and {r}"),
                    ));
                    None
                }
            }
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if comparable(l, r) {
                    Some(ScalarType::Boolean)
                } else {
                    self.errors
                        .push(SemanticError::new(line, format!("cannot compare {l} and {r}")));
                    None
                }
            }
        }
    }

    fn infer_unary(&mut self, op: UnOp, operand: &Expr, line: usize) -> Option<ScalarType> {
        let t = self.infer(operand)?;
        match op {
            UnOp::Not => {
                if t == ScalarType::Boolean {
                    Some(ScalarType::Boolean)
                } else {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("'not' requires a boolean operand, found {t}"),
                    ));
                    None
                }
            }
            UnOp::Neg => {
                if is_numeric(t) {
                    Some(t)
                } else {
                    self.errors.push(SemanticError::new(
                        line,
                        format!("unary '-' requires a numeric operand, found {t}"),
                    ));
                    None
                }
            }
        }
    }

    /// Checked both as a statement (procedure call, return value discarded)
    /// and as an expression (function call). Returns the callable's return
    /// type, or `None` for a procedure or an unresolved call.
    fn check_call(&mut self, name: &str, args: &[Expr], line: usize) -> Option<ScalarType> {
        let sym = match self.table.lookup(name) {
            Some(s) if s.is_callable() => s.clone(),
            Some(_) => {
                self.errors
                    .push(SemanticError::new(line, format!("'{name}' is not callable")));
                for a in args {
                    self.infer(a);
                }
                return None;
            }
            None => {
                self.errors
                    .push(SemanticError::new(line, format!("undeclared identifier '{name}'")));
                for a in args {
                    self.infer(a);
                }
                return None;
            }
        };

        let flat_params: Vec<(ScalarType, bool)> = sym
            .params
            .iter()
            .flat_map(|p| {
                let ty = match p.param_type {
                    Type::Scalar(s) => s,
                    Type::Array { element, .. } => element,
                };
                std::iter::repeat((ty, p.by_reference)).take(p.names.len())
            })
            .collect();

        if flat_params.len() != args.len() {
            self.errors.push(SemanticError::new(
                line,
                format!(
                    "'{name}' expects {} argument(s), found {}",
                    flat_params.len(),
                    args.len()
                ),
            ));
        }

        for (i, arg) in args.iter().enumerate() {
            let arg_ty = self.infer(arg);
            if let Some((expected_ty, by_ref)) = flat_params.get(i) {
                if *by_ref && !matches!(arg, Expr::Variable { .. } | Expr::ArrayAccess { .. }) {
                    self.errors.push(SemanticError::new(
                        arg.line(),
                        format!("argument {} to '{name}' must be a variable (passed by reference)", i + 1),
                    ));
                }
                if let Some(at) = arg_ty {
                    if !assignable(*expected_ty, at) {
                        self.errors.push(SemanticError::new(
                            arg.line(),
                            format!("argument {} to '{name}' expects {expected_ty}, found {at}", i + 1),
                        ));
                    }
                }
            }
        }

        if sym.kind == SymbolKind::Function {
            match sym.ty {
                Some(Type::Scalar(s)) => Some(s),
                _ => None,
            }
        } else {
            None
        }
    }
}

fn describe_ty(ty: &Option<Type>) -> String {
    match ty {
        Some(Type::Scalar(s)) => s.to_string(),
        Some(Type::Array { .. }) => "array".to_string(),
        None => "<unknown>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser;

    fn analyze_src(src: &str) -> Result<SymbolTable, Vec<SemanticError>> {
        let (tokens, lex_errors) = Lexer::new(src).tokenize();
        assert!(lex_errors.is_empty());
        let (program, table) = parser::parse(tokens).expect("parse should succeed");
        analyze(&program, table)
    }

    #[test]
    fn accepts_well_typed_program() {
        let result = analyze_src(
            "program P; var a: integer; b: real; \
             begin a := 1; b := a + 1.5 end.",
        );
        assert!(result.is_ok(), "unexpected errors: {:?}", result.err());
    }

    #[test]
    fn rejects_assigning_string_to_integer() {
        let result = analyze_src("program P; var a: integer; begin a := 'x' end.");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_boolean_if_condition() {
        let result = analyze_src("program P; var a: integer; begin if a then a := 1 end.");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let result = analyze_src("program P; begin a := 1 end.");
        assert!(result.is_err());
    }

    #[test]
    fn reports_every_error_not_just_the_first() {
        let result = analyze_src("program P; begin a := 1; b := 2 end.").unwrap_err();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn function_return_assignment_is_type_checked() {
        let ok = analyze_src(
            "program P; function f: integer; begin f := 1 end; \
             begin end.",
        );
        assert!(ok.is_ok(), "unexpected errors: {:?}", ok.err());

        let bad = analyze_src(
            "program P; function f: integer; begin f := 'x' end; \
             begin end.",
        );
        assert!(bad.is_err());
    }

    #[test]
    fn reference_parameters_require_variable_arguments() {
        let bad = analyze_src(
            "program P; \
             procedure inc(var x: integer); begin x := x + 1 end; \
             begin inc(5) end.",
        );
        assert!(bad.is_err());

        let ok = analyze_src(
            "program P; var a: integer; \
             procedure inc(var x: integer); begin x := x + 1 end; \
             begin inc(a) end.",
        );
        assert!(ok.is_ok(), "unexpected errors: {:?}", ok.err());
    }

    #[test]
    fn rejects_string_concatenation() {
        let result = analyze_src("program P; begin writeln('a' + 'b') end.");
        assert!(result.is_err());
    }

    #[test]
    fn array_element_type_is_element_scalar_type() {
        let result = analyze_src(
            "program P; var v: array[1..5] of integer; x: real; \
             begin x := v[1] end.",
        );
        assert!(result.is_ok(), "unexpected errors: {:?}", result.err());
    }
}
