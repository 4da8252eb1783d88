//! Recursive-descent parser: token stream → [`ast::Program`].
//!
//! On the first unexpected token parsing stops and reports a single
//! [`ParseError`]; there is no panic-mode resynchronization, so a
//! malformed program never produces a partial tree.

use crate::ast::*;
use crate::error::ParseError;
use crate::symbol::{Symbol, SymbolKind, SymbolTable};
use crate::token::{Keyword, Symbol as Sym, Token, TokenKind};

/// Parse a complete program from an already-lexed token stream, seeding a
/// symbol table with every top-level declaration's name and type as it is
/// reduced. The analyzer receives this table and completes it with
/// per-routine local scopes during its own walk.
pub fn parse(tokens: Vec<Token>) -> Result<(Program, SymbolTable), ParseError> {
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program()?;
    Ok((program, parser.table))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Names of functions currently being parsed, innermost last. Used only
    /// to tell `f := expr` (a return-value assignment) apart from an
    /// ordinary assignment to a same-named variable.
    current_function: Vec<String>,
    /// Seeded, as var_decl/function_decl/procedure_decl are reduced, with
    /// every top-level name's type — the analyzer receives this and adds
    /// everything scoped inside a routine body.
    table: SymbolTable,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            current_function: Vec::new(),
            table: SymbolTable::new(),
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn is_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if !self.is_eof() {
            self.pos += 1;
        }
        tok
    }

    fn check_sym(&self, s: Sym) -> bool {
        matches!(&self.current().kind, TokenKind::Symbol(x) if *x == s)
    }

    fn check_kw(&self, k: Keyword) -> bool {
        matches!(&self.current().kind, TokenKind::Keyword(x) if *x == k)
    }

    fn eat_sym(&mut self, s: Sym) -> Result<(), ParseError> {
        if self.check_sym(s) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn eat_kw(&mut self, k: Keyword) -> Result<(), ParseError> {
        if self.check_kw(k) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn eat_ident(&mut self) -> Result<String, ParseError> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn eat_int_literal(&mut self) -> Result<i64, ParseError> {
        let n = match &self.current().kind {
            TokenKind::IntLiteral(n) => *n,
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(n)
    }

    fn unexpected(&self) -> ParseError {
        ParseError::unexpected_token(self.line(), self.current().kind.clone())
    }

    // program := PROGRAM ident ';' block '.'
    fn parse_program(&mut self) -> Result<Program, ParseError> {
        self.eat_kw(Keyword::Program)?;
        let name = self.eat_ident()?;
        self.eat_sym(Sym::Semicolon)?;
        let block = self.parse_block(true)?;
        self.eat_sym(Sym::Period)?;
        Ok(Program { name, block })
    }

    // block := declarations compound
    fn parse_block(&mut self, top_level: bool) -> Result<Block, ParseError> {
        let declarations = self.parse_declarations(top_level)?;
        let compound = self.parse_compound()?;
        Ok(Block {
            declarations,
            compound,
        })
    }

    fn parse_declarations(&mut self, top_level: bool) -> Result<Vec<Declaration>, ParseError> {
        let mut decls = Vec::new();
        loop {
            if self.check_kw(Keyword::Var) {
                self.advance();
                loop {
                    let decl = self.parse_var_decl()?;
                    if top_level {
                        self.seed_var_decl(&decl)?;
                    }
                    decls.push(Declaration::Var(decl));
                    if !matches!(self.current().kind, TokenKind::Ident(_)) {
                        break;
                    }
                }
            } else if self.check_kw(Keyword::Function) {
                decls.push(Declaration::Function(self.parse_function_decl(top_level)?));
            } else if self.check_kw(Keyword::Procedure) {
                decls.push(Declaration::Procedure(self.parse_procedure_decl(top_level)?));
            } else {
                break;
            }
        }
        Ok(decls)
    }

    /// Inserts a top-level `var` declaration's names into the symbol table
    /// as the parser reduces it, per the grammar's parsing side effects.
    fn seed_var_decl(&mut self, decl: &VarDecl) -> Result<(), ParseError> {
        for name in &decl.names {
            let sym = Symbol::variable(name.clone(), decl.var_type);
            if !self.table.add_symbol(sym) {
                return Err(ParseError::new(
                    decl.line,
                    format!("'{name}' is already declared in this scope"),
                ));
            }
        }
        Ok(())
    }

    fn parse_id_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut ids = vec![self.eat_ident()?];
        while self.check_sym(Sym::Comma) {
            self.advance();
            ids.push(self.eat_ident()?);
        }
        Ok(ids)
    }

    // var_decl := id_list ':' type ';'
    fn parse_var_decl(&mut self) -> Result<VarDecl, ParseError> {
        let line = self.line();
        let names = self.parse_id_list()?;
        self.eat_sym(Sym::Colon)?;
        let var_type = self.parse_type()?;
        self.eat_sym(Sym::Semicolon)?;
        Ok(VarDecl {
            names,
            var_type,
            line,
        })
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        match &self.current().kind {
            TokenKind::Keyword(Keyword::Integer) => {
                self.advance();
                Ok(Type::Scalar(ScalarType::Integer))
            }
            TokenKind::Keyword(Keyword::Real) => {
                self.advance();
                Ok(Type::Scalar(ScalarType::Real))
            }
            TokenKind::Keyword(Keyword::Boolean) => {
                self.advance();
                Ok(Type::Scalar(ScalarType::Boolean))
            }
            TokenKind::Keyword(Keyword::StringType) => {
                self.advance();
                Ok(Type::Scalar(ScalarType::StringT))
            }
            TokenKind::Keyword(Keyword::Char) => {
                self.advance();
                Ok(Type::Scalar(ScalarType::Char))
            }
            TokenKind::Keyword(Keyword::Array) => self.parse_array_type(),
            _ => Err(self.unexpected()),
        }
    }

    // array_type := ARRAY '[' int '..' int ']' OF scalar_type
    fn parse_array_type(&mut self) -> Result<Type, ParseError> {
        let line = self.line();
        self.eat_kw(Keyword::Array)?;
        self.eat_sym(Sym::LBracket)?;
        let lower = self.eat_int_literal()?;
        self.eat_sym(Sym::Period)?;
        self.eat_sym(Sym::Period)?;
        let upper = self.eat_int_literal()?;
        self.eat_sym(Sym::RBracket)?;
        self.eat_kw(Keyword::Of)?;
        let element = match self.parse_type()? {
            Type::Scalar(s) => s,
            Type::Array { .. } => {
                return Err(ParseError::new(line, "arrays of arrays are not supported"));
            }
        };
        Ok(Type::Array {
            lower,
            upper,
            element,
        })
    }

    // function_decl := FUNCTION ident param_list? ':' scalar_type ';' function_block ';'
    fn parse_function_decl(&mut self, top_level: bool) -> Result<FunctionDecl, ParseError> {
        let line = self.line();
        self.eat_kw(Keyword::Function)?;
        let name = self.eat_ident()?;
        let params = self.parse_optional_param_list()?;
        self.eat_sym(Sym::Colon)?;
        let return_type = match self.parse_type()? {
            Type::Scalar(s) => s,
            Type::Array { .. } => {
                return Err(ParseError::new(
                    line,
                    "function return type must be scalar",
                ));
            }
        };
        self.eat_sym(Sym::Semicolon)?;
        if top_level {
            let sym = Symbol::callable(
                name.clone(),
                SymbolKind::Function,
                Some(Type::Scalar(return_type)),
                params.clone(),
            );
            if !self.table.add_symbol(sym) {
                return Err(ParseError::new(line, format!("'{name}' is already declared")));
            }
        }
        self.current_function.push(name.clone());
        let body = self.parse_block(false);
        self.current_function.pop();
        let body = body?;
        self.eat_sym(Sym::Semicolon)?;
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            line,
        })
    }

    // procedure_decl := PROCEDURE ident param_list? ';' function_block ';'
    fn parse_procedure_decl(&mut self, top_level: bool) -> Result<ProcedureDecl, ParseError> {
        let line = self.line();
        self.eat_kw(Keyword::Procedure)?;
        let name = self.eat_ident()?;
        let params = self.parse_optional_param_list()?;
        self.eat_sym(Sym::Semicolon)?;
        if top_level {
            let sym = Symbol::callable(name.clone(), SymbolKind::Procedure, None, params.clone());
            if !self.table.add_symbol(sym) {
                return Err(ParseError::new(line, format!("'{name}' is already declared")));
            }
        }
        let body = self.parse_block(false)?;
        self.eat_sym(Sym::Semicolon)?;
        Ok(ProcedureDecl {
            name,
            params,
            body,
            line,
        })
    }

    fn parse_optional_param_list(&mut self) -> Result<Vec<Param>, ParseError> {
        if !self.check_sym(Sym::LParen) {
            return Ok(Vec::new());
        }
        self.advance();
        let params = self.parse_param_list()?;
        self.eat_sym(Sym::RParen)?;
        Ok(params)
    }

    fn parse_param_list(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.check_sym(Sym::RParen) {
            return Ok(params);
        }
        params.push(self.parse_param()?);
        while self.check_sym(Sym::Semicolon) {
            self.advance();
            params.push(self.parse_param()?);
        }
        Ok(params)
    }

    // param := VAR? id_list ':' type
    fn parse_param(&mut self) -> Result<Param, ParseError> {
        let by_reference = if self.check_kw(Keyword::Var) {
            self.advance();
            true
        } else {
            false
        };
        let names = self.parse_id_list()?;
        self.eat_sym(Sym::Colon)?;
        let param_type = self.parse_type()?;
        Ok(Param {
            by_reference,
            names,
            param_type,
        })
    }

    // compound := BEGIN statement_list END
    fn parse_compound(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.eat_kw(Keyword::Begin)?;
        let stmts = self.parse_statement_list()?;
        self.eat_kw(Keyword::End)?;
        Ok(stmts)
    }

    fn parse_statement_list(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = vec![self.parse_statement()?];
        while self.check_sym(Sym::Semicolon) {
            self.advance();
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        match &self.current().kind {
            TokenKind::Keyword(Keyword::Begin) => Ok(Stmt::Compound(self.parse_compound()?)),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Writeln) => self.parse_write(true),
            TokenKind::Keyword(Keyword::Write) => self.parse_write(false),
            TokenKind::Keyword(Keyword::Readln) | TokenKind::Keyword(Keyword::Read) => {
                self.parse_readln()
            }
            TokenKind::Keyword(Keyword::Halt) => {
                self.advance();
                Ok(Stmt::Halt { line })
            }
            TokenKind::Ident(_) => self.parse_assignment_or_call(),
            TokenKind::Keyword(Keyword::End) | TokenKind::Symbol(Sym::Semicolon) => {
                Ok(Stmt::Empty)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_assignment_or_call(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let name = self.eat_ident()?;
        if self.check_sym(Sym::LParen) {
            self.advance();
            let args = self.parse_expression_list_opt()?;
            self.eat_sym(Sym::RParen)?;
            return Ok(Stmt::ProcedureCall { name, args, line });
        }
        let target = if self.check_sym(Sym::LBracket) {
            self.advance();
            let index = self.parse_expression()?;
            self.eat_sym(Sym::RBracket)?;
            LValue::ArrayElement {
                name,
                index: Box::new(index),
                line,
            }
        } else {
            LValue::Variable { name, line }
        };
        self.eat_sym(Sym::Assign)?;
        let value = self.parse_expression()?;
        if let LValue::Variable { name, .. } = &target {
            if self
                .current_function
                .last()
                .is_some_and(|f| f.eq_ignore_ascii_case(name))
            {
                return Ok(Stmt::FunctionReturn { value, line });
            }
        }
        Ok(Stmt::Assignment {
            target,
            value,
            line,
        })
    }

    // if := IF expression THEN statement (ELSE statement)?
    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.eat_kw(Keyword::If)?;
        let cond = self.parse_expression()?;
        self.eat_kw(Keyword::Then)?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.check_kw(Keyword::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            line,
        })
    }

    // while := WHILE expression DO statement
    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.eat_kw(Keyword::While)?;
        let cond = self.parse_expression()?;
        self.eat_kw(Keyword::Do)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While { cond, body, line })
    }

    // for := FOR ident ':=' expression (TO | DOWNTO) expression DO statement
    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.eat_kw(Keyword::For)?;
        let var = self.eat_ident()?;
        self.eat_sym(Sym::Assign)?;
        let init = self.parse_expression()?;
        let direction = if self.check_kw(Keyword::To) {
            self.advance();
            ForDirection::To
        } else {
            self.eat_kw(Keyword::Downto)?;
            ForDirection::Downto
        };
        let limit = self.parse_expression()?;
        self.eat_kw(Keyword::Do)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            var,
            init,
            limit,
            direction,
            body,
            line,
        })
    }

    // write_stmt := (WRITE | WRITELN) ('(' expression_list? ')')?
    fn parse_write(&mut self, newline: bool) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let args = if self.check_sym(Sym::LParen) {
            self.advance();
            let args = self.parse_expression_list_opt()?;
            self.eat_sym(Sym::RParen)?;
            args
        } else {
            Vec::new()
        };
        Ok(Stmt::Writeln {
            args,
            newline,
            line,
        })
    }

    // readln_stmt := (READLN | READ) ('(' lvalue (',' lvalue)* ')')?
    fn parse_readln(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let mut targets = Vec::new();
        if self.check_sym(Sym::LParen) {
            self.advance();
            if !self.check_sym(Sym::RParen) {
                targets.push(self.parse_lvalue()?);
                while self.check_sym(Sym::Comma) {
                    self.advance();
                    targets.push(self.parse_lvalue()?);
                }
            }
            self.eat_sym(Sym::RParen)?;
        }
        Ok(Stmt::Readln { targets, line })
    }

    fn parse_lvalue(&mut self) -> Result<LValue, ParseError> {
        let line = self.line();
        let name = self.eat_ident()?;
        if self.check_sym(Sym::LBracket) {
            self.advance();
            let index = self.parse_expression()?;
            self.eat_sym(Sym::RBracket)?;
            Ok(LValue::ArrayElement {
                name,
                index: Box::new(index),
                line,
            })
        } else {
            Ok(LValue::Variable { name, line })
        }
    }

    fn parse_expression_list_opt(&mut self) -> Result<Vec<Expr>, ParseError> {
        if self.check_sym(Sym::RParen) {
            return Ok(Vec::new());
        }
        let mut args = vec![self.parse_expression()?];
        while self.check_sym(Sym::Comma) {
            self.advance();
            args.push(self.parse_expression()?);
        }
        Ok(args)
    }

    // expression := simple (relop simple)? | simple ':' int (':' int)?
    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let left = self.parse_simple()?;
        if self.check_sym(Sym::Colon) {
            self.advance();
            let width = self.eat_int_literal()?;
            let decimals = if self.check_sym(Sym::Colon) {
                self.advance();
                Some(self.eat_int_literal()?)
            } else {
                None
            };
            return Ok(Expr::FormattedOutput {
                value: Box::new(left),
                width,
                decimals,
                line,
            });
        }
        if let Some(op) = self.match_relop() {
            let right = self.parse_simple()?;
            return Ok(Expr::BinaryOp {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
                line,
            });
        }
        Ok(left)
    }

    fn match_relop(&mut self) -> Option<BinOp> {
        let op = match &self.current().kind {
            TokenKind::Symbol(Sym::Eq) => BinOp::Eq,
            TokenKind::Symbol(Sym::Neq) => BinOp::Neq,
            TokenKind::Symbol(Sym::Lt) => BinOp::Lt,
            TokenKind::Symbol(Sym::Le) => BinOp::Le,
            TokenKind::Symbol(Sym::Gt) => BinOp::Gt,
            TokenKind::Symbol(Sym::Ge) => BinOp::Ge,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    // simple := term ((PLUS | MINUS | OR) term)*
    fn parse_simple(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_term()?;
        loop {
            let line = self.line();
            let op = match &self.current().kind {
                TokenKind::Symbol(Sym::Plus) => BinOp::Add,
                TokenKind::Symbol(Sym::Minus) => BinOp::Sub,
                TokenKind::Keyword(Keyword::Or) => BinOp::Or,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            node = Expr::BinaryOp {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(node)
    }

    // term := factor ((STAR | SLASH | DIV | MOD | AND) factor)*
    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_factor()?;
        loop {
            let line = self.line();
            let op = match &self.current().kind {
                TokenKind::Symbol(Sym::Star) => BinOp::Mul,
                TokenKind::Symbol(Sym::Slash) => BinOp::FDiv,
                TokenKind::Keyword(Keyword::Div) => BinOp::Div,
                TokenKind::Keyword(Keyword::Mod) => BinOp::Mod,
                TokenKind::Keyword(Keyword::And) => BinOp::And,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            node = Expr::BinaryOp {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(node)
    }

    // factor := INT | REAL | STRING | TRUE | FALSE | NOT factor | '-' factor
    //         | '(' expression ')' | ident_factor
    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match &self.current().kind {
            TokenKind::IntLiteral(n) => {
                let value = *n;
                self.advance();
                Ok(Expr::IntLiteral { value, line })
            }
            TokenKind::RealLiteral(x) => {
                let value = *x;
                self.advance();
                Ok(Expr::RealLiteral { value, line })
            }
            TokenKind::StringLiteral(s) => {
                let value = s.clone();
                self.advance();
                Ok(Expr::StringLiteral { value, line })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::BoolLiteral { value: true, line })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::BoolLiteral { value: false, line })
            }
            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(Expr::UnaryOp {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    line,
                })
            }
            TokenKind::Symbol(Sym::Minus) => {
                self.advance();
                let operand = self.parse_factor()?;
                Ok(Expr::UnaryOp {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    line,
                })
            }
            TokenKind::Symbol(Sym::LParen) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.eat_sym(Sym::RParen)?;
                Ok(expr)
            }
            TokenKind::Ident(_) => self.parse_ident_factor(),
            _ => Err(self.unexpected()),
        }
    }

    // ident_factor := ident '(' expression_list? ')' | ident '[' expression ']' | ident
    //
    // `length(x)` is recognized by name rather than as a keyword, matching
    // how the source material treats it as a library function rather than
    // a reserved word.
    fn parse_ident_factor(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let name = self.eat_ident()?;
        if self.check_sym(Sym::LParen) {
            self.advance();
            let mut args = self.parse_expression_list_opt()?;
            self.eat_sym(Sym::RParen)?;
            if name.eq_ignore_ascii_case("length") {
                if args.len() != 1 {
                    return Err(ParseError::new(line, "length expects exactly one argument"));
                }
                return Ok(Expr::Length {
                    arg: Box::new(args.remove(0)),
                    line,
                });
            }
            return Ok(Expr::FunctionCall { name, args, line });
        }
        if self.check_sym(Sym::LBracket) {
            self.advance();
            let index = self.parse_expression()?;
            self.eat_sym(Sym::RBracket)?;
            return Ok(Expr::ArrayAccess {
                name,
                index: Box::new(index),
                line,
            });
        }
        Ok(Expr::Variable { name, line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_src(src: &str) -> Result<Program, ParseError> {
        let (tokens, lex_errors) = Lexer::new(src).tokenize();
        assert!(lex_errors.is_empty(), "unexpected lex errors: {lex_errors:?}");
        parse(tokens).map(|(program, _)| program)
    }

    #[test]
    fn parses_minimal_program() {
        let program = parse_src("program P; begin end.").unwrap();
        assert_eq!(program.name, "P");
        assert!(program.block.declarations.is_empty());
        assert_eq!(program.block.compound, vec![Stmt::Empty]);
    }

    #[test]
    fn parses_var_decls_and_assignment() {
        let program = parse_src(
            "program P; var a, b: integer; begin a := 1; b := a + 2 end.",
        )
        .unwrap();
        assert_eq!(program.block.declarations.len(), 1);
        match &program.block.declarations[0] {
            Declaration::Var(decl) => assert_eq!(decl.names, vec!["a", "b"]),
            _ => panic!("expected a var declaration"),
        }
        assert_eq!(program.block.compound.len(), 2);
    }

    #[test]
    fn parses_array_declaration_and_indexing() {
        let program = parse_src(
            "program P; var v: array[1..10] of integer; begin v[1] := 5 end.",
        )
        .unwrap();
        match &program.block.declarations[0] {
            Declaration::Var(decl) => assert_eq!(
                decl.var_type,
                Type::Array {
                    lower: 1,
                    upper: 10,
                    element: ScalarType::Integer,
                }
            ),
            _ => panic!("expected a var declaration"),
        }
        match &program.block.compound[0] {
            Stmt::Assignment { target, .. } => {
                assert!(matches!(target, LValue::ArrayElement { .. }))
            }
            _ => panic!("expected an assignment"),
        }
    }

    #[test]
    fn parses_if_while_for() {
        let program = parse_src(
            "program P; var i: integer; \
             begin \
               if i = 0 then i := 1 else i := 2; \
               while i < 10 do i := i + 1; \
               for i := 1 to 10 do i := i \
             end.",
        )
        .unwrap();
        assert_eq!(program.block.compound.len(), 3);
        assert!(matches!(program.block.compound[0], Stmt::If { .. }));
        assert!(matches!(program.block.compound[1], Stmt::While { .. }));
        match &program.block.compound[2] {
            Stmt::For { direction, .. } => assert_eq!(*direction, ForDirection::To),
            _ => panic!("expected a for statement"),
        }
    }

    #[test]
    fn function_body_assignment_to_its_own_name_is_a_return() {
        let program = parse_src(
            "program P; \
             function double(x: integer): integer; \
             begin double := x * 2 end; \
             begin end.",
        )
        .unwrap();
        match &program.block.declarations[0] {
            Declaration::Function(f) => {
                assert_eq!(f.body.compound.len(), 1);
                assert!(matches!(f.body.compound[0], Stmt::FunctionReturn { .. }));
            }
            _ => panic!("expected a function declaration"),
        }
    }

    #[test]
    fn keyword_case_is_irrelevant_to_parsing() {
        let lower = parse_src("program p; begin end.").unwrap();
        let upper = parse_src("PROGRAM p; BEGIN END.").unwrap();
        let mixed = parse_src("PrOgRaM p; BeGiN eNd.").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower, mixed);
    }

    #[test]
    fn writeln_with_formatted_output() {
        let program = parse_src("program P; var x: real; begin writeln(x:8:2) end.").unwrap();
        match &program.block.compound[0] {
            Stmt::Writeln { args, newline, .. } => {
                assert!(*newline);
                assert!(matches!(args[0], Expr::FormattedOutput { width: 8, decimals: Some(2), .. }));
            }
            _ => panic!("expected a writeln statement"),
        }
    }

    #[test]
    fn write_without_trailing_newline() {
        let program = parse_src("program P; begin write('hi') end.").unwrap();
        match &program.block.compound[0] {
            Stmt::Writeln { newline, .. } => assert!(!newline),
            _ => panic!("expected a write statement"),
        }
    }

    #[test]
    fn missing_semicolon_is_a_syntax_error() {
        let err = parse_src("program P var a: integer; begin end.").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unterminated_block_reports_eof() {
        let err = parse_src("program P; begin a := 1").unwrap_err();
        assert!(err.message.contains("eof"));
    }

    #[test]
    fn top_level_declarations_seed_the_symbol_table() {
        let (tokens, lex_errors) =
            Lexer::new("program P; var a: integer; function f: integer; begin f := 1 end; begin end.").tokenize();
        assert!(lex_errors.is_empty());
        let (_, table) = parse(tokens).unwrap();
        assert!(table.lookup("a").is_some());
        let f = table.lookup("f").unwrap();
        assert!(f.is_callable());
    }

    #[test]
    fn nested_local_declarations_are_not_seeded_at_the_top_level() {
        let (tokens, lex_errors) = Lexer::new(
            "program P; procedure p; var local: integer; begin local := 1 end; begin end.",
        )
        .tokenize();
        assert!(lex_errors.is_empty());
        let (_, table) = parse(tokens).unwrap();
        assert!(table.lookup("local").is_none());
    }

    #[test]
    fn redeclaring_a_top_level_name_is_a_syntax_error() {
        let err = parse_src("program P; var a: integer; a: real; begin end.").unwrap_err();
        assert!(err.message.contains("already declared"));
    }
}
