//! Single-pass operator-precedence parser and code emitter.
//!
//! The parser walks the source once, left to right, keeping an explicit operator
//! stack per (sub)expression and emitting stack-machine [`Instruction`]s as soon as
//! an operator's operands are complete. No syntax tree is built. Parenthesised
//! groups and function arguments are parsed by recursing into a fresh operator
//! stack that shares the same constant pool, function table and instruction
//! stream.
//!
//! # Precedence
//!
//! From tightest to loosest binding:
//!
//! | operator        | level | associativity |
//! |-----------------|-------|---------------|
//! | binary `^`      | 4     | left          |
//! | unary `-`, `+`  | 3     | prefix        |
//! | `*`, `/`        | 2     | left          |
//! | binary `+`, `-` | 1     | left          |
//!
//! Before an incoming binary operator is stacked, every stacked operator of
//! greater or equal level is popped and emitted. A stacked unary operator is
//! therefore never popped by an incoming `^`, so `-2^2` is `-(2^2)`, while chained
//! `^` pops itself and `2^3^2` is `(2^3)^2`. Unary operators never pop anything
//! when they are stacked.
//!
//! # Stack depth
//!
//! Every emitted push raises a running operand count and every binary operation
//! lowers it by one. The maximum becomes the module's declared stack depth, and a
//! complete expression must leave exactly one value.

use crate::errors::CompileError;
use crate::module::{assemble, Instruction, Module};
use crate::operators::{self, FunctionTable};
use crate::pool::ConstantPool;
use crate::scanner::{OperatorChar, Scanner, SignContext, Token, TokenKind};

/// Deepest allowed nesting of parentheses and function calls.
pub const MAX_NESTING: usize = 256;

/// Stacked operator awaiting its right operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Negate,
    Plus,
}

impl StackOp {
    fn binary(op: OperatorChar) -> Self {
        match op {
            OperatorChar::Plus => StackOp::Add,
            OperatorChar::Minus => StackOp::Sub,
            OperatorChar::Star => StackOp::Mul,
            OperatorChar::Slash => StackOp::Div,
            OperatorChar::Caret => StackOp::Pow,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            StackOp::Add | StackOp::Sub => 1,
            StackOp::Mul | StackOp::Div => 2,
            StackOp::Negate | StackOp::Plus => 3,
            StackOp::Pow => 4,
        }
    }

    fn is_unary(self) -> bool {
        matches!(self, StackOp::Negate | StackOp::Plus)
    }

    /// Whether this stacked operator must be emitted before `incoming` is stacked.
    fn pops_before(self, incoming: StackOp) -> bool {
        self.precedence() >= incoming.precedence()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    op: StackOp,
    offset: usize,
}

/// Instruction stream with operand-count bookkeeping.
#[derive(Debug, Default)]
struct Emitter {
    code: Vec<Instruction>,
    depth: usize,
    max_depth: usize,
}

impl Emitter {
    fn push_value(&mut self, instruction: Instruction) {
        self.code.push(instruction);
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
    }

    /// Emits an instruction that pops `arity` values and pushes one.
    fn reduce(
        &mut self,
        instruction: Instruction,
        arity: usize,
        offset: usize,
    ) -> Result<(), CompileError> {
        if self.depth < arity {
            return Err(CompileError::syntax(
                offset,
                "operand/operator count mismatch",
            ));
        }
        self.code.push(instruction);
        self.depth = self.depth - arity + 1;
        Ok(())
    }
}

/// Where a sub-parse was entered from, which decides its valid terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    TopLevel,
    Group,
    Argument { last: bool },
}

/// Compile session for one expression.
///
/// All state is owned by the session, so independent compiles can run on any
/// number of threads at once.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    n_inputs: usize,
    names: &'a [String],
    pool: ConstantPool,
    functions: FunctionTable,
    emitter: Emitter,
}

impl<'a> Parser<'a> {
    /// Creates a session for `source` with `n_inputs` numbered inputs `x0..`.
    ///
    /// `names` optionally aliases input slots: `names[i]` resolves to input `i`.
    pub fn new(source: &'a str, n_inputs: usize, names: &'a [String]) -> Self {
        Self {
            scanner: Scanner::new(source),
            n_inputs,
            names,
            pool: ConstantPool::new(),
            functions: FunctionTable::new(),
            emitter: Emitter::default(),
        }
    }

    /// Parses the whole source and assembles the resulting module.
    ///
    /// # Errors
    /// Returns the first lexical, syntax or semantic error, with its byte offset.
    pub fn parse(mut self) -> Result<Module, CompileError> {
        let source = self.scanner.source();
        if source.trim().is_empty() {
            return Err(CompileError::syntax(0, "empty expression"));
        }

        let end = self.parse_expression(Context::TopLevel, 0)?;
        debug_assert_eq!(end.kind, TokenKind::End);
        if self.emitter.depth != 1 {
            return Err(CompileError::syntax(
                source.len(),
                "operand/operator count mismatch",
            ));
        }

        Ok(assemble(
            source,
            self.n_inputs,
            self.emitter.code,
            self.emitter.max_depth,
            self.pool,
            self.functions,
        ))
    }

    /// Parses one (sub)expression up to its terminator and returns that token.
    fn parse_expression(
        &mut self,
        context: Context,
        nesting: usize,
    ) -> Result<Token<'a>, CompileError> {
        let mut operators: Vec<Pending> = Vec::new();
        let mut expect_operand = true;
        let mut seen_operand = false;

        loop {
            let token = self.scanner.next_token()?;

            if expect_operand {
                match token.kind {
                    TokenKind::Number => {
                        self.load_constant(token)?;
                    }
                    TokenKind::Identifier => {
                        self.operand_identifier(token, nesting)?;
                    }
                    TokenKind::LeftParen => {
                        self.check_nesting(token, nesting)?;
                        let close = self.parse_expression(Context::Group, nesting + 1)?;
                        self.expect_close(close, Context::Group)?;
                    }
                    TokenKind::Operator(op @ (OperatorChar::Plus | OperatorChar::Minus)) => {
                        match self.scanner.sign_context(token.offset) {
                            SignContext::Unary => {
                                let op = if op == OperatorChar::Minus {
                                    StackOp::Negate
                                } else {
                                    StackOp::Plus
                                };
                                operators.push(Pending {
                                    op,
                                    offset: token.offset,
                                });
                                continue;
                            }
                            SignContext::Doubled => {
                                return Err(CompileError::syntax(
                                    token.offset,
                                    format!(
                                        "'{}' cannot follow another sign, use parentheses",
                                        op.symbol()
                                    ),
                                ));
                            }
                            SignContext::Binary => {
                                return Err(CompileError::syntax(
                                    token.offset,
                                    format!("missing operand before '{}'", op.symbol()),
                                ));
                            }
                        }
                    }
                    TokenKind::Operator(op) => {
                        return Err(CompileError::syntax(
                            token.offset,
                            format!("missing operand before '{}'", op.symbol()),
                        ));
                    }
                    TokenKind::RightParen if !seen_operand && operators.is_empty() => {
                        let message = if context == Context::Group {
                            "empty parentheses"
                        } else {
                            "missing operand before ')'"
                        };
                        return Err(CompileError::syntax(token.offset, message));
                    }
                    TokenKind::RightParen => {
                        return Err(CompileError::syntax(
                            token.offset,
                            "missing operand before ')'",
                        ));
                    }
                    TokenKind::Comma => {
                        return Err(CompileError::syntax(
                            token.offset,
                            "missing operand before ','",
                        ));
                    }
                    TokenKind::End => {
                        return Err(CompileError::syntax(
                            token.offset,
                            "missing operand at end of expression",
                        ));
                    }
                }
                expect_operand = false;
                seen_operand = true;
                continue;
            }

            match token.kind {
                TokenKind::Operator(op) => {
                    let incoming = StackOp::binary(op);
                    while let Some(top) = operators.last().copied() {
                        if !top.op.pops_before(incoming) {
                            break;
                        }
                        operators.pop();
                        self.emit_operator(top)?;
                    }
                    operators.push(Pending {
                        op: incoming,
                        offset: token.offset,
                    });
                    expect_operand = true;
                }
                TokenKind::RightParen | TokenKind::Comma | TokenKind::End => {
                    while let Some(pending) = operators.pop() {
                        self.emit_operator(pending)?;
                    }
                    if context == Context::TopLevel {
                        self.expect_close(token, context)?;
                    }
                    return Ok(token);
                }
                TokenKind::Number | TokenKind::Identifier | TokenKind::LeftParen => {
                    return Err(CompileError::syntax(
                        token.offset,
                        format!("missing operator before '{}'", token.text),
                    ));
                }
            }
        }
    }

    /// Checks that a sub-parse ended with the terminator its context requires.
    fn expect_close(&self, token: Token<'a>, context: Context) -> Result<(), CompileError> {
        let expected = match context {
            Context::TopLevel => TokenKind::End,
            Context::Group | Context::Argument { last: true } => TokenKind::RightParen,
            Context::Argument { last: false } => TokenKind::Comma,
        };
        if token.kind == expected {
            return Ok(());
        }

        let message = match (token.kind, context) {
            (TokenKind::RightParen, Context::TopLevel) => "unmatched ')'",
            (TokenKind::End, _) => "missing ')'",
            (TokenKind::Comma, Context::Argument { last: true }) => "too many arguments",
            (TokenKind::RightParen, Context::Argument { last: false }) => "too few arguments",
            (TokenKind::Comma, _) => "',' outside of a function call",
            _ => "unexpected token",
        };
        Err(CompileError::syntax(token.offset, message))
    }

    fn check_nesting(&self, token: Token<'a>, nesting: usize) -> Result<(), CompileError> {
        if nesting >= MAX_NESTING {
            return Err(CompileError::syntax(
                token.offset,
                "expression nested too deeply",
            ));
        }
        Ok(())
    }

    fn emit_operator(&mut self, pending: Pending) -> Result<(), CompileError> {
        let (instruction, arity) = match pending.op {
            StackOp::Add => (Instruction::Add, 2),
            StackOp::Sub => (Instruction::Sub, 2),
            StackOp::Mul => (Instruction::Mul, 2),
            StackOp::Div => (Instruction::Div, 2),
            StackOp::Pow => (Instruction::Pow, 2),
            StackOp::Negate => (Instruction::Neg, 1),
            // unary plus is the identity
            StackOp::Plus => return Ok(()),
        };
        debug_assert_eq!(pending.op.is_unary(), arity == 1);
        self.emitter.reduce(instruction, arity, pending.offset)
    }

    fn load_constant(&mut self, token: Token<'a>) -> Result<(), CompileError> {
        let entry = self
            .pool
            .intern(token.text)
            .ok_or_else(|| CompileError::syntax(token.offset, "expression too large"))?;
        self.emitter.push_value(Instruction::LoadConst(entry.index));
        Ok(())
    }

    /// Resolves an identifier in operand position: call, named input, constant or `x<N>`.
    fn operand_identifier(
        &mut self,
        token: Token<'a>,
        nesting: usize,
    ) -> Result<(), CompileError> {
        let name = token.text;

        if self.scanner.peek_token()?.kind == TokenKind::LeftParen {
            return self.call(token, nesting);
        }
        if let Some(descriptor) = operators::lookup(name) {
            return Err(CompileError::syntax(
                token.end(),
                format!("function '{}' requires '('", descriptor.name),
            ));
        }

        if let Some(slot) = self.names.iter().position(|n| n == name) {
            return self.load_input(token, slot);
        }
        if ConstantPool::named_constant(name).is_some() {
            return self.load_constant(token);
        }

        let index_text = name
            .strip_prefix('x')
            .or_else(|| name.strip_prefix('X'));
        match index_text {
            Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                let slot = digits.parse::<usize>().map_err(|_| {
                    CompileError::syntax(
                        token.offset,
                        format!("malformed variable index in '{name}'"),
                    )
                })?;
                self.load_input(token, slot)
            }
            Some(rest) if rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_digit()) => {
                Err(CompileError::syntax(
                    token.offset,
                    format!("malformed variable index in '{name}'"),
                ))
            }
            _ => Err(CompileError::semantic(
                token.offset,
                format!("unknown identifier '{name}'"),
            )),
        }
    }

    fn load_input(&mut self, token: Token<'a>, slot: usize) -> Result<(), CompileError> {
        if slot >= self.n_inputs {
            return Err(CompileError::semantic(
                token.offset,
                format!(
                    "variable '{}' out of range: {} input(s) declared",
                    token.text, self.n_inputs
                ),
            ));
        }
        let slot = u16::try_from(slot)
            .map_err(|_| CompileError::syntax(token.offset, "expression too large"))?;
        self.emitter.push_value(Instruction::LoadInput(slot));
        Ok(())
    }

    /// Parses `name(arg[, arg])` with the name already consumed and emits the call.
    fn call(&mut self, name: Token<'a>, nesting: usize) -> Result<(), CompileError> {
        let descriptor = operators::lookup(name.text).ok_or_else(|| {
            CompileError::semantic(name.offset, format!("illegal function '{}'", name.text))
        })?;
        let open = self.scanner.next_token()?;
        self.check_nesting(open, nesting)?;

        let depth_before = self.emitter.depth;
        for argument in 0..descriptor.arity {
            let context = Context::Argument {
                last: argument + 1 == descriptor.arity,
            };
            let close = self.parse_expression(context, nesting + 1)?;
            self.expect_close(close, context)?;
        }
        debug_assert_eq!(
            self.emitter.depth,
            depth_before + usize::from(descriptor.arity)
        );

        let index = self
            .functions
            .intern(descriptor)
            .ok_or_else(|| CompileError::syntax(name.offset, "expression too large"))?;
        self.emitter.reduce(
            Instruction::Call(index),
            usize::from(descriptor.arity),
            name.offset,
        )
    }
}
