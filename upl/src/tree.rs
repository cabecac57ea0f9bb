// Copyright (c) 2021, BlockProject 3D
//
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without modification,
// are permitted provided that the following conditions are met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//     * Redistributions in binary form must reproduce the above copyright notice,
//       this list of conditions and the following disclaimer in the documentation
//       and/or other materials provided with the distribution.
//     * Neither the name of BlockProject 3D nor the names of its contributors
//       may be used to endorse or promote products derived from this software
//       without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT OWNER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use serde::{Deserialize, Serialize};

use crate::sym::{SymbolId, Symbols};
use crate::types::{BaseType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span
{
    pub line: u32,
    pub col: u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp
{
    Neg,
    Not
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp
{
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge
}

impl BinOp
{
    pub fn is_comparison(&self) -> bool
    {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lit
{
    Int(i64),
    Float(f64),
    Bool(bool)
}

/// Interpolation qualifier carried by `interpolate(x, q)` annotations and by
/// planned varyings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpQualifier
{
    Smooth,
    Flat,
    NoPerspective
}

impl InterpQualifier
{
    pub fn get_name(&self) -> &'static str
    {
        match self {
            InterpQualifier::Smooth => "smooth",
            InterpQualifier::Flat => "flat",
            InterpQualifier::NoPerspective => "noperspective"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee
{
    /// User-defined procedure.
    Proc(SymbolId),
    /// Builtin function known to the target language (`texture`, `modulo`,
    /// constructor names, ...).
    Builtin(String)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr
{
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Option<Span>
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind
{
    Lit(Lit),
    Ref(SymbolId),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Callee, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Convert(Type, Box<Expr>),
    /// If-expression, lowered to a ternary chain.
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Statement-list expression: run the statements, yield the expression.
    StmtList(Vec<Stmt>, Box<Expr>)
}

impl Expr
{
    pub fn new(kind: ExprKind, ty: Type) -> Expr
    {
        Expr {
            kind,
            ty,
            span: None
        }
    }

    pub fn at(mut self, line: u32, col: u32) -> Expr
    {
        self.span = Some(Span { line, col });
        self
    }

    pub fn int(v: i64) -> Expr
    {
        Expr::new(ExprKind::Lit(Lit::Int(v)), Type::Scalar(BaseType::Int))
    }

    pub fn float(v: f64) -> Expr
    {
        Expr::new(ExprKind::Lit(Lit::Float(v)), Type::float())
    }

    pub fn boolean(v: bool) -> Expr
    {
        Expr::new(ExprKind::Lit(Lit::Bool(v)), Type::boolean())
    }

    pub fn sym(id: SymbolId, ty: Type) -> Expr
    {
        Expr::new(ExprKind::Ref(id), ty)
    }

    /// Reference resolving the type from the registry.
    pub fn var(id: SymbolId, syms: &Symbols) -> Expr
    {
        let ty = syms.get(id).map(|v| v.ty.clone()).unwrap_or(Type::Void);
        Expr::new(ExprKind::Ref(id), ty)
    }

    /// Dot access; the result type is resolved from the receiver type when
    /// possible, `Void` otherwise (the compiler rejects it later).
    pub fn field(base: Expr, name: impl Into<String>) -> Expr
    {
        let name = name.into();
        let ty = base.ty.field_type(&name).unwrap_or(Type::Void);
        Expr::new(ExprKind::Field(Box::new(base), name), ty)
    }

    pub fn index(base: Expr, idx: Expr) -> Expr
    {
        let ty = match &base.ty {
            Type::Array(t, _) => (**t).clone(),
            Type::Vector(v) => Type::Scalar(v.item),
            Type::Matrix(m) => Type::vecf(m.rows),
            _ => Type::Void
        };
        Expr::new(ExprKind::Index(Box::new(base), Box::new(idx)), ty)
    }

    pub fn call(callee: Callee, args: Vec<Expr>, ty: Type) -> Expr
    {
        Expr::new(ExprKind::Call(callee, args), ty)
    }

    pub fn builtin(name: impl Into<String>, args: Vec<Expr>, ty: Type) -> Expr
    {
        Expr::call(Callee::Builtin(name.into()), args, ty)
    }

    pub fn unary(op: UnOp, e: Expr) -> Expr
    {
        let ty = e.ty.clone();
        Expr::new(ExprKind::Unary(op, Box::new(e)), ty)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr, ty: Type) -> Expr
    {
        Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), ty)
    }

    pub fn convert(ty: Type, e: Expr) -> Expr
    {
        Expr::new(ExprKind::Convert(ty.clone(), Box::new(e)), ty)
    }

    pub fn select(cond: Expr, on_true: Expr, on_false: Expr) -> Expr
    {
        let ty = on_true.ty.clone();
        Expr::new(
            ExprKind::Select(Box::new(cond), Box::new(on_true), Box::new(on_false)),
            ty
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDef
{
    pub sym: SymbolId,
    pub init: Option<Expr>
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt
{
    pub kind: StmtKind,
    pub span: Option<Span>
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind
{
    /// Variable declaration section; declarations without an initializer are
    /// zero-initialized.
    Var(Vec<VarDef>),
    /// Constant declaration section; initializers must be constant.
    Const(Vec<VarDef>),
    /// `lhs = rhs`, or `lhs op= rhs` when `op` is set (`inc a, b` arrives as
    /// `op = Some(Add)`).
    Assign
    {
        lhs: Expr,
        op: Option<BinOp>,
        rhs: Expr
    },
    /// Expression evaluated for its effects (a call statement).
    Expr(Expr),
    If
    {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>
    },
    /// `for var in start ..< end`.
    ForRange
    {
        var: SymbolId,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>
    },
    /// `for var in items(seq)` over a fixed-size array.
    ForItems
    {
        var: SymbolId,
        seq: Expr,
        body: Vec<Stmt>
    },
    While
    {
        cond: Expr,
        body: Vec<Stmt>
    },
    /// Only valid inside procedure bodies.
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    /// User override: let `target` cross the next stage boundary as a
    /// varying. Emits nothing by itself.
    Interpolate
    {
        target: Expr,
        qualifier: Option<InterpQualifier>
    }
}

impl Stmt
{
    pub fn new(kind: StmtKind) -> Stmt
    {
        Stmt { kind, span: None }
    }

    pub fn at(mut self, line: u32, col: u32) -> Stmt
    {
        self.span = Some(Span { line, col });
        self
    }

    pub fn assign(lhs: Expr, rhs: Expr) -> Stmt
    {
        Stmt::new(StmtKind::Assign {
            lhs,
            op: None,
            rhs
        })
    }

    pub fn assign_op(lhs: Expr, op: BinOp, rhs: Expr) -> Stmt
    {
        Stmt::new(StmtKind::Assign {
            lhs,
            op: Some(op),
            rhs
        })
    }

    pub fn var(sym: SymbolId, init: Option<Expr>) -> Stmt
    {
        Stmt::new(StmtKind::Var(vec![VarDef { sym, init }]))
    }

    pub fn interpolate(target: Expr, qualifier: Option<InterpQualifier>) -> Stmt
    {
        Stmt::new(StmtKind::Interpolate { target, qualifier })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcDef
{
    pub sym: SymbolId,
    pub params: Vec<SymbolId>,
    pub ret: Type,
    pub body: Vec<Stmt>
}

/// A complete unified pipeline program: the symbol registry, the procedure
/// definitions (in definition order, callees before callers) and the unified
/// shader body.
#[derive(Debug, Clone, Default)]
pub struct Module
{
    pub symbols: Symbols,
    pub procs: Vec<ProcDef>,
    pub body: Vec<Stmt>
}

impl Module
{
    pub fn new() -> Module
    {
        Module::default()
    }
}
