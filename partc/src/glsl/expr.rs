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

use std::collections::BTreeSet;
use std::fmt::Write;

use bp3d_upl::sym::{GlobalClass, SymbolKind, Symbols};
use bp3d_upl::tree::{BinOp, Callee, Expr, ExprKind, Lit, Stmt, StmtKind, UnOp, VarDef};
use bp3d_upl::types::{BaseType, Type};
use phf::phf_map;

use crate::diag::{CompileError, Diagnostic};
use crate::record::{ValueId, ValueOrigin, ValuePath, ValueTable};
use crate::stage::Tier;
use crate::types::{declare, glsl_type, zero_value};

// Host builtin names whose GLSL spelling differs.
static BUILTIN_NAMES: phf::Map<&'static str, &'static str> = phf_map! {
    "modulo" => "mod"
};

/// Where a body is being emitted: a stage `main` (stage-decorated names) or a
/// procedure definition (bare names).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope
{
    Stage(Tier),
    Proc
}

pub struct BodyEmitter<'a>
{
    pub syms: &'a Symbols,
    pub values: &'a ValueTable,
    pub scope: Scope,
    pub declared: BTreeSet<ValueId>,
    loop_depth: u32
}

fn prec_of(op: BinOp) -> u8
{
    match op {
        BinOp::Mul | BinOp::Div | BinOp::Mod => 7,
        BinOp::Add | BinOp::Sub => 6,
        BinOp::Shl | BinOp::Shr => 5,
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
        BinOp::Eq | BinOp::Ne => 3,
        BinOp::And => 2,
        BinOp::Xor => 1,
        BinOp::Or => 0
    }
}

fn float_lit(v: f64) -> String
{
    // Debug formatting round-trips and always keeps a decimal digit or an
    // exponent.
    format!("{:?}", v)
}

impl<'a> BodyEmitter<'a>
{
    pub fn new(syms: &'a Symbols, values: &'a ValueTable, scope: Scope) -> BodyEmitter<'a>
    {
        BodyEmitter {
            syms,
            values,
            scope,
            declared: BTreeSet::new(),
            loop_depth: 0
        }
    }

    fn internal(&self, msg: impl Into<String>) -> Diagnostic
    {
        Diagnostic::error(CompileError::InternalInvariantViolated(msg.into()), None)
    }

    /// Spelled name of a logical value in the current scope.
    pub fn name_of(&self, value: ValueId) -> Result<String, Diagnostic>
    {
        let info = self.values.get(value);
        match self.scope {
            Scope::Proc => match info.origin {
                ValueOrigin::Local => Ok(info.name.clone()),
                ValueOrigin::Uniform | ValueOrigin::Const => Ok(format!("uniform_{}", info.name)),
                ValueOrigin::Sampler { .. } => Ok(info.name.clone()),
                _ => Err(self.internal(format!("'{}' leaked into a procedure body", info.name)))
            },
            Scope::Stage(stage) => match info.origin {
                ValueOrigin::Sampler { .. } => Ok(info.name.clone()),
                ValueOrigin::BuiltinFragCoord => Ok("gl_FragCoord".into()),
                ValueOrigin::BuiltinPosition if stage == Tier::Vertex => Ok("gl_Position".into()),
                ValueOrigin::FragOutput { .. } if stage == Tier::Fragment => Ok(info.name.clone()),
                _ => Ok(format!("{}_{}", stage.prefix(), info.name))
            }
        }
    }

    /// Resolves an expression that denotes a tracked logical value.
    fn value_expr(&self, e: &Expr) -> Option<ValueId>
    {
        match &e.kind {
            ExprKind::Ref(sym) => {
                let info = self.syms.get(*sym)?;
                let object = info.kind == SymbolKind::Result
                    || matches!(
                        info.class,
                        Some(GlobalClass::VertexInput) | Some(GlobalClass::Builtin)
                    );
                if object {
                    None
                } else {
                    self.values.find(&ValuePath::Sym(*sym))
                }
            },
            ExprKind::Field(base, field) => {
                if let ExprKind::Ref(sym) = &base.kind {
                    let info = self.syms.get(*sym)?;
                    let object = info.kind == SymbolKind::Result
                        || matches!(
                            info.class,
                            Some(GlobalClass::VertexInput) | Some(GlobalClass::Builtin)
                        );
                    if object {
                        return self.values.find(&ValuePath::Field(*sym, field.clone()));
                    }
                }
                None
            },
            _ => None
        }
    }

    pub fn expr(&self, e: &Expr, min_prec: u8) -> Result<String, Diagnostic>
    {
        if let Some(value) = self.value_expr(e) {
            return self.name_of(value);
        }
        let (text, prec) = match &e.kind {
            ExprKind::Lit(Lit::Int(v)) => (format!("{}", v), 10),
            ExprKind::Lit(Lit::Float(v)) => (float_lit(*v), 10),
            ExprKind::Lit(Lit::Bool(v)) => (format!("{}", v), 10),
            ExprKind::Ref(sym) => {
                let name = self
                    .syms
                    .get(*sym)
                    .map(|v| v.name.clone())
                    .unwrap_or_default();
                return Err(self.internal(format!("unresolved reference '{}'", name)));
            },
            ExprKind::Field(base, field) => {
                (format!("{}.{}", self.expr(base, 10)?, field), 10)
            },
            ExprKind::Index(base, idx) => (
                format!("{}[{}]", self.expr(base, 10)?, self.expr(idx, 0)?),
                10
            ),
            ExprKind::Call(callee, args) => {
                let name = match callee {
                    Callee::Builtin(name) => BUILTIN_NAMES
                        .get(name.as_str())
                        .map(|v| (*v).to_string())
                        .unwrap_or_else(|| name.clone()),
                    Callee::Proc(sym) => self
                        .values
                        .proc_glsl_name(*sym)
                        .map(|v| v.to_string())
                        .ok_or_else(|| self.internal("call to an unscanned procedure"))?
                };
                let args = args
                    .iter()
                    .map(|a| self.expr(a, 0))
                    .collect::<Result<Vec<String>, Diagnostic>>()?;
                (format!("{}({})", name, args.join(", ")), 10)
            },
            ExprKind::Unary(op, inner) => {
                let op = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "!"
                };
                (format!("{}{}", op, self.expr(inner, 8)?), 8)
            },
            ExprKind::Binary(op, lhs, rhs) => {
                let p = prec_of(*op);
                let text = format!(
                    "{} {} {}",
                    self.expr(lhs, p)?,
                    self.op_str(*op, &e.ty),
                    self.expr(rhs, p + 1)?
                );
                (text, p)
            },
            ExprKind::Convert(ty, inner) => {
                let spelled = match ty {
                    Type::Array(_, _) => {
                        return Err(Diagnostic::error(
                            CompileError::UnsupportedConstruct(
                                "conversion to an array type".into()
                            ),
                            e.span
                        ))
                    },
                    _ => glsl_type(ty).map_err(|err| Diagnostic::error(err, e.span))?
                };
                (format!("{}({})", spelled, self.expr(inner, 0)?), 10)
            },
            ExprKind::Select(cond, on_true, on_false) => (
                format!(
                    "({} ? {} : {})",
                    self.expr(cond, 0)?,
                    self.expr(on_true, 0)?,
                    self.expr(on_false, 0)?
                ),
                10
            ),
            ExprKind::StmtList(_, _) => {
                return Err(self.internal(
                    "statement-list expression survived outside an assignment source"
                ))
            }
        };
        if prec < min_prec {
            Ok(format!("({})", text))
        } else {
            Ok(text)
        }
    }

    /// Operator spelling; `and`/`or`/`xor` pick their logical or bitwise form
    /// from the result type.
    fn op_str(&self, op: BinOp, ty: &Type) -> &'static str
    {
        let logical = matches!(ty.component(), Some(BaseType::Bool));
        match op {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::And => {
                if logical {
                    "&&"
                } else {
                    "&"
                }
            },
            BinOp::Or => {
                if logical {
                    "||"
                } else {
                    "|"
                }
            },
            BinOp::Xor => {
                if logical {
                    "^^"
                } else {
                    "^"
                }
            },
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">="
        }
    }

    fn pad(depth: usize) -> String
    {
        "    ".repeat(depth)
    }

    pub fn emit_block(
        &mut self,
        stmts: &[Stmt],
        out: &mut String,
        depth: usize
    ) -> Result<(), Diagnostic>
    {
        for stmt in stmts {
            self.emit_stmt(stmt, out, depth)?;
        }
        Ok(())
    }

    /// Emits a right-hand side, hoisting the statements of a statement-list
    /// expression in front of the consumer.
    fn rhs(&mut self, e: &Expr, out: &mut String, depth: usize) -> Result<String, Diagnostic>
    {
        if let ExprKind::StmtList(stmts, value) = &e.kind {
            self.emit_block(stmts, out, depth)?;
            return self.expr(value, 0);
        }
        self.expr(e, 0)
    }

    fn emit_defs(
        &mut self,
        defs: &[VarDef],
        out: &mut String,
        depth: usize
    ) -> Result<(), Diagnostic>
    {
        let pad = Self::pad(depth);
        for def in defs {
            let value = self
                .values
                .find(&ValuePath::Sym(def.sym))
                .ok_or_else(|| self.internal("declaration of an unscanned symbol"))?;
            let ty = self.values.get(value).ty.clone();
            let base = self.values.get(value).name.clone();
            let init = match &def.init {
                Some(e) => self.rhs(e, out, depth)?,
                None => zero_value(&ty).ok_or_else(|| {
                    Diagnostic::error(
                        CompileError::TypeNotRepresentable(format!(
                            "'{}' has no zero initializer",
                            base
                        )),
                        None
                    )
                })?
            };
            let name = self.name_of(value)?;
            if self.declared.contains(&value) {
                let _ = writeln!(out, "{}{} = {};", pad, name, init);
            } else {
                let decl = declare(&ty, &name).map_err(|e| Diagnostic::error(e, None))?;
                let _ = writeln!(out, "{}{} = {};", pad, decl, init);
                self.declared.insert(value);
            }
        }
        Ok(())
    }

    pub fn emit_stmt(&mut self, stmt: &Stmt, out: &mut String, depth: usize)
        -> Result<(), Diagnostic>
    {
        let pad = Self::pad(depth);
        match &stmt.kind {
            StmtKind::Var(defs) | StmtKind::Const(defs) => self.emit_defs(defs, out, depth),
            StmtKind::Assign { lhs, op, rhs } => {
                let rhs_s = self.rhs(rhs, out, depth)?;
                // First full write of an undeclared stage local introduces
                // its declaration.
                if op.is_none() {
                    if let Some(value) = self.value_expr(lhs) {
                        if self.needs_decl(value) && !self.declared.contains(&value) {
                            let info = self.values.get(value);
                            let decl = declare(&info.ty, &self.name_of(value)?)
                                .map_err(|e| Diagnostic::error(e, stmt.span))?;
                            let _ = writeln!(out, "{}{} = {};", pad, decl, rhs_s);
                            self.declared.insert(value);
                            return Ok(());
                        }
                    }
                }
                let lhs_s = self.expr(lhs, 0)?;
                match op {
                    None => {
                        let _ = writeln!(out, "{}{} = {};", pad, lhs_s, rhs_s);
                    },
                    Some(op) => match op {
                        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                            let sign = self.op_str(*op, &lhs.ty);
                            let _ = writeln!(out, "{}{} {}= {};", pad, lhs_s, sign, rhs_s);
                        },
                        other => {
                            let sign = self.op_str(*other, &lhs.ty);
                            let _ = writeln!(
                                out,
                                "{}{} = {} {} ({});",
                                pad, lhs_s, lhs_s, sign, rhs_s
                            );
                        }
                    }
                }
                Ok(())
            },
            StmtKind::Expr(e) => {
                let _ = writeln!(out, "{}{};", pad, self.expr(e, 0)?);
                Ok(())
            },
            StmtKind::If {
                cond,
                then_body,
                else_body
            } => {
                let _ = writeln!(out, "{}if ({}) {{", pad, self.expr(cond, 0)?);
                self.emit_block(then_body, out, depth + 1)?;
                let mut rest = else_body.as_slice();
                loop {
                    if rest.is_empty() {
                        let _ = writeln!(out, "{}}}", pad);
                        break;
                    }
                    if rest.len() == 1 {
                        if let StmtKind::If {
                            cond,
                            then_body,
                            else_body
                        } = &rest[0].kind
                        {
                            let _ = writeln!(out, "{}}} else if ({}) {{", pad, self.expr(cond, 0)?);
                            self.emit_block(then_body, out, depth + 1)?;
                            rest = else_body.as_slice();
                            continue;
                        }
                    }
                    let _ = writeln!(out, "{}}} else {{", pad);
                    self.emit_block(rest, out, depth + 1)?;
                    let _ = writeln!(out, "{}}}", pad);
                    break;
                }
                Ok(())
            },
            StmtKind::ForRange {
                var,
                start,
                end,
                body
            } => {
                let value = self
                    .values
                    .find(&ValuePath::Sym(*var))
                    .ok_or_else(|| self.internal("loop over an unscanned symbol"))?;
                let name = self.name_of(value)?;
                self.declared.insert(value);
                let _ = writeln!(
                    out,
                    "{}for (int {} = {}; {} < {}; ++{}) {{",
                    pad,
                    name,
                    self.expr(start, 0)?,
                    name,
                    self.expr(end, 0)?,
                    name
                );
                self.loop_depth += 1;
                self.emit_block(body, out, depth + 1)?;
                self.loop_depth -= 1;
                let _ = writeln!(out, "{}}}", pad);
                Ok(())
            },
            StmtKind::ForItems { var, seq, body } => {
                let size = match &seq.ty {
                    Type::Array(_, n) => *n,
                    _ => {
                        return Err(Diagnostic::error(
                            CompileError::UnsupportedConstruct(
                                "items() requires a fixed-size array".into()
                            ),
                            stmt.span
                        ))
                    }
                };
                let value = self
                    .values
                    .find(&ValuePath::Sym(*var))
                    .ok_or_else(|| self.internal("loop over an unscanned symbol"))?;
                let name = self.name_of(value)?;
                self.declared.insert(value);
                let idx = match self.loop_depth {
                    0 => "_i".to_string(),
                    n => format!("_i{}", n + 1)
                };
                let info = self.values.get(value);
                let elem = declare(&info.ty, &name).map_err(|e| Diagnostic::error(e, stmt.span))?;
                let _ = writeln!(
                    out,
                    "{}for (int {} = 0; {} < {}; ++{}) {{",
                    pad, idx, idx, size, idx
                );
                let _ = writeln!(
                    out,
                    "{}{} = {}[{}];",
                    Self::pad(depth + 1),
                    elem,
                    self.expr(seq, 10)?,
                    idx
                );
                self.loop_depth += 1;
                self.emit_block(body, out, depth + 1)?;
                self.loop_depth -= 1;
                let _ = writeln!(out, "{}}}", pad);
                Ok(())
            },
            StmtKind::While { cond, body } => {
                let _ = writeln!(out, "{}while ({}) {{", pad, self.expr(cond, 0)?);
                self.loop_depth += 1;
                self.emit_block(body, out, depth + 1)?;
                self.loop_depth -= 1;
                let _ = writeln!(out, "{}}}", pad);
                Ok(())
            },
            StmtKind::Return(value) => {
                match value {
                    Some(e) => {
                        let _ = writeln!(out, "{}return {};", pad, self.expr(e, 0)?);
                    },
                    None => {
                        let _ = writeln!(out, "{}return;", pad);
                    }
                }
                Ok(())
            },
            StmtKind::Block(stmts) => {
                let _ = writeln!(out, "{}{{", pad);
                self.emit_block(stmts, out, depth + 1)?;
                let _ = writeln!(out, "{}}}", pad);
                Ok(())
            },
            StmtKind::Interpolate { .. } => Ok(())
        }
    }

    fn needs_decl(&self, value: ValueId) -> bool
    {
        let info = self.values.get(value);
        match self.scope {
            Scope::Proc => info.origin == ValueOrigin::Local,
            Scope::Stage(stage) => match info.origin {
                ValueOrigin::Local => true,
                ValueOrigin::FragOutput { .. } => stage != Tier::Fragment,
                _ => false
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use bp3d_upl::tree::Module;

    use super::*;
    use crate::record::scan;

    fn emitter_fixture() -> (Module, ValueTable)
    {
        let mut module = Module::new();
        let x = module.symbols.local("x", Type::float());
        let y = module.symbols.local("y", Type::Scalar(BaseType::Int));
        module.body.push(Stmt::var(x, Some(Expr::float(1.0))));
        module.body.push(Stmt::var(y, Some(Expr::int(3))));
        let values = scan(&module).unwrap().values;
        (module, values)
    }

    #[test]
    fn literal_spelling()
    {
        let (module, values) = emitter_fixture();
        let em = BodyEmitter::new(&module.symbols, &values, Scope::Proc);
        assert_eq!(em.expr(&Expr::float(1.0), 0).unwrap(), "1.0");
        assert_eq!(em.expr(&Expr::float(0.123456), 0).unwrap(), "0.123456");
        assert_eq!(em.expr(&Expr::int(42), 0).unwrap(), "42");
        assert_eq!(em.expr(&Expr::boolean(true), 0).unwrap(), "true");
    }

    #[test]
    fn operator_spelling_follows_result_type()
    {
        let (module, values) = emitter_fixture();
        let em = BodyEmitter::new(&module.symbols, &values, Scope::Proc);
        let b = |v| Expr::boolean(v);
        let and = Expr::binary(BinOp::And, b(true), b(false), Type::boolean());
        assert_eq!(em.expr(&and, 0).unwrap(), "true && false");
        let band = Expr::binary(BinOp::And, Expr::int(6), Expr::int(3), Type::int());
        assert_eq!(em.expr(&band, 0).unwrap(), "6 & 3");
        let or = Expr::binary(BinOp::Or, b(true), b(false), Type::boolean());
        assert_eq!(em.expr(&or, 0).unwrap(), "true || false");
        let rem = Expr::binary(BinOp::Mod, Expr::int(7), Expr::int(2), Type::int());
        assert_eq!(em.expr(&rem, 0).unwrap(), "7 % 2");
        let shift = Expr::binary(BinOp::Shl, Expr::int(1), Expr::int(4), Type::int());
        assert_eq!(em.expr(&shift, 0).unwrap(), "1 << 4");
        let not = Expr::unary(UnOp::Not, b(false));
        assert_eq!(em.expr(&not, 0).unwrap(), "!false");
    }

    #[test]
    fn precedence_parenthesization()
    {
        let (module, values) = emitter_fixture();
        let em = BodyEmitter::new(&module.symbols, &values, Scope::Proc);
        // (1 + 2) * 3 keeps its parentheses, 1 + 2 * 3 does not gain any.
        let sum = Expr::binary(BinOp::Add, Expr::int(1), Expr::int(2), Type::int());
        let scaled = Expr::binary(BinOp::Mul, sum.clone(), Expr::int(3), Type::int());
        assert_eq!(em.expr(&scaled, 0).unwrap(), "(1 + 2) * 3");
        let product = Expr::binary(BinOp::Mul, Expr::int(2), Expr::int(3), Type::int());
        let loose = Expr::binary(BinOp::Add, Expr::int(1), product, Type::int());
        assert_eq!(em.expr(&loose, 0).unwrap(), "1 + 2 * 3");
    }

    #[test]
    fn modulo_renames_to_mod()
    {
        let (module, values) = emitter_fixture();
        let em = BodyEmitter::new(&module.symbols, &values, Scope::Proc);
        let call = Expr::builtin(
            "modulo",
            vec![Expr::float(5.0), Expr::float(2.0)],
            Type::float()
        );
        assert_eq!(em.expr(&call, 0).unwrap(), "mod(5.0, 2.0)");
    }

    #[test]
    fn conversions_use_constructor_syntax()
    {
        let (module, values) = emitter_fixture();
        let em = BodyEmitter::new(&module.symbols, &values, Scope::Proc);
        let conv = Expr::convert(Type::vecf(3), Expr::float(1.0));
        assert_eq!(em.expr(&conv, 0).unwrap(), "vec3(1.0)");
        let select = Expr::select(Expr::boolean(true), Expr::int(1), Expr::int(0));
        assert_eq!(em.expr(&select, 0).unwrap(), "(true ? 1 : 0)");
    }
}
