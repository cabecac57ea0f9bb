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

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bp3d_upl::sym::{GlobalClass, SymbolId, SymbolInfo, SymbolKind, Symbols};
use bp3d_upl::tree::{
    Callee, Expr, ExprKind, InterpQualifier, Module, Span, Stmt, StmtKind, VarDef
};
use bp3d_upl::types::Type;
use log::trace;

use crate::diag::{CompileError, Diagnostic};
use crate::stage::Tier;
use crate::symtab::SymbolTable;

/// Dense index of a logical value tracked by the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

/// Identity of a logical value: a plain symbol, or a first-level field of the
/// `result`, vertex-input or `gl` objects (so `result.color` and
/// `result.depth` flow independently).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValuePath
{
    Sym(SymbolId),
    Field(SymbolId, String)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin
{
    Local,
    Const,
    Uniform,
    Attribute
    {
        location: u32
    },
    Sampler
    {
        vertex_fetch: bool
    },
    BuiltinPosition,
    BuiltinFragCoord,
    FragOutput
    {
        location: u32
    }
}

impl ValueOrigin
{
    /// Tier a read of this value contributes, for values whose producer is a
    /// global rather than a tracked instance.
    pub fn global_tier(&self) -> Option<Tier>
    {
        match self {
            ValueOrigin::Const => Some(Tier::Const),
            ValueOrigin::Uniform => Some(Tier::Cpu),
            ValueOrigin::Attribute { .. } => Some(Tier::Vertex),
            ValueOrigin::Sampler { vertex_fetch } => Some(match vertex_fetch {
                true => Tier::Vertex,
                false => Tier::Fragment
            }),
            ValueOrigin::BuiltinFragCoord => Some(Tier::Fragment),
            ValueOrigin::Local | ValueOrigin::BuiltinPosition | ValueOrigin::FragOutput { .. } => {
                None
            }
        }
    }

    /// Seed instance tier for values readable before any explicit write
    /// (fragment outputs are zero-initialized).
    pub fn seed_tier(&self) -> Option<Tier>
    {
        match self {
            ValueOrigin::FragOutput { .. } => Some(Tier::Const),
            _ => None
        }
    }

    pub fn is_global(&self) -> bool
    {
        self.global_tier().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ValueInfo
{
    pub path: ValuePath,
    pub ty: Type,
    pub origin: ValueOrigin,
    /// Chosen GLSL base identifier, unique per compile.
    pub name: String
}

/// Interning table over logical values, in source-discovery order.
#[derive(Debug, Default)]
pub struct ValueTable
{
    values: Vec<ValueInfo>,
    index: HashMap<ValuePath, ValueId>,
    names: SymbolTable,
    proc_names: HashMap<SymbolId, String>
}

impl ValueTable
{
    pub fn new() -> ValueTable
    {
        ValueTable::default()
    }

    pub fn get(&self, id: ValueId) -> &ValueInfo
    {
        &self.values[id.0 as usize]
    }

    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &ValueInfo)>
    {
        self.values.iter().enumerate().map(|(i, v)| (ValueId(i as u32), v))
    }

    /// The registry symbol a value descends from (what binding descriptors
    /// reference).
    pub fn source_symbol(&self, id: ValueId) -> SymbolId
    {
        match &self.get(id).path {
            ValuePath::Sym(s) => *s,
            ValuePath::Field(s, _) => *s
        }
    }

    /// Lookup without interning; values are interned during the scan, so the
    /// emitter only ever resolves.
    pub fn find(&self, path: &ValuePath) -> Option<ValueId>
    {
        self.index.get(path).copied()
    }

    /// Assigns the GLSL identifier of a procedure in the same namespace as
    /// value bases.
    pub fn intern_proc(&mut self, sym: SymbolId, name: &str) -> String
    {
        let chosen = self.names.assign(sym.0, &[name]);
        self.proc_names.insert(sym, chosen.clone());
        chosen
    }

    pub fn proc_glsl_name(&self, sym: SymbolId) -> Option<&str>
    {
        self.proc_names.get(&sym).map(|v| v.as_str())
    }

    pub fn intern(&mut self, syms: &Symbols, path: ValuePath) -> Result<ValueId, CompileError>
    {
        if let Some(id) = self.index.get(&path) {
            return Ok(*id);
        }
        let (ty, origin, segments, key) = match &path {
            ValuePath::Sym(sid) => {
                let info = syms
                    .get(*sid)
                    .ok_or_else(|| CompileError::UnknownIdentifier(format!("#{}", sid.0)))?;
                let origin = match (&info.kind, &info.class) {
                    (SymbolKind::Const, _) => ValueOrigin::Const,
                    (_, Some(GlobalClass::Uniform)) => ValueOrigin::Uniform,
                    (_, Some(GlobalClass::Sampler { vertex_fetch })) => ValueOrigin::Sampler {
                        vertex_fetch: *vertex_fetch
                    },
                    (SymbolKind::Proc, _) => {
                        return Err(CompileError::UnsupportedConstruct(format!(
                            "procedure '{}' used as a value",
                            info.name
                        )))
                    },
                    _ => ValueOrigin::Local
                };
                (info.ty.clone(), origin, vec![info.name.clone()], sid.0)
            },
            ValuePath::Field(sid, field) => {
                let info = syms
                    .get(*sid)
                    .ok_or_else(|| CompileError::UnknownIdentifier(format!("#{}", sid.0)))?;
                let ty = info.ty.field_type(field).ok_or_else(|| {
                    CompileError::UnknownIdentifier(format!("{}.{}", info.name, field))
                })?;
                let origin = object_field_origin(info, field)?;
                (ty, origin, vec![info.name.clone(), field.clone()], sid.0)
            }
        };
        let segments: Vec<&str> = segments.iter().map(|v| v.as_str()).collect();
        let name = self.names.assign(key, &segments);
        let id = ValueId(self.values.len() as u32);
        trace!("Interned value '{}' as #{}", name, id.0);
        self.values.push(ValueInfo {
            path: path.clone(),
            ty,
            origin,
            name
        });
        self.index.insert(path, id);
        Ok(id)
    }
}

fn object_field_origin(info: &SymbolInfo, field: &str) -> Result<ValueOrigin, CompileError>
{
    let location = match &info.ty {
        Type::Struct(st) => st.field_index(field).unwrap_or(0) as u32,
        _ => 0
    };
    match (&info.kind, &info.class) {
        (SymbolKind::Result, _) => Ok(ValueOrigin::FragOutput { location }),
        (_, Some(GlobalClass::VertexInput)) => Ok(ValueOrigin::Attribute { location }),
        (_, Some(GlobalClass::Builtin)) => match field {
            "Position" => Ok(ValueOrigin::BuiltinPosition),
            "FragCoord" => Ok(ValueOrigin::BuiltinFragCoord),
            _ => Err(CompileError::UnknownIdentifier(format!(
                "{}.{}",
                info.name, field
            )))
        },
        _ => Err(CompileError::InternalInvariantViolated(format!(
            "'{}' is not an object with tracked fields",
            info.name
        )))
    }
}

/// A read resolved by the tier solver: which instance the read bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadInst
{
    pub value: ValueId,
    pub tier: Tier,
    pub seed: bool
}

/// Per top-level-statement record: what it touches and where it runs.
#[derive(Debug, Clone)]
pub struct StmtRecord
{
    pub index: usize,
    pub reads: BTreeSet<ValueId>,
    pub writes: BTreeSet<ValueId>,
    /// Writes whose previous value is also consumed (partial, compound or
    /// conditional assignments).
    pub rmw: BTreeSet<ValueId>,
    /// Reads satisfied inside the statement itself (no external instance).
    pub internal_reads: BTreeSet<ValueId>,
    /// Procedures reachable from this statement.
    pub procs: BTreeSet<SymbolId>,
    pub hint: Tier,
    pub forced: Option<Tier>,
    /// Solved execution tier.
    pub tier: Tier,
    /// Resolved instance per read, filled by the solver.
    pub read_insts: Vec<ReadInst>,
    pub const_decl: bool,
    /// Index into `Scan::interps` when this statement is an `interpolate`
    /// annotation.
    pub interp: Option<usize>,
    pub span: Option<Span>
}

impl StmtRecord
{
    fn new(index: usize, span: Option<Span>) -> StmtRecord
    {
        StmtRecord {
            index,
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            rmw: BTreeSet::new(),
            internal_reads: BTreeSet::new(),
            procs: BTreeSet::new(),
            hint: Tier::Const,
            forced: None,
            tier: Tier::Const,
            read_insts: Vec::new(),
            const_decl: false,
            interp: None,
            span
        }
    }

    pub fn is_interp(&self) -> bool
    {
        self.interp.is_some()
    }
}

/// A whole-symbol interpolation request.
#[derive(Debug, Clone)]
pub struct InterpReq
{
    pub value: ValueId,
    pub qualifier: Option<InterpQualifier>,
    pub src_index: usize,
    /// Producing shader stage at the annotation point, filled by the solver.
    pub producer: Tier,
    pub span: Option<Span>
}

#[derive(Debug, Clone)]
pub struct ProcInfo
{
    pub intrinsic: Tier,
    pub globals: BTreeSet<ValueId>,
    /// Parameters and locals of the body (for per-stage struct collection).
    pub locals: BTreeSet<ValueId>,
    pub calls: BTreeSet<SymbolId>
}

/// Output of the scan pass: one record per top-level statement plus the
/// interned value space and per-procedure summaries.
#[derive(Debug)]
pub struct Scan
{
    pub values: ValueTable,
    pub records: Vec<StmtRecord>,
    pub interps: Vec<InterpReq>,
    pub procs: BTreeMap<SymbolId, ProcInfo>
}

struct Acc
{
    reads: BTreeSet<ValueId>,
    writes: BTreeSet<ValueId>,
    rmw: BTreeSet<ValueId>,
    internal_reads: BTreeSet<ValueId>,
    procs: BTreeSet<SymbolId>,
    hint: Tier,
    forced: Option<Tier>,
    defined: BTreeSet<ValueId>
}

impl Acc
{
    fn new() -> Acc
    {
        Acc {
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            rmw: BTreeSet::new(),
            internal_reads: BTreeSet::new(),
            procs: BTreeSet::new(),
            hint: Tier::Const,
            forced: None,
            defined: BTreeSet::new()
        }
    }

    fn read(&mut self, id: ValueId, origin: ValueOrigin)
    {
        if self.defined.contains(&id) {
            self.internal_reads.insert(id);
        } else {
            self.reads.insert(id);
        }
        if let Some(t) = origin.global_tier() {
            self.hint = self.hint.join(t);
        }
    }

    fn write(&mut self, id: ValueId, keeps_old: bool)
    {
        self.writes.insert(id);
        if keeps_old {
            self.rmw.insert(id);
            if !self.defined.contains(&id) {
                self.reads.insert(id);
            }
        } else {
            self.defined.insert(id);
        }
    }
}

struct Scanner<'a>
{
    syms: &'a Symbols,
    values: ValueTable,
    procs: BTreeMap<SymbolId, ProcInfo>,
    cur_span: Option<Span>,
    in_proc: bool
}

pub fn scan(module: &Module) -> Result<Scan, Diagnostic>
{
    let mut scanner = Scanner {
        syms: &module.symbols,
        values: ValueTable::new(),
        procs: BTreeMap::new(),
        cur_span: None,
        in_proc: false
    };
    for proc in &module.procs {
        scanner.scan_proc(proc)?;
    }
    let mut records = Vec::with_capacity(module.body.len());
    let mut interps = Vec::new();
    for (index, stmt) in module.body.iter().enumerate() {
        scanner.cur_span = stmt.span;
        let mut record = StmtRecord::new(index, stmt.span);
        if let StmtKind::Interpolate { target, qualifier } = &stmt.kind {
            let value = scanner.interp_target(target)?;
            record.interp = Some(interps.len());
            interps.push(InterpReq {
                value,
                qualifier: *qualifier,
                src_index: index,
                producer: Tier::Vertex,
                span: stmt.span
            });
        } else {
            let mut acc = Acc::new();
            scanner.scan_stmt(stmt, &mut acc, false)?;
            record.reads = acc.reads;
            record.writes = acc.writes;
            record.rmw = acc.rmw;
            record.internal_reads = acc.internal_reads;
            record.procs = acc.procs;
            record.hint = acc.hint;
            record.forced = acc.forced;
            record.tier = acc.hint;
            record.const_decl = matches!(stmt.kind, StmtKind::Const(_));
        }
        records.push(record);
    }
    Ok(Scan {
        values: scanner.values,
        records,
        interps,
        procs: scanner.procs
    })
}

impl<'a> Scanner<'a>
{
    fn err(&self, error: CompileError) -> Diagnostic
    {
        Diagnostic::error(error, self.cur_span)
    }

    fn info(&self, id: SymbolId) -> Result<&'a SymbolInfo, Diagnostic>
    {
        self.syms
            .get(id)
            .ok_or_else(|| self.err(CompileError::UnknownIdentifier(format!("#{}", id.0))))
    }

    fn intern(&mut self, path: ValuePath) -> Result<ValueId, Diagnostic>
    {
        let span = self.cur_span;
        self.values
            .intern(self.syms, path)
            .map_err(|e| Diagnostic::error(e, span))
    }

    fn is_object(info: &SymbolInfo) -> bool
    {
        info.kind == SymbolKind::Result
            || matches!(
                info.class,
                Some(GlobalClass::VertexInput) | Some(GlobalClass::Builtin)
            )
    }

    fn scan_proc(&mut self, proc: &bp3d_upl::tree::ProcDef) -> Result<(), Diagnostic>
    {
        let name = self.info(proc.sym)?.name.clone();
        trace!("Scanning procedure '{}'", name);
        self.values.intern_proc(proc.sym, &name);
        self.in_proc = true;
        let mut acc = Acc::new();
        for param in &proc.params {
            let id = self.intern(ValuePath::Sym(*param))?;
            acc.defined.insert(id);
        }
        for stmt in &proc.body {
            self.cur_span = stmt.span;
            self.scan_stmt(stmt, &mut acc, false)?;
        }
        self.in_proc = false;
        for id in &acc.reads {
            let info = self.values.get(*id);
            if info.origin == ValueOrigin::Local {
                return Err(self.err(CompileError::UnknownIdentifier(info.name.clone())));
            }
        }
        let mut intrinsic = acc.hint;
        for callee in &acc.procs {
            if let Some(v) = self.procs.get(callee) {
                intrinsic = intrinsic.join(v.intrinsic);
            }
        }
        let mut locals: BTreeSet<ValueId> = acc.defined;
        locals.extend(acc.writes.iter().copied());
        self.procs.insert(proc.sym, ProcInfo {
            intrinsic,
            globals: acc.reads,
            locals,
            calls: acc.procs
        });
        Ok(())
    }

    fn interp_target(&mut self, target: &Expr) -> Result<ValueId, Diagnostic>
    {
        let bad = |s: &Scanner, e: &Expr| {
            s.err(CompileError::BadInterpolate(describe_expr(s.syms, e)))
        };
        let id = match &target.kind {
            ExprKind::Ref(sym) => {
                let info = self.info(*sym)?;
                if Scanner::is_object(info) || info.kind == SymbolKind::Proc {
                    return Err(bad(self, target));
                }
                self.intern(ValuePath::Sym(*sym))?
            },
            ExprKind::Field(base, field) => {
                let sym = match &base.kind {
                    ExprKind::Ref(sym) => *sym,
                    _ => return Err(bad(self, target))
                };
                if !Scanner::is_object(self.info(sym)?) {
                    return Err(bad(self, target));
                }
                self.intern(ValuePath::Field(sym, field.clone()))?
            },
            _ => return Err(bad(self, target))
        };
        match self.values.get(id).ty {
            Type::Scalar(_) | Type::Vector(_) => Ok(id),
            _ => Err(bad(self, target))
        }
    }

    fn scan_stmt(&mut self, stmt: &Stmt, acc: &mut Acc, conditional: bool) -> Result<(), Diagnostic>
    {
        if let Some(span) = stmt.span {
            self.cur_span = Some(span);
        }
        match &stmt.kind {
            StmtKind::Var(defs) => self.scan_defs(defs, acc, conditional, false),
            StmtKind::Const(defs) => self.scan_defs(defs, acc, conditional, true),
            StmtKind::Assign { lhs, op, rhs } => {
                self.walk_rhs(rhs, acc, conditional)?;
                self.walk_lvalue(lhs, acc, op.is_some(), conditional)
            },
            StmtKind::Expr(e) => self.walk_expr(e, acc),
            StmtKind::If {
                cond,
                then_body,
                else_body
            } => {
                self.walk_expr(cond, acc)?;
                let saved = acc.defined.clone();
                self.scan_block(then_body, acc, true)?;
                acc.defined = saved.clone();
                self.scan_block(else_body, acc, true)?;
                acc.defined = saved;
                Ok(())
            },
            StmtKind::ForRange {
                var,
                start,
                end,
                body
            } => {
                self.walk_expr(start, acc)?;
                self.walk_expr(end, acc)?;
                let id = self.intern(ValuePath::Sym(*var))?;
                acc.write(id, conditional);
                let saved = acc.defined.clone();
                self.scan_block(body, acc, true)?;
                acc.defined = saved;
                Ok(())
            },
            StmtKind::ForItems { var, seq, body } => {
                self.walk_expr(seq, acc)?;
                let id = self.intern(ValuePath::Sym(*var))?;
                acc.write(id, conditional);
                let saved = acc.defined.clone();
                self.scan_block(body, acc, true)?;
                acc.defined = saved;
                Ok(())
            },
            StmtKind::While { cond, body } => {
                self.walk_expr(cond, acc)?;
                let saved = acc.defined.clone();
                self.scan_block(body, acc, true)?;
                acc.defined = saved;
                Ok(())
            },
            StmtKind::Return(value) => {
                if !self.in_proc {
                    return Err(self.err(CompileError::UnsupportedConstruct(
                        "return outside of a procedure".into()
                    )));
                }
                match value {
                    Some(e) => self.walk_expr(e, acc),
                    None => Ok(())
                }
            },
            StmtKind::Block(stmts) => self.scan_block(stmts, acc, conditional),
            StmtKind::Interpolate { .. } => Err(self.err(CompileError::UnsupportedConstruct(
                "interpolate must appear at the top level of the shader body".into()
            )))
        }
    }

    fn scan_block(&mut self, stmts: &[Stmt], acc: &mut Acc, conditional: bool)
        -> Result<(), Diagnostic>
    {
        for stmt in stmts {
            self.scan_stmt(stmt, acc, conditional)?;
        }
        Ok(())
    }

    fn scan_defs(
        &mut self,
        defs: &[VarDef],
        acc: &mut Acc,
        conditional: bool,
        constant: bool
    ) -> Result<(), Diagnostic>
    {
        for def in defs {
            match &def.init {
                Some(init) => self.walk_rhs(init, acc, conditional)?,
                None => {
                    if constant {
                        return Err(self.err(CompileError::UnsupportedConstruct(
                            "constant declaration requires an initializer".into()
                        )));
                    }
                }
            }
            let id = self.intern(ValuePath::Sym(def.sym))?;
            acc.write(id, conditional);
        }
        Ok(())
    }

    /// Right-hand sides additionally accept statement-list expressions; the
    /// carried statements merge into the surrounding record.
    fn walk_rhs(&mut self, e: &Expr, acc: &mut Acc, conditional: bool) -> Result<(), Diagnostic>
    {
        if let ExprKind::StmtList(stmts, value) = &e.kind {
            self.scan_block(stmts, acc, conditional)?;
            return self.walk_expr(value, acc);
        }
        self.walk_expr(e, acc)
    }

    fn walk_expr(&mut self, e: &Expr, acc: &mut Acc) -> Result<(), Diagnostic>
    {
        match &e.kind {
            ExprKind::Lit(_) => Ok(()),
            ExprKind::Ref(sym) => {
                let info = self.info(*sym)?;
                if Scanner::is_object(info) {
                    return Err(self.err(CompileError::UnsupportedConstruct(format!(
                        "'{}' cannot be used as a whole value",
                        info.name
                    ))));
                }
                let id = self.intern(ValuePath::Sym(*sym))?;
                let origin = self.values.get(id).origin;
                acc.read(id, origin);
                Ok(())
            },
            ExprKind::Field(base, field) => {
                if let ExprKind::Ref(sym) = &base.kind {
                    let info = self.info(*sym)?;
                    if Scanner::is_object(info) {
                        if self.in_proc {
                            return Err(self.err(CompileError::UnsupportedConstruct(format!(
                                "'{}' is not accessible inside a procedure",
                                info.name
                            ))));
                        }
                        let id = self.intern(ValuePath::Field(*sym, field.clone()))?;
                        let origin = self.values.get(id).origin;
                        acc.read(id, origin);
                        return Ok(());
                    }
                }
                self.walk_expr(base, acc)
            },
            ExprKind::Index(base, idx) => {
                self.walk_expr(base, acc)?;
                self.walk_expr(idx, acc)
            },
            ExprKind::Call(callee, args) => {
                match callee {
                    Callee::Builtin(name) => {
                        if name == "interpolate" {
                            return Err(self.err(CompileError::UnsupportedConstruct(
                                "interpolate is a statement, not an expression".into()
                            )));
                        }
                    },
                    Callee::Proc(sym) => {
                        let info = self.procs.get(sym).cloned().ok_or_else(|| {
                            let name = self
                                .syms
                                .get(*sym)
                                .map(|v| v.name.clone())
                                .unwrap_or_else(|| format!("#{}", sym.0));
                            self.err(CompileError::UnsupportedConstruct(format!(
                                "procedure '{}' called before its definition (recursion is not supported)",
                                name
                            )))
                        })?;
                        acc.hint = acc.hint.join(info.intrinsic);
                        acc.procs.insert(*sym);
                        acc.procs.extend(info.calls.iter().copied());
                        for id in info.globals {
                            let origin = self.values.get(id).origin;
                            acc.read(id, origin);
                        }
                    }
                }
                for arg in args {
                    self.walk_expr(arg, acc)?;
                }
                Ok(())
            },
            ExprKind::Unary(_, inner) => self.walk_expr(inner, acc),
            ExprKind::Binary(op, lhs, rhs) => {
                if op.is_comparison() && (!is_scalar(&lhs.ty) || !is_scalar(&rhs.ty)) {
                    return Err(self.err(CompileError::UnsupportedConstruct(format!(
                        "ordered comparison requires scalar operands, got {} and {}",
                        lhs.ty, rhs.ty
                    ))));
                }
                self.walk_expr(lhs, acc)?;
                self.walk_expr(rhs, acc)
            },
            ExprKind::Convert(_, inner) => self.walk_expr(inner, acc),
            ExprKind::Select(cond, on_true, on_false) => {
                self.walk_expr(cond, acc)?;
                self.walk_expr(on_true, acc)?;
                self.walk_expr(on_false, acc)
            },
            ExprKind::StmtList(_, _) => Err(self.err(CompileError::UnsupportedConstruct(
                "statement-list expression is only accepted as an initializer or assignment source"
                    .into()
            )))
        }
    }

    fn walk_lvalue(
        &mut self,
        e: &Expr,
        acc: &mut Acc,
        partial: bool,
        conditional: bool
    ) -> Result<(), Diagnostic>
    {
        match &e.kind {
            ExprKind::Ref(sym) => {
                let info = self.info(*sym)?;
                if Scanner::is_object(info) {
                    return Err(self.err(CompileError::UnsupportedConstruct(format!(
                        "cannot assign to '{}' as a whole",
                        info.name
                    ))));
                }
                match (&info.kind, &info.class) {
                    (SymbolKind::Const, _)
                    | (_, Some(GlobalClass::Uniform))
                    | (_, Some(GlobalClass::Sampler { .. })) => {
                        return Err(self.err(CompileError::UnsupportedConstruct(format!(
                            "cannot assign to '{}'",
                            info.name
                        ))))
                    },
                    _ => ()
                }
                let id = self.intern(ValuePath::Sym(*sym))?;
                acc.write(id, partial || conditional);
                Ok(())
            },
            ExprKind::Field(base, field) => {
                if let ExprKind::Ref(sym) = &base.kind {
                    let info = self.info(*sym)?;
                    if Scanner::is_object(info) {
                        if self.in_proc {
                            return Err(self.err(CompileError::UnsupportedConstruct(format!(
                                "'{}' cannot be written inside a procedure",
                                info.name
                            ))));
                        }
                        let id = self.intern(ValuePath::Field(*sym, field.clone()))?;
                        match self.values.get(id).origin {
                            ValueOrigin::Attribute { .. } => {
                                return Err(self.err(CompileError::UnsupportedConstruct(format!(
                                    "cannot assign to vertex attribute '{}.{}'",
                                    info.name, field
                                ))))
                            },
                            ValueOrigin::BuiltinFragCoord => {
                                return Err(self.err(CompileError::UnsupportedConstruct(
                                    "cannot assign to gl.FragCoord".into()
                                )))
                            },
                            ValueOrigin::BuiltinPosition => {
                                acc.forced = Some(Tier::Vertex);
                            },
                            _ => ()
                        }
                        acc.write(id, partial || conditional);
                        return Ok(());
                    }
                }
                // Swizzle or member store: a partial write of the base value.
                self.walk_lvalue(base, acc, true, conditional)
            },
            ExprKind::Index(base, idx) => {
                self.walk_expr(idx, acc)?;
                self.walk_lvalue(base, acc, true, conditional)
            },
            _ => Err(self.err(CompileError::UnsupportedConstruct(
                "invalid assignment target".into()
            )))
        }
    }
}

fn is_scalar(ty: &Type) -> bool
{
    matches!(ty, Type::Scalar(_))
}

/// Rough source rendering of an expression, for diagnostics only.
pub fn describe_expr(syms: &Symbols, e: &Expr) -> String
{
    match &e.kind {
        ExprKind::Ref(sym) => syms
            .get(*sym)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| format!("#{}", sym.0)),
        ExprKind::Field(base, field) => format!("{}.{}", describe_expr(syms, base), field),
        ExprKind::Index(base, _) => format!("{}[..]", describe_expr(syms, base)),
        _ => "<expression>".into()
    }
}

#[cfg(test)]
mod tests
{
    use bp3d_upl::tree::Stmt;

    use super::*;

    fn fixture() -> Module
    {
        let mut module = Module::new();
        let vertex = Type::record("Vertex", vec![
            ("position".into(), Type::vecf(4)),
            ("texcoord".into(), Type::vecf(2))
        ]);
        let targets = Type::record("Targets", vec![("color".into(), Type::vecf(4))]);
        module.symbols.vertex_input("v", vertex);
        module.symbols.fragment_result("result", targets);
        module.symbols.builtin_gl();
        module.symbols.uniform("mvp", Type::mat(4, 4));
        module
    }

    fn sym(module: &Module, name: &str) -> SymbolId
    {
        module
            .symbols
            .iter()
            .find(|(_, v)| v.name == name)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn gl_position_write_is_forced_to_vertex()
    {
        let mut module = fixture();
        let gl = sym(&module, "gl");
        let v = sym(&module, "v");
        let mvp = sym(&module, "mvp");
        let gl_ty = module.symbols.get(gl).unwrap().ty.clone();
        let v_ty = module.symbols.get(v).unwrap().ty.clone();
        module.body.push(Stmt::assign(
            Expr::field(Expr::sym(gl, gl_ty), "Position"),
            Expr::binary(
                bp3d_upl::tree::BinOp::Mul,
                Expr::sym(mvp, Type::mat(4, 4)),
                Expr::field(Expr::sym(v, v_ty), "position"),
                Type::vecf(4)
            )
        ));
        let scan = scan(&module).unwrap();
        let record = &scan.records[0];
        assert_eq!(record.forced, Some(Tier::Vertex));
        assert_eq!(record.hint, Tier::Vertex);
        assert_eq!(record.reads.len(), 2);
        assert_eq!(record.writes.len(), 1);
        assert!(record.rmw.is_empty());
    }

    #[test]
    fn partial_store_reads_the_old_value()
    {
        let mut module = fixture();
        let result = sym(&module, "result");
        let result_ty = module.symbols.get(result).unwrap().ty.clone();
        let lhs = Expr::field(
            Expr::field(Expr::sym(result, result_ty), "color"),
            "r"
        );
        module.body.push(Stmt::assign(lhs, Expr::float(0.0)));
        let scan = scan(&module).unwrap();
        let record = &scan.records[0];
        assert_eq!(record.writes.len(), 1);
        assert_eq!(record.rmw.len(), 1);
        let color = *record.writes.iter().next().unwrap();
        assert!(record.reads.contains(&color));
        assert_eq!(scan.values.get(color).name, "result_color");
    }

    #[test]
    fn vector_comparison_is_rejected()
    {
        let mut module = fixture();
        let v = sym(&module, "v");
        let v_ty = module.symbols.get(v).unwrap().ty.clone();
        let tmp = module.symbols.local("tmp", Type::boolean());
        module.body.push(Stmt::var(
            tmp,
            Some(Expr::binary(
                bp3d_upl::tree::BinOp::Gt,
                Expr::field(Expr::sym(v, v_ty), "position"),
                Expr::float(0.5),
                Type::boolean()
            ))
        ));
        let err = scan(&module).unwrap_err();
        assert_eq!(err.kind, "UnsupportedConstruct");
    }

    #[test]
    fn interpolate_on_component_is_rejected()
    {
        let mut module = fixture();
        let result = sym(&module, "result");
        let result_ty = module.symbols.get(result).unwrap().ty.clone();
        let target = Expr::field(
            Expr::field(Expr::sym(result, result_ty), "color"),
            "r"
        );
        module.body.push(Stmt::interpolate(target, None));
        let err = scan(&module).unwrap_err();
        assert_eq!(err.kind, "BadInterpolate");
        assert!(err.message.contains("result.color.r"));
    }
}
