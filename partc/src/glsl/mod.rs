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

mod expr;

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use std::rc::Rc;

use bp3d_upl::sym::SymbolId;
use bp3d_upl::tree::{Module, ProcDef};
use bp3d_upl::types::{StructType, Type};
use log::debug;

pub use self::expr::{BodyEmitter, Scope};
use crate::diag::{CompileError, Diagnostic};
use crate::partition::Partition;
use crate::record::{ValueId, ValueOrigin, ValuePath};
use crate::stage::Tier;
use crate::types::{collect_structs, declare, glsl_type, struct_decl, zero_value};
use crate::varying::{IncomingSource, VaryingPlan};

/// Per-stage GLSL document emitter. Procedure definitions are rendered once
/// and memoized for the lifetime of one compile.
pub struct GlslEmitter<'a>
{
    module: &'a Module,
    partition: &'a Partition,
    plan: &'a VaryingPlan,
    version: u32,
    proc_memo: HashMap<SymbolId, String>
}

impl<'a> GlslEmitter<'a>
{
    pub fn new(
        module: &'a Module,
        partition: &'a Partition,
        plan: &'a VaryingPlan,
        version: u32
    ) -> GlslEmitter<'a>
    {
        GlslEmitter {
            module,
            partition,
            plan,
            version,
            proc_memo: HashMap::new()
        }
    }

    fn internal(msg: impl Into<String>) -> Diagnostic
    {
        Diagnostic::error(CompileError::InternalInvariantViolated(msg.into()), None)
    }

    pub fn emit_stage(&mut self, stage: Tier) -> Result<String, Diagnostic>
    {
        let io = self
            .plan
            .io(stage)
            .ok_or_else(|| GlslEmitter::internal(format!("no io for stage {}", stage.get_name())))?;
        let values = &self.partition.values;
        let stmts = self.partition.stmts_at(stage);
        let mut sections: Vec<String> = vec![format!("#version {}", self.version)];

        // Record declarations used by this stage.
        let mut touched: BTreeSet<ValueId> = BTreeSet::new();
        for i in &stmts {
            let record = &self.partition.records[*i];
            touched.extend(record.reads.iter().copied());
            touched.extend(record.writes.iter().copied());
            touched.extend(record.internal_reads.iter().copied());
        }
        touched.extend(io.uniforms.iter().copied());
        for inc in &io.incoming {
            touched.insert(inc.value);
        }
        touched.extend(io.outgoing.iter().copied());
        if stage == Tier::Fragment {
            touched.extend(self.plan.outputs.iter().copied());
        }
        let mut structs: Vec<Rc<StructType>> = Vec::new();
        for value in &touched {
            collect_structs(&values.get(*value).ty, &mut structs);
        }
        for proc in &self.module.procs {
            if !io.procs.contains(&proc.sym) {
                continue;
            }
            collect_structs(&proc.ret, &mut structs);
            if let Some(info) = self.partition.procs.get(&proc.sym) {
                for value in info.locals.iter().chain(info.globals.iter()) {
                    collect_structs(&values.get(*value).ty, &mut structs);
                }
            }
        }
        if !structs.is_empty() {
            let decls = structs
                .iter()
                .map(|st| struct_decl(st))
                .collect::<Result<Vec<String>, CompileError>>()
                .map_err(|e| Diagnostic::error(e, None))?;
            sections.push(decls.join("\n"));
        }

        // Uniforms, then samplers, both in name order.
        let mut lines = Vec::new();
        let mut uniforms: Vec<ValueId> = io.uniforms.iter().copied().collect();
        uniforms.sort_by(|a, b| values.get(*a).name.cmp(&values.get(*b).name));
        for value in uniforms {
            let info = values.get(value);
            let decl = declare(&info.ty, &format!("uniform_{}", info.name))
                .map_err(|e| Diagnostic::error(e, None))?;
            lines.push(format!("uniform {};", decl));
        }
        let mut samplers: Vec<ValueId> = io.samplers.iter().copied().collect();
        samplers.sort_by(|a, b| values.get(*a).name.cmp(&values.get(*b).name));
        for value in samplers {
            let info = values.get(value);
            let decl =
                declare(&info.ty, &info.name).map_err(|e| Diagnostic::error(e, None))?;
            lines.push(format!("uniform {};", decl));
        }
        if !lines.is_empty() {
            sections.push(lines.join("\n"));
        }

        // Stage inputs.
        let mut lines = Vec::new();
        if stage == Tier::Vertex {
            let mut attrs: Vec<ValueId> = self.plan.attributes.iter().copied().collect();
            attrs.sort_by_key(|v| match values.get(*v).origin {
                ValueOrigin::Attribute { location } => location,
                _ => u32::MAX
            });
            for value in attrs {
                let info = values.get(value);
                let location = match info.origin {
                    ValueOrigin::Attribute { location } => location,
                    _ => continue
                };
                let decl = declare(&info.ty, &format!("attr_{}", info.name))
                    .map_err(|e| Diagnostic::error(e, None))?;
                lines.push(format!("layout (location = {}) in {};", location, decl));
            }
        } else {
            let mut ins: Vec<&crate::varying::Varying> =
                self.plan.varyings.iter().filter(|v| v.to == stage).collect();
            ins.sort_by_key(|v| v.location);
            for var in ins {
                lines.push(format!(
                    "layout (location = {}) {} in {} {};",
                    var.location,
                    var.qualifier.get_name(),
                    var.glsl_type,
                    var.name
                ));
            }
        }
        if !lines.is_empty() {
            sections.push(lines.join("\n"));
        }

        // Stage outputs.
        let mut lines = Vec::new();
        if stage == Tier::Fragment {
            for value in &self.plan.outputs {
                let info = values.get(*value);
                let location = match info.origin {
                    ValueOrigin::FragOutput { location } => location,
                    _ => continue
                };
                let decl =
                    declare(&info.ty, &info.name).map_err(|e| Diagnostic::error(e, None))?;
                lines.push(format!("layout (location = {}) out {};", location, decl));
            }
        } else {
            let mut outs: Vec<&crate::varying::Varying> =
                self.plan.varyings.iter().filter(|v| v.from == stage).collect();
            outs.sort_by_key(|v| v.location);
            for var in outs {
                lines.push(format!(
                    "layout (location = {}) {} out {} {};",
                    var.location,
                    var.qualifier.get_name(),
                    var.glsl_type,
                    var.name
                ));
            }
        }
        if !lines.is_empty() {
            sections.push(lines.join("\n"));
        }

        // Procedures, in definition order (callees precede callers).
        for proc in &self.module.procs {
            if io.procs.contains(&proc.sym) {
                let text = self.proc_text(proc)?;
                sections.push(text);
            }
        }

        // main: aliases, stage statements, forwarding block.
        let mut em = BodyEmitter::new(&self.module.symbols, values, Scope::Stage(stage));
        let mut main = String::from("void main() {\n");
        for inc in &io.incoming {
            em.declared.insert(inc.value);
        }
        if stage == Tier::Fragment {
            em.declared.extend(self.plan.outputs.iter().copied());
        }
        for inc in &io.incoming {
            let info = values.get(inc.value);
            let local = em.name_of(inc.value)?;
            let source = match inc.source {
                IncomingSource::SeedZero => zero_value(&info.ty).ok_or_else(|| {
                    Diagnostic::error(
                        CompileError::TypeNotRepresentable(format!(
                            "'{}' has no zero initializer",
                            info.name
                        )),
                        None
                    )
                })?,
                IncomingSource::Uniform => format!("uniform_{}", info.name),
                IncomingSource::Attribute => format!("attr_{}", info.name),
                IncomingSource::Varying(_) => {
                    let var = self
                        .plan
                        .incoming_varying(stage, inc.value)
                        .ok_or_else(|| GlslEmitter::internal("missing incoming varying"))?;
                    match var.bool_size {
                        Some(1) => format!("{} != 0", var.name),
                        Some(n) => format!("bvec{}({})", n, var.name),
                        None => var.name.clone()
                    }
                }
            };
            let direct_output = stage == Tier::Fragment
                && matches!(info.origin, ValueOrigin::FragOutput { .. });
            if direct_output {
                let _ = writeln!(main, "    {} = {};", local, source);
            } else {
                let decl =
                    declare(&info.ty, &local).map_err(|e| Diagnostic::error(e, None))?;
                let _ = writeln!(main, "    {} = {};", decl, source);
            }
        }
        for i in &stmts {
            em.emit_stmt(&self.module.body[*i], &mut main, 1)?;
        }
        if stage != Tier::Fragment {
            for value in &io.outgoing {
                let var = self
                    .plan
                    .outgoing_varying(stage, *value)
                    .ok_or_else(|| GlslEmitter::internal("missing outgoing varying"))?;
                let local = em.name_of(*value)?;
                match var.bool_size {
                    Some(1) => {
                        let _ = writeln!(main, "    {} = {} ? 1 : 0;", var.name, local);
                    },
                    Some(n) => {
                        let _ = writeln!(main, "    {} = ivec{}({});", var.name, n, local);
                    },
                    None => {
                        let _ = writeln!(main, "    {} = {};", var.name, local);
                    }
                }
            }
        }
        main.push('}');
        sections.push(main);

        let mut doc = sections.join("\n\n");
        doc.push('\n');
        debug!(
            "Emitted {} for stage {}: {} bytes",
            stage.prefix(),
            stage.get_name(),
            doc.len()
        );
        Ok(doc)
    }

    fn proc_text(&mut self, proc: &ProcDef) -> Result<String, Diagnostic>
    {
        if let Some(text) = self.proc_memo.get(&proc.sym) {
            return Ok(text.clone());
        }
        let values = &self.partition.values;
        let name = values
            .proc_glsl_name(proc.sym)
            .ok_or_else(|| GlslEmitter::internal("procedure without an assigned name"))?;
        let ret: String = match &proc.ret {
            Type::Void => "void".into(),
            ty => glsl_type(ty)
                .map_err(|e| Diagnostic::error(e, None))?
                .into_owned()
        };
        let mut em = BodyEmitter::new(&self.module.symbols, values, Scope::Proc);
        let mut params = Vec::with_capacity(proc.params.len());
        for param in &proc.params {
            let value = values
                .find(&ValuePath::Sym(*param))
                .ok_or_else(|| GlslEmitter::internal("unscanned procedure parameter"))?;
            let info = values.get(value);
            params.push(
                declare(&info.ty, &info.name).map_err(|e| Diagnostic::error(e, None))?
            );
            em.declared.insert(value);
        }
        let mut body = String::new();
        em.emit_block(&proc.body, &mut body, 1)?;
        let text = format!("{} {}({}) {{\n{}}}", ret, name, params.join(", "), body);
        self.proc_memo.insert(proc.sym, text.clone());
        Ok(text)
    }
}
