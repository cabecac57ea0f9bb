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

use std::collections::{BTreeMap, BTreeSet};

use bp3d_upl::sym::SymbolId;
use bp3d_upl::tree::InterpQualifier;
use bp3d_upl::types::{BaseType, Type};
use log::debug;

use crate::diag::{CompileError, Diagnostic};
use crate::partition::Partition;
use crate::record::{ValueId, ValueOrigin};
use crate::stage::{StageSet, Tier};
use crate::types::glsl_type;

/// A value crossing one stage boundary.
#[derive(Debug, Clone)]
pub struct Varying
{
    pub value: ValueId,
    pub from: Tier,
    pub to: Tier,
    pub name: String,
    pub glsl_type: String,
    pub qualifier: InterpQualifier,
    pub location: u32,
    /// Set when the host type is boolean: the wire type is integral and the
    /// receiving stage re-hydrates.
    pub bool_size: Option<u8>
}

/// Where a stage gets the initial value of something it reads but does not
/// produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingSource
{
    /// Implicit zero seed; inlined as `T(0)`.
    SeedZero,
    /// Composed on the CPU; arrives as a uniform.
    Uniform,
    /// Vertex attribute declaration (vertex stage only).
    Attribute,
    /// Varying produced by the given earlier stage.
    Varying(Tier)
}

#[derive(Debug, Clone)]
pub struct Incoming
{
    pub value: ValueId,
    pub source: IncomingSource
}

#[derive(Debug, Default)]
pub struct StageIo
{
    pub incoming: Vec<Incoming>,
    /// Values copied to `out` varyings at the end of the stage.
    pub outgoing: Vec<ValueId>,
    pub uniforms: BTreeSet<ValueId>,
    pub samplers: BTreeSet<ValueId>,
    pub procs: BTreeSet<SymbolId>
}

#[derive(Debug, Default)]
pub struct VaryingPlan
{
    pub stages: BTreeMap<Tier, StageIo>,
    pub varyings: Vec<Varying>,
    /// Attributes read anywhere in the pipeline, keyed for the vertex stage
    /// declarations and the CPU attribute bindings.
    pub attributes: BTreeSet<ValueId>,
    /// Fragment outputs that are ever written, in location order.
    pub outputs: Vec<ValueId>
}

impl VaryingPlan
{
    pub fn io(&self, stage: Tier) -> Option<&StageIo>
    {
        self.stages.get(&stage)
    }

    pub fn incoming_varying(&self, stage: Tier, value: ValueId) -> Option<&Varying>
    {
        self.varyings.iter().find(|v| v.to == stage && v.value == value)
    }

    pub fn outgoing_varying(&self, stage: Tier, value: ValueId) -> Option<&Varying>
    {
        self.varyings.iter().find(|v| v.from == stage && v.value == value)
    }
}

fn default_qualifier(ty: &Type) -> InterpQualifier
{
    match ty.component() {
        Some(BaseType::Float) => InterpQualifier::Smooth,
        _ => InterpQualifier::Flat
    }
}

fn contains_bool(ty: &Type) -> bool
{
    match ty {
        Type::Scalar(BaseType::Bool) => true,
        Type::Vector(v) => v.item == BaseType::Bool,
        Type::Array(item, _) => contains_bool(item),
        Type::Struct(st) => st.fields.iter().any(|(_, t)| contains_bool(t)),
        _ => false
    }
}

/// Number of location slots a varying of this type consumes.
fn slot_count(ty: &Type) -> u32
{
    match ty {
        Type::Matrix(m) => m.cols as u32,
        Type::Array(item, n) => n * slot_count(item),
        Type::Struct(st) => st.fields.iter().map(|(_, t)| slot_count(t)).sum(),
        Type::Vector(v) if v.item == BaseType::Double && v.size > 2 => 2,
        _ => 1
    }
}

/// Latest instance of `value` at or below `cap`, in source order.
fn instance_at_or_below(partition: &Partition, value: ValueId, cap: Tier) -> Option<(Tier, bool)>
{
    let mut last = None;
    for record in partition.records.iter().filter(|r| !r.is_interp()) {
        if record.tier <= cap && record.writes.contains(&value) {
            last = Some((record.tier, false));
        }
    }
    if last.is_some() {
        return last;
    }
    let info = partition.values.get(value);
    if let Some(t) = info.origin.seed_tier() {
        if t <= cap {
            return Some((t, true));
        }
    }
    if let Some(t) = info.origin.global_tier() {
        if t <= cap {
            return Some((t, false));
        }
    }
    None
}

pub fn plan(partition: &Partition, stages: &StageSet) -> Result<VaryingPlan, Diagnostic>
{
    let mut out = VaryingPlan::default();
    for stage in stages.shader_stages() {
        out.stages.insert(stage, StageIo::default());
    }
    // incoming[stage][value] -> source; crossings[(from, value)] -> consumer
    let mut incoming: BTreeMap<Tier, BTreeMap<ValueId, IncomingSource>> = BTreeMap::new();
    let mut crossings: BTreeMap<(Tier, ValueId), Tier> = BTreeMap::new();
    let mut note_crossing = |from: Tier, value: ValueId, to: Tier| {
        let entry = crossings.entry((from, value)).or_insert(to);
        if to > *entry {
            *entry = to;
        }
    };

    // Reads resolved to an instance below their stage.
    for stage in stages.shader_stages() {
        let io = out.stages.get_mut(&stage).unwrap();
        for i in partition.stmts_at(stage) {
            let record = &partition.records[i];
            io.procs.extend(record.procs.iter().copied());
            for inst in &record.read_insts {
                let info = partition.values.get(inst.value);
                match info.origin {
                    ValueOrigin::Sampler { .. } => {
                        io.samplers.insert(inst.value);
                        continue;
                    },
                    ValueOrigin::BuiltinFragCoord => continue,
                    ValueOrigin::Attribute { .. } => {
                        out.attributes.insert(inst.value);
                        // The vertex stage always aliases a used attribute,
                        // either for its own statements or to forward it.
                        incoming
                            .entry(Tier::Vertex)
                            .or_default()
                            .entry(inst.value)
                            .or_insert(IncomingSource::Attribute);
                        if stage > Tier::Vertex {
                            note_crossing(Tier::Vertex, inst.value, stage);
                        }
                        continue;
                    },
                    _ => ()
                }
                if inst.tier == stage {
                    continue;
                }
                if inst.seed {
                    incoming
                        .entry(stage)
                        .or_default()
                        .entry(inst.value)
                        .or_insert(IncomingSource::SeedZero);
                } else if inst.tier <= Tier::Cpu {
                    incoming
                        .entry(stage)
                        .or_default()
                        .entry(inst.value)
                        .or_insert(IncomingSource::Uniform);
                } else {
                    note_crossing(inst.tier, inst.value, stage);
                }
            }
        }
    }

    // The framebuffer implicitly reads every written fragment output at the
    // fragment stage.
    let mut outputs: Vec<(u32, ValueId)> = Vec::new();
    for (value, info) in partition.values.iter() {
        if let ValueOrigin::FragOutput { location } = info.origin {
            if let Some(tier) = partition.final_instance.get(&value) {
                outputs.push((location, value));
                if *tier == Tier::Fragment {
                    continue;
                }
                if *tier <= Tier::Cpu {
                    incoming
                        .entry(Tier::Fragment)
                        .or_default()
                        .entry(value)
                        .or_insert(IncomingSource::Uniform);
                } else {
                    note_crossing(*tier, value, Tier::Fragment);
                }
            }
        }
    }
    outputs.sort();
    out.outputs = outputs.into_iter().map(|(_, v)| v).collect();

    // Whole-symbol interpolation forces a crossing at the producer boundary
    // even when no later read strictly requires it, and re-sources the
    // consuming side from the varying.
    for req in &partition.interps {
        let from = req.producer;
        let to = match stages.next_after(from) {
            Some(v) => v,
            None => continue
        };
        note_crossing(from, req.value, to);
        if let Some(src) = incoming.entry(to).or_default().get_mut(&req.value) {
            if matches!(src, IncomingSource::SeedZero | IncomingSource::Uniform) {
                *src = IncomingSource::Varying(from);
            }
        }
        // The producing stage must materialize the value when it neither
        // writes nor already receives it.
        let produces = partition
            .stmts_at(from)
            .iter()
            .any(|i| partition.records[*i].writes.contains(&req.value));
        let already = incoming
            .get(&from)
            .map(|m| m.contains_key(&req.value))
            .unwrap_or(false);
        if !produces && !already {
            let info = partition.values.get(req.value);
            let source = match info.origin {
                ValueOrigin::Attribute { .. } => {
                    out.attributes.insert(req.value);
                    Some(IncomingSource::Attribute)
                },
                _ => match instance_at_or_below(partition, req.value, from) {
                    Some((_, true)) => Some(IncomingSource::SeedZero),
                    Some((t, false)) if t <= Tier::Cpu => Some(IncomingSource::Uniform),
                    Some((t, false)) => {
                        note_crossing(t, req.value, from);
                        None
                    },
                    None => {
                        return Err(Diagnostic::error(
                            CompileError::UnknownIdentifier(info.name.clone()),
                            req.span
                        ))
                    }
                }
            };
            if let Some(source) = source {
                incoming.entry(from).or_default().insert(req.value, source);
            }
        }
    }

    // Expand crossings into per-boundary varyings, with pass-through
    // forwarding in intermediate stages.
    let boundaries = stages.boundaries();
    let mut per_boundary: BTreeMap<(Tier, Tier), BTreeSet<ValueId>> = BTreeMap::new();
    for ((from, value), to) in &crossings {
        for (a, b) in &boundaries {
            if *a >= *from && *b <= *to {
                per_boundary.entry((*a, *b)).or_default().insert(*value);
            }
        }
    }
    for ((a, b), values) in &per_boundary {
        let mut entries: Vec<(String, ValueId)> = values
            .iter()
            .map(|v| {
                let base = &partition.values.get(*v).name;
                (format!("{}2{}_{}", a.prefix(), b.prefix(), base), *v)
            })
            .collect();
        entries.sort();
        let mut location = 0u32;
        for (name, value) in entries {
            let info = partition.values.get(value);
            let bool_size = match &info.ty {
                Type::Scalar(BaseType::Bool) => Some(1),
                Type::Vector(v) if v.item == BaseType::Bool => Some(v.size),
                Type::Array(_, _) => {
                    return Err(Diagnostic::error(
                        CompileError::TypeNotRepresentable(format!(
                            "array '{}' cannot cross a stage boundary",
                            info.name
                        )),
                        None
                    ))
                },
                ty if contains_bool(ty) => {
                    return Err(Diagnostic::error(
                        CompileError::TypeNotRepresentable(format!(
                            "boolean aggregate '{}' cannot cross a stage boundary",
                            info.name
                        )),
                        None
                    ))
                },
                _ => None
            };
            let wire_ty = match bool_size {
                Some(1) => "int".into(),
                Some(n) => format!("ivec{}", n),
                None => glsl_type(&info.ty)
                    .map_err(|e| Diagnostic::error(e, None))?
                    .into_owned()
            };
            let qualifier = partition
                .interpolated(value)
                .and_then(|req| req.qualifier)
                .unwrap_or_else(|| default_qualifier(&info.ty));
            out.varyings.push(Varying {
                value,
                from: *a,
                to: *b,
                name,
                glsl_type: wire_ty,
                qualifier,
                location,
                bool_size
            });
            location += slot_count(&info.ty);
            // Producer forwards; consumer (and pass-through stages) alias.
            if let Some(io) = out.stages.get_mut(a) {
                if !io.outgoing.contains(&value) {
                    io.outgoing.push(value);
                }
            }
            incoming
                .entry(*b)
                .or_default()
                .insert(value, IncomingSource::Varying(*a));
        }
    }

    // Uniform declarations: composed instances arriving as uniforms, direct
    // CPU globals read by stage statements, and globals read through
    // procedures.
    for stage in stages.shader_stages() {
        let mut uniforms = BTreeSet::new();
        if let Some(values) = incoming.get(&stage) {
            for (value, source) in values {
                if *source == IncomingSource::Uniform {
                    uniforms.insert(*value);
                }
            }
        }
        for i in partition.stmts_at(stage) {
            for inst in &partition.records[i].read_insts {
                let origin = partition.values.get(inst.value).origin;
                if matches!(origin, ValueOrigin::Uniform | ValueOrigin::Const) {
                    uniforms.insert(inst.value);
                }
            }
        }
        let io = out.stages.get_mut(&stage).unwrap();
        for proc in io.procs.clone() {
            if let Some(info) = partition.procs.get(&proc) {
                for value in &info.globals {
                    match partition.values.get(*value).origin {
                        ValueOrigin::Uniform | ValueOrigin::Const => {
                            uniforms.insert(*value);
                        },
                        ValueOrigin::Sampler { .. } => {
                            io.samplers.insert(*value);
                        },
                        _ => ()
                    }
                }
            }
        }
        io.uniforms.extend(uniforms);
    }

    // Freeze incoming lists in name order for deterministic prologues.
    for (stage, values) in incoming {
        if let Some(io) = out.stages.get_mut(&stage) {
            let mut list: Vec<Incoming> = values
                .into_iter()
                .map(|(value, source)| Incoming { value, source })
                .collect();
            list.sort_by(|x, y| {
                partition
                    .values
                    .get(x.value)
                    .name
                    .cmp(&partition.values.get(y.value).name)
            });
            io.incoming = list;
        }
    }
    for io in out.stages.values_mut() {
        io.outgoing.sort_by(|x, y| {
            partition
                .values
                .get(*x)
                .name
                .cmp(&partition.values.get(*y).name)
        });
    }
    debug!(
        "Planned {} varyings across {} boundaries",
        out.varyings.len(),
        per_boundary.len()
    );
    Ok(out)
}
