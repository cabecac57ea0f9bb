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

use std::collections::{BTreeMap, HashMap};

use bp3d_upl::sym::SymbolId;
use log::{debug, trace};

use crate::depgraph;
use crate::diag::{CompileError, Diagnostic, WarningLog};
use crate::record::{
    InterpReq, ProcInfo, ReadInst, Scan, StmtRecord, ValueId, ValueOrigin, ValueTable
};
use crate::stage::{StageSet, Tier};

/// Result of the partitioning pass: solved statement tiers, the reordered
/// execution sequence and the per-value dataflow facts the varying planner
/// consumes.
#[derive(Debug)]
pub struct Partition
{
    pub values: ValueTable,
    pub records: Vec<StmtRecord>,
    pub interps: Vec<InterpReq>,
    pub interp_by_value: BTreeMap<ValueId, usize>,
    pub procs: BTreeMap<SymbolId, ProcInfo>,
    pub order: Vec<usize>,
    /// Tier of the last write in execution order, per written value.
    pub final_instance: BTreeMap<ValueId, Tier>
}

impl Partition
{
    /// Execution sequence restricted to one tier, in order.
    pub fn stmts_at(&self, tier: Tier) -> Vec<usize>
    {
        self.order
            .iter()
            .copied()
            .filter(|i| self.records[*i].tier == tier)
            .collect()
    }

    /// Statement indices the host runtime evaluates (CONST and CPU tiers).
    pub fn cpu_plan(&self) -> Vec<usize>
    {
        self.order
            .iter()
            .copied()
            .filter(|i| !self.records[*i].tier.is_shader())
            .collect()
    }

    pub fn interpolated(&self, value: ValueId) -> Option<&InterpReq>
    {
        self.interp_by_value.get(&value).map(|k| &self.interps[*k])
    }
}

fn resolve_read(
    value: ValueId,
    running: &HashMap<ValueId, Tier>,
    values: &ValueTable
) -> Result<(Tier, bool), CompileError>
{
    if let Some(t) = running.get(&value) {
        return Ok((*t, false));
    }
    let info = values.get(value);
    if let Some(t) = info.origin.seed_tier() {
        return Ok((t, true));
    }
    if let Some(t) = info.origin.global_tier() {
        return Ok((t, false));
    }
    Err(CompileError::UnknownIdentifier(info.name.clone()))
}

/// Latest instance of `value` at a tier not above `cap`, used to re-bind
/// reads of interpolated values inside tier-capped statements.
fn rebind_below(
    value: ValueId,
    cap: Tier,
    history: &HashMap<ValueId, Vec<Tier>>,
    values: &ValueTable
) -> Option<(Tier, bool)>
{
    if let Some(insts) = history.get(&value) {
        if let Some(t) = insts.iter().rev().find(|t| **t <= cap) {
            return Some((*t, false));
        }
    }
    let info = values.get(value);
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

pub fn solve(
    mut scan: Scan,
    stages: &StageSet,
    warnings: &mut WarningLog
) -> Result<Partition, Diagnostic>
{
    let n = scan.records.len();
    let mut interp_by_value: BTreeMap<ValueId, usize> = BTreeMap::new();
    for (k, req) in scan.interps.iter().enumerate() {
        if interp_by_value.contains_key(&req.value) {
            warnings.push(
                "DuplicateInterpolate",
                format!(
                    "duplicate interpolate for '{}'",
                    scan.values.get(req.value).name
                ),
                req.span
            );
        } else {
            interp_by_value.insert(req.value, k);
        }
    }

    // Tier fixpoint: forward instance propagation in source order. Tiers
    // only ever rise, so the loop settles fast; the bound turns a
    // non-converging solve into a hard failure instead of a hang.
    let mut iterations = 0usize;
    loop {
        iterations += 1;
        if iterations > n + 2 {
            return Err(Diagnostic::error(
                CompileError::InternalInvariantViolated(
                    "tier assignment did not reach a fixpoint".into()
                ),
                None
            ));
        }
        let mut changed = false;
        let mut running: HashMap<ValueId, Tier> = HashMap::new();
        let mut history: HashMap<ValueId, Vec<Tier>> = HashMap::new();
        let mut lifted: HashMap<ValueId, Tier> = HashMap::new();
        for s in 0..n {
            if let Some(k) = scan.records[s].interp {
                let req = &mut scan.interps[k];
                let produced = running
                    .get(&req.value)
                    .copied()
                    .or_else(|| scan.values.get(req.value).origin.seed_tier())
                    .or_else(|| scan.values.get(req.value).origin.global_tier())
                    .unwrap_or(Tier::Const);
                let from = produced.max(Tier::Vertex);
                req.producer = from;
                if let Some(next) = stages.next_after(from) {
                    lifted.insert(req.value, next);
                }
                continue;
            }
            let span = scan.records[s].span;
            let forced = scan.records[s].forced;
            let reads = scan.records[s].reads.clone();
            let mut tier = scan.records[s].hint;
            let mut insts = Vec::with_capacity(reads.len());
            for v in reads {
                let (mut inst, mut seed) = resolve_read(v, &running, &scan.values)
                    .map_err(|e| Diagnostic::error(e, span))?;
                let mut contrib = inst;
                if let Some(l) = lifted.get(&v) {
                    contrib = contrib.join(*l);
                }
                if let Some(cap) = forced {
                    if contrib > cap {
                        if interp_by_value.contains_key(&v) {
                            match rebind_below(v, cap, &history, &scan.values) {
                                Some((t, sd)) => {
                                    inst = t;
                                    seed = sd;
                                    contrib = t;
                                },
                                None => {
                                    return Err(Diagnostic::error(
                                        CompileError::StageSplitConflict(
                                            scan.values.get(v).name.clone()
                                        ),
                                        span
                                    ))
                                }
                            }
                        } else {
                            return Err(Diagnostic::error(
                                CompileError::StageSplitConflict(scan.values.get(v).name.clone()),
                                span
                            ));
                        }
                    }
                }
                insts.push(ReadInst {
                    value: v,
                    tier: inst,
                    seed
                });
                tier = tier.join(contrib);
            }
            if let Some(cap) = forced {
                if tier > cap {
                    // Every contribution above the cap comes through a read
                    // and was handled above.
                    return Err(Diagnostic::error(
                        CompileError::InternalInvariantViolated(format!(
                            "statement #{} exceeds its forced tier",
                            s
                        )),
                        span
                    ));
                }
                tier = cap;
            }
            if tier != scan.records[s].tier {
                changed = true;
            }
            scan.records[s].tier = tier;
            scan.records[s].read_insts = insts;
            for v in scan.records[s].writes.clone() {
                running.insert(v, tier);
                history.entry(v).or_default().push(tier);
            }
        }
        if !changed {
            break;
        }
    }
    for record in &scan.records {
        trace!(
            "Statement #{} solved to tier {}",
            record.index,
            record.tier.get_name()
        );
    }

    // Constant declarations must stay on the constant tier.
    for record in &scan.records {
        if record.const_decl && record.tier != Tier::Const {
            return Err(Diagnostic::error(
                CompileError::UnsupportedConstruct(
                    "constant declaration with a non-constant initializer".into()
                ),
                record.span
            ));
        }
    }

    // Split validation per value whose writes straddle tiers: with T2 the
    // highest write tier and f the first statement writing at T2, reads at
    // tiers >= T2 may not precede f and reads below T2 may not follow it.
    // Whole-symbol interpolation waives the check.
    for (value, info) in scan.values.iter() {
        if interp_by_value.contains_key(&value) {
            continue;
        }
        let writes: Vec<&StmtRecord> = scan
            .records
            .iter()
            .filter(|r| !r.is_interp() && r.writes.contains(&value))
            .collect();
        let highest = match writes.iter().map(|r| r.tier).max() {
            Some(t) => t,
            None => continue
        };
        if writes.iter().all(|r| r.tier == highest) {
            continue;
        }
        let first_high = writes
            .iter()
            .find(|r| r.tier == highest)
            .map(|r| r.index)
            .unwrap_or(0);
        for record in scan.records.iter().filter(|r| !r.is_interp()) {
            if !record.reads.contains(&value) {
                continue;
            }
            let before_split = record.tier >= highest && record.index < first_high;
            let after_split = record.tier < highest && record.index > first_high;
            if before_split || after_split {
                return Err(Diagnostic::error(
                    CompileError::StageSplitConflict(info.name.clone()),
                    record.span
                ));
            }
        }
    }

    // Local values that nothing ever reads are dropped work.
    for (value, info) in scan.values.iter() {
        if info.origin != ValueOrigin::Local {
            continue;
        }
        let written = scan.records.iter().any(|r| r.writes.contains(&value));
        let read = scan
            .records
            .iter()
            .any(|r| r.reads.contains(&value) || r.internal_reads.contains(&value))
            || scan.procs.values().any(|p| p.globals.contains(&value));
        if written && !read {
            warnings.push(
                "UnusedValue",
                format!("'{}' is written but never read", info.name),
                None
            );
        }
    }
    let position_written = scan.values.iter().any(|(value, info)| {
        info.origin == ValueOrigin::BuiltinPosition
            && scan.records.iter().any(|r| r.writes.contains(&value))
    });
    if !position_written {
        warnings.push(
            "MissingPosition",
            "program never writes gl.Position".into(),
            None
        );
    }

    let graph = depgraph::build(&scan.records);
    let order = depgraph::reorder(&graph, &scan.records, &scan.values)?;
    debug!(
        "Partitioned {} statements over {} values",
        n,
        scan.values.len()
    );

    let mut final_instance = BTreeMap::new();
    for i in &order {
        for v in &scan.records[*i].writes {
            final_instance.insert(*v, scan.records[*i].tier);
        }
    }

    Ok(Partition {
        values: scan.values,
        records: scan.records,
        interps: scan.interps,
        interp_by_value,
        procs: scan.procs,
        order,
        final_instance
    })
}

#[cfg(test)]
mod tests
{
    use bp3d_upl::tree::{BinOp, Expr, Module, Stmt};
    use bp3d_upl::types::{BaseType, SamplerKind, Type};

    use super::*;
    use crate::record::scan;

    fn stages() -> StageSet
    {
        StageSet::new(false, false)
    }

    fn run(module: &Module) -> Result<Partition, Diagnostic>
    {
        let mut warnings = WarningLog::new();
        solve(scan(module)?, &stages(), &mut warnings)
    }

    fn fixture() -> (Module, Vec<SymbolId>)
    {
        let mut module = Module::new();
        let vertex = Type::record("Vertex", vec![
            ("position".into(), Type::vecf(4)),
            ("texcoord".into(), Type::vecf(2))
        ]);
        let targets = Type::record("Targets", vec![("color".into(), Type::vecf(4))]);
        let v = module.symbols.vertex_input("v", vertex);
        let result = module.symbols.fragment_result("result", targets);
        let gl = module.symbols.builtin_gl();
        let uniform = module.symbols.uniform("myUniform", Type::float());
        let tex = module
            .symbols
            .sampler("myTex", SamplerKind::Sampler2D, BaseType::Float);
        (module, vec![v, result, gl, uniform, tex])
    }

    fn obj(module: &Module, id: SymbolId) -> Expr
    {
        Expr::var(id, &module.symbols)
    }

    #[test]
    fn rmw_chain_escalates_through_every_tier()
    {
        let (mut module, ids) = fixture();
        let (v, result, _, uniform, tex) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
        let color_r =
            |m: &Module| Expr::field(Expr::field(obj(m, result), "color"), "r");
        module.body.push(Stmt::assign(color_r(&module), Expr::float(0.0)));
        module.body.push(Stmt::assign_op(
            color_r(&module),
            BinOp::Add,
            Expr::float(0.123456)
        ));
        module.body.push(Stmt::assign_op(
            color_r(&module),
            BinOp::Add,
            Expr::var(uniform, &module.symbols)
        ));
        module.body.push(Stmt::assign_op(
            color_r(&module),
            BinOp::Add,
            Expr::field(Expr::field(obj(&module, v), "position"), "x")
        ));
        module.body.push(Stmt::assign_op(
            color_r(&module),
            BinOp::Add,
            Expr::field(
                Expr::builtin(
                    "texture",
                    vec![
                        obj(&module, tex),
                        Expr::field(obj(&module, v), "texcoord"),
                    ],
                    Type::vecf(4)
                ),
                "r"
            )
        ));
        let plan = run(&module).unwrap();
        let tiers: Vec<Tier> = plan.records.iter().map(|r| r.tier).collect();
        assert_eq!(
            tiers,
            vec![
                Tier::Const,
                Tier::Const,
                Tier::Cpu,
                Tier::Vertex,
                Tier::Fragment
            ]
        );
        assert_eq!(plan.order, vec![0, 1, 2, 3, 4]);
        assert_eq!(plan.cpu_plan(), vec![0, 1, 2]);
    }

    #[test]
    fn fragment_read_at_vertex_site_is_a_split_conflict()
    {
        let (mut module, ids) = fixture();
        let (v, result, gl, tex) = (ids[0], ids[1], ids[2], ids[4]);
        module.body.push(Stmt::assign(
            Expr::field(Expr::field(obj(&module, result), "color"), "r"),
            Expr::field(
                Expr::builtin(
                    "texture",
                    vec![
                        obj(&module, tex),
                        Expr::field(obj(&module, v), "texcoord"),
                    ],
                    Type::vecf(4)
                ),
                "r"
            )
        ));
        module.body.push(Stmt::assign(
            Expr::field(obj(&module, gl), "Position"),
            Expr::convert(
                Type::vecf(4),
                Expr::field(Expr::field(obj(&module, result), "color"), "r")
            )
        ));
        let err = run(&module).unwrap_err();
        assert_eq!(err.kind, "StageSplitConflict");
        assert!(err.message.contains("result_color"));
    }

    #[test]
    fn interpolate_rescues_the_split()
    {
        let (mut module, ids) = fixture();
        let (v, result, gl, tex) = (ids[0], ids[1], ids[2], ids[4]);
        module.body.push(Stmt::assign(
            Expr::field(Expr::field(obj(&module, result), "color"), "r"),
            Expr::field(
                Expr::builtin(
                    "texture",
                    vec![
                        obj(&module, tex),
                        Expr::field(obj(&module, v), "texcoord"),
                    ],
                    Type::vecf(4)
                ),
                "r"
            )
        ));
        module.body.push(Stmt::assign(
            Expr::field(obj(&module, gl), "Position"),
            Expr::convert(
                Type::vecf(4),
                Expr::field(Expr::field(obj(&module, result), "color"), "r")
            )
        ));
        module.body.push(Stmt::interpolate(
            Expr::field(obj(&module, result), "color"),
            None
        ));
        let plan = run(&module).unwrap();
        assert_eq!(plan.records[0].tier, Tier::Fragment);
        assert_eq!(plan.records[1].tier, Tier::Vertex);
        // The vertex-site read re-bound to the zero seed.
        let inst = plan.records[1]
            .read_insts
            .iter()
            .find(|r| plan.values.get(r.value).name == "result_color")
            .unwrap();
        assert_eq!(inst.tier, Tier::Const);
        assert!(inst.seed);
    }

    #[test]
    fn vertex_texture_fetch_lowers_the_sampler_tier()
    {
        let (mut module, ids) = fixture();
        let (v, gl) = (ids[0], ids[2]);
        let height = module.symbols.vertex_fetch_sampler(
            "heightMap",
            SamplerKind::Sampler2D,
            BaseType::Float
        );
        module.body.push(Stmt::assign(
            Expr::field(obj(&module, gl), "Position"),
            Expr::builtin(
                "texture",
                vec![
                    obj(&module, height),
                    Expr::field(obj(&module, v), "texcoord"),
                ],
                Type::vecf(4)
            )
        ));
        let plan = run(&module).unwrap();
        assert_eq!(plan.records[0].tier, Tier::Vertex);
    }

    #[test]
    fn default_sampler_in_a_vertex_site_is_a_split_conflict()
    {
        let (mut module, ids) = fixture();
        let (v, gl, tex) = (ids[0], ids[2], ids[4]);
        module.body.push(Stmt::assign(
            Expr::field(obj(&module, gl), "Position"),
            Expr::builtin(
                "texture",
                vec![
                    obj(&module, tex),
                    Expr::field(obj(&module, v), "texcoord"),
                ],
                Type::vecf(4)
            )
        ));
        let err = run(&module).unwrap_err();
        assert_eq!(err.kind, "StageSplitConflict");
    }

    #[test]
    fn read_of_unwritten_local_is_unknown()
    {
        let mut module = Module::new();
        module.symbols.builtin_gl();
        let x = module.symbols.local("x", Type::float());
        let y = module.symbols.local("y", Type::float());
        module
            .body
            .push(Stmt::var(y, Some(Expr::var(x, &module.symbols))));
        let err = run(&module).unwrap_err();
        assert_eq!(err.kind, "UnknownIdentifier");
        assert!(err.message.contains('x'));
    }

    #[test]
    fn interpolate_lifts_later_reads_to_the_next_stage()
    {
        let (mut module, ids) = fixture();
        let (v, result, gl, _, _) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
        let mvp = module.symbols.uniform("mvp", Type::mat(4, 4));
        module.body.push(Stmt::assign(
            Expr::field(obj(&module, gl), "Position"),
            Expr::binary(
                BinOp::Mul,
                Expr::var(mvp, &module.symbols),
                Expr::field(obj(&module, v), "position"),
                Type::vecf(4)
            )
        ));
        let tmp0 = module.symbols.local("tmp0", Type::boolean());
        module.body.push(Stmt::var(
            tmp0,
            Some(Expr::binary(
                BinOp::Gt,
                Expr::field(Expr::field(obj(&module, gl), "Position"), "z"),
                Expr::float(0.5),
                Type::boolean()
            ))
        ));
        module.body.push(Stmt::interpolate(
            Expr::var(tmp0, &module.symbols),
            Some(bp3d_upl::tree::InterpQualifier::Flat)
        ));
        module.body.push(Stmt::new(bp3d_upl::tree::StmtKind::If {
            cond: Expr::var(tmp0, &module.symbols),
            then_body: vec![Stmt::assign(
                Expr::field(
                    Expr::field(obj(&module, result), "color"),
                    "rgb"
                ),
                Expr::builtin(
                    "vec3",
                    vec![Expr::float(1.0), Expr::float(0.0), Expr::float(0.0)],
                    Type::vecf(3)
                )
            )],
            else_body: vec![Stmt::assign(
                Expr::field(
                    Expr::field(obj(&module, result), "color"),
                    "rgb"
                ),
                Expr::builtin(
                    "vec3",
                    vec![Expr::float(0.0), Expr::float(1.0), Expr::float(0.0)],
                    Type::vecf(3)
                )
            )]
        }));
        let plan = run(&module).unwrap();
        assert_eq!(plan.records[0].tier, Tier::Vertex);
        assert_eq!(plan.records[1].tier, Tier::Vertex);
        assert_eq!(plan.records[3].tier, Tier::Fragment);
        let tmp0_value = plan
            .values
            .iter()
            .find(|(_, info)| info.name == "tmp0")
            .map(|(id, _)| id)
            .unwrap();
        let req = plan.interpolated(tmp0_value).unwrap();
        assert_eq!(req.producer, Tier::Vertex);
    }
}
