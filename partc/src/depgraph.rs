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

use log::debug;

use crate::diag::{CompileError, Diagnostic};
use crate::record::{StmtRecord, ValueTable};

/// Def-use graph over the flat top-level statement list. Every edge points
/// from an earlier source index to a later one, so the graph is a DAG by
/// construction.
#[derive(Debug)]
pub struct DepGraph
{
    /// Successors by statement index.
    pub succs: Vec<Vec<usize>>
}

impl DepGraph
{
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_
    {
        self.succs
            .iter()
            .enumerate()
            .flat_map(|(i, outs)| outs.iter().map(move |j| (i, *j)))
    }
}

pub fn build(records: &[StmtRecord]) -> DepGraph
{
    let n = records.len();
    let mut succs = vec![Vec::new(); n];
    for j in 0..n {
        for i in 0..j {
            let a = &records[i];
            let b = &records[j];
            // Flow, anti and output dependencies.
            let depends = a.writes.intersection(&b.reads).next().is_some()
                || a.reads.intersection(&b.writes).next().is_some()
                || a.writes.intersection(&b.writes).next().is_some();
            if depends {
                succs[i].push(j);
            }
        }
    }
    DepGraph { succs }
}

/// Produces a total order respecting every edge while grouping statements of
/// the same tier into contiguous runs of increasing tier. Such an order
/// exists iff no edge points from a higher tier to a lower one; the stable
/// sort by `(tier, source index)` is then itself the answer (ties broken by
/// source index for determinism). Interpolation annotations are skipped: they
/// emit nothing.
pub fn reorder(
    graph: &DepGraph,
    records: &[StmtRecord],
    values: &ValueTable
) -> Result<Vec<usize>, Diagnostic>
{
    for (i, j) in graph.edges() {
        if records[i].tier > records[j].tier {
            let shared = records[i]
                .writes
                .iter()
                .chain(records[i].reads.iter())
                .find(|v| records[j].reads.contains(v) || records[j].writes.contains(v));
            let name = shared
                .map(|v| values.get(*v).name.clone())
                .unwrap_or_else(|| "<unknown>".into());
            return Err(Diagnostic::error(
                CompileError::StageOrderConflict(name),
                records[j].span
            ));
        }
    }
    let mut order: Vec<usize> = (0..records.len()).filter(|i| !records[*i].is_interp()).collect();
    order.sort_by_key(|i| (records[*i].tier, *i));
    debug!("Statement execution order: {:?}", order);
    Ok(order)
}
