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

/// Execution tier of a value or statement. The derived order is the tier
/// lattice: `join` is the maximum of two tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier
{
    Const,
    Cpu,
    Vertex,
    Tess,
    Geometry,
    Fragment
}

impl Tier
{
    pub fn join(self, other: Tier) -> Tier
    {
        self.max(other)
    }

    /// True for tiers that execute on the GPU.
    pub fn is_shader(self) -> bool
    {
        self >= Tier::Vertex
    }

    /// Short prefix used to decorate stage-local identifiers.
    pub fn prefix(self) -> &'static str
    {
        match self {
            Tier::Const => "const",
            Tier::Cpu => "cpu",
            Tier::Vertex => "vert",
            Tier::Tess => "tess",
            Tier::Geometry => "geom",
            Tier::Fragment => "frag"
        }
    }

    pub fn get_name(self) -> &'static str
    {
        match self {
            Tier::Const => "CONST",
            Tier::Cpu => "CPU",
            Tier::Vertex => "VS",
            Tier::Tess => "TS",
            Tier::Geometry => "GS",
            Tier::Fragment => "FS"
        }
    }
}

/// The set of shader stages present in the current compile. Vertex and
/// fragment are always present; tessellation and geometry are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet
{
    pub tessellation: bool,
    pub geometry: bool
}

impl StageSet
{
    pub fn new(tessellation: bool, geometry: bool) -> StageSet
    {
        StageSet {
            tessellation,
            geometry
        }
    }

    pub fn contains(&self, tier: Tier) -> bool
    {
        match tier {
            Tier::Tess => self.tessellation,
            Tier::Geometry => self.geometry,
            _ => true
        }
    }

    /// Present shader stages in execution order.
    pub fn shader_stages(&self) -> impl Iterator<Item = Tier> + '_
    {
        [Tier::Vertex, Tier::Tess, Tier::Geometry, Tier::Fragment]
            .into_iter()
            .filter(|v| self.contains(*v))
    }

    /// The first present shader stage strictly after `tier`. `None` past the
    /// fragment stage.
    pub fn next_after(&self, tier: Tier) -> Option<Tier>
    {
        self.shader_stages().find(|v| *v > tier)
    }

    /// Consecutive present stage pairs, producer first.
    pub fn boundaries(&self) -> Vec<(Tier, Tier)>
    {
        let stages: Vec<Tier> = self.shader_stages().collect();
        stages.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn tier_order()
    {
        assert!(Tier::Const < Tier::Cpu);
        assert!(Tier::Cpu < Tier::Vertex);
        assert!(Tier::Vertex < Tier::Tess);
        assert!(Tier::Tess < Tier::Geometry);
        assert!(Tier::Geometry < Tier::Fragment);
        assert_eq!(Tier::Cpu.join(Tier::Fragment), Tier::Fragment);
        assert_eq!(Tier::Vertex.join(Tier::Const), Tier::Vertex);
    }

    #[test]
    fn default_pipeline()
    {
        let set = StageSet::new(false, false);
        let stages: Vec<Tier> = set.shader_stages().collect();
        assert_eq!(stages, vec![Tier::Vertex, Tier::Fragment]);
        assert_eq!(set.next_after(Tier::Const), Some(Tier::Vertex));
        assert_eq!(set.next_after(Tier::Vertex), Some(Tier::Fragment));
        assert_eq!(set.next_after(Tier::Fragment), None);
        assert_eq!(set.boundaries(), vec![(Tier::Vertex, Tier::Fragment)]);
    }

    #[test]
    fn full_pipeline()
    {
        let set = StageSet::new(true, true);
        let stages: Vec<Tier> = set.shader_stages().collect();
        assert_eq!(
            stages,
            vec![Tier::Vertex, Tier::Tess, Tier::Geometry, Tier::Fragment]
        );
        assert_eq!(set.next_after(Tier::Vertex), Some(Tier::Tess));
        assert_eq!(
            set.boundaries(),
            vec![
                (Tier::Vertex, Tier::Tess),
                (Tier::Tess, Tier::Geometry),
                (Tier::Geometry, Tier::Fragment)
            ]
        );
    }
}
