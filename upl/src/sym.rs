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

use crate::types::{BaseType, SamplerKind, Type};

/// Index of a symbol in the module registry. Stable for the lifetime of the
/// module; binding descriptors reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind
{
    Param,
    Local,
    Result,
    Global,
    Const,
    Proc,
    Field
}

/// Classification of globals: where their value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalClass
{
    /// CPU-dynamic value uploaded once per draw call.
    Uniform,
    /// Texture object; `vertex_fetch` opts the sampler into vertex texture
    /// fetch (disallowed by default).
    Sampler
    {
        vertex_fetch: bool
    },
    /// The per-vertex input object; its fields are vertex attributes.
    VertexInput,
    /// The `gl` builtin object (`gl.Position`, `gl.FragCoord`).
    Builtin
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo
{
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub class: Option<GlobalClass>
}

/// Registry of every symbol referenced by a module's syntax tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbols
{
    infos: Vec<SymbolInfo>
}

impl Symbols
{
    pub fn new() -> Symbols
    {
        Symbols { infos: Vec::new() }
    }

    pub fn push(&mut self, info: SymbolInfo) -> SymbolId
    {
        let id = SymbolId(self.infos.len() as u32);
        self.infos.push(info);
        id
    }

    pub fn get(&self, id: SymbolId) -> Option<&SymbolInfo>
    {
        self.infos.get(id.0 as usize)
    }

    pub fn len(&self) -> usize
    {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &SymbolInfo)>
    {
        self.infos.iter().enumerate().map(|(i, v)| (SymbolId(i as u32), v))
    }

    pub fn local(&mut self, name: impl Into<String>, ty: Type) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Local,
            ty,
            class: None
        })
    }

    pub fn param(&mut self, name: impl Into<String>, ty: Type) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Param,
            ty,
            class: None
        })
    }

    pub fn constant(&mut self, name: impl Into<String>, ty: Type) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Const,
            ty,
            class: None
        })
    }

    pub fn uniform(&mut self, name: impl Into<String>, ty: Type) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Global,
            ty,
            class: Some(GlobalClass::Uniform)
        })
    }

    pub fn sampler(&mut self, name: impl Into<String>, kind: SamplerKind, item: BaseType) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Global,
            ty: Type::Sampler(kind, item),
            class: Some(GlobalClass::Sampler { vertex_fetch: false })
        })
    }

    /// Declares a sampler opted into vertex texture fetch; sampling it is
    /// legal from the vertex stage onwards.
    pub fn vertex_fetch_sampler(
        &mut self,
        name: impl Into<String>,
        kind: SamplerKind,
        item: BaseType
    ) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Global,
            ty: Type::Sampler(kind, item),
            class: Some(GlobalClass::Sampler { vertex_fetch: true })
        })
    }

    /// Declares the per-vertex input object; `ty` must be a record whose
    /// fields are the vertex attributes, in attribute location order.
    pub fn vertex_input(&mut self, name: impl Into<String>, ty: Type) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Param,
            ty,
            class: Some(GlobalClass::VertexInput)
        })
    }

    /// Declares the fragment output object; `ty` must be a record whose
    /// fields are the render target outputs, in location order.
    pub fn fragment_result(&mut self, name: impl Into<String>, ty: Type) -> SymbolId
    {
        self.push(SymbolInfo {
            name: name.into(),
            kind: SymbolKind::Result,
            ty,
            class: None
        })
    }

    /// Declares the `gl` builtin object.
    pub fn builtin_gl(&mut self) -> SymbolId
    {
        let ty = Type::record("gl", vec![
            ("Position".into(), Type::vecf(4)),
            ("FragCoord".into(), Type::vecf(4))
        ]);
        self.push(SymbolInfo {
            name: "gl".into(),
            kind: SymbolKind::Global,
            ty,
            class: Some(GlobalClass::Builtin)
        })
    }
}
