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

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType
{
    Int,
    Float,
    Uint,
    Bool,
    Double
}

impl BaseType
{
    pub fn get_name(&self) -> &'static str
    {
        match self {
            BaseType::Int => "int",
            BaseType::Float => "float",
            BaseType::Uint => "uint",
            BaseType::Bool => "bool",
            BaseType::Double => "double"
        }
    }

    pub fn get_char(&self) -> char
    {
        match self {
            BaseType::Int => 'i',
            BaseType::Float => 'f',
            BaseType::Uint => 'u',
            BaseType::Bool => 'b',
            BaseType::Double => 'd'
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorType
{
    pub item: BaseType,
    pub size: u8
}

/// Matrix dimensions in host order (rows x columns). Items are always floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixType
{
    pub rows: u8,
    pub cols: u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerKind
{
    Sampler2D,
    Sampler3D,
    Sampler2DArray,
    SamplerCube
}

impl SamplerKind
{
    pub fn get_name(&self) -> &'static str
    {
        match self {
            SamplerKind::Sampler2D => "sampler2D",
            SamplerKind::Sampler3D => "sampler3D",
            SamplerKind::Sampler2DArray => "sampler2DArray",
            SamplerKind::SamplerCube => "samplerCube"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType
{
    pub name: String,
    pub fields: Vec<(String, Type)>
}

impl StructType
{
    pub fn field(&self, name: &str) -> Option<&Type>
    {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn field_index(&self, name: &str) -> Option<usize>
    {
        self.fields.iter().position(|(n, _)| n == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type
{
    Void,
    Scalar(BaseType),
    Vector(VectorType),
    Matrix(MatrixType),
    Array(Box<Type>, u32),
    Sampler(SamplerKind, BaseType),
    Struct(Rc<StructType>)
}

// Swizzle character sets accepted by dot access on vectors.
const SWIZZLE_SETS: [&str; 3] = ["xyzw", "rgba", "stpq"];

fn swizzle_indices(name: &str) -> Option<Vec<u8>>
{
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    for set in SWIZZLE_SETS {
        let indices: Option<Vec<u8>> = name
            .chars()
            .map(|c| set.find(c).map(|v| v as u8))
            .collect();
        if let Some(v) = indices {
            return Some(v);
        }
    }
    None
}

impl Type
{
    pub fn float() -> Type
    {
        Type::Scalar(BaseType::Float)
    }

    pub fn int() -> Type
    {
        Type::Scalar(BaseType::Int)
    }

    pub fn boolean() -> Type
    {
        Type::Scalar(BaseType::Bool)
    }

    pub fn vec(item: BaseType, size: u8) -> Type
    {
        Type::Vector(VectorType { item, size })
    }

    pub fn vecf(size: u8) -> Type
    {
        Type::vec(BaseType::Float, size)
    }

    pub fn mat(rows: u8, cols: u8) -> Type
    {
        Type::Matrix(MatrixType { rows, cols })
    }

    pub fn record(name: impl Into<String>, fields: Vec<(String, Type)>) -> Type
    {
        Type::Struct(Rc::new(StructType {
            name: name.into(),
            fields
        }))
    }

    pub fn is_sampler(&self) -> bool
    {
        matches!(self, Type::Sampler(_, _))
    }

    /// Base component type of a scalar or vector.
    pub fn component(&self) -> Option<BaseType>
    {
        match self {
            Type::Scalar(b) => Some(*b),
            Type::Vector(v) => Some(v.item),
            _ => None
        }
    }

    /// Resolves the type of a dot access: structure member lookup, or a
    /// swizzle when the receiver is a vector.
    pub fn field_type(&self, name: &str) -> Option<Type>
    {
        match self {
            Type::Struct(st) => st.field(name).cloned(),
            Type::Vector(v) => {
                let indices = swizzle_indices(name)?;
                if indices.iter().any(|i| *i >= v.size) {
                    return None;
                }
                match indices.len() {
                    1 => Some(Type::Scalar(v.item)),
                    n => Some(Type::vec(v.item, n as u8))
                }
            },
            _ => None
        }
    }

    /// True when a dot access on this type selects vector components rather
    /// than a named member.
    pub fn is_component_access(&self, name: &str) -> bool
    {
        matches!(self, Type::Vector(_)) && swizzle_indices(name).is_some()
    }
}

impl fmt::Display for Type
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(b) => write!(f, "{}", b.get_name()),
            Type::Vector(v) => write!(f, "vec{}{}", v.size, v.item.get_char()),
            Type::Matrix(m) => write!(f, "mat{}x{}f", m.rows, m.cols),
            Type::Array(t, n) => write!(f, "{}[{}]", t, n),
            Type::Sampler(k, b) => write!(f, "{}:{}", k.get_name(), b.get_name()),
            Type::Struct(st) => write!(f, "{}", st.name)
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn swizzle_typing()
    {
        let v4 = Type::vecf(4);
        assert_eq!(v4.field_type("x"), Some(Type::float()));
        assert_eq!(v4.field_type("rgb"), Some(Type::vecf(3)));
        assert_eq!(v4.field_type("xyzw"), Some(Type::vecf(4)));
        assert_eq!(v4.field_type("xq"), None);
        let v2 = Type::vecf(2);
        assert_eq!(v2.field_type("z"), None);
    }

    #[test]
    fn struct_members()
    {
        let st = Type::record("Vertex", vec![
            ("position".into(), Type::vecf(4)),
            ("texcoord".into(), Type::vecf(2))
        ]);
        assert_eq!(st.field_type("texcoord"), Some(Type::vecf(2)));
        assert_eq!(st.field_type("normal"), None);
        assert!(!st.is_component_access("position"));
        assert!(Type::vecf(4).is_component_access("xy"));
    }
}
