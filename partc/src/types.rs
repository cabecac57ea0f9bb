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

use std::borrow::Cow;

use bp3d_upl::types::{BaseType, StructType, Type};

use crate::diag::CompileError;

fn get_prefix(b: BaseType) -> Result<&'static str, CompileError>
{
    match b {
        BaseType::Float => Ok(""),
        BaseType::Int => Ok("i"),
        BaseType::Uint => Ok("u"),
        BaseType::Bool => Ok("b"),
        BaseType::Double => Ok("d")
    }
}

/// GLSL spelling of a canonical host type.
///
/// Matrices are the classic trap: the host writes dimensions as rows x
/// columns while GLSL names are column-major (`matCxR` has C columns), so a
/// host `Mat3x2` comes out as `mat2x3`.
pub fn glsl_type(ty: &Type) -> Result<Cow<'static, str>, CompileError>
{
    match ty {
        Type::Void => Err(CompileError::TypeNotRepresentable("void".into())),
        Type::Scalar(b) => Ok(b.get_name().into()),
        Type::Vector(v) => Ok(format!("{}vec{}", get_prefix(v.item)?, v.size).into()),
        Type::Matrix(m) => {
            if m.rows == m.cols {
                Ok(format!("mat{}", m.cols).into())
            } else {
                Ok(format!("mat{}x{}", m.cols, m.rows).into())
            }
        },
        Type::Array(item, _) => glsl_type(item),
        Type::Sampler(kind, item) => match item {
            BaseType::Float => Ok(kind.get_name().into()),
            BaseType::Int | BaseType::Uint => {
                Ok(format!("{}{}", get_prefix(*item)?, kind.get_name()).into())
            },
            _ => Err(CompileError::TypeNotRepresentable(ty.to_string()))
        },
        Type::Struct(st) => Ok(st.name.clone().into())
    }
}

/// Renders a declarator (`vec4 name` or `vec4 name[8]`), without the
/// trailing semicolon.
pub fn declare(ty: &Type, name: &str) -> Result<String, CompileError>
{
    let spelled = glsl_type(ty)?;
    if let Type::Array(_, size) = ty {
        Ok(format!("{} {}[{}]", spelled, name, size))
    } else {
        Ok(format!("{} {}", spelled, name))
    }
}

/// Zero-value constructor used for declarations without an initializer.
/// Aggregates have no single-argument zero constructor and yield `None`.
pub fn zero_value(ty: &Type) -> Option<String>
{
    match ty {
        Type::Scalar(_) | Type::Vector(_) | Type::Matrix(_) => {
            Some(format!("{}(0)", glsl_type(ty).ok()?))
        },
        _ => None
    }
}

/// GLSL `struct` declaration, emitted once per stage that uses the record.
pub fn struct_decl(st: &StructType) -> Result<String, CompileError>
{
    let mut out = format!("struct {} {{\n", st.name);
    for (name, ty) in &st.fields {
        out.push_str(&format!("    {};\n", declare(ty, name)?));
    }
    out.push_str("};");
    Ok(out)
}

/// Collects every record type reachable from `ty`, members before users.
pub fn collect_structs(ty: &Type, out: &mut Vec<std::rc::Rc<StructType>>)
{
    match ty {
        Type::Array(item, _) => collect_structs(item, out),
        Type::Struct(st) => {
            for (_, fty) in &st.fields {
                collect_structs(fty, out);
            }
            if !out.iter().any(|v| v.name == st.name) {
                out.push(st.clone());
            }
        },
        _ => ()
    }
}

#[cfg(test)]
mod tests
{
    use bp3d_upl::types::SamplerKind;

    use super::*;

    #[test]
    fn scalar_and_vector_spellings()
    {
        assert_eq!(glsl_type(&Type::float()).unwrap(), "float");
        assert_eq!(glsl_type(&Type::vecf(4)).unwrap(), "vec4");
        assert_eq!(glsl_type(&Type::vec(BaseType::Int, 3)).unwrap(), "ivec3");
        assert_eq!(glsl_type(&Type::vec(BaseType::Uint, 2)).unwrap(), "uvec2");
        assert_eq!(glsl_type(&Type::vec(BaseType::Bool, 4)).unwrap(), "bvec4");
    }

    #[test]
    fn matrix_dimension_order()
    {
        // Host rows x cols, GLSL cols x rows.
        assert_eq!(glsl_type(&Type::mat(4, 4)).unwrap(), "mat4");
        assert_eq!(glsl_type(&Type::mat(3, 2)).unwrap(), "mat2x3");
        assert_eq!(glsl_type(&Type::mat(2, 4)).unwrap(), "mat4x2");
    }

    #[test]
    fn samplers()
    {
        assert_eq!(
            glsl_type(&Type::Sampler(SamplerKind::Sampler2D, BaseType::Float)).unwrap(),
            "sampler2D"
        );
        assert_eq!(
            glsl_type(&Type::Sampler(SamplerKind::SamplerCube, BaseType::Int)).unwrap(),
            "isamplerCube"
        );
        assert!(glsl_type(&Type::Sampler(SamplerKind::Sampler3D, BaseType::Bool)).is_err());
    }

    #[test]
    fn array_declarator()
    {
        let arr = Type::Array(Box::new(Type::vecf(3)), 16);
        assert_eq!(declare(&arr, "lights").unwrap(), "vec3 lights[16]");
        assert_eq!(zero_value(&arr), None);
        assert_eq!(zero_value(&Type::vecf(4)).unwrap(), "vec4(0)");
        assert_eq!(zero_value(&Type::mat(4, 4)).unwrap(), "mat4(0)");
    }

    #[test]
    fn void_is_not_representable()
    {
        assert_eq!(
            glsl_type(&Type::Void),
            Err(CompileError::TypeNotRepresentable("void".into()))
        );
    }

    #[test]
    fn nested_struct_collection()
    {
        let inner = Type::record("Light", vec![("color".into(), Type::vecf(4))]);
        let outer = Type::record("Lighting", vec![
            ("count".into(), Type::int()),
            ("lights".into(), Type::Array(Box::new(inner), 8))
        ]);
        let mut structs = Vec::new();
        collect_structs(&outer, &mut structs);
        let names: Vec<&str> = structs.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["Light", "Lighting"]);
    }
}
