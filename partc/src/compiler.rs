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

use bp3d_upl::sym::SymbolId;
use bp3d_upl::tree::Module;
use bp3d_upl::types::{SamplerKind, Type};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::diag::{CompileError, Diagnostic, WarningLog};
use crate::glsl::GlslEmitter;
use crate::partition::{self, Partition};
use crate::record::{self, ValueId};
use crate::stage::{StageSet, Tier};
use crate::types::glsl_type;
use crate::varying::{self, VaryingPlan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformBinding
{
    pub name: String,
    pub glsl_type: String,
    pub source_symbol_id: SymbolId
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBinding
{
    pub name: String,
    pub glsl_type: String,
    pub source_symbol_id: SymbolId,
    pub location: u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureBinding
{
    pub name: String,
    pub sampler_kind: SamplerKind,
    pub source_symbol_id: SymbolId
}

/// The partition plan as handed to the host runtime: what tier every source
/// statement landed on, the full execution sequence, and the slice of it the
/// CPU evaluates to compose uniform values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDescriptor
{
    pub stmt_tiers: Vec<Tier>,
    pub execution_order: Vec<usize>,
    pub cpu_plan: Vec<usize>
}

/// Everything one compile produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifacts
{
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub uniform_bindings: Vec<UniformBinding>,
    pub attribute_bindings: Vec<AttributeBinding>,
    pub texture_bindings: Vec<TextureBinding>,
    pub plan: PlanDescriptor,
    pub warnings: Vec<Diagnostic>
}

/// Compiles a unified pipeline program into per-stage GLSL plus CPU binding
/// descriptors. Deterministic: the same module and config always produce
/// byte-identical output.
pub fn compile(module: &Module, config: &Config) -> Result<Artifacts, Vec<Diagnostic>>
{
    let mut warnings = WarningLog::new();
    match compile_inner(module, config, &mut warnings) {
        Ok(mut artifacts) => {
            artifacts.warnings = warnings.into_inner();
            Ok(artifacts)
        },
        Err(error) => {
            let mut diagnostics = warnings.into_inner();
            diagnostics.push(error);
            Err(diagnostics)
        }
    }
}

fn compile_inner(
    module: &Module,
    config: &Config,
    warnings: &mut WarningLog
) -> Result<Artifacts, Diagnostic>
{
    if config.tessellation || config.geometry {
        return Err(Diagnostic::error(
            CompileError::UnsupportedConstruct(
                "tessellation and geometry stages are reserved; cross-vertex semantics are not specified yet"
                    .into()
            ),
            None
        ));
    }
    let stages = StageSet::new(config.tessellation, config.geometry);
    info!(
        "Compiling module: {} statements, {} procedures",
        module.body.len(),
        module.procs.len()
    );
    let scan = record::scan(module)?;
    let partition = partition::solve(scan, &stages, warnings)?;
    let plan = varying::plan(&partition, &stages)?;
    let mut emitter = GlslEmitter::new(module, &partition, &plan, config.glsl_version);
    let vertex_shader = emitter.emit_stage(Tier::Vertex)?;
    let fragment_shader = emitter.emit_stage(Tier::Fragment)?;
    let (uniform_bindings, attribute_bindings, texture_bindings) =
        collect_bindings(&partition, &plan, &stages)?;
    let descriptor = PlanDescriptor {
        stmt_tiers: partition.records.iter().map(|r| r.tier).collect(),
        execution_order: partition.order.clone(),
        cpu_plan: partition.cpu_plan()
    };
    debug!(
        "Compile finished: {} uniforms, {} attributes, {} textures",
        uniform_bindings.len(),
        attribute_bindings.len(),
        texture_bindings.len()
    );
    Ok(Artifacts {
        vertex_shader,
        fragment_shader,
        uniform_bindings,
        attribute_bindings,
        texture_bindings,
        plan: descriptor,
        warnings: Vec::new()
    })
}

fn collect_bindings(
    partition: &Partition,
    plan: &VaryingPlan,
    stages: &StageSet
) -> Result<(Vec<UniformBinding>, Vec<AttributeBinding>, Vec<TextureBinding>), Diagnostic>
{
    let values = &partition.values;
    let spell = |value: ValueId| -> Result<String, Diagnostic> {
        glsl_type(&values.get(value).ty)
            .map(|v| v.into_owned())
            .map_err(|e| Diagnostic::error(e, None))
    };
    let mut uniforms: BTreeSet<ValueId> = BTreeSet::new();
    let mut samplers: BTreeSet<ValueId> = BTreeSet::new();
    for stage in stages.shader_stages() {
        if let Some(io) = plan.io(stage) {
            uniforms.extend(io.uniforms.iter().copied());
            samplers.extend(io.samplers.iter().copied());
        }
    }
    let mut uniforms: Vec<ValueId> = uniforms.into_iter().collect();
    uniforms.sort_by(|a, b| values.get(*a).name.cmp(&values.get(*b).name));
    let uniform_bindings = uniforms
        .into_iter()
        .map(|v| {
            Ok(UniformBinding {
                name: format!("uniform_{}", values.get(v).name),
                glsl_type: spell(v)?,
                source_symbol_id: values.source_symbol(v)
            })
        })
        .collect::<Result<Vec<UniformBinding>, Diagnostic>>()?;
    let mut attrs: Vec<ValueId> = plan.attributes.iter().copied().collect();
    attrs.sort_by_key(|v| match values.get(*v).origin {
        crate::record::ValueOrigin::Attribute { location } => location,
        _ => u32::MAX
    });
    let attribute_bindings = attrs
        .into_iter()
        .map(|v| {
            let location = match values.get(v).origin {
                crate::record::ValueOrigin::Attribute { location } => location,
                _ => 0
            };
            Ok(AttributeBinding {
                name: format!("attr_{}", values.get(v).name),
                glsl_type: spell(v)?,
                source_symbol_id: values.source_symbol(v),
                location
            })
        })
        .collect::<Result<Vec<AttributeBinding>, Diagnostic>>()?;
    let mut samplers: Vec<ValueId> = samplers.into_iter().collect();
    samplers.sort_by(|a, b| values.get(*a).name.cmp(&values.get(*b).name));
    let texture_bindings = samplers
        .into_iter()
        .map(|v| {
            let kind = match &values.get(v).ty {
                Type::Sampler(kind, _) => *kind,
                _ => {
                    return Err(Diagnostic::error(
                        CompileError::InternalInvariantViolated(
                            "sampler binding over a non-sampler value".into()
                        ),
                        None
                    ))
                }
            };
            Ok(TextureBinding {
                name: values.get(v).name.clone(),
                sampler_kind: kind,
                source_symbol_id: values.source_symbol(v)
            })
        })
        .collect::<Result<Vec<TextureBinding>, Diagnostic>>()?;
    Ok((uniform_bindings, attribute_bindings, texture_bindings))
}

#[cfg(test)]
mod tests
{
    use bp3d_upl::sym::SymbolId;
    use bp3d_upl::tree::{BinOp, Expr, InterpQualifier, Stmt, StmtKind};
    use bp3d_upl::types::BaseType;

    use super::*;

    struct Fixture
    {
        module: Module,
        v: SymbolId,
        result: SymbolId,
        gl: SymbolId,
        my_uniform: SymbolId,
        mvp: SymbolId,
        tex: SymbolId
    }

    fn fixture() -> Fixture
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
        let my_uniform = module.symbols.uniform("myUniform", Type::float());
        let mvp = module.symbols.uniform("mvp", Type::mat(4, 4));
        let tex = module
            .symbols
            .sampler("myTex", SamplerKind::Sampler2D, BaseType::Float);
        Fixture {
            module,
            v,
            result,
            gl,
            my_uniform,
            mvp,
            tex
        }
    }

    impl Fixture
    {
        fn obj(&self, id: SymbolId) -> Expr
        {
            Expr::var(id, &self.module.symbols)
        }

        fn color_r(&self) -> Expr
        {
            Expr::field(Expr::field(self.obj(self.result), "color"), "r")
        }

        fn sample_r(&self) -> Expr
        {
            Expr::field(
                Expr::builtin(
                    "texture",
                    vec![
                        self.obj(self.tex),
                        Expr::field(self.obj(self.v), "texcoord"),
                    ],
                    Type::vecf(4)
                ),
                "r"
            )
        }

        fn position_stmt(&self) -> Stmt
        {
            Stmt::assign(
                Expr::field(self.obj(self.gl), "Position"),
                Expr::binary(
                    BinOp::Mul,
                    self.obj(self.mvp),
                    Expr::field(self.obj(self.v), "position"),
                    Type::vecf(4)
                )
            )
        }
    }

    fn run(module: &Module) -> Result<Artifacts, Vec<Diagnostic>>
    {
        compile(module, &Config::default())
    }

    #[test]
    fn every_stage_uniform_scenario()
    {
        let mut f = fixture();
        f.module.body.push(Stmt::assign(f.color_r(), Expr::float(0.0)));
        f.module
            .body
            .push(Stmt::assign_op(f.color_r(), BinOp::Add, Expr::float(0.123456)));
        f.module.body.push(Stmt::assign_op(
            f.color_r(),
            BinOp::Add,
            f.obj(f.my_uniform)
        ));
        f.module.body.push(Stmt::assign_op(
            f.color_r(),
            BinOp::Add,
            Expr::field(Expr::field(f.obj(f.v), "position"), "x")
        ));
        f.module
            .body
            .push(Stmt::assign_op(f.color_r(), BinOp::Add, f.sample_r()));
        let artifacts = run(&f.module).unwrap();
        assert_eq!(
            artifacts.vertex_shader,
            "\
#version 440

uniform vec4 uniform_result_color;

layout (location = 0) in vec4 attr_position;
layout (location = 1) in vec2 attr_texcoord;

layout (location = 0) smooth out vec4 vert2frag_result_color;
layout (location = 1) smooth out vec2 vert2frag_texcoord;

void main() {
    vec4 vert_position = attr_position;
    vec4 vert_result_color = uniform_result_color;
    vec2 vert_texcoord = attr_texcoord;
    vert_result_color.r += vert_position.x;
    vert2frag_result_color = vert_result_color;
    vert2frag_texcoord = vert_texcoord;
}
"
        );
        assert_eq!(
            artifacts.fragment_shader,
            "\
#version 440

uniform sampler2D myTex;

layout (location = 0) smooth in vec4 vert2frag_result_color;
layout (location = 1) smooth in vec2 vert2frag_texcoord;

layout (location = 0) out vec4 result_color;

void main() {
    result_color = vert2frag_result_color;
    vec2 frag_texcoord = vert2frag_texcoord;
    result_color.r += texture(myTex, frag_texcoord).r;
}
"
        );
        assert_eq!(artifacts.plan.cpu_plan, vec![0, 1, 2]);
        assert_eq!(
            artifacts.plan.stmt_tiers,
            vec![Tier::Const, Tier::Const, Tier::Cpu, Tier::Vertex, Tier::Fragment]
        );
        // The only uniform any stage declares is the composed value; the raw
        // CPU global was folded into it.
        assert_eq!(artifacts.uniform_bindings.len(), 1);
        assert_eq!(artifacts.uniform_bindings[0].name, "uniform_result_color");
        assert_eq!(artifacts.uniform_bindings[0].glsl_type, "vec4");
        assert_eq!(
            artifacts.uniform_bindings[0].source_symbol_id,
            f.result
        );
        let attrs: Vec<(&str, u32)> = artifacts
            .attribute_bindings
            .iter()
            .map(|a| (a.name.as_str(), a.location))
            .collect();
        assert_eq!(attrs, vec![("attr_position", 0), ("attr_texcoord", 1)]);
        assert_eq!(artifacts.texture_bindings.len(), 1);
        assert_eq!(artifacts.texture_bindings[0].name, "myTex");
        assert_eq!(
            artifacts.texture_bindings[0].sampler_kind,
            SamplerKind::Sampler2D
        );
    }

    #[test]
    fn legal_reorder_scenario()
    {
        let mut f = fixture();
        f.module.body.push(Stmt::assign(f.color_r(), f.sample_r()));
        f.module.body.push(f.position_stmt());
        let artifacts = run(&f.module).unwrap();
        assert_eq!(artifacts.plan.execution_order, vec![1, 0]);
        assert!(artifacts
            .vertex_shader
            .contains("gl_Position = vert_mvp * vert_position;"));
        assert!(artifacts.fragment_shader.contains("result_color = vec4(0);"));
        assert!(artifacts
            .fragment_shader
            .contains("result_color.r = texture(myTex, frag_texcoord).r;"));
    }

    #[test]
    fn illegal_split_scenario()
    {
        let mut f = fixture();
        f.module.body.push(Stmt::assign(f.color_r(), f.sample_r()));
        f.module.body.push(Stmt::assign(
            Expr::field(f.obj(f.gl), "Position"),
            Expr::convert(Type::vecf(4), f.color_r())
        ));
        let diagnostics = run(&f.module).unwrap_err();
        assert!(diagnostics.iter().any(|d| d.kind == "StageSplitConflict"));
    }

    #[test]
    fn interpolate_fixes_the_split_scenario()
    {
        let mut f = fixture();
        f.module.body.push(Stmt::assign(f.color_r(), f.sample_r()));
        f.module.body.push(Stmt::assign(
            Expr::field(f.obj(f.gl), "Position"),
            Expr::convert(Type::vecf(4), f.color_r())
        ));
        f.module.body.push(Stmt::interpolate(
            Expr::field(f.obj(f.result), "color"),
            None
        ));
        let artifacts = run(&f.module).unwrap();
        assert!(artifacts
            .vertex_shader
            .contains("vec4 vert_result_color = vec4(0);"));
        assert!(artifacts
            .vertex_shader
            .contains("gl_Position = vec4(vert_result_color.r);"));
        assert!(artifacts
            .vertex_shader
            .contains("vert2frag_result_color = vert_result_color;"));
        // The fragment stage starts from the forwarded value and overwrites
        // the red channel afterwards.
        let fs = &artifacts.fragment_shader;
        let receive = fs.find("result_color = vert2frag_result_color;").unwrap();
        let overwrite = fs.find("result_color.r = texture(").unwrap();
        assert!(receive < overwrite);
    }

    #[test]
    fn bad_interpolate_scenario()
    {
        let mut f = fixture();
        f.module.body.push(Stmt::assign(f.color_r(), Expr::float(0.0)));
        f.module.body.push(Stmt::interpolate(f.color_r(), None));
        let diagnostics = run(&f.module).unwrap_err();
        assert!(diagnostics.iter().any(|d| d.kind == "BadInterpolate"));
    }

    #[test]
    fn flat_varying_branch_scenario()
    {
        let mut f = fixture();
        f.module.body.push(f.position_stmt());
        let tmp0 = f.module.symbols.local("tmp0", Type::boolean());
        f.module.body.push(Stmt::var(
            tmp0,
            Some(Expr::binary(
                BinOp::Gt,
                Expr::field(Expr::field(f.obj(f.gl), "Position"), "z"),
                Expr::float(0.5),
                Type::boolean()
            ))
        ));
        f.module.body.push(Stmt::interpolate(
            Expr::var(tmp0, &f.module.symbols),
            Some(InterpQualifier::Flat)
        ));
        let branch = |r, g| {
            Stmt::assign(
                Expr::field(Expr::field(f.obj(f.result), "color"), "rgb"),
                Expr::builtin(
                    "vec3",
                    vec![Expr::float(r), Expr::float(g), Expr::float(0.0)],
                    Type::vecf(3)
                )
            )
        };
        f.module.body.push(Stmt::new(StmtKind::If {
            cond: Expr::var(tmp0, &f.module.symbols),
            then_body: vec![branch(1.0, 0.0)],
            else_body: vec![branch(0.0, 1.0)]
        }));
        let artifacts = run(&f.module).unwrap();
        assert!(artifacts
            .vertex_shader
            .contains("layout (location = 0) flat out int vert2frag_tmp0;"));
        assert!(artifacts
            .vertex_shader
            .contains("bool vert_tmp0 = gl_Position.z > 0.5;"));
        assert!(artifacts
            .vertex_shader
            .contains("vert2frag_tmp0 = vert_tmp0 ? 1 : 0;"));
        assert!(artifacts
            .fragment_shader
            .contains("layout (location = 0) flat in int vert2frag_tmp0;"));
        assert!(artifacts
            .fragment_shader
            .contains("bool frag_tmp0 = vert2frag_tmp0 != 0;"));
        assert!(artifacts.fragment_shader.contains("if (frag_tmp0) {"));
        assert!(artifacts
            .fragment_shader
            .contains("result_color.rgb = vec3(1.0, 0.0, 0.0);"));
    }

    #[test]
    fn empty_body_emits_empty_main()
    {
        let f = fixture();
        let artifacts = run(&f.module).unwrap();
        assert_eq!(artifacts.vertex_shader, "#version 440\n\nvoid main() {\n}\n");
        assert_eq!(
            artifacts.fragment_shader,
            "#version 440\n\nvoid main() {\n}\n"
        );
        assert!(artifacts.uniform_bindings.is_empty());
        assert!(artifacts.attribute_bindings.is_empty());
        assert!(artifacts.texture_bindings.is_empty());
        assert!(artifacts
            .warnings
            .iter()
            .any(|w| w.kind == "MissingPosition"));
    }

    #[test]
    fn version_is_first_line_and_matching_varyings()
    {
        let mut f = fixture();
        f.module.body.push(f.position_stmt());
        f.module.body.push(Stmt::assign(f.color_r(), f.sample_r()));
        let artifacts = run(&f.module).unwrap();
        for shader in [&artifacts.vertex_shader, &artifacts.fragment_shader] {
            assert_eq!(shader.lines().next().unwrap(), "#version 440");
        }
        // Every fragment `in` has a matching vertex `out`.
        for line in artifacts.fragment_shader.lines() {
            if let Some(decl) = line.strip_prefix("layout (location = ") {
                if decl.contains(" in ") {
                    let out_line = line.replace(" in ", " out ");
                    assert!(
                        artifacts.vertex_shader.contains(&out_line),
                        "no matching out for '{}'",
                        line
                    );
                }
            }
        }
    }

    #[test]
    fn deterministic_recompile()
    {
        let mut f = fixture();
        f.module.body.push(f.position_stmt());
        f.module.body.push(Stmt::assign(f.color_r(), f.sample_r()));
        let first = run(&f.module).unwrap();
        let second = run(&f.module).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn execution_order_is_a_permutation_of_the_source()
    {
        let mut f = fixture();
        f.module.body.push(Stmt::assign(f.color_r(), f.sample_r()));
        f.module.body.push(f.position_stmt());
        f.module.body.push(Stmt::interpolate(
            Expr::field(f.obj(f.result), "color"),
            None
        ));
        let artifacts = run(&f.module).unwrap();
        let mut sorted = artifacts.plan.execution_order.clone();
        sorted.sort();
        // Annotation statements emit nothing; everything else appears exactly
        // once.
        assert_eq!(sorted, vec![0, 1]);
    }

    #[test]
    fn geometry_stage_is_gated()
    {
        let f = fixture();
        let config = Config {
            geometry: true,
            ..Config::default()
        };
        let diagnostics = compile(&f.module, &config).unwrap_err();
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == "UnsupportedConstruct"));
    }

    #[test]
    fn procedures_are_emitted_in_the_calling_stage()
    {
        let mut f = fixture();
        let param = f.module.symbols.param("base", Type::vecf(4));
        let proc = f.module.symbols.push(bp3d_upl::sym::SymbolInfo {
            name: "applyGain".into(),
            kind: bp3d_upl::sym::SymbolKind::Proc,
            ty: Type::Void,
            class: None
        });
        let gain = f.module.symbols.uniform("gain", Type::float());
        f.module.procs.push(bp3d_upl::tree::ProcDef {
            sym: proc,
            params: vec![param],
            ret: Type::vecf(4),
            body: vec![Stmt::new(StmtKind::Return(Some(Expr::binary(
                BinOp::Mul,
                Expr::var(param, &f.module.symbols),
                Expr::var(gain, &f.module.symbols),
                Type::vecf(4)
            ))))]
        });
        f.module.body.push(f.position_stmt());
        f.module.body.push(Stmt::assign(
            Expr::field(f.obj(f.result), "color"),
            Expr::call(
                bp3d_upl::tree::Callee::Proc(proc),
                vec![Expr::builtin(
                    "texture",
                    vec![
                        f.obj(f.tex),
                        Expr::field(f.obj(f.v), "texcoord"),
                    ],
                    Type::vecf(4)
                )],
                Type::vecf(4)
            )
        ));
        let artifacts = run(&f.module).unwrap();
        assert!(artifacts
            .fragment_shader
            .contains("vec4 applyGain(vec4 base) {\n    return base * uniform_gain;\n}"));
        assert!(artifacts
            .fragment_shader
            .contains("uniform float uniform_gain;"));
        assert!(!artifacts.vertex_shader.contains("applyGain"));
        // The procedure's uniform surfaces in the bindings.
        assert!(artifacts
            .uniform_bindings
            .iter()
            .any(|u| u.name == "uniform_gain"));
    }

    #[test]
    fn unknown_identifier_scenario()
    {
        let mut f = fixture();
        let ghost = f.module.symbols.local("ghost", Type::float());
        f.module.body.push(Stmt::assign(
            f.color_r(),
            Expr::var(ghost, &f.module.symbols)
        ));
        let diagnostics = run(&f.module).unwrap_err();
        assert!(diagnostics.iter().any(|d| d.kind == "UnknownIdentifier"));
    }
}
