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

use bp3d_upl::tree::Span;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compile failure taxonomy. Every variant is fatal; none is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CompileError
{
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    #[error("type has no GLSL representation: {0}")]
    TypeNotRepresentable(String),
    #[error("'{0}' is written in two stages with interleaved reads; interpolate({0}) would bridge the boundary")]
    StageSplitConflict(String),
    #[error("statements cannot be grouped by stage without breaking a dependency on '{0}'")]
    StageOrderConflict(String),
    #[error("interpolate() expects a whole scalar or vector variable, got '{0}'")]
    BadInterpolate(String),
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolated(String)
}

impl CompileError
{
    pub fn kind(&self) -> &'static str
    {
        match self {
            CompileError::UnsupportedConstruct(_) => "UnsupportedConstruct",
            CompileError::TypeNotRepresentable(_) => "TypeNotRepresentable",
            CompileError::StageSplitConflict(_) => "StageSplitConflict",
            CompileError::StageOrderConflict(_) => "StageOrderConflict",
            CompileError::BadInterpolate(_) => "BadInterpolate",
            CompileError::UnknownIdentifier(_) => "UnknownIdentifier",
            CompileError::InternalInvariantViolated(_) => "InternalInvariantViolated"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity
{
    Warning,
    Error
}

/// A single diagnostic record surfaced to the caller. Errors fail the
/// compile; warnings never block emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic
{
    pub severity: Severity,
    pub kind: String,
    pub message: String,
    pub location: Option<Span>
}

impl Diagnostic
{
    pub fn error(error: CompileError, location: Option<Span>) -> Diagnostic
    {
        Diagnostic {
            severity: Severity::Error,
            kind: error.kind().into(),
            message: error.to_string(),
            location
        }
    }
}

impl fmt::Display for Diagnostic
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.location {
            Some(span) => write!(f, "{}:{}: {}", span.line, span.col, self.message),
            None => write!(f, "{}", self.message)
        }
    }
}

/// Warning sink owned by a single compile invocation.
#[derive(Debug, Default)]
pub struct WarningLog
{
    warnings: Vec<Diagnostic>
}

impl WarningLog
{
    pub fn new() -> WarningLog
    {
        WarningLog::default()
    }

    pub fn push(&mut self, kind: &str, message: String, location: Option<Span>)
    {
        warn!("{}", message);
        self.warnings.push(Diagnostic {
            severity: Severity::Warning,
            kind: kind.into(),
            message,
            location
        });
    }

    pub fn into_inner(self) -> Vec<Diagnostic>
    {
        self.warnings
    }
}
