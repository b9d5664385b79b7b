//! Custom operator registry.
//!
//! A flat, name-keyed, last-write-wins table. Redefining an operator at the console (or by saving
//! `operators.json`) replaces the previous definition immediately; there is no versioning.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::RegistryError;
use crate::shader::ShaderSource;

/// Operators the render pipeline ships with. Custom definitions may not shadow them.
pub const BUILTIN_OPERATORS: &[&str] = &[
    // sources
    "noise", "voronoi", "osc", "shape", "gradient", "src", "solid", "prev",
    // coordinates
    "rotate", "scale", "pixelate", "repeat", "repeatX", "repeatY", "kaleid", "scroll", "scrollX",
    "scrollY",
    // colors
    "posterize", "shift", "invert", "contrast", "brightness", "luma", "thresh", "color",
    "saturate", "hue", "colorama", "sum", "r", "g", "b", "a",
    // blending
    "add", "sub", "layer", "blend", "mult", "diff", "mask",
    // modulation
    "modulateRepeat", "modulateRepeatX", "modulateRepeatY", "modulateKaleid", "modulateScrollX",
    "modulateScrollY", "modulate", "modulateScale", "modulatePixelate", "modulateRotate",
    "modulateHue",
    // sinks
    "out", "render",
];

/// Where in a chain an operator may be composed, and what it receives implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum OperatorCategory {
    #[serde(rename = "src")]
    Source,
    #[serde(rename = "coord")]
    Coord,
    #[serde(rename = "color")]
    Color,
    #[serde(rename = "combine")]
    Combine,
    #[serde(rename = "combineCoord")]
    CombineCoord,
}

impl OperatorCategory {
    /// Names bound by the generated function signature ahead of the declared parameters.
    pub fn implicit_inputs(self) -> &'static [&'static str] {
        match self {
            OperatorCategory::Source | OperatorCategory::Coord => &["_st"],
            OperatorCategory::Color => &["_c0"],
            OperatorCategory::Combine => &["_c0", "_c1"],
            OperatorCategory::CombineCoord => &["_st", "_c0"],
        }
    }

    fn signature_prefix(self) -> (&'static str, &'static str) {
        match self {
            OperatorCategory::Source => ("vec4", "vec2 _st"),
            OperatorCategory::Coord => ("vec2", "vec2 _st"),
            OperatorCategory::Color => ("vec4", "vec4 _c0"),
            OperatorCategory::Combine => ("vec4", "vec4 _c0, vec4 _c1"),
            OperatorCategory::CombineCoord => ("vec2", "vec2 _st, vec4 _c0"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatorCategory::Source => "src",
            OperatorCategory::Coord => "coord",
            OperatorCategory::Color => "color",
            OperatorCategory::Combine => "combine",
            OperatorCategory::CombineCoord => "combineCoord",
        }
    }
}

/// Parameter value type. Only float scalars exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    Float,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub ty: ParamType,
    pub default: f64,
}

impl ParameterSpec {
    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            ty: ParamType::Float,
            default,
        }
    }
}

/// A validated custom operator. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDefinition {
    name: String,
    category: OperatorCategory,
    parameters: Vec<ParameterSpec>,
    body: ShaderSource,
}

impl OperatorDefinition {
    /// Build and validate a definition.
    ///
    /// Checks: identifier-shaped name, no built-in collision, unique parameter names, finite
    /// defaults, and parameter names matching the body's free identifiers exactly.
    pub fn new(
        name: impl Into<String>,
        category: OperatorCategory,
        parameters: Vec<ParameterSpec>,
        body: impl Into<ShaderSource>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let body = body.into();

        if !is_identifier(&name) {
            return Err(RegistryError::InvalidName { name });
        }
        if BUILTIN_OPERATORS.contains(&name.as_str()) {
            return Err(RegistryError::BuiltinCollision { name });
        }

        let mut seen = BTreeSet::new();
        for p in &parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(RegistryError::DuplicateParameter {
                    operator: name,
                    param: p.name.clone(),
                });
            }
            if !p.default.is_finite() {
                return Err(RegistryError::NonFiniteDefault {
                    operator: name,
                    param: p.name.clone(),
                });
            }
        }

        let free = body.free_identifiers(category.implicit_inputs());
        let undeclared: Vec<String> = free
            .iter()
            .filter(|n| !seen.contains(n.as_str()))
            .cloned()
            .collect();
        let unused: Vec<String> = parameters
            .iter()
            .filter(|p| !free.contains(&p.name))
            .map(|p| p.name.clone())
            .collect();
        if !undeclared.is_empty() || !unused.is_empty() {
            return Err(RegistryError::FreeVariableMismatch {
                operator: name,
                undeclared,
                unused,
            });
        }

        Ok(Self {
            name,
            category,
            parameters,
            body,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> OperatorCategory {
        self.category
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn body(&self) -> &ShaderSource {
        &self.body
    }

    pub fn defaults(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.default).collect()
    }

    /// Full GLSL function text handed to the external compiler.
    pub fn glsl_function(&self) -> String {
        let (ret, implicit) = self.category.signature_prefix();
        let mut sig = String::from(implicit);
        for p in &self.parameters {
            sig.push_str(", float ");
            sig.push_str(&p.name);
        }
        format!("{ret} {}({sig}) {{\n{}\n}}\n", self.name, self.body.as_str())
    }
}

/// Result of a successful [`OperatorRegistry::register`] call.
#[derive(Debug, Clone)]
pub enum Registration {
    Inserted,
    /// The name was already custom-registered; the old definition is returned for logging.
    Replaced { previous: Arc<OperatorDefinition> },
}

#[derive(Debug, Default, Clone)]
pub struct OperatorRegistry {
    ops: HashMap<String, Arc<OperatorDefinition>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Definitions are validated at construction, so this cannot fail.
    pub fn register(&mut self, definition: OperatorDefinition) -> Registration {
        let name = definition.name.clone();
        match self.ops.insert(name, Arc::new(definition)) {
            Some(previous) => Registration::Replaced { previous },
            None => Registration::Inserted,
        }
    }

    /// `None` is the normal answer for built-ins and anything not yet registered.
    pub fn lookup(&self, name: &str) -> Option<Arc<OperatorDefinition>> {
        self.ops.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ops.keys().cloned().collect();
        names.sort();
        names
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("gl_") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
