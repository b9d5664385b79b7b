//! Glue between the animation/registry core and the external render pipeline.
//!
//! A [`Program`] is a set of operator chains, each sent to an output buffer, plus the buffer
//! currently shown. Once per rendered frame the renderer asks for [`Program::evaluate_frame`],
//! which resolves every argument (dynamic ones are invoked right then) and hands back plain
//! numbers per stage. Compiling and drawing stay on the renderer's side.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::argument::{resolve, Argument};
use crate::error::{ParameterEvaluationError, RegistryError};
use crate::operator::{OperatorDefinition, OperatorRegistry, BUILTIN_OPERATORS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OutputBuffer {
    #[default]
    O0,
    O1,
    O2,
    O3,
}

impl OutputBuffer {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "o0" => Some(OutputBuffer::O0),
            "o1" => Some(OutputBuffer::O1),
            "o2" => Some(OutputBuffer::O2),
            "o3" => Some(OutputBuffer::O3),
            _ => None,
        }
    }
}

impl fmt::Display for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputBuffer::O0 => "o0",
            OutputBuffer::O1 => "o1",
            OutputBuffer::O2 => "o2",
            OutputBuffer::O3 => "o3",
        };
        f.write_str(s)
    }
}

/// What to do when an argument fails to resolve during a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
pub enum FallbackPolicy {
    /// Use the declared default for that argument (built-ins have none and are skipped).
    #[default]
    #[serde(rename = "default")]
    SubstituteDefault,
    /// Drop the whole stage for this frame.
    #[serde(rename = "skip")]
    SkipStage,
    /// Drop the whole frame: every output comes back empty.
    #[serde(rename = "abort")]
    AbortFrame,
}

#[derive(Debug, Clone)]
enum StageOp {
    Custom(Arc<OperatorDefinition>),
    Builtin(&'static str),
}

#[derive(Debug, Clone)]
pub struct Stage {
    op: StageOp,
    /// Always full arity for custom operators: omitted trailing arguments hold their defaults.
    args: Vec<Argument>,
}

impl Stage {
    pub fn name(&self) -> &str {
        match &self.op {
            StageOp::Custom(def) => def.name(),
            StageOp::Builtin(name) => name,
        }
    }

    fn default_for(&self, index: usize) -> Option<f64> {
        match &self.op {
            StageOp::Custom(def) => def.parameters().get(index).map(|p| p.default),
            StageOp::Builtin(_) => None,
        }
    }

    fn param_name(&self, index: usize) -> Option<String> {
        match &self.op {
            StageOp::Custom(def) => def.parameters().get(index).map(|p| p.name.clone()),
            StageOp::Builtin(_) => None,
        }
    }
}

/// Chained operator calls, e.g. `src(o0).fisheye(0.2, 0.2, 0.01).scale(...)`.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a custom operator call, filling omitted trailing arguments with defaults.
    pub fn call(
        mut self,
        registry: &OperatorRegistry,
        name: &str,
        args: Vec<Argument>,
    ) -> Result<Self, RegistryError> {
        let def = registry
            .lookup(name)
            .ok_or_else(|| RegistryError::UnknownOperator { name: name.to_string() })?;
        let expected = def.parameters().len();
        if args.len() > expected {
            return Err(RegistryError::Arity {
                operator: name.to_string(),
                expected,
                got: args.len(),
            });
        }

        let mut full = args;
        for p in &def.parameters()[full.len()..] {
            full.push(Argument::Constant(p.default));
        }
        self.stages.push(Stage {
            op: StageOp::Custom(def),
            args: full,
        });
        Ok(self)
    }

    /// Append a built-in operator call. Arity is the renderer's business.
    pub fn builtin(mut self, name: &str, args: Vec<Argument>) -> Result<Self, RegistryError> {
        let name = BUILTIN_OPERATORS
            .iter()
            .copied()
            .find(|b| *b == name)
            .ok_or_else(|| RegistryError::UnknownOperator { name: name.to_string() })?;
        self.stages.push(Stage {
            op: StageOp::Builtin(name),
            args,
        });
        Ok(self)
    }

    /// Resolve every stage for one frame.
    pub fn evaluate(&self, policy: FallbackPolicy) -> ChainFrame {
        let mut frame = ChainFrame::default();

        for (stage_idx, stage) in self.stages.iter().enumerate() {
            let mut values = Vec::with_capacity(stage.args.len());
            let mut skip = false;

            for (i, arg) in stage.args.iter().enumerate() {
                match resolve(arg) {
                    Ok(v) => values.push(v),
                    Err(error) => {
                        let substitute = match policy {
                            FallbackPolicy::SubstituteDefault => stage.default_for(i),
                            _ => None,
                        };
                        frame.fallbacks.push(Fallback {
                            stage: stage_idx,
                            operator: stage.name().to_string(),
                            arg: i,
                            param: stage.param_name(i),
                            substituted: substitute,
                            error,
                        });
                        match (policy, substitute) {
                            (FallbackPolicy::AbortFrame, _) => {
                                frame.aborted = true;
                                frame.stages.clear();
                                return frame;
                            }
                            (_, Some(d)) => values.push(d),
                            (_, None) => {
                                skip = true;
                                break;
                            }
                        }
                    }
                }
            }

            if !skip {
                frame.stages.push(ResolvedStage {
                    operator: stage.name().to_string(),
                    values,
                });
            }
        }

        frame
    }
}

/// One argument that did not resolve this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub stage: usize,
    pub operator: String,
    pub arg: usize,
    pub param: Option<String>,
    /// Default used in its place, if any.
    pub substituted: Option<f64>,
    pub error: ParameterEvaluationError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStage {
    pub operator: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainFrame {
    pub stages: Vec<ResolvedStage>,
    pub fallbacks: Vec<Fallback>,
    pub aborted: bool,
}

/// Resolved values for every output buffer for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub shown: OutputBuffer,
    pub outputs: BTreeMap<OutputBuffer, ChainFrame>,
    /// Some chain aborted under [`FallbackPolicy::AbortFrame`]; no output has stages.
    pub aborted: bool,
}

impl FrameReport {
    pub fn fallbacks(&self) -> impl Iterator<Item = (OutputBuffer, &Fallback)> {
        self.outputs
            .iter()
            .flat_map(|(o, f)| f.fallbacks.iter().map(move |fb| (*o, fb)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    chains: BTreeMap<OutputBuffer, Chain>,
    shown: OutputBuffer,
    policy: FallbackPolicy,
}

impl Program {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// `.out(o)`: replaces whatever chain fed that buffer before.
    pub fn out(&mut self, chain: Chain, buffer: OutputBuffer) {
        self.chains.insert(buffer, chain);
    }

    /// `render(o)`: choose the buffer that reaches the display.
    pub fn render(&mut self, buffer: OutputBuffer) {
        self.shown = buffer;
    }

    pub fn shown(&self) -> OutputBuffer {
        self.shown
    }

    /// Every chain is evaluated even after one aborts, so all failures are reported.
    pub fn evaluate_frame(&self) -> FrameReport {
        let mut outputs: BTreeMap<OutputBuffer, ChainFrame> = self
            .chains
            .iter()
            .map(|(o, c)| (*o, c.evaluate(self.policy)))
            .collect();
        let aborted = outputs.values().any(|f| f.aborted);
        if aborted {
            for f in outputs.values_mut() {
                f.stages.clear();
            }
        }
        FrameReport {
            shown: self.shown,
            outputs,
            aborted,
        }
    }

    /// GLSL text of every custom operator used, once each, for the renderer to compile.
    pub fn glsl_functions(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for chain in self.chains.values() {
            for stage in &chain.stages {
                if let StageOp::Custom(def) = &stage.op {
                    if seen.insert(def.name().to_string()) {
                        out.push(def.glsl_function());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{OperatorCategory, ParameterSpec};

    fn registry() -> OperatorRegistry {
        let mut reg = OperatorRegistry::new();
        reg.register(
            OperatorDefinition::new(
                "fisheye",
                OperatorCategory::Coord,
                vec![
                    ParameterSpec::float("x", 0.0),
                    ParameterSpec::float("y", 0.0),
                    ParameterSpec::float("strength", 1.0),
                ],
                "vec2 o = _st - vec2(x, y); return vec2(x, y) + o / (1.0 + strength / dot(o, o));",
            )
            .unwrap(),
        );
        reg
    }

    #[test]
    fn omitted_trailing_arguments_take_defaults() {
        let reg = registry();
        let chain = Chain::new().call(&reg, "fisheye", vec![0.2.into()]).unwrap();
        let frame = chain.evaluate(FallbackPolicy::SubstituteDefault);
        assert_eq!(frame.stages[0].values, vec![0.2, 0.0, 1.0]);
    }

    #[test]
    fn surplus_arguments_are_an_arity_error() {
        let reg = registry();
        let err = Chain::new()
            .call(&reg, "fisheye", vec![1.0.into(), 2.0.into(), 3.0.into(), 4.0.into()])
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Arity { operator: "fisheye".into(), expected: 3, got: 4 }
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let reg = registry();
        assert!(Chain::new().call(&reg, "warp", vec![]).is_err());
        assert!(Chain::new().builtin("fisheye", vec![]).is_err());
        assert!(Chain::new().builtin("kaleid", vec![4.0.into()]).is_ok());
    }

    fn failing() -> Argument {
        Argument::try_dynamic(|| Err("no mouse".into()))
    }

    fn chain_with_failure(reg: &OperatorRegistry) -> Chain {
        Chain::new()
            .builtin("scale", vec![0.95.into()])
            .unwrap()
            .call(reg, "fisheye", vec![0.5.into(), failing(), 0.01.into()])
            .unwrap()
            .builtin("kaleid", vec![failing()])
            .unwrap()
    }

    #[test]
    fn substitute_default_keeps_custom_stage() {
        let reg = registry();
        let frame = chain_with_failure(&reg).evaluate(FallbackPolicy::SubstituteDefault);
        assert!(!frame.aborted);
        let names: Vec<&str> = frame.stages.iter().map(|s| s.operator.as_str()).collect();
        assert_eq!(names, vec!["scale", "fisheye"]);
        assert_eq!(frame.stages[1].values, vec![0.5, 0.0, 0.01]);
        assert_eq!(frame.fallbacks.len(), 2);
        assert_eq!(frame.fallbacks[0].param.as_deref(), Some("y"));
        assert_eq!(frame.fallbacks[0].substituted, Some(0.0));
        assert_eq!(frame.fallbacks[1].substituted, None);
    }

    #[test]
    fn skip_stage_drops_failing_stages() {
        let reg = registry();
        let frame = chain_with_failure(&reg).evaluate(FallbackPolicy::SkipStage);
        let names: Vec<&str> = frame.stages.iter().map(|s| s.operator.as_str()).collect();
        assert_eq!(names, vec!["scale"]);
    }

    #[test]
    fn abort_frame_clears_the_chain() {
        let reg = registry();
        let frame = chain_with_failure(&reg).evaluate(FallbackPolicy::AbortFrame);
        assert!(frame.aborted);
        assert!(frame.stages.is_empty());
        assert_eq!(frame.fallbacks.len(), 1);
    }

    #[test]
    fn abort_frame_empties_every_output() {
        let reg = registry();
        let mut prog = Program::new(FallbackPolicy::AbortFrame);
        prog.out(Chain::new().builtin("solid", vec![1.0.into()]).unwrap(), OutputBuffer::O0);
        prog.out(chain_with_failure(&reg), OutputBuffer::O1);

        let frame = prog.evaluate_frame();
        assert!(frame.aborted);
        assert!(frame.outputs.values().all(|f| f.stages.is_empty()));
        assert!(!frame.outputs[&OutputBuffer::O0].aborted);
        assert_eq!(frame.fallbacks().count(), 1);

        let mut healthy = Program::new(FallbackPolicy::AbortFrame);
        healthy.out(Chain::new().builtin("solid", vec![1.0.into()]).unwrap(), OutputBuffer::O0);
        let frame = healthy.evaluate_frame();
        assert!(!frame.aborted);
        assert_eq!(frame.outputs[&OutputBuffer::O0].stages.len(), 1);
    }

    #[test]
    fn program_routes_outputs_and_collects_glsl() {
        let reg = registry();
        let mut prog = Program::new(FallbackPolicy::default());
        prog.out(Chain::new().builtin("solid", vec![1.0.into()]).unwrap(), OutputBuffer::O0);
        prog.out(
            Chain::new()
                .builtin("src", vec![])
                .unwrap()
                .call(&reg, "fisheye", vec![0.2.into(), 0.2.into(), 0.01.into()])
                .unwrap()
                .call(&reg, "fisheye", vec![0.8.into(), 0.8.into(), 0.01.into()])
                .unwrap(),
            OutputBuffer::O1,
        );
        prog.render(OutputBuffer::O1);

        let frame = prog.evaluate_frame();
        assert_eq!(frame.shown, OutputBuffer::O1);
        assert_eq!(frame.outputs.len(), 2);
        assert_eq!(frame.outputs[&OutputBuffer::O1].stages.len(), 3);
        assert_eq!(prog.glsl_functions().len(), 1);
        assert_eq!(frame.fallbacks().count(), 0);
        assert_eq!(OutputBuffer::parse("o1"), Some(OutputBuffer::O1));
        assert_eq!(OutputBuffer::O3.to_string(), "o3");
    }
}
