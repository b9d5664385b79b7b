//! The default performance patch.
//!
//! o0: voronoi cells, repeated and folded by an animated kaleidoscope, tinted by the animated
//!     RGB triple and zoomed by the animated scale.
//! o1: o0 bent through three fisheye lenses, the last one steered by CC1/CC2. Shown.
//!
//! Texture-valued arguments (`src(o0)`, the oscillator feeding `modulateScale`) are the
//! renderer's business; only their numeric arguments appear here.

use pandelirium_engine::animation::{AnimatedHandle, SharedSession};
use pandelirium_engine::control::ControlTable;
use pandelirium_engine::error::RegistryError;
use pandelirium_engine::operator::OperatorRegistry;
use pandelirium_engine::pipeline::{Chain, FallbackPolicy, OutputBuffer, Program};

pub struct Scene {
    pub program: Program,
    /// Outputs left unpatched because an operator they need is not registered.
    pub skipped: Vec<(OutputBuffer, RegistryError)>,
}

pub fn build(
    registry: &OperatorRegistry,
    session: &SharedSession,
    controls: &ControlTable,
    policy: FallbackPolicy,
) -> Scene {
    let mut program = Program::new(policy);
    let mut skipped = Vec::new();

    match kaleidoscope(session, controls) {
        Ok(chain) => program.out(chain, OutputBuffer::O0),
        Err(e) => skipped.push((OutputBuffer::O0, e)),
    }

    match lenses(registry, controls) {
        Ok(chain) => {
            program.out(chain, OutputBuffer::O1);
            program.render(OutputBuffer::O1);
        }
        Err(e) => {
            skipped.push((OutputBuffer::O1, e));
            program.render(OutputBuffer::O0);
        }
    }

    Scene { program, skipped }
}

fn kaleidoscope(session: &SharedSession, controls: &ControlTable) -> Result<Chain, RegistryError> {
    let anim = |name: &str| AnimatedHandle::new(session, name);

    Chain::new()
        .builtin("voronoi", vec![5.0.into(), 0.3.into(), controls.cc(1).range(0.0, 2.0).into()])?
        .builtin("repeat", vec![2.0.into(), 5.0.into(), 0.0.into(), 0.0.into()])?
        .builtin("kaleid", vec![anim("kaleid").into()])?
        .builtin(
            "color",
            vec![
                anim("color_r").into(),
                anim("color_g").into(),
                anim("color_b").map(|b| 0.5 + 0.5 * b),
            ],
        )?
        .builtin("modulateScale", vec![0.2.into()])?
        .builtin("kaleid", vec![anim("kaleid").into()])?
        .builtin("scale", vec![anim("scale").into()])
}

fn lenses(registry: &OperatorRegistry, controls: &ControlTable) -> Result<Chain, RegistryError> {
    Chain::new()
        .builtin("src", vec![])?
        .call(registry, "fisheye", vec![0.2.into(), 0.2.into(), 0.01.into()])?
        .call(registry, "fisheye", vec![0.8.into(), 0.8.into(), 0.01.into()])?
        .call(
            registry,
            "fisheye",
            vec![controls.cc(1).into(), controls.cc(2).into(), 0.01.into()],
        )
}
