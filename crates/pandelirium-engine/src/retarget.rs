//! Retarget actions fired by triggers: pick new targets for one or more animated parameters.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::InvalidOptionSet;

/// Convert HSL (h in degrees, s and l in [0, 1]) to RGB in [0, 1].
pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> [f32; 3] {
    let a = s * l.min(1.0 - l);
    let f = |n: f32| {
        let k = (n + h / 30.0) % 12.0;
        let v = l - a * (k - 3.0).min(9.0 - k).clamp(-1.0, 1.0);
        v.clamp(0.0, 1.0)
    };
    [f(0.0), f(8.0), f(4.0)]
}

/// A random whole-degree hue at the given saturation and lightness.
pub fn vibrant_color<R: Rng>(rng: &mut R, saturation: f32, lightness: f32) -> [f32; 3] {
    let h = rng.gen_range(0..360) as f32;
    hsl_to_rgb(h, saturation, lightness)
}

/// Uniform draw from a fixed option list that never repeats the previous pick.
#[derive(Debug, Clone, PartialEq)]
pub struct NonRepeatingChoice {
    options: Vec<f32>,
}

impl NonRepeatingChoice {
    /// Fails unless at least two distinct finite options are given; with fewer the
    /// rejection loop in [`next`](Self::next) could never terminate.
    pub fn new(options: Vec<f32>) -> Result<Self, InvalidOptionSet> {
        let first = options.iter().copied().find(|v| v.is_finite());
        let distinct = options.iter().all(|v| v.is_finite())
            && first.map_or(false, |f| options.iter().any(|v| *v != f));
        if !distinct {
            return Err(InvalidOptionSet { options });
        }
        Ok(Self { options })
    }

    /// Draw until the pick differs from `previous`.
    pub fn next<R: Rng>(&self, previous: f32, rng: &mut R) -> f32 {
        loop {
            // options is non-empty by construction
            let pick = self.options.choose(rng).copied().unwrap_or(previous);
            if pick != previous {
                return pick;
            }
        }
    }
}

/// What a trigger does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum RetargetAction {
    /// New random hue; the three RGB channels retarget together.
    VibrantColor {
        targets: [String; 3],
        saturation: f32,
        lightness: f32,
    },
    /// Uniform integer in `min..=max`; repeats allowed.
    IntRange { target: String, min: i32, max: i32 },
    /// Non-repeating pick from a fixed list.
    Choice {
        target: String,
        choice: NonRepeatingChoice,
    },
}

impl RetargetAction {
    /// Parameter names this action writes.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            RetargetAction::VibrantColor { targets, .. } => {
                targets.iter().map(String::as_str).collect()
            }
            RetargetAction::IntRange { target, .. } => vec![target.as_str()],
            RetargetAction::Choice { target, .. } => vec![target.as_str()],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RetargetAction::VibrantColor { .. } => "vibrant_color",
            RetargetAction::IntRange { .. } => "int_range",
            RetargetAction::Choice { .. } => "choice",
        }
    }

    /// Draw new targets. `previous` returns the current target of a parameter.
    pub fn draw<R, F>(&self, previous: F, rng: &mut R) -> Vec<(String, f32)>
    where
        R: Rng,
        F: Fn(&str) -> f32,
    {
        match self {
            RetargetAction::VibrantColor {
                targets,
                saturation,
                lightness,
            } => {
                let rgb = vibrant_color(rng, *saturation, *lightness);
                targets.iter().cloned().zip(rgb).collect()
            }
            RetargetAction::IntRange { target, min, max } => {
                let v = rng.gen_range(*min..=*max) as f32;
                vec![(target.clone(), v)]
            }
            RetargetAction::Choice { target, choice } => {
                let v = choice.next(previous(target), rng);
                vec![(target.clone(), v)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn primary_hues_convert_exactly() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), [1.0, 0.0, 0.0]);
        assert_eq!(hsl_to_rgb(120.0, 1.0, 0.5), [0.0, 1.0, 0.0]);
        assert_eq!(hsl_to_rgb(240.0, 1.0, 0.5), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn vibrant_colors_stay_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let rgb = vibrant_color(&mut rng, 1.0, 0.5);
            assert!(rgb.iter().all(|c| (0.0..=1.0).contains(c)), "{rgb:?}");
        }
    }

    #[test]
    fn choice_never_repeats() {
        let mut rng = StdRng::seed_from_u64(1);
        let choice = NonRepeatingChoice::new(vec![0.05, 0.2, 1.0, 5.0]).unwrap();
        let mut prev = 1.0;
        for _ in 0..10_000 {
            let next = choice.next(prev, &mut rng);
            assert_ne!(next, prev);
            prev = next;
        }
    }

    #[test]
    fn two_option_choice_alternates() {
        let mut rng = StdRng::seed_from_u64(3);
        let choice = NonRepeatingChoice::new(vec![0.0, 1.0]).unwrap();
        assert_eq!(choice.next(0.0, &mut rng), 1.0);
        assert_eq!(choice.next(1.0, &mut rng), 0.0);
    }

    #[test]
    fn degenerate_option_sets_are_rejected() {
        assert!(NonRepeatingChoice::new(vec![]).is_err());
        assert!(NonRepeatingChoice::new(vec![1.0]).is_err());
        assert!(NonRepeatingChoice::new(vec![2.0, 2.0, 2.0]).is_err());
        assert!(NonRepeatingChoice::new(vec![1.0, f32::NAN]).is_err());
    }

    #[test]
    fn int_range_is_inclusive() {
        let mut rng = StdRng::seed_from_u64(11);
        let action = RetargetAction::IntRange {
            target: "kaleid".into(),
            min: 3,
            max: 11,
        };
        let mut seen = [false; 9];
        for _ in 0..2_000 {
            let out = action.draw(|_| 0.0, &mut rng);
            let v = out[0].1 as i32;
            assert!((3..=11).contains(&v));
            seen[(v - 3) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
