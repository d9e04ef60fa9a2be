//! Bijective mapping between bounded "external" parameter space and
//! unbounded "internal" space, plus the machine-precision constants the
//! rest of the crate is built on.

/// `eps = machine_epsilon`, `eps2 = sqrt(eps)`.
///
/// Computed once; every component that needs a noise floor goes through
/// this struct rather than recomputing `f64::EPSILON.sqrt()` ad hoc.
#[derive(Clone, Copy, Debug)]
pub struct Precision {
    pub eps: f64,
    pub eps2: f64,
}

impl Default for Precision {
    fn default() -> Self {
        let eps = f64::EPSILON;
        Precision {
            eps,
            eps2: eps.sqrt(),
        }
    }
}

/// The bijective internal/external transform for a single parameter,
/// selected from its limit configuration.
///
/// The minimizer works in internal (unbounded) space; the user supplies
/// and reads back values in external (possibly bounded) space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamTransform {
    /// No limits: `int2ext = ext2int = identity`.
    Unbounded,
    /// Both a lower bound `a` and an upper bound `b`.
    BothLimits { lower: f64, upper: f64 },
    /// Only an upper bound `b`.
    UpperOnly { upper: f64 },
    /// Only a lower bound `a`.
    LowerOnly { lower: f64 },
}

impl ParamTransform {
    pub fn from_limits(
        has_lower_limit: bool,
        has_upper_limit: bool,
        lower: f64,
        upper: f64,
    ) -> Self {
        match (has_lower_limit, has_upper_limit) {
            (true, true) => ParamTransform::BothLimits { lower, upper },
            (false, true) => ParamTransform::UpperOnly { upper },
            (true, false) => ParamTransform::LowerOnly { lower },
            (false, false) => ParamTransform::Unbounded,
        }
    }

    pub fn has_limits(&self) -> bool {
        !matches!(self, ParamTransform::Unbounded)
    }

    /// Maps an internal-space value to external space.
    pub fn int2ext(&self, int: f64) -> f64 {
        match *self {
            ParamTransform::Unbounded => int,
            ParamTransform::BothLimits { lower: a, upper: b } => {
                a + (b - a) / 2.0 * (int.sin() + 1.0)
            }
            ParamTransform::UpperOnly { upper: b } => b + 1.0 - (int * int + 1.0).sqrt(),
            ParamTransform::LowerOnly { lower: a } => a - 1.0 + (int * int + 1.0).sqrt(),
        }
    }

    /// Maps an external-space value to internal space.
    pub fn ext2int(&self, ext: f64) -> f64 {
        match *self {
            ParamTransform::Unbounded => ext,
            ParamTransform::BothLimits { lower: a, upper: b } => {
                (2.0 * (ext - a) / (b - a) - 1.0).asin()
            }
            ParamTransform::UpperOnly { upper: b } => {
                // ext = b + 1 - sqrt(int^2 + 1)  =>  int^2 = (b + 1 - ext)^2 - 1
                let t = b + 1.0 - ext;
                (t * t - 1.0).sqrt()
            }
            ParamTransform::LowerOnly { lower: a } => {
                // ext = a - 1 + sqrt(int^2 + 1)  =>  int^2 = (ext - a + 1)^2 - 1
                let t = ext - a + 1.0;
                (t * t - 1.0).sqrt()
            }
        }
    }

    /// `d int2ext / d int` at a given internal-space point.
    pub fn d_int2ext(&self, int: f64) -> f64 {
        match *self {
            ParamTransform::Unbounded => 1.0,
            ParamTransform::BothLimits { lower: a, upper: b } => (b - a) / 2.0 * int.cos(),
            ParamTransform::UpperOnly { .. } => -int / (int * int + 1.0).sqrt(),
            ParamTransform::LowerOnly { .. } => int / (int * int + 1.0).sqrt(),
        }
    }

    /// Clips an external-space value to the upper limit, if one exists.
    pub fn clip_to_upper(&self, ext: f64) -> f64 {
        match *self {
            ParamTransform::BothLimits { upper, .. } | ParamTransform::UpperOnly { upper } => {
                ext.min(upper)
            }
            _ => ext,
        }
    }

    /// Clips an external-space value to the lower limit, if one exists.
    pub fn clip_to_lower(&self, ext: f64) -> f64 {
        match *self {
            ParamTransform::BothLimits { lower, .. } | ParamTransform::LowerOnly { lower } => {
                ext.max(lower)
            }
            _ => ext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn precision_constants_are_consistent() {
        let p = Precision::default();
        assert_eq!(p.eps, f64::EPSILON);
        assert!((p.eps2 - p.eps.sqrt()).abs() < 1e-300);
    }

    #[test_case(ParamTransform::Unbounded, 1.234 ; "unbounded")]
    #[test_case(ParamTransform::BothLimits { lower: -2.0, upper: 5.0 }, 0.3 ; "both limits")]
    #[test_case(ParamTransform::UpperOnly { upper: 10.0 }, -1.5 ; "upper only")]
    #[test_case(ParamTransform::LowerOnly { lower: -10.0 }, 1.5 ; "lower only")]
    fn round_trip_int_ext_int(transform: ParamTransform, int: f64) {
        let ext = transform.int2ext(int);
        let int_back = transform.ext2int(ext);
        assert!(
            (int - int_back).abs() < 10.0 * f64::EPSILON.sqrt(),
            "int={int} ext={ext} int_back={int_back}"
        );
    }

    proptest! {
        #[test]
        fn round_trip_unbounded(v in -1.0e6f64..1.0e6) {
            let t = ParamTransform::Unbounded;
            prop_assert!((t.ext2int(t.int2ext(v)) - v).abs() < 10.0 * f64::EPSILON);
        }

        #[test]
        fn round_trip_both_limits(int in -1.4f64..1.4) {
            let t = ParamTransform::BothLimits { lower: -3.0, upper: 7.0 };
            let ext = t.int2ext(int);
            let back = t.ext2int(ext);
            prop_assert!((int - back).abs() < 1e-8);
        }
    }
}
