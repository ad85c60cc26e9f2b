//! N-ary series combinators
//!
//! A combinator is a pure function called once per tick present in any of N
//! input series. It sees every series at that tick, positionally aligned
//! (absent samples included), and produces one output sample.
//!
//! [`combine`] drives a whole pass: union of ticks in ascending order, one
//! call per tick, and only outputs carrying a value are kept.
//!
//! # Arithmetic combinators
//!
//! | Name     | Result                                               |
//! |----------|------------------------------------------------------|
//! | `op.div` | floating-point quotient, always                      |
//! | `op.add` | sum; integer with integer stays integer (wrapping)   |
//! | `op.sub` | difference; same promotion rule                      |
//! | `op.mul` | product; same promotion rule                         |
//!
//! All four accept exactly two series; any other arity yields an absent
//! value. An absent input yields an absent output. Location and elevation of
//! the output are always cleared.

use std::collections::BTreeSet;
use std::sync::Arc;
use tessel_core::{
    Labels, NO_ELEVATION, NO_LOCATION, Sample, SampleValue, ScriptError, Series,
};

/// Everything a combinator sees for one tick
#[derive(Debug, Clone)]
pub struct NaryInput<'a> {
    /// The tick being combined
    pub tick: i64,
    pub names: Vec<&'a str>,
    pub labels: Vec<&'a Labels>,
    /// Per-series tick; the shared tick where the series has no sample
    pub ticks: Vec<i64>,
    pub locations: Vec<i64>,
    pub elevations: Vec<i64>,
    /// Per-series value, `None` when absent
    pub values: Vec<Option<&'a SampleValue>>,
}

impl<'a> NaryInput<'a> {
    /// Align `series` at `tick`
    pub fn at(tick: i64, series: &'a [Series]) -> Self {
        let n = series.len();
        let mut input = NaryInput {
            tick,
            names: Vec::with_capacity(n),
            labels: Vec::with_capacity(n),
            ticks: Vec::with_capacity(n),
            locations: Vec::with_capacity(n),
            elevations: Vec::with_capacity(n),
            values: Vec::with_capacity(n),
        };
        for s in series {
            input.names.push(&s.name);
            input.labels.push(&s.labels);
            match s.at(tick) {
                Some(sample) => {
                    input.ticks.push(sample.tick);
                    input.locations.push(sample.location);
                    input.elevations.push(sample.elevation);
                    input.values.push(sample.value.as_ref());
                }
                None => {
                    input.ticks.push(tick);
                    input.locations.push(NO_LOCATION);
                    input.elevations.push(NO_ELEVATION);
                    input.values.push(None);
                }
            }
        }
        input
    }
}

/// Function combining N aligned samples into one
pub trait NaryCombinator: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, input: &NaryInput<'_>) -> Result<Sample, ScriptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Div,
    Add,
    Sub,
    Mul,
}

/// Elementwise arithmetic over exactly two series
#[derive(Debug, Clone, Copy)]
pub struct Arithmetic {
    name: &'static str,
    op: ArithOp,
}

impl Arithmetic {
    pub const fn div() -> Self {
        Self {
            name: "op.div",
            op: ArithOp::Div,
        }
    }

    pub const fn add() -> Self {
        Self {
            name: "op.add",
            op: ArithOp::Add,
        }
    }

    pub const fn sub() -> Self {
        Self {
            name: "op.sub",
            op: ArithOp::Sub,
        }
    }

    pub const fn mul() -> Self {
        Self {
            name: "op.mul",
            op: ArithOp::Mul,
        }
    }

    fn compute(&self, a: &SampleValue, b: &SampleValue) -> Result<SampleValue, ScriptError> {
        let type_error = || {
            ScriptError::type_error(self.name, "can only be applied to LONG or DOUBLE values.")
        };
        let as_f64 = |v: &SampleValue| match v {
            SampleValue::Long(n) => Some(*n as f64),
            SampleValue::Double(f) => Some(*f),
            _ => None,
        };
        let (x, y) = match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(type_error()),
        };

        if let (SampleValue::Long(a), SampleValue::Long(b)) = (a, b) {
            match self.op {
                ArithOp::Add => return Ok(SampleValue::Long(a.wrapping_add(*b))),
                ArithOp::Sub => return Ok(SampleValue::Long(a.wrapping_sub(*b))),
                ArithOp::Mul => return Ok(SampleValue::Long(a.wrapping_mul(*b))),
                ArithOp::Div => {}
            }
        }

        Ok(SampleValue::Double(match self.op {
            ArithOp::Div => x / y,
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
        }))
    }
}

impl NaryCombinator for Arithmetic {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, input: &NaryInput<'_>) -> Result<Sample, ScriptError> {
        let value = match input.values.as_slice() {
            [Some(a), Some(b)] => Some(self.compute(a, b)?),
            _ => None,
        };
        Ok(Sample {
            tick: input.tick,
            location: NO_LOCATION,
            elevation: NO_ELEVATION,
            value,
        })
    }
}

/// Look up a combinator by name
pub fn combinator(name: &str) -> Option<Arc<dyn NaryCombinator>> {
    let c = match name {
        "op.div" => Arithmetic::div(),
        "op.add" => Arithmetic::add(),
        "op.sub" => Arithmetic::sub(),
        "op.mul" => Arithmetic::mul(),
        _ => return None,
    };
    Some(Arc::new(c))
}

/// Labels shared, with equal values, by every series
fn common_labels(series: &[Series]) -> Labels {
    let Some((first, rest)) = series.split_first() else {
        return Labels::new();
    };
    first
        .labels
        .iter()
        .filter(|(k, v)| rest.iter().all(|s| s.labels.get(*k) == Some(*v)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Combine `series` tick by tick
///
/// The result is named after the combinator and carries the labels common
/// to all inputs. Ticks where the combinator produced no value are dropped.
pub fn combine(series: &[Series], combinator: &dyn NaryCombinator) -> Result<Series, ScriptError> {
    let ticks: BTreeSet<i64> = series
        .iter()
        .flat_map(|s| s.samples().iter().map(|sample| sample.tick))
        .collect();

    let mut out = Series::new(combinator.name(), common_labels(series));
    for tick in ticks {
        let input = NaryInput::at(tick, series);
        let sample = combinator.apply(&input)?;
        if sample.value.is_some() {
            out.add(sample);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::ErrorKind;

    fn input(values: Vec<Option<&SampleValue>>) -> NaryInput<'_> {
        let n = values.len();
        NaryInput {
            tick: 100,
            names: vec!["s"; n],
            labels: Vec::new(),
            ticks: vec![100; n],
            locations: vec![42; n],
            elevations: vec![7; n],
            values,
        }
    }

    fn div(values: Vec<Option<&SampleValue>>) -> Result<Sample, ScriptError> {
        Arithmetic::div().apply(&input(values))
    }

    #[test]
    fn test_div_two_numbers() {
        let (a, b) = (SampleValue::Long(10), SampleValue::Long(4));
        let out = div(vec![Some(&a), Some(&b)]).unwrap();
        assert_eq!(out.value, Some(SampleValue::Double(2.5)));
        assert_eq!(out.tick, 100);
        assert_eq!(out.location, NO_LOCATION);
        assert_eq!(out.elevation, NO_ELEVATION);

        let c = SampleValue::Double(1.0);
        let out = div(vec![Some(&c), Some(&b)]).unwrap();
        assert_eq!(out.value, Some(SampleValue::Double(0.25)));
    }

    #[test]
    fn test_div_by_zero_follows_ieee() {
        let (a, zero) = (SampleValue::Long(10), SampleValue::Long(0));
        let out = div(vec![Some(&a), Some(&zero)]).unwrap();
        assert_eq!(out.value, Some(SampleValue::Double(f64::INFINITY)));

        let z = SampleValue::Double(0.0);
        let out = div(vec![Some(&z), Some(&zero)]).unwrap();
        assert!(matches!(out.value, Some(SampleValue::Double(f)) if f.is_nan()));
    }

    #[test]
    fn test_div_absent_and_arity() {
        let b = SampleValue::Long(4);
        assert_eq!(div(vec![None, Some(&b)]).unwrap().value, None);
        assert_eq!(div(vec![Some(&b), None]).unwrap().value, None);

        let out = div(vec![Some(&b), Some(&b), Some(&b)]).unwrap();
        assert_eq!(out.value, None);
        assert_eq!(out.location, NO_LOCATION);
        assert_eq!(div(vec![Some(&b)]).unwrap().value, None);
        assert_eq!(div(vec![]).unwrap().value, None);
    }

    #[test]
    fn test_div_rejects_non_numbers() {
        let (a, t) = (SampleValue::Long(1), SampleValue::Text("x".to_string()));
        let err = div(vec![Some(&a), Some(&t)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(
            err.to_string(),
            "op.div can only be applied to LONG or DOUBLE values."
        );
        let b = SampleValue::Boolean(true);
        assert!(div(vec![Some(&b), Some(&a)]).is_err());
    }

    #[test]
    fn test_siblings_keep_integers() {
        let (a, b, f) = (
            SampleValue::Long(6),
            SampleValue::Long(4),
            SampleValue::Double(0.5),
        );
        let apply = |c: Arithmetic, x: &SampleValue, y: &SampleValue| {
            c.apply(&input(vec![Some(x), Some(y)])).unwrap().value
        };
        assert_eq!(apply(Arithmetic::add(), &a, &b), Some(SampleValue::Long(10)));
        assert_eq!(apply(Arithmetic::sub(), &a, &b), Some(SampleValue::Long(2)));
        assert_eq!(apply(Arithmetic::mul(), &a, &b), Some(SampleValue::Long(24)));
        assert_eq!(apply(Arithmetic::add(), &a, &f), Some(SampleValue::Double(6.5)));
        let max = SampleValue::Long(i64::MAX);
        assert_eq!(
            apply(Arithmetic::add(), &max, &SampleValue::Long(1)),
            Some(SampleValue::Long(i64::MIN))
        );
    }

    #[test]
    fn test_lookup() {
        for name in ["op.div", "op.add", "op.sub", "op.mul"] {
            assert_eq!(combinator(name).map(|c| c.name().to_string()), Some(name.to_string()));
        }
        assert!(combinator("op.pow").is_none());
    }

    #[test]
    fn test_combine_aligns_on_tick_union() {
        let mut la = Labels::new();
        la.insert("site".to_string(), "x".to_string());
        la.insert("unit".to_string(), "km".to_string());
        let mut lb = la.clone();
        lb.insert("unit".to_string(), "h".to_string());

        let distance = Series::new("distance", la)
            .with(Sample::at(1, SampleValue::Long(10)))
            .with(Sample::at(2, SampleValue::Long(30)))
            .with(Sample::at(4, SampleValue::Long(8)));
        let hours = Series::new("hours", lb)
            .with(Sample::at(1, SampleValue::Long(4)))
            .with(Sample::at(3, SampleValue::Long(2)))
            .with(Sample::at(4, SampleValue::Long(0)));

        let speed = combine(&[distance, hours], &Arithmetic::div()).unwrap();
        assert_eq!(speed.name, "op.div");
        assert_eq!(speed.labels.len(), 1);
        assert_eq!(speed.labels.get("site").map(String::as_str), Some("x"));

        let ticks: Vec<i64> = speed.samples().iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![1, 4]);
        assert_eq!(speed.at(1).unwrap().value, Some(SampleValue::Double(2.5)));
        assert_eq!(
            speed.at(4).unwrap().value,
            Some(SampleValue::Double(f64::INFINITY))
        );
    }

    #[test]
    fn test_combine_nothing() {
        let out = combine(&[], &Arithmetic::add()).unwrap();
        assert!(out.is_empty());
        assert!(out.labels.is_empty());
    }
}
