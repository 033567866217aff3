//! Search space definition and validation.
//!
//! A [`SearchSpace`] is an ordered list of named [`ParameterSpec`]s plus
//! optional [`ParameterConstraint`]s. Declaration order matters: quasi-random
//! and model-based generation methods assign one dimension per parameter in
//! that order.
//!
//! # Example
//!
//! ```
//! use stagewise::parameter::{ParameterConstraint, ParameterSpec, SearchSpace};
//! use stagewise::params;
//!
//! let space = SearchSpace::builder()
//!     .parameter("lr", ParameterSpec::float(1e-5, 1e-1).log_scale())
//!     .parameter("layers", ParameterSpec::int(1, 8))
//!     .parameter("optimizer", ParameterSpec::choice(["adam", "sgd"]))
//!     .parameter("x", ParameterSpec::float(0.0, 1.0))
//!     .parameter("y", ParameterSpec::float(0.0, 1.0))
//!     .constraint(ParameterConstraint::sum(["x", "y"], 1.0))
//!     .build()
//!     .unwrap();
//!
//! let ok = params([
//!     ("lr", 0.01.into()),
//!     ("layers", 3_i64.into()),
//!     ("optimizer", "adam".into()),
//!     ("x", 0.2.into()),
//!     ("y", 0.3.into()),
//! ]);
//! assert!(space.check(&ok).is_ok());
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::param::{ParamValue, Parameters};

/// Slack allowed when checking bounds and linear constraints.
const TOLERANCE: f64 = 1e-9;

/// The domain of a single parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterSpec {
    /// A continuous range `[low, high]`, optionally log-scaled or stepped.
    Float {
        /// Lower bound (inclusive).
        low: f64,
        /// Upper bound (inclusive).
        high: f64,
        /// Whether generation methods work in log space.
        log_scale: bool,
        /// Optional grid step starting at `low`.
        step: Option<f64>,
    },
    /// An integer range `[low, high]`, optionally log-scaled.
    Int {
        /// Lower bound (inclusive).
        low: i64,
        /// Upper bound (inclusive).
        high: i64,
        /// Whether generation methods work in log space.
        log_scale: bool,
    },
    /// One of a fixed set of labels.
    Choice {
        /// The allowed labels.
        values: Vec<String>,
    },
    /// `true` or `false`.
    Bool,
    /// A constant that every trial carries.
    Fixed(ParamValue),
}

impl ParameterSpec {
    /// A continuous range `[low, high]`.
    #[must_use]
    pub fn float(low: f64, high: f64) -> Self {
        ParameterSpec::Float {
            low,
            high,
            log_scale: false,
            step: None,
        }
    }

    /// An integer range `[low, high]`.
    #[must_use]
    pub fn int(low: i64, high: i64) -> Self {
        ParameterSpec::Int {
            low,
            high,
            log_scale: false,
        }
    }

    /// A choice among the given labels.
    #[must_use]
    pub fn choice<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        ParameterSpec::Choice {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// A boolean parameter.
    #[must_use]
    pub fn boolean() -> Self {
        ParameterSpec::Bool
    }

    /// A fixed parameter.
    #[must_use]
    pub fn fixed(value: impl Into<ParamValue>) -> Self {
        ParameterSpec::Fixed(value.into())
    }

    /// Switch a range parameter to log scale. No effect on other kinds.
    #[must_use]
    pub fn log_scale(mut self) -> Self {
        match &mut self {
            ParameterSpec::Float { log_scale, .. } | ParameterSpec::Int { log_scale, .. } => {
                *log_scale = true;
            }
            _ => {}
        }
        self
    }

    /// Discretize a float range to `low + k * step`. No effect on other kinds.
    #[must_use]
    pub fn step(mut self, value: f64) -> Self {
        if let ParameterSpec::Float { step, .. } = &mut self {
            *step = Some(value);
        }
        self
    }

    /// Return `true` for float and integer ranges.
    #[must_use]
    pub fn is_range(&self) -> bool {
        matches!(self, ParameterSpec::Float { .. } | ParameterSpec::Int { .. })
    }

    fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidSearchSpace(format!("{name}: {reason}")));
        match self {
            ParameterSpec::Float {
                low,
                high,
                log_scale,
                step,
            } => {
                if !low.is_finite() || !high.is_finite() || low > high {
                    return invalid(format!("invalid bounds [{low}, {high}]"));
                }
                if *log_scale && *low <= 0.0 {
                    return invalid("log scale requires a positive lower bound".into());
                }
                if let Some(step) = step
                    && (!step.is_finite() || *step <= 0.0)
                {
                    return invalid(format!("step {step} must be positive"));
                }
                if *log_scale && step.is_some() {
                    return invalid("log scale and step cannot be combined".into());
                }
            }
            ParameterSpec::Int {
                low,
                high,
                log_scale,
            } => {
                if low > high {
                    return invalid(format!("invalid bounds [{low}, {high}]"));
                }
                if *log_scale && *low < 1 {
                    return invalid("log scale requires a positive lower bound".into());
                }
            }
            ParameterSpec::Choice { values } => {
                if values.is_empty() {
                    return invalid("choice values cannot be empty".into());
                }
                let unique: HashSet<&String> = values.iter().collect();
                if unique.len() != values.len() {
                    return invalid("choice values must be distinct".into());
                }
            }
            ParameterSpec::Bool => {}
            ParameterSpec::Fixed(value) => {
                if let ParamValue::Float(v) = value
                    && !v.is_finite()
                {
                    return invalid("fixed value must be finite".into());
                }
            }
        }
        Ok(())
    }

    /// Coerce `value` into this domain's variant and check it.
    #[allow(clippy::cast_precision_loss)]
    fn coerce(&self, name: &str, value: &ParamValue) -> core::result::Result<ParamValue, String> {
        match (self, value) {
            (
                ParameterSpec::Float {
                    low, high, step, ..
                },
                ParamValue::Float(_) | ParamValue::Int(_),
            ) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                if !v.is_finite() {
                    return Err(format!("{name}: value must be finite"));
                }
                if v < low - TOLERANCE || v > high + TOLERANCE {
                    return Err(format!("{name}: {v} is outside [{low}, {high}]"));
                }
                if let Some(step) = step {
                    let k = ((v - low) / step).round();
                    if (low + k * step - v).abs() > TOLERANCE.max(step * 1e-6) {
                        return Err(format!("{name}: {v} is not on the step grid of {step}"));
                    }
                }
                Ok(ParamValue::Float(v))
            }
            (ParameterSpec::Int { low, high, .. }, ParamValue::Int(v)) => {
                if v < low || v > high {
                    return Err(format!("{name}: {v} is outside [{low}, {high}]"));
                }
                Ok(ParamValue::Int(*v))
            }
            (ParameterSpec::Int { low, high, .. }, ParamValue::Float(v)) => {
                if v.fract() != 0.0 || *v < *low as f64 || *v > *high as f64 {
                    return Err(format!("{name}: {v} is not an integer in [{low}, {high}]"));
                }
                #[allow(clippy::cast_possible_truncation)]
                Ok(ParamValue::Int(*v as i64))
            }
            (ParameterSpec::Choice { values }, ParamValue::Choice(v)) => {
                if values.iter().any(|c| c == v) {
                    Ok(value.clone())
                } else {
                    Err(format!("{name}: '{v}' is not one of {values:?}"))
                }
            }
            (ParameterSpec::Bool, ParamValue::Bool(_)) => Ok(value.clone()),
            (ParameterSpec::Fixed(expected), _) => {
                if expected == value {
                    Ok(value.clone())
                } else {
                    Err(format!("{name}: expected fixed value {expected:?}, got {value:?}"))
                }
            }
            (spec, value) => Err(format!("{name}: {value:?} does not match {spec:?}")),
        }
    }
}

/// A linear restriction between range parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterConstraint {
    /// `sum(coefficient * value) <= bound`.
    Linear {
        /// `(parameter name, coefficient)` terms.
        terms: Vec<(String, f64)>,
        /// Upper bound on the weighted sum.
        bound: f64,
    },
    /// `value(lower) <= value(upper)`.
    Order {
        /// The parameter that must not exceed the other.
        lower: String,
        /// The parameter that must not fall below the other.
        upper: String,
    },
}

impl ParameterConstraint {
    /// `sum(names) <= bound` with unit coefficients.
    #[must_use]
    pub fn sum<S: Into<String>>(names: impl IntoIterator<Item = S>, bound: f64) -> Self {
        ParameterConstraint::Linear {
            terms: names.into_iter().map(|n| (n.into(), 1.0)).collect(),
            bound,
        }
    }

    /// `lower <= upper`.
    #[must_use]
    pub fn order(lower: impl Into<String>, upper: impl Into<String>) -> Self {
        ParameterConstraint::Order {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    fn names(&self) -> Vec<&str> {
        match self {
            ParameterConstraint::Linear { terms, .. } => {
                terms.iter().map(|(n, _)| n.as_str()).collect()
            }
            ParameterConstraint::Order { lower, upper } => vec![lower.as_str(), upper.as_str()],
        }
    }

    /// Return `true` if `parameters` satisfy this constraint.
    ///
    /// Missing or non-numeric values count as a violation.
    #[must_use]
    pub fn is_satisfied(&self, parameters: &Parameters) -> bool {
        let value = |name: &str| parameters.get(name).and_then(ParamValue::as_f64);
        match self {
            ParameterConstraint::Linear { terms, bound } => {
                let mut total = 0.0;
                for (name, coefficient) in terms {
                    let Some(v) = value(name) else {
                        return false;
                    };
                    total += coefficient * v;
                }
                total <= bound + TOLERANCE
            }
            ParameterConstraint::Order { lower, upper } => match (value(lower), value(upper)) {
                (Some(l), Some(u)) => l <= u + TOLERANCE,
                _ => false,
            },
        }
    }
}

/// A named parameter in declaration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter domain.
    pub spec: ParameterSpec,
}

/// The set of parameterizations an experiment may evaluate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<NamedParameter>,
    constraints: Vec<ParameterConstraint>,
}

impl SearchSpace {
    /// Return a [`SearchSpaceBuilder`].
    #[must_use]
    pub fn builder() -> SearchSpaceBuilder {
        SearchSpaceBuilder::default()
    }

    /// Build a search space, checking names, domains, and constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSearchSpace`] if the space is empty, a name
    /// repeats, a domain is malformed, or a constraint references an unknown
    /// or non-range parameter.
    pub fn new(
        parameters: Vec<NamedParameter>,
        constraints: Vec<ParameterConstraint>,
    ) -> Result<Self> {
        if parameters.is_empty() {
            return Err(Error::InvalidSearchSpace(
                "at least one parameter is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for p in &parameters {
            if !seen.insert(p.name.as_str()) {
                return Err(Error::InvalidSearchSpace(format!(
                    "duplicate parameter name '{}'",
                    p.name
                )));
            }
            p.spec.validate(&p.name)?;
        }
        let space = Self {
            parameters,
            constraints,
        };
        for constraint in &space.constraints {
            for name in constraint.names() {
                match space.get(name) {
                    Some(spec) if spec.is_range() => {}
                    Some(_) => {
                        return Err(Error::InvalidSearchSpace(format!(
                            "constraint references non-range parameter '{name}'"
                        )));
                    }
                    None => {
                        return Err(Error::InvalidSearchSpace(format!(
                            "constraint references unknown parameter '{name}'"
                        )));
                    }
                }
            }
        }
        Ok(space)
    }

    /// Parameters in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[NamedParameter] {
        &self.parameters
    }

    /// Parameter constraints.
    #[must_use]
    pub fn constraints(&self) -> &[ParameterConstraint] {
        &self.constraints
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Return `true` if the space has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Look up a parameter's domain by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.spec)
    }

    /// Coerce a parameterization into canonical variants and check it.
    ///
    /// Integer values given for float parameters become floats, and integral
    /// floats given for integer parameters become integers.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation: a missing or unknown
    /// name, a value outside its domain, or an unsatisfied constraint.
    pub fn normalize(&self, parameters: &Parameters) -> core::result::Result<Parameters, String> {
        if let Some(extra) = parameters.keys().find(|k| self.get(k).is_none()) {
            return Err(format!("unknown parameter '{extra}'"));
        }
        let mut out = Parameters::new();
        for p in &self.parameters {
            let value = parameters
                .get(&p.name)
                .ok_or_else(|| format!("missing parameter '{}'", p.name))?;
            out.insert(p.name.clone(), p.spec.coerce(&p.name, value)?);
        }
        if let Some(violated) = self.constraints.iter().find(|c| !c.is_satisfied(&out)) {
            return Err(format!("constraint {violated:?} is violated"));
        }
        Ok(out)
    }

    /// Check a parameterization without coercion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] describing the first violation.
    pub fn check(&self, parameters: &Parameters) -> Result<()> {
        let normalized = self.normalize(parameters).map_err(Error::InvalidParameters)?;
        if &normalized == parameters {
            Ok(())
        } else {
            Err(Error::InvalidParameters(
                "parameter values use the wrong variant for their domain".into(),
            ))
        }
    }
}

/// Fluent builder for [`SearchSpace`].
#[derive(Debug, Default)]
pub struct SearchSpaceBuilder {
    parameters: Vec<NamedParameter>,
    constraints: Vec<ParameterConstraint>,
}

impl SearchSpaceBuilder {
    /// Add a parameter.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.push(NamedParameter {
            name: name.into(),
            spec,
        });
        self
    }

    /// Add a parameter constraint.
    #[must_use]
    pub fn constraint(mut self, constraint: ParameterConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Build and validate the search space.
    ///
    /// # Errors
    ///
    /// See [`SearchSpace::new`].
    pub fn build(self) -> Result<SearchSpace> {
        SearchSpace::new(self.parameters, self.constraints)
    }
}
