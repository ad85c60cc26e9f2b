//! Macros: first-class program fragments
//!
//! A macro is data, not a closure. It captures no environment; everything it
//! needs flows through the stack and the stack's bindings. Operator steps
//! hold a name, resolved against the stack's registry each time the step
//! runs, so operators stay swappable.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One instruction of a macro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Push this value
    Literal(Value),
    /// Push this macro as a value (never auto-run)
    Macro(Arc<Macro>),
    /// Apply the operator registered under this name
    Call(String),
    /// Push the value bound to this name (`$name`)
    Load(String),
    /// Execute the macro bound to this name (`@name`)
    Run(String),
}

impl Step {
    pub fn literal(value: impl Into<Value>) -> Self {
        Step::Literal(value.into())
    }

    pub fn call(name: impl Into<String>) -> Self {
        Step::Call(name.into())
    }

    pub fn nested(m: Macro) -> Self {
        Step::Macro(Arc::new(m))
    }
}

/// Immutable ordered sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    steps: Vec<Step>,
}

impl Macro {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<Step> for Macro {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Literal(v) => write!(f, "{}", v),
            Step::Macro(m) => write!(f, "{}", m),
            Step::Call(name) => f.write_str(name),
            Step::Load(name) => write!(f, "${}", name),
            Step::Run(name) => write!(f, "@{}", name),
        }
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<%")?;
        for step in &self.steps {
            write!(f, " {}", step)?;
        }
        f.write_str(" %>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_reader() {
        let inner = Macro::new(vec![Step::literal(1i64), Step::call("+")]);
        let m = Macro::new(vec![
            Step::literal("x"),
            Step::nested(inner),
            Step::Load("v".to_string()),
            Step::Run("f".to_string()),
        ]);
        let text = m.to_string();
        assert_eq!(text, "<% 'x' <% 1 + %> $v @f %>");

        let read = crate::reader::read(&text).unwrap();
        assert_eq!(read.steps(), &[Step::nested(m)]);
    }

    #[test]
    fn test_collect_steps() {
        let m: Macro = ["DUP", "DROP"].into_iter().map(Step::call).collect();
        assert_eq!(m.len(), 2);
        assert!(!m.is_empty());
        assert!(Macro::default().is_empty());
    }
}
