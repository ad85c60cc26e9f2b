//! Geo time series data model
//!
//! A [`Series`] is a named, labeled, tick-ordered sequence of [`Sample`]s.
//! Ticks are unique within a series; adding a sample at an existing tick
//! replaces the old one.

use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// Location of a sample that has none
pub const NO_LOCATION: i64 = i64::MIN;

/// Elevation of a sample that has none
pub const NO_ELEVATION: i64 = i64::MIN;

/// Series labels (text -> text, unique keys)
pub type Labels = BTreeMap<String, String>;

/// Value carried by a sample
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Long(i64),
    Double(f64),
    Boolean(bool),
    Text(String),
}

impl From<&SampleValue> for Value {
    fn from(v: &SampleValue) -> Self {
        match v {
            SampleValue::Long(n) => Value::Int(*n),
            SampleValue::Double(f) => Value::Float(*f),
            SampleValue::Boolean(b) => Value::Bool(*b),
            SampleValue::Text(s) => Value::text(s.as_str()),
        }
    }
}

/// A single point of a series
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub tick: i64,
    pub location: i64,
    pub elevation: i64,
    pub value: Option<SampleValue>,
}

impl Sample {
    /// A sample with no location and no elevation
    pub fn at(tick: i64, value: SampleValue) -> Self {
        Self {
            tick,
            location: NO_LOCATION,
            elevation: NO_ELEVATION,
            value: Some(value),
        }
    }

    /// A sample with no value and no position
    pub fn empty(tick: i64) -> Self {
        Self {
            tick,
            location: NO_LOCATION,
            elevation: NO_ELEVATION,
            value: None,
        }
    }
}

/// Named, labeled, tick-ordered samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub name: String,
    pub labels: Labels,
    samples: Vec<Sample>,
}

impl Series {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
            samples: Vec::new(),
        }
    }

    /// Insert a sample, keeping ticks ordered and unique
    pub fn add(&mut self, sample: Sample) {
        match self.samples.binary_search_by_key(&sample.tick, |s| s.tick) {
            Ok(idx) => self.samples[idx] = sample,
            Err(idx) => self.samples.insert(idx, sample),
        }
    }

    /// Builder-style [`Series::add`]
    pub fn with(mut self, sample: Sample) -> Self {
        self.add(sample);
        self
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Sample at exactly `tick`
    pub fn at(&self, tick: i64) -> Option<&Sample> {
        self.samples
            .binary_search_by_key(&tick, |s| s.tick)
            .ok()
            .map(|idx| &self.samples[idx])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Script-side view: `{ name labels ticks values }`
    pub fn to_value(&self) -> Value {
        let labels: HashMap<String, Value> = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::text(v.as_str())))
            .collect();
        let ticks = self.samples.iter().map(|s| Value::Int(s.tick)).collect();
        let values = self
            .samples
            .iter()
            .map(|s| s.value.as_ref().map(Value::from).unwrap_or(Value::Null))
            .collect();

        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::text(self.name.as_str()));
        map.insert("labels".to_string(), Value::map(labels));
        map.insert("ticks".to_string(), Value::list(ticks));
        map.insert("values".to_string(), Value::list(values));
        Value::map(map)
    }
}

/// Series selector: `name{label=value,...}`
///
/// `*` as the name matches every series. Label constraints are equality
/// matches and all must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub name: String,
    pub labels: Labels,
}

impl Selector {
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let (name, rest) = match text.find('{') {
            Some(idx) => (&text[..idx], Some(&text[idx..])),
            None => (text, None),
        };
        if name.is_empty() {
            return Err(format!("selector '{}' has no class name", text));
        }

        let mut labels = Labels::new();
        if let Some(rest) = rest {
            let inner = rest
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .ok_or_else(|| format!("selector '{}' has unbalanced braces", text))?;
            for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("label constraint '{}' is missing '='", pair))?;
                labels.insert(k.trim().to_string(), v.trim().to_string());
            }
        }

        Ok(Self {
            name: name.to_string(),
            labels,
        })
    }

    pub fn matches(&self, name: &str, labels: &Labels) -> bool {
        (self.name == "*" || self.name == name)
            && self
                .labels
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}
