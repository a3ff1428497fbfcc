//! Named control laws ("profiles") and their registry
//!
//! A profile is configured once but instantiated per use: every expression
//! node that applies a profile gets a fresh [`Controller`] from the
//! registered [`ProfileFactory`], so two zones using `linear_cpu` never share
//! hysteresis or integral state.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use super::linear::LinearProfile;
use super::pid::PidProfile;

/// Stateful control law mapping an input and elapsed time to an output
pub trait Controller: fmt::Debug + Send {
    fn run(&mut self, value: f64, dt: f64) -> Option<f64>;
}

/// Zero-argument constructor of a fresh controller instance
pub type ProfileFactory = Box<dyn Fn() -> Box<dyn Controller> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearSpec {
    pub data: Vec<(f64, f64)>,
    #[serde(default)]
    pub positive_hysteresis: f64,
    #[serde(default)]
    pub negative_hysteresis: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PidSpec {
    pub setpoint: f64,
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
    #[serde(default)]
    pub positive_hysteresis: f64,
    #[serde(default)]
    pub negative_hysteresis: f64,
}

/// Profile definition as it appears in the configuration file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProfileSpec {
    Linear(LinearSpec),
    Pid(PidSpec),
}

impl ProfileSpec {
    pub fn build(&self) -> Box<dyn Controller> {
        match self {
            ProfileSpec::Linear(spec) => Box::new(
                LinearProfile::new(spec.data.clone())
                    .with_hysteresis(spec.positive_hysteresis, spec.negative_hysteresis),
            ),
            ProfileSpec::Pid(spec) => Box::new(
                PidProfile::new(spec.setpoint, spec.kp, spec.ki, spec.kd)
                    .with_hysteresis(spec.positive_hysteresis, spec.negative_hysteresis),
            ),
        }
    }

    pub fn factory(&self) -> ProfileFactory {
        let spec = self.clone();
        Box::new(move || spec.build())
    }
}

/// Registry of profile factories by name
#[derive(Default)]
pub struct Profiles {
    factories: HashMap<String, ProfileFactory>,
}

impl Profiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Controller> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn insert_spec(&mut self, name: impl Into<String>, spec: &ProfileSpec) {
        self.factories.insert(name.into(), spec.factory());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Fresh controller instance for `name`
    pub fn create(&self, name: &str) -> Option<Box<dyn Controller>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for Profiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Profiles").field("names", &names).finish()
    }
}
