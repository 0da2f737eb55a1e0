use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One labelled example: named inputs plus the expected output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub inputs: Map<String, Value>,
    pub outputs: Value,
}

impl Example {
    pub fn new(inputs: Map<String, Value>, outputs: Value) -> Self {
        Self { inputs, outputs }
    }

    /// Convenience constructor for single-input examples.
    pub fn single(key: impl Into<String>, input: impl Into<Value>, output: impl Into<Value>) -> Self {
        let mut inputs = Map::new();
        inputs.insert(key.into(), input.into());
        Self {
            inputs,
            outputs: output.into(),
        }
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }
}
