use std::{collections::HashMap, hash::Hash};

use serde_json::Value;

use crate::{errors::KeycloudInputError, world::ScenarioWorld};

#[derive(Debug, Clone, PartialEq)]
pub enum KeycloudSegment {
    Literal(String),
    Value(serde_json::Value),
    Variable(String),
}

#[derive(Debug, Clone)]
pub struct KeycloudSegments {
    pub segments: Vec<KeycloudSegment>,
}

impl Hash for KeycloudSegments {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use KeycloudSegment::*;

        for seg in &self.segments {
            match seg {
                Literal(lit) => lit.hash(state),
                Value(_) | Variable(_) => 0.hash(state),
            }
        }
    }
}

impl PartialEq for KeycloudSegments {
    fn eq(&self, other: &Self) -> bool {
        use KeycloudSegment::*;

        if self.segments.len() != other.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| match a {
                Literal(_) => a == b,
                Value(_) | Variable(_) => matches!(b, Variable(_)),
            })
    }
}

impl Eq for KeycloudSegments {}

impl KeycloudSegments {
    pub fn get_comparison_string(&self) -> String {
        use KeycloudSegment::*;

        self.segments
            .iter()
            .map(|s| match s {
                Literal(l) => l,
                Value(_) | Variable(_) => "{___}",
            })
            .collect()
    }

    pub fn get_as_string(&self) -> String {
        use KeycloudSegment::*;

        self.segments
            .iter()
            .map(|s| match s {
                Literal(l) => l.clone(),
                Value(val) => format!("\"{val}\""),
                Variable(var) => format!("{{{var}}}"),
            })
            .collect()
    }
}

fn has_args_string<V>(args: &HashMap<String, V>) -> String {
    if args.is_empty() {
        "no arguments".to_string()
    } else {
        args.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

pub struct SegmentArgs<'a> {
    args: HashMap<String, &'a serde_json::Value>,
    placeholder_delim: String,
    placeholders: HashMap<String, String>,
}

impl<'a> SegmentArgs<'a> {
    pub fn build(
        reference_step: &KeycloudSegments,
        supplied_step: &'a KeycloudSegments,
        supplied_args: &'a HashMap<String, serde_json::Value>,
        world: Option<&ScenarioWorld>,
    ) -> Result<SegmentArgs<'a>, KeycloudInputError> {
        let mut args = HashMap::new();

        for (reference, supplied) in reference_step
            .segments
            .iter()
            .zip(supplied_step.segments.iter())
        {
            let KeycloudSegment::Variable(step_key) = reference else {
                continue;
            };

            match supplied {
                KeycloudSegment::Value(val) => {
                    args.insert(step_key.to_owned(), val);
                }
                KeycloudSegment::Variable(var) => {
                    let Some(var_val) = supplied_args.get(var) else {
                        return Err(KeycloudInputError::NonexistentArgument {
                            arg: var.to_string(),
                            has: has_args_string(supplied_args),
                        });
                    };
                    args.insert(step_key.to_owned(), var_val);
                }
                KeycloudSegment::Literal(l) => panic!("{l} should be unreachable"),
            }
        }

        let mut placeholders = world
            .map(|w| w.universe.ctx.params.placeholders.clone())
            .unwrap_or_default();

        if let Some(world) = world {
            placeholders.insert("keycloud_base_url".to_string(), world.base_url());
        }

        Ok(Self {
            args,
            placeholders,
            placeholder_delim: world
                .map(|w| w.universe.ctx.params.placeholder_delimiter.clone())
                .unwrap_or_default(),
        })
    }

    /// Args for steps the harness triggers itself, e.g. the failure
    /// screenshot. No placeholder replacement applies.
    pub fn build_synthetic(args: HashMap<String, &'a serde_json::Value>) -> SegmentArgs<'a> {
        Self {
            args,
            placeholder_delim: "%".to_string(),
            placeholders: HashMap::new(),
        }
    }

    pub fn get_value(&self, k: impl AsRef<str>) -> Result<serde_json::Value, KeycloudInputError> {
        let Some(value) = self.args.get(k.as_ref()) else {
            return Err(KeycloudInputError::NonexistentArgument {
                arg: k.as_ref().to_string(),
                has: has_args_string(&self.args),
            });
        };

        let mut value = (*value).clone();
        replace_inside_value(&mut value, &self.placeholder_delim, &self.placeholders);

        Ok(value)
    }

    pub fn get_string(&self, k: impl AsRef<str>) -> Result<String, KeycloudInputError> {
        let value = self.get_value(k.as_ref())?;

        let found = match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::String(st) => return Ok(st),
        };

        Err(KeycloudInputError::IncorrectArgumentType {
            arg: k.as_ref().to_string(),
            was: found.to_string(),
            expected: "string".to_string(),
        })
    }

}

fn replace_inside_value(value: &mut Value, delim: &str, placeholders: &HashMap<String, String>) {
    use Value::*;

    match value {
        Null | Bool(_) | Number(_) => {}
        Value::String(s) => {
            if s.contains(delim) {
                for (placeholder, value) in placeholders.iter() {
                    let matcher = format!("{delim}{placeholder}{delim}");

                    if s.contains(&matcher) {
                        *s = s.replace(&matcher, value);
                    }
                }
            }
        }
        Value::Array(vals) => {
            vals.iter_mut().for_each(|v| {
                replace_inside_value(v, delim, placeholders);
            });
        }
        Value::Object(o) => {
            o.values_mut().for_each(|v| {
                replace_inside_value(v, delim, placeholders);
            });
        }
    }
}
