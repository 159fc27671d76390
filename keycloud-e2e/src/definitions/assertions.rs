use async_trait::async_trait;

use crate::errors::{KeycloudInputError, KeycloudStepError, KeycloudTestFailure};
use crate::world::ScenarioWorld;

use super::{KeycloudAssertion, SegmentArgs};

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct BeExactly;

inventory::submit! {
    &BeExactly as &dyn KeycloudAssertion
}

#[async_trait]
impl KeycloudAssertion for BeExactly {
    fn segments(&self) -> &'static str {
        "be exactly {expected}"
    }

    async fn run(
        &self,
        base_value: serde_json::Value,
        args: &SegmentArgs<'_>,
        _world: &mut ScenarioWorld,
    ) -> Result<(), KeycloudStepError> {
        let expected = args.get_value("expected")?;

        if base_value == expected {
            Ok(())
        } else {
            Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                msg: format!(
                    "expected exactly: {}\nreceived: {}",
                    display_value(&expected),
                    display_value(&base_value),
                ),
            }))
        }
    }
}

pub struct Contain;

inventory::submit! {
    &Contain as &dyn KeycloudAssertion
}

#[async_trait]
impl KeycloudAssertion for Contain {
    fn segments(&self) -> &'static str {
        "contain {expected}"
    }

    async fn run(
        &self,
        base_value: serde_json::Value,
        args: &SegmentArgs<'_>,
        _world: &mut ScenarioWorld,
    ) -> Result<(), KeycloudStepError> {
        let expected = args.get_value("expected")?;

        let contained = match &base_value {
            serde_json::Value::String(s) => match &expected {
                serde_json::Value::String(needle) => s.contains(needle),
                other => s.contains(&other.to_string()),
            },
            serde_json::Value::Array(vals) => vals.contains(&expected),
            _ => {
                return Err(KeycloudStepError::External(
                    KeycloudInputError::StepRequirementsNotMet {
                        reason: format!(
                            "cannot check containment within a {}",
                            match base_value {
                                serde_json::Value::Null => "null",
                                serde_json::Value::Bool(_) => "boolean",
                                serde_json::Value::Number(_) => "number",
                                serde_json::Value::Object(_) => "object",
                                _ => unreachable!(),
                            }
                        ),
                    },
                ))
            }
        };

        if contained {
            Ok(())
        } else {
            Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                msg: format!(
                    "expected to contain: {}\nreceived: {}",
                    display_value(&expected),
                    display_value(&base_value),
                ),
            }))
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    use tokio::sync::OnceCell;

    use crate::options::{KeycloudContext, KeycloudParams};
    use crate::parser::parse_segments;
    use crate::segments::SegmentArgs;
    use crate::universe::Universe;

    use super::*;

    fn test_world() -> ScenarioWorld {
        let universe = Universe {
            browser: OnceCell::new(),
            scenarios: BTreeMap::new(),
            instructions: HashMap::new(),
            instruction_comparisons: vec![],
            retrievers: HashMap::new(),
            retriever_comparisons: vec![],
            assertions: HashMap::new(),
            assertion_comparisons: vec![],
            ctx: KeycloudContext {
                version: "test",
                working_directory: std::env::current_dir().unwrap(),
                params: KeycloudParams::default(),
            },
        };
        ScenarioWorld::new(Arc::new(universe))
    }

    fn args_for<'a>(
        definition: &str,
        supplied: &'a crate::segments::KeycloudSegments,
        input: &'a HashMap<String, serde_json::Value>,
    ) -> SegmentArgs<'a> {
        let reference = parse_segments(definition).expect("valid definition");
        SegmentArgs::build(&reference, supplied, input, None).expect("valid args")
    }

    #[tokio::test]
    async fn test_be_exactly() {
        let mut world = test_world();
        let input = HashMap::new();

        let supplied = parse_segments("be exactly 'http://localhost:8000/main.html?#settings'")
            .expect("valid segments");
        let args = args_for("be exactly {expected}", &supplied, &input);

        let url =
            serde_json::Value::String("http://localhost:8000/main.html?#settings".to_string());
        assert!(BeExactly.run(url, &args, &mut world).await.is_ok());

        let other = serde_json::Value::String("http://localhost:8000/index.html".to_string());
        let err = BeExactly
            .run(other, &args, &mut world)
            .await
            .expect_err("mismatched URLs should fail");
        assert!(matches!(
            err,
            KeycloudStepError::Assertion(KeycloudTestFailure::Custom { .. })
        ));
    }

    #[tokio::test]
    async fn test_contain() {
        let mut world = test_world();
        let input = HashMap::new();

        let supplied = parse_segments("contain 'github.com'").expect("valid segments");
        let args = args_for("contain {expected}", &supplied, &input);

        let list = serde_json::json!(["github.com", "example.org"]);
        assert!(Contain.run(list, &args, &mut world).await.is_ok());

        let text = serde_json::Value::String("entry for github.com added".to_string());
        assert!(Contain.run(text, &args, &mut world).await.is_ok());

        let missing = serde_json::json!(["example.org"]);
        assert!(Contain.run(missing, &args, &mut world).await.is_err());

        let unsupported = serde_json::json!(42);
        let err = Contain
            .run(unsupported, &args, &mut world)
            .await
            .expect_err("numbers have no containment");
        assert!(matches!(
            err,
            KeycloudStepError::External(KeycloudInputError::StepRequirementsNotMet { .. })
        ));
    }
}
