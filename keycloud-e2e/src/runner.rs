use async_recursion::async_recursion;
use normalize_path::NormalizePath;
use path_slash::PathExt;
use similar_string::find_best_similarity;
use std::{
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::time::{self, Duration};

use crate::{
    definitions::browser::screenshots::ScreenshotViewport,
    definitions::KeycloudInstruction,
    errors::{KeycloudInputError, KeycloudStepError, KeycloudTestError, KeycloudTestFailure},
    segments::SegmentArgs,
    universe::Universe,
    world::ScenarioWorld,
    KeycloudScenarioFile, KeycloudScenarioStep, KeycloudStepState,
};

/// Scenarios carrying this tag get a browser window before any step runs,
/// mirroring a tag-conditioned setup hook. Untagged scenarios acquire one
/// lazily through their first navigation step.
pub const BROWSER_SETUP_TAG: &str = "browser";

pub async fn run_scenario(
    input: &mut KeycloudScenarioFile,
    universe: Arc<Universe>,
) -> Result<(), KeycloudTestError> {
    let mut world = ScenarioWorld::new(universe);

    let setup = if input.tags.iter().any(|t| t == BROWSER_SETUP_TAG) {
        world.ensure_window().await.map(|_| ())
    } else {
        Ok(())
    };

    let res = match setup {
        Ok(()) => run_steps(&input.file_directory, &mut input.steps, &mut world).await,
        // A scenario whose browser cannot launch fails before any step runs.
        Err(e) => Err(KeycloudTestError {
            err: e,
            step: None,
            arg_str: String::new(),
        }),
    };

    if res.is_err() && world.window.is_some() {
        if let Some(screenshot_target) = &world.universe.ctx.params.failure_screenshot_location {
            let instruction = ScreenshotViewport {};
            let filename = format!(
                "{}-{}.webp",
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("the harness should be running after the UNIX EPOCH")
                    .as_secs(),
                input.file_path.replace(|c: char| !c.is_alphanumeric(), "-")
            );
            let filepath = world
                .universe
                .ctx
                .working_directory
                .join(screenshot_target)
                .join(filename);
            let filepath_arg = serde_json::Value::String(filepath.to_string_lossy().to_string());
            let _ = instruction
                .run(
                    &SegmentArgs::build_synthetic(
                        [("filepath".to_string(), &filepath_arg)].into(),
                    ),
                    &mut world,
                )
                .await;
        }
    }

    world.shutdown().await;

    res
}

#[async_recursion]
async fn run_steps(
    file_directory: &String,
    steps: &mut Vec<KeycloudScenarioStep>,
    world: &mut ScenarioWorld,
) -> Result<(), KeycloudTestError> {
    let timeout_secs = world.universe.ctx.params.timeout;
    let timeout_dur = Duration::from_secs(timeout_secs);
    for cur_step in steps.iter_mut() {
        let marked_base_step = cur_step.clone();
        let marked_base_args = cur_step.args_pretty();

        let mark_and_return_step_error = |e: KeycloudStepError, state: &mut KeycloudStepState| {
            *state = KeycloudStepState::Failed;
            KeycloudTestError {
                err: e,
                step: Some(marked_base_step.clone()),
                arg_str: marked_base_args.clone(),
            }
        };
        let timeout_and_return_step_error = |state: &mut KeycloudStepState| {
            *state = KeycloudStepState::Failed;
            KeycloudTestError {
                err: KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                    msg: format!("Step timed out after {timeout_secs}s"),
                }),
                step: Some(marked_base_step.clone()),
                arg_str: marked_base_args.clone(),
            }
        };

        match cur_step {
            KeycloudScenarioStep::Ref {
                other_file,
                orig: _,
                hydrated_steps,
                state,
            } => {
                let target_path = PathBuf::from(file_directory)
                    .join(other_file)
                    .normalize()
                    .to_slash_lossy()
                    .into_owned();
                let Some(target_file) = world.universe.scenarios.get(&target_path).cloned() else {
                    let avail = world.universe.scenarios.keys().collect::<Vec<_>>();
                    let closest = find_best_similarity(&target_path, &avail).map(|s| s.0);
                    return Err(mark_and_return_step_error(
                        KeycloudStepError::External(KeycloudInputError::InvalidRef {
                            input: target_path,
                            closest: closest.unwrap_or_else(|| "<nothing found>".to_string()),
                        }),
                        state,
                    ));
                };

                *hydrated_steps = Some(target_file.steps);

                match run_steps(
                    &target_file.file_directory,
                    hydrated_steps.as_mut().unwrap(),
                    world,
                )
                .await
                {
                    Ok(_) => {
                        *state = KeycloudStepState::Passed;
                    }
                    Err(e) => {
                        *state = KeycloudStepState::Failed;
                        return Err(e);
                    }
                }
            }
            KeycloudScenarioStep::Instruction {
                step,
                args,
                orig: _,
                state,
            } => {
                let Some((reference_segments, instruction)) =
                    world.universe.instructions.get_key_value(step)
                else {
                    return Err(mark_and_return_step_error(
                        KeycloudStepError::External(KeycloudInputError::NonexistentStep),
                        state,
                    ));
                };

                let instruction_args =
                    SegmentArgs::build(reference_segments, step, args, Some(&*world))
                        .map_err(|e| mark_and_return_step_error(e.into(), state))?;

                let instruction = *instruction;
                match time::timeout(timeout_dur, instruction.run(&instruction_args, world)).await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        return Err(mark_and_return_step_error(e, state));
                    }
                    Err(_) => {
                        return Err(timeout_and_return_step_error(state));
                    }
                }

                *state = KeycloudStepState::Passed;
            }
            KeycloudScenarioStep::Assertion {
                retrieval,
                assertion,
                args,
                orig: _,
                state,
            } => {
                let Some((reference_ret, retrieval_step)) =
                    world.universe.retrievers.get_key_value(retrieval)
                else {
                    return Err(mark_and_return_step_error(
                        KeycloudStepError::External(KeycloudInputError::NonexistentStep),
                        state,
                    ));
                };

                let retrieval_args =
                    SegmentArgs::build(reference_ret, retrieval, args, Some(&*world))
                        .map_err(|e| mark_and_return_step_error(e.into(), state))?;

                let retrieval_step = *retrieval_step;
                let value =
                    match time::timeout(timeout_dur, retrieval_step.run(&retrieval_args, world))
                        .await
                    {
                        Ok(Ok(val)) => val,
                        Ok(Err(e)) => {
                            return Err(mark_and_return_step_error(e, state));
                        }
                        Err(_) => {
                            return Err(timeout_and_return_step_error(state));
                        }
                    };

                let Some((reference_assert, assertion_step)) =
                    world.universe.assertions.get_key_value(assertion)
                else {
                    return Err(mark_and_return_step_error(
                        KeycloudStepError::External(KeycloudInputError::NonexistentStep),
                        state,
                    ));
                };

                let assertion_args =
                    SegmentArgs::build(reference_assert, assertion, args, Some(&*world))
                        .map_err(|e| mark_and_return_step_error(e.into(), state))?;

                let assertion_step = *assertion_step;
                match time::timeout(
                    timeout_dur,
                    assertion_step.run(value, &assertion_args, world),
                )
                .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        return Err(mark_and_return_step_error(e, state));
                    }
                    Err(_) => {
                        return Err(timeout_and_return_step_error(state));
                    }
                }

                *state = KeycloudStepState::Passed;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::OnceCell;

    use crate::definitions::{register_instructions, KeycloudInstruction};
    use crate::options::{KeycloudContext, KeycloudParams};
    use crate::parser::parse_file;
    use crate::segments::SegmentArgs;

    use super::*;

    static NOOP_RUNS: AtomicUsize = AtomicUsize::new(0);

    pub struct CountedNoop;

    inventory::submit! {
        &CountedNoop as &dyn KeycloudInstruction
    }

    #[async_trait::async_trait]
    impl KeycloudInstruction for CountedNoop {
        fn segments(&self) -> &'static str {
            "__test__ I do nothing"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            _world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            NOOP_RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_universe(scenarios: BTreeMap<String, KeycloudScenarioFile>) -> Arc<Universe> {
        let instructions = register_instructions();
        let instruction_comparisons = instructions
            .keys()
            .map(|k| k.get_comparison_string())
            .collect();

        Arc::new(Universe {
            browser: OnceCell::new(),
            scenarios,
            instructions,
            instruction_comparisons,
            retrievers: HashMap::new(),
            retriever_comparisons: vec![],
            assertions: HashMap::new(),
            assertion_comparisons: vec![],
            ctx: KeycloudContext {
                version: "test",
                working_directory: std::env::current_dir().unwrap(),
                params: KeycloudParams::default(),
            },
        })
    }

    fn scenario(yaml: &str, path: &str) -> KeycloudScenarioFile {
        parse_file(yaml, PathBuf::from(path)).expect("valid scenario yaml")
    }

    #[tokio::test]
    async fn test_passing_scenario_marks_every_step() {
        let mut file = scenario(
            r#"
name: Counted noops
steps:
  - "__test__ I do nothing"
  - "__test__ I do nothing"
"#,
            "specs/noop.scenario.yml",
        );

        let before = NOOP_RUNS.load(Ordering::SeqCst);
        let res = run_scenario(&mut file, test_universe(BTreeMap::new())).await;

        assert!(res.is_ok());
        assert_eq!(NOOP_RUNS.load(Ordering::SeqCst) - before, 2);
        assert!(file
            .steps
            .iter()
            .all(|s| s.state() == KeycloudStepState::Passed));
    }

    #[tokio::test]
    async fn test_failing_step_leaves_later_steps_dormant() {
        let mut file = scenario(
            r#"
name: Unknown step
steps:
  - "__test__ I do nothing"
  - "__test__ I do something nobody has defined"
  - "__test__ I do nothing"
"#,
            "specs/unknown.scenario.yml",
        );

        let res = run_scenario(&mut file, test_universe(BTreeMap::new())).await;

        let err = res.expect_err("the unknown step should fail the scenario");
        assert!(matches!(
            err.err,
            KeycloudStepError::External(KeycloudInputError::NonexistentStep)
        ));

        assert_eq!(file.steps[0].state(), KeycloudStepState::Passed);
        assert_eq!(file.steps[1].state(), KeycloudStepState::Failed);
        assert_eq!(file.steps[2].state(), KeycloudStepState::Dormant);
    }

    #[tokio::test]
    async fn test_refs_splice_steps_from_other_files() {
        let background = scenario(
            r#"
name: Shared background
type: reference
steps:
  - "__test__ I do nothing"
"#,
            "specs/background.scenario.yml",
        );

        let mut file = scenario(
            r#"
name: Scenario with background
steps:
  - ref: ./background.scenario.yml
  - "__test__ I do nothing"
"#,
            "specs/with-background.scenario.yml",
        );

        let scenarios =
            BTreeMap::from([("specs/background.scenario.yml".to_string(), background)]);

        let res = run_scenario(&mut file, test_universe(scenarios)).await;

        assert!(res.is_ok());
        let KeycloudScenarioStep::Ref {
            hydrated_steps: Some(inner),
            state,
            ..
        } = &file.steps[0]
        else {
            panic!("ref step should have hydrated");
        };
        assert_eq!(*state, KeycloudStepState::Passed);
        assert!(inner
            .iter()
            .all(|s| s.state() == KeycloudStepState::Passed));
    }

    #[tokio::test]
    async fn test_unknown_refs_report_the_closest_file() {
        let mut file = scenario(
            r#"
name: Scenario with a bad ref
steps:
  - ref: ./backgroud.scenario.yml
"#,
            "specs/bad-ref.scenario.yml",
        );

        let background = scenario(
            r#"
name: Shared background
type: reference
steps:
  - "__test__ I do nothing"
"#,
            "specs/background.scenario.yml",
        );
        let scenarios =
            BTreeMap::from([("specs/background.scenario.yml".to_string(), background)]);

        let err = run_scenario(&mut file, test_universe(scenarios))
            .await
            .expect_err("the dangling ref should fail the scenario");

        match err.err {
            KeycloudStepError::External(KeycloudInputError::InvalidRef { input, closest }) => {
                assert_eq!(input, "specs/backgroud.scenario.yml");
                assert_eq!(closest, "specs/background.scenario.yml");
            }
            other => panic!("expected an invalid ref error, got {other:?}"),
        }
    }
}
