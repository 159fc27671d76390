use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::{collections::HashMap, time::Instant};

use console::style;
use futures::future::join_all;
use normalize_path::NormalizePath;
use path_slash::PathExt;
use similar_string::compare_similarity;
use tokio::fs::read_to_string;
use tokio::sync::OnceCell;
use wax::Glob;

use crate::definitions::{register_assertions, register_instructions, register_retrievers};
use crate::errors::{KeycloudInputError, KeycloudStepError, KeycloudTestError};
use crate::logging::log_step_runs;
use crate::options::configure;
use crate::parser::{parse_file, KeycloudFileType};
use crate::runner::run_scenario;
use crate::segments::KeycloudSegments;
use crate::universe::Universe;

mod definitions;
mod errors;
mod logging;
mod options;
mod parser;
mod runner;
mod segments;
mod universe;
mod world;

#[derive(Debug, Clone)]
pub struct KeycloudScenarioFile {
    pub name: String,
    r#type: KeycloudFileType,
    pub tags: Vec<String>,
    pub steps: Vec<KeycloudScenarioStep>,
    pub file_path: String,
    pub file_directory: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeycloudStepState {
    Dormant,
    Failed,
    Passed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeycloudScenarioStep {
    Ref {
        other_file: String,
        orig: String,
        hydrated_steps: Option<Vec<KeycloudScenarioStep>>,
        state: KeycloudStepState,
    },
    Instruction {
        step: KeycloudSegments,
        args: HashMap<String, serde_json::Value>,
        orig: String,
        state: KeycloudStepState,
    },
    Assertion {
        retrieval: KeycloudSegments,
        assertion: KeycloudSegments,
        args: HashMap<String, serde_json::Value>,
        orig: String,
        state: KeycloudStepState,
    },
}

impl Display for KeycloudScenarioStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use KeycloudScenarioStep::*;

        match self {
            Instruction { orig, .. } | Assertion { orig, .. } => {
                write!(f, "{}", orig)
            }
            Ref { orig, .. } => {
                write!(f, "run steps from: {}", orig)
            }
        }
    }
}

impl KeycloudScenarioStep {
    pub fn args_pretty(&self) -> String {
        let args = match self {
            KeycloudScenarioStep::Instruction { args, .. } => Some(args),
            KeycloudScenarioStep::Assertion { args, .. } => Some(args),
            _ => None,
        };

        if let Some(args) = args {
            let res = serde_yaml::to_string(&args).expect("step args are serializable");
            if res.trim() == "{}" {
                String::new()
            } else {
                res
            }
        } else {
            String::new()
        }
    }

    pub fn state(&self) -> KeycloudStepState {
        use KeycloudScenarioStep::*;

        match self {
            Ref { state, .. } | Instruction { state, .. } | Assertion { state, .. } => {
                state.clone()
            }
        }
    }
}

fn closest_strings<'o>(target: &String, options: &'o Vec<String>) -> Vec<(&'o String, f64)> {
    let mut scores = options
        .iter()
        .map(|s| (s, compare_similarity(target, s)))
        .collect::<Vec<_>>();

    scores.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .expect("similarities should not be NaN or Infinity")
    });

    scores
}

fn print_closest(
    step_type: &str,
    original_phrase: &str,
    user_segments: &KeycloudSegments,
    comparisons: &Vec<String>,
    resolve: impl Fn(&KeycloudSegments) -> Option<String>,
) {
    let comparator = user_segments.get_comparison_string();

    eprintln!(
        "Unable to resolve: \"{}\"\n{step_type} \"{}\" was not found.",
        style(original_phrase).red(),
        style(&comparator).yellow(),
    );

    let matches: Vec<_> = closest_strings(&comparator, comparisons)
        .into_iter()
        .enumerate()
        .filter(|(i, (_, score))| !(*i > 5 && *score < 0.6) && !(*i > 0 && *score < 0.4))
        .filter_map(|(_, (s, _))| {
            let segments = crate::parser::parse_segments(s).ok()?;
            let phrase = resolve(&segments)?;
            Some(format!("• {}", style(phrase).cyan()))
        })
        .collect();

    if matches.is_empty() {
        eprintln!("{}", style(format!("No similar {step_type}s found")).red());
    } else {
        eprintln!("Closest {step_type}s:\n{}", matches.join("\n"));
    }
}

fn report_result(
    universe: &Arc<Universe>,
    file: &KeycloudScenarioFile,
    res: &Result<(), KeycloudTestError>,
    started_at: Instant,
) -> bool {
    let dur = if universe.ctx.params.porcelain {
        "".to_string()
    } else {
        let e = started_at.elapsed();
        format!("[{}.{:03}s] ", e.as_secs(), e.subsec_millis())
    };

    match res {
        Ok(()) => {
            println!(
                "{}",
                style(format!("✓ {dur}{}", &file.name)).green()
            );
            if universe.ctx.params.verbose {
                log_step_runs(&file.steps, 2);
            }
            true
        }
        Err(e) => {
            println!(
                "{}",
                style(format!("✘ {dur}{}", &file.name)).red().bold()
            );
            println!("{}", style("--- STEPS ---").on_yellow().bold());
            log_step_runs(&file.steps, 0);
            println!("{}", style("--- ERROR ---").on_yellow().bold());

            let unknown_step = matches!(
                &e.err,
                KeycloudStepError::External(KeycloudInputError::NonexistentStep)
            );

            match (&e.step, unknown_step) {
                (Some(KeycloudScenarioStep::Instruction { step, orig, .. }), true) => {
                    print_closest(
                        "instruction",
                        orig,
                        step,
                        &universe.instruction_comparisons,
                        |m| {
                            universe
                                .instructions
                                .get_key_value(m)
                                .map(|(k, _)| k.get_as_string())
                        },
                    );
                }
                (
                    Some(KeycloudScenarioStep::Assertion {
                        retrieval,
                        assertion,
                        orig,
                        ..
                    }),
                    true,
                ) => {
                    if !universe.retrievers.contains_key(retrieval) {
                        print_closest(
                            "retrieval",
                            orig,
                            retrieval,
                            &universe.retriever_comparisons,
                            |m| {
                                universe
                                    .retrievers
                                    .get_key_value(m)
                                    .map(|(k, _)| k.get_as_string())
                            },
                        );
                    } else {
                        print_closest(
                            "assertion",
                            orig,
                            assertion,
                            &universe.assertion_comparisons,
                            |m| {
                                universe
                                    .assertions
                                    .get_key_value(m)
                                    .map(|(k, _)| k.get_as_string())
                            },
                        );
                    }
                }
                _ => {
                    println!("{}", style(e).red());
                }
            }
            false
        }
    }
}

async fn main_inner() -> Result<(), ()> {
    let ctx = configure();

    let start = Instant::now();

    let glob = Glob::new("**/*.scenario.yml").expect("Valid glob");
    let walker = glob
        .walk(ctx.params.root.clone().unwrap_or(".".into()))
        .flatten();

    let loaded_files = walker
        .map(|entry| {
            let file = entry.path().to_path_buf();
            async { (file.clone(), read_to_string(file).await) }
        })
        .collect::<Vec<_>>();

    let files = join_all(loaded_files).await;

    let mut names_thus_far: Vec<(String, String)> = vec![];

    let mut errors = vec![];
    let all_scenarios: BTreeMap<_, _> = files
        .into_iter()
        .filter_map(|(p, i)| {
            let contents = match i {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to read {}: {e}", p.to_string_lossy());
                    return None;
                }
            };
            let scenario_file = match parse_file(&contents, p.clone()) {
                Ok(f) => {
                    if let Some((_, other_path)) = names_thus_far.iter().find(|(n, _)| *n == f.name)
                    {
                        errors.push(KeycloudInputError::DuplicateName {
                            path_one: other_path.to_string(),
                            path_two: p.to_string_lossy().to_string(),
                            name: f.name.clone(),
                        });
                        return None;
                    }
                    names_thus_far.push((f.name.clone(), p.to_string_lossy().to_string()));
                    f
                }
                Err(e) => {
                    errors.push(e);
                    return None;
                }
            };
            Some((
                p.normalize().to_slash_lossy().into_owned(),
                scenario_file,
            ))
        })
        .collect();

    if !errors.is_empty() {
        eprintln!("keycloud-e2e failed to parse some scenario files:");
        for e in errors {
            eprintln!("  • {e}");
        }
        return Err(());
    }

    let all_instructions = register_instructions();
    let instruction_comparisons: Vec<_> = all_instructions
        .keys()
        .map(|k| k.get_comparison_string())
        .collect();

    let all_retrievers = register_retrievers();
    let retriever_comparisons: Vec<_> = all_retrievers
        .keys()
        .map(|k| k.get_comparison_string())
        .collect();

    let all_assertions = register_assertions();
    let assertion_comparisons: Vec<_> = all_assertions
        .keys()
        .map(|k| k.get_comparison_string())
        .collect();

    let universe = Arc::new(Universe {
        browser: OnceCell::new(),
        scenarios: all_scenarios,
        instructions: all_instructions,
        instruction_comparisons,
        retrievers: all_retrievers,
        retriever_comparisons,
        assertions: all_assertions,
        assertion_comparisons,
        ctx,
    });

    let runnable: Vec<_> = universe
        .scenarios
        .values()
        .filter(|v| v.r#type == KeycloudFileType::Test)
        .filter(|v| {
            universe
                .ctx
                .params
                .run_name
                .as_ref()
                .map(|n| &v.name == n)
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    if runnable.is_empty() {
        if let Some(name) = &universe.ctx.params.run_name {
            let known = universe
                .scenarios
                .values()
                .map(|v| v.name.clone())
                .collect::<Vec<_>>();
            eprintln!("No scenario is named \"{name}\".");
            if let Some((closest, _)) = closest_strings(name, &known).first() {
                eprintln!("Closest scenario name: \"{closest}\"");
            }
        } else {
            eprintln!("No scenario files found.");
        }
        return Err(());
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(universe.ctx.params.concurrency));

    let mut hands = vec![];

    if universe.ctx.params.verbose {
        println!("keycloud-e2e v{}", universe.ctx.version);
    }
    println!("\n{}\n", style("Running scenarios").bold());

    for mut scenario in runnable {
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let uni = Arc::clone(&universe);
        hands.push(tokio::spawn(async move {
            let started = Instant::now();
            let res = run_scenario(&mut scenario, Arc::clone(&uni)).await;
            let passed = report_result(&uni, &scenario, &res, started);

            drop(permit);

            passed
        }));
    }

    let results = join_all(hands)
        .await
        .into_iter()
        .map(|r| match r {
            Ok(passed) => passed,
            Err(e) => panic!("Failed to await all scenarios: {e}"),
        })
        .collect::<Vec<_>>();

    println!("\n{}\n", style("Finished running scenarios").bold());

    let duration = start.elapsed();
    let duration = if universe.ctx.params.porcelain {
        "".to_string()
    } else {
        format!(
            " in {}.{:03} seconds",
            duration.as_secs(),
            duration.subsec_millis()
        )
    };

    let failing = results.iter().filter(|passed| !**passed).count();
    let passing = results.len() - failing;

    println!(
        "{}\n{}",
        style(&format!("Passing scenarios: {}", passing)).cyan(),
        style(&format!("Failing scenarios: {}", failing)).cyan(),
    );

    if failing > 0 {
        println!(
            "{}",
            style(&format!("\nSome scenarios failed{}", duration)).red()
        );
        return Err(());
    }

    println!(
        "{}",
        style(&format!("\nAll scenarios passed{}", duration)).green()
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    match main_inner().await {
        Ok(_) => std::process::exit(0),
        Err(_) => std::process::exit(1),
    }
}
