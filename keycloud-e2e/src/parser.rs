use std::{collections::HashMap, path::PathBuf};

use path_slash::{PathBufExt, PathExt};
use serde_json::{Map, Value};

use crate::{
    errors::KeycloudInputError,
    segments::{KeycloudSegment, KeycloudSegments},
    KeycloudScenarioFile, KeycloudScenarioStep, KeycloudStepState,
};

/// Step phrases may carry the usual scenario keywords for readability.
/// They are stripped before matching, so "Given I am on the landing page"
/// and "I am on the landing page" resolve to the same definition.
const STEP_KEYWORDS: &[&str] = &["given", "when", "then", "and", "but"];

struct KeycloudScenarioInput {
    parsed: RawKeycloudScenarioFile,
    file_path: String,
    file_directory: String,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum KeycloudFileType {
    Test,
    Reference,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RawKeycloudScenarioFile {
    name: String,
    r#type: Option<KeycloudFileType>,
    tags: Option<Vec<String>>,
    steps: Vec<RawKeycloudScenarioStep>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
enum RawKeycloudScenarioStep {
    Ref {
        r#ref: String,
    },
    BareStep(String),
    StepWithParams {
        step: String,
        #[serde(flatten)]
        other: Map<String, Value>,
    },
}

impl TryFrom<KeycloudScenarioInput> for KeycloudScenarioFile {
    type Error = KeycloudInputError;

    fn try_from(value: KeycloudScenarioInput) -> Result<Self, Self::Error> {
        let mut steps = Vec::with_capacity(value.parsed.steps.len());
        for step in value.parsed.steps {
            steps.push(step.try_into()?);
        }

        Ok(KeycloudScenarioFile {
            name: value.parsed.name,
            r#type: value.parsed.r#type.unwrap_or(KeycloudFileType::Test),
            tags: value.parsed.tags.unwrap_or_default(),
            steps,
            file_path: value.file_path,
            file_directory: value.file_directory,
        })
    }
}

impl TryFrom<RawKeycloudScenarioStep> for KeycloudScenarioStep {
    type Error = KeycloudInputError;

    fn try_from(value: RawKeycloudScenarioStep) -> Result<Self, Self::Error> {
        match value {
            RawKeycloudScenarioStep::Ref { r#ref } => Ok(KeycloudScenarioStep::Ref {
                other_file: PathBuf::try_from(&r#ref)
                    .map_err(|_| KeycloudInputError::InvalidPath {
                        input: r#ref.clone(),
                    })?
                    .to_slash_lossy()
                    .into_owned(),
                orig: r#ref,
                hydrated_steps: None,
                state: KeycloudStepState::Dormant,
            }),
            RawKeycloudScenarioStep::BareStep(step) => parse_step(step, HashMap::new()),
            RawKeycloudScenarioStep::StepWithParams { step, other } => {
                parse_step(step, HashMap::from_iter(other.into_iter()))
            }
        }
    }
}

fn strip_step_keyword(step: &str) -> &str {
    let trimmed = step.trim_start();
    for keyword in STEP_KEYWORDS {
        let Some(prefix) = trimmed.get(..keyword.len()) else {
            continue;
        };
        if prefix.eq_ignore_ascii_case(keyword)
            && trimmed.as_bytes().get(keyword.len()) == Some(&b' ')
        {
            return trimmed[keyword.len() + 1..].trim_start();
        }
    }
    trimmed
}

fn parse_step(
    step: String,
    args: HashMap<String, Value>,
) -> Result<KeycloudScenarioStep, KeycloudInputError> {
    let phrase = strip_step_keyword(&step);

    if let Some((retrieval, assertion)) = phrase.split_once(" should ") {
        Ok(KeycloudScenarioStep::Assertion {
            retrieval: parse_segments(retrieval)?,
            assertion: parse_segments(assertion)?,
            args,
            orig: step.clone(),
            state: KeycloudStepState::Dormant,
        })
    } else {
        Ok(KeycloudScenarioStep::Instruction {
            step: parse_segments(phrase)?,
            args,
            orig: step.clone(),
            state: KeycloudStepState::Dormant,
        })
    }
}

pub fn parse_file(s: &str, p: PathBuf) -> Result<KeycloudScenarioFile, KeycloudInputError> {
    let raw_scenario = serde_yaml::from_str::<RawKeycloudScenarioFile>(s)?;

    KeycloudScenarioInput {
        parsed: raw_scenario,
        file_path: p.to_slash_lossy().into_owned(),
        file_directory: p
            .parent()
            .map(|p| p.to_slash_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string()),
    }
    .try_into()
}

pub fn parse_segments(s: &str) -> Result<KeycloudSegments, KeycloudInputError> {
    let mut segments = vec![];
    use KeycloudSegment::*;

    enum StepMode {
        None(usize),
        InQuote(usize, char),
        InCurly(usize),
    }

    let mut mode = StepMode::None(0);

    for (i, c) in s.char_indices() {
        match &mut mode {
            StepMode::None(start) => match c {
                '"' => {
                    segments.push(Literal(s[*start..i].to_lowercase()));
                    mode = StepMode::InQuote(i, '"');
                }
                '\'' => {
                    segments.push(Literal(s[*start..i].to_lowercase()));
                    mode = StepMode::InQuote(i, '\'');
                }
                '{' => {
                    segments.push(Literal(s[*start..i].to_lowercase()));
                    mode = StepMode::InCurly(i);
                }
                _ => {}
            },
            StepMode::InQuote(start, quote) => {
                if c == *quote {
                    let inner_start = *start + 1;
                    if i == inner_start {
                        segments.push(Value(serde_json::Value::String("".to_string())));
                    } else {
                        segments.push(Value(serde_json::Value::String(
                            s[inner_start..i].to_string(),
                        )));
                    }
                    mode = StepMode::None(i + 1);
                }
            }
            StepMode::InCurly(start) => {
                if c == '}' {
                    let inner_start = *start + 1;
                    if i == inner_start {
                        segments.push(Variable("".to_string()));
                    } else {
                        segments.push(Variable(s[inner_start..i].to_string()));
                    }
                    mode = StepMode::None(i + 1);
                }
            }
        }
    }

    match mode {
        StepMode::None(start) => {
            if start < s.len() {
                segments.push(Literal(s[start..].to_lowercase()));
            }
        }
        StepMode::InQuote(_, q) => return Err(KeycloudInputError::UnclosedValue { expected: q }),
        StepMode::InCurly(_) => return Err(KeycloudInputError::UnclosedValue { expected: '}' }),
    }

    Ok(KeycloudSegments { segments })
}

#[cfg(test)]
mod test {
    use super::*;
    use KeycloudSegment::*;

    fn st(s: &str) -> serde_json::Value {
        serde_json::Value::String(s.to_string())
    }

    #[test]
    fn test_parsing_segments() {
        let segments = parse_segments("I am on the landing page").expect("Valid segments");
        // We test equality on the segments directly,
        // as the segments type itself uses a looser comparison that doesn't
        // look inside Value or Variable segments.
        assert_eq!(
            segments.segments,
            vec![Literal("i am on the landing page".to_string())]
        );

        let segments = parse_segments("I type in \"alice\" as my username and click register")
            .expect("Valid segments");
        assert_eq!(
            segments.segments,
            vec![
                Literal("i type in ".to_string()),
                Value(st("alice")),
                Literal(" as my username and click register".to_string()),
            ]
        );

        let segments =
            parse_segments("In my browser, ''I eval {j\"s} and 'x'").expect("Valid segments");
        assert_eq!(
            segments.segments,
            vec![
                Literal("in my browser, ".to_string()),
                Value(st("")),
                Literal("i eval ".to_string()),
                Variable("j\"s".to_string()),
                Literal(" and ".to_string()),
                Value(st("x")),
            ]
        );

        let unclosed = parse_segments("I copy the password for 'github.com to clipboard");
        assert!(matches!(
            unclosed,
            Err(KeycloudInputError::UnclosedValue { expected: '\'' })
        ));
    }

    #[test]
    fn test_stripping_keywords() {
        assert_eq!(
            strip_step_keyword("Given I am on the landing page"),
            "I am on the landing page"
        );
        assert_eq!(
            strip_step_keyword("and I fill out the popup"),
            "I fill out the popup"
        );
        // Only a leading keyword is stripped, and only when it stands alone.
        assert_eq!(strip_step_keyword("Thenceforth I wait"), "Thenceforth I wait");
        assert_eq!(
            strip_step_keyword("I press the add button"),
            "I press the add button"
        );
    }

    #[test]
    fn test_parsing_steps() {
        let Ok(step) = parse_step(
            "When I press the add button".to_string(),
            HashMap::new(),
        ) else {
            panic!("Step did not parse");
        };

        assert_eq!(
            step,
            KeycloudScenarioStep::Instruction {
                step: KeycloudSegments {
                    segments: vec![Literal("i press the add button".to_string())]
                },
                args: HashMap::new(),
                orig: "When I press the add button".to_string(),
                state: KeycloudStepState::Dormant
            }
        );

        let Ok(step) = parse_step(
            "Then In my browser, the current URL should be exactly {url}".to_string(),
            HashMap::new(),
        ) else {
            panic!("Step did not parse");
        };

        assert_eq!(
            step,
            KeycloudScenarioStep::Assertion {
                retrieval: KeycloudSegments {
                    segments: vec![Literal("in my browser, the current url".to_string())]
                },
                assertion: KeycloudSegments {
                    segments: vec![
                        Literal("be exactly ".to_string()),
                        Variable("url".to_string()),
                    ]
                },
                args: HashMap::new(),
                orig: "Then In my browser, the current URL should be exactly {url}".to_string(),
                state: KeycloudStepState::Dormant
            }
        );
    }

    #[test]
    fn test_parsing_files() {
        let file = parse_file(
            r#"
name: Registering a new account
tags:
  - browser
steps:
  - "Given I am on the landing page"
  - "When I type in 'alice' as my username and click register"
  - "Then I will be on the settings page of a new created account"
"#,
            PathBuf::from("scenarios/registration.scenario.yml"),
        )
        .expect("Valid scenario file");

        assert_eq!(file.name, "Registering a new account");
        assert_eq!(file.tags, vec!["browser".to_string()]);
        assert_eq!(file.steps.len(), 3);
        assert_eq!(file.file_directory, "scenarios");

        let reference = parse_file(
            r#"
name: Opening the dashboard home page
type: reference
steps:
  - "Given I am on my home page in the keycloud dashboard"
"#,
            PathBuf::from("scenarios/home.scenario.yml"),
        )
        .expect("Valid reference file");

        assert_eq!(reference.r#type, KeycloudFileType::Reference);
        assert!(reference.tags.is_empty());
    }

    #[test]
    fn test_parsing_refs() {
        let file = parse_file(
            r#"
name: Managing password entries
steps:
  - ref: ./home.scenario.yml
  - "When I press the add button"
"#,
            PathBuf::from("scenarios/entries.scenario.yml"),
        )
        .expect("Valid scenario file");

        assert_eq!(
            file.steps[0],
            KeycloudScenarioStep::Ref {
                other_file: "./home.scenario.yml".to_string(),
                orig: "./home.scenario.yml".to_string(),
                hydrated_steps: None,
                state: KeycloudStepState::Dormant,
            }
        );
    }
}
