use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    errors::KeycloudStepError,
    parser::parse_segments,
    segments::{KeycloudSegments, SegmentArgs},
    world::ScenarioWorld,
};

mod assertions;
pub mod browser;
mod dashboard;
mod hosting;

/// Action steps, generally start with "I ..."
#[async_trait]
pub trait KeycloudInstruction: Sync {
    fn segments(&self) -> &'static str;
    async fn run(
        &self,
        args: &SegmentArgs<'_>,
        world: &mut ScenarioWorld,
    ) -> Result<(), KeycloudStepError>;
}

inventory::collect!(&'static dyn KeycloudInstruction);

pub fn register_instructions() -> HashMap<KeycloudSegments, &'static dyn KeycloudInstruction> {
    HashMap::<_, _>::from_iter(
        (inventory::iter::<&dyn KeycloudInstruction>)
            .into_iter()
            .map(|i| {
                let segments =
                    parse_segments(i.segments()).expect("builtin instructions should be parseable");

                (segments, *i)
            }),
    )
}

/// Retrievers, used before a "should" clause
#[async_trait]
pub trait KeycloudRetriever: Sync {
    fn segments(&self) -> &'static str;
    async fn run(
        &self,
        args: &SegmentArgs<'_>,
        world: &mut ScenarioWorld,
    ) -> Result<serde_json::Value, KeycloudStepError>;
}

inventory::collect!(&'static dyn KeycloudRetriever);

pub fn register_retrievers() -> HashMap<KeycloudSegments, &'static dyn KeycloudRetriever> {
    HashMap::<_, _>::from_iter(
        (inventory::iter::<&dyn KeycloudRetriever>)
            .into_iter()
            .map(|i| {
                let segments =
                    parse_segments(i.segments()).expect("builtin retrievers should be parseable");

                (segments, *i)
            }),
    )
}

/// Assertions, used after a "should" clause
#[async_trait]
pub trait KeycloudAssertion: Sync {
    fn segments(&self) -> &'static str;
    async fn run(
        &self,
        base_value: serde_json::Value,
        args: &SegmentArgs<'_>,
        world: &mut ScenarioWorld,
    ) -> Result<(), KeycloudStepError>;
}

inventory::collect!(&'static dyn KeycloudAssertion);

pub fn register_assertions() -> HashMap<KeycloudSegments, &'static dyn KeycloudAssertion> {
    HashMap::<_, _>::from_iter(
        (inventory::iter::<&dyn KeycloudAssertion>)
            .into_iter()
            .map(|i| {
                let segments =
                    parse_segments(i.segments()).expect("builtin assertions should be parseable");

                (segments, *i)
            }),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_getting_an_instruction() {
        pub struct TestInstruction;

        inventory::submit! {
            &TestInstruction as &dyn KeycloudInstruction
        }

        #[async_trait]
        impl KeycloudInstruction for TestInstruction {
            fn segments(&self) -> &'static str {
                "__test__ I am an instruction asking for {argument}"
            }

            async fn run(
                &self,
                _args: &SegmentArgs<'_>,
                _world: &mut ScenarioWorld,
            ) -> Result<(), KeycloudStepError> {
                Ok(())
            }
        }

        let users_instruction =
            parse_segments("__test__ I am an instruction asking for \"this argument\"")
                .expect("Valid instruction");

        let all_instructions = register_instructions();
        let matching_instruction = all_instructions
            .get(&users_instruction)
            .expect("should be able to retrieve instruction");

        assert_eq!(
            matching_instruction.segments(),
            "__test__ I am an instruction asking for {argument}"
        );
    }

    #[test]
    fn test_getting_a_retriever() {
        pub struct TestRetriever;

        inventory::submit! {
            &TestRetriever as &dyn KeycloudRetriever
        }

        #[async_trait]
        impl KeycloudRetriever for TestRetriever {
            fn segments(&self) -> &'static str {
                "__test__ the page {url}"
            }

            async fn run(
                &self,
                _args: &SegmentArgs<'_>,
                _world: &mut ScenarioWorld,
            ) -> Result<serde_json::Value, KeycloudStepError> {
                Ok(serde_json::Value::Null)
            }
        }

        let users_segments =
            parse_segments("__test__ the page \"index.html\"").expect("Valid retrieval");

        let all_segments = register_retrievers();
        let matching_retriever = all_segments
            .get(&users_segments)
            .expect("should be able to retrieve segments");

        assert_eq!(matching_retriever.segments(), "__test__ the page {url}");
    }

    #[test]
    fn test_getting_an_assertion() {
        pub struct TestAssertion;

        inventory::submit! {
            &TestAssertion as &dyn KeycloudAssertion
        }

        #[async_trait]
        impl KeycloudAssertion for TestAssertion {
            fn segments(&self) -> &'static str {
                "__test__ land on {value}"
            }

            async fn run(
                &self,
                _base_value: serde_json::Value,
                _args: &SegmentArgs<'_>,
                _world: &mut ScenarioWorld,
            ) -> Result<(), KeycloudStepError> {
                Ok(())
            }
        }

        let users_segments =
            parse_segments("__test__ land on {my_url}").expect("Valid assertion");

        let all_segments = register_assertions();
        let matching_assertion = all_segments
            .get(&users_segments)
            .expect("should be able to retrieve segments");

        assert_eq!(matching_assertion.segments(), "__test__ land on {value}");
    }

    // Every phrase the shipped keycloud scenarios use must resolve to a
    // registered definition, with or without its leading keyword.
    #[test]
    fn test_dashboard_phrases_resolve() {
        let all_instructions = register_instructions();

        let phrases = [
            "I am on the landing page",
            "I am on my home page in the keycloud dashboard",
            "I type in 'alice' as my username and click register",
            "I will be on the settings page of a new created account",
            "I press the add button",
            "I fill out the popup",
            "I will see a new password added to the list",
            "I press the remove button for the 'github.com' password",
            "the password 'github.com' entry is removed from the list",
            "I copy the password for 'github.com' to clipboard",
            "I have the password for 'github.com' in my clipboard",
        ];

        for phrase in phrases {
            let segments = parse_segments(phrase).expect("valid phrase");
            assert!(
                all_instructions.contains_key(&segments),
                "no registered instruction matches \"{phrase}\""
            );
        }
    }
}
