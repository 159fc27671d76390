//! Step definitions for the keycloud dashboard itself: the phrases the
//! shipped scenario files are written in. Element identifiers and page
//! paths here mirror the dashboard markup.

use async_trait::async_trait;

use crate::errors::{KeycloudStepError, KeycloudTestFailure};
use crate::world::ScenarioWorld;

use super::browser::{poll_deadline_secs, require_window};
use super::{KeycloudInstruction, SegmentArgs};

const USERNAME_INPUT: &str = "#inputUser";
const REGISTER_BUTTON: &str = "#registerBtn";
const ADD_ENTRY_BUTTON: &str = "#addEntryBtn";
const SAVE_ENTRY_BUTTON: &str = "#saveEntryBtn";

mod navigation {
    use super::*;

    pub struct LandingPage;

    inventory::submit! {
        &LandingPage as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for LandingPage {
        fn segments(&self) -> &'static str {
            "I am on the landing page"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let url = world.resolve_url("index.html");
            let window = world.ensure_window().await?;

            window.navigate(url).await
        }
    }

    pub struct HomePage;

    inventory::submit! {
        &HomePage as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for HomePage {
        fn segments(&self) -> &'static str {
            "I am on my home page in the keycloud dashboard"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let url = world.resolve_url("main.html#home");
            let window = world.ensure_window().await?;

            window.navigate(url).await
        }
    }
}

mod registration {
    use super::*;

    pub struct RegisterUsername;

    inventory::submit! {
        &RegisterUsername as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for RegisterUsername {
        fn segments(&self) -> &'static str {
            "I type in {username} as my username and click register"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let username = args.get_string("username")?;
            let deadline = poll_deadline_secs(world);

            let window = require_window(world)?;

            window.type_into(USERNAME_INPUT, &username, deadline).await?;
            window.click_selector(REGISTER_BUTTON, deadline).await
        }
    }

    pub struct SettingsPageCheck;

    inventory::submit! {
        &SettingsPageCheck as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for SettingsPageCheck {
        fn segments(&self) -> &'static str {
            "I will be on the settings page of a new created account"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            // Registration redirects once the new account is stored; poll
            // rather than sleeping a fixed amount before checking.
            let expected = format!("{}main.html?#settings", world.base_url());
            let deadline = poll_deadline_secs(world);

            let window = require_window(world)?;

            let start = std::time::Instant::now();
            loop {
                let actual = window.current_url().await?;
                if actual == expected {
                    return Ok(());
                }
                if start.elapsed().as_secs() >= deadline {
                    return Err(KeycloudStepError::Assertion(
                        KeycloudTestFailure::UrlMismatch { expected, actual },
                    ));
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

mod entries {
    use super::*;

    pub struct AddEntry;

    inventory::submit! {
        &AddEntry as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for AddEntry {
        fn segments(&self) -> &'static str {
            "I press the add button"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let deadline = poll_deadline_secs(world);
            let window = require_window(world)?;

            window.click_selector(ADD_ENTRY_BUTTON, deadline).await
        }
    }

    pub struct SaveEntryPopup;

    inventory::submit! {
        &SaveEntryPopup as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for SaveEntryPopup {
        fn segments(&self) -> &'static str {
            "I fill out the popup"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let deadline = poll_deadline_secs(world);
            let window = require_window(world)?;

            window.click_selector(SAVE_ENTRY_BUTTON, deadline).await
        }
    }

    // The remaining entry-management phrases are registered so scenarios
    // can be written ahead of the dashboard, but the entry list and the
    // clipboard expose no stable hooks to drive or observe yet. They
    // deliberately perform no browser calls and assert nothing.

    pub struct EntryAddedCheck;

    inventory::submit! {
        &EntryAddedCheck as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for EntryAddedCheck {
        fn segments(&self) -> &'static str {
            "I will see a new password added to the list"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            _world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            Ok(())
        }
    }

    pub struct RemoveEntry;

    inventory::submit! {
        &RemoveEntry as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for RemoveEntry {
        fn segments(&self) -> &'static str {
            "I press the remove button for the {name} password"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            _world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            Ok(())
        }
    }

    pub struct EntryRemovedCheck;

    inventory::submit! {
        &EntryRemovedCheck as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for EntryRemovedCheck {
        fn segments(&self) -> &'static str {
            "the password {name} entry is removed from the list"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            _world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            Ok(())
        }
    }

    pub struct CopyEntryPassword;

    inventory::submit! {
        &CopyEntryPassword as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for CopyEntryPassword {
        fn segments(&self) -> &'static str {
            "I copy the password for {name} to clipboard"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            _world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            Ok(())
        }
    }

    pub struct ClipboardCheck;

    inventory::submit! {
        &ClipboardCheck as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for ClipboardCheck {
        fn segments(&self) -> &'static str {
            "I have the password for {name} in my clipboard"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            _world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    use tokio::sync::OnceCell;

    use crate::options::{KeycloudContext, KeycloudParams};
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

    // The pending entry-list and clipboard steps accept any captured
    // string, including the empty one, without failing the scenario.
    #[tokio::test]
    async fn test_pending_steps_never_fail() {
        let mut world = test_world();
        let args = SegmentArgs::build_synthetic(HashMap::new());

        assert!(entries::EntryAddedCheck
            .run(&args, &mut world)
            .await
            .is_ok());
        assert!(entries::RemoveEntry.run(&args, &mut world).await.is_ok());
        assert!(entries::EntryRemovedCheck
            .run(&args, &mut world)
            .await
            .is_ok());
        assert!(entries::CopyEntryPassword
            .run(&args, &mut world)
            .await
            .is_ok());
        assert!(entries::ClipboardCheck.run(&args, &mut world).await.is_ok());
    }
}
