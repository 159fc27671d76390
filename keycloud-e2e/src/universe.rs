use std::collections::{BTreeMap, HashMap};

use tokio::sync::OnceCell;

use crate::{
    definitions::{
        browser::BrowserTester, KeycloudAssertion, KeycloudInstruction, KeycloudRetriever,
    },
    options::KeycloudContext,
    segments::KeycloudSegments,
    KeycloudScenarioFile,
};

/// Everything shared across scenario executions: the parsed scenario files,
/// the step definition registries, the configuration, and the browser
/// process (launched on first use, reused by every scenario).
pub struct Universe {
    pub browser: OnceCell<BrowserTester>,
    pub scenarios: BTreeMap<String, KeycloudScenarioFile>,
    pub instructions: HashMap<KeycloudSegments, &'static dyn KeycloudInstruction>,
    pub instruction_comparisons: Vec<String>,
    pub retrievers: HashMap<KeycloudSegments, &'static dyn KeycloudRetriever>,
    pub retriever_comparisons: Vec<String>,
    pub assertions: HashMap<KeycloudSegments, &'static dyn KeycloudAssertion>,
    pub assertion_comparisons: Vec<String>,
    pub ctx: KeycloudContext,
}
