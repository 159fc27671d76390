use console::style;

use crate::{KeycloudScenarioStep, KeycloudStepState};

pub fn log_step_runs(steps: &Vec<KeycloudScenarioStep>, indent: usize) {
    for step in steps {
        use KeycloudStepState::*;
        let prefix = if indent > 0 {
            format!("{: <1$}↳ ", "", indent)
        } else {
            "".to_string()
        };

        println!(
            "{prefix}{}",
            match step.state() {
                Dormant => style(format!("⦸ {step}")).dim(),
                Failed => style(format!("✘ {step}")).red(),
                Passed => style(format!("✓ {step}")).green(),
            }
        );
        if let KeycloudScenarioStep::Ref {
            hydrated_steps: Some(inner_steps),
            ..
        } = step
        {
            log_step_runs(inner_steps, indent + 2);
        }
    }
}
