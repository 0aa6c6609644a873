use signoff_core::config::LoadOptions;
use signoff_db::{connect_with_config, migrations, DemoFlowSeed, FlowSeedInfo};
use tracing::info;

use crate::commands::{prepare, CommandResult, StepFailure};

pub fn run(options: &LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("seed", options) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoFlowSeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoFlowSeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<Vec<FlowSeedInfo>, StepFailure> = if verification.all_present {
            Ok(seed_result.flows_seeded)
        } else {
            Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(flows) => {
            let created = flows.iter().filter(|flow| flow.created).count();
            info!(
                event_name = "system.cli.seed_loaded",
                created,
                existing = flows.len() - created,
                "demo approval flows installed"
            );
            let lines: Vec<String> = flows.iter().map(describe_flow).collect();
            CommandResult::success(
                "seed",
                format!("demo approval flows ready:\n{}", lines.join("\n")),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn describe_flow(flow: &FlowSeedInfo) -> String {
    let state = if flow.created { "created" } else { "already present" };
    format!("  - {}: {} (flow {}, {state})", flow.module, flow.name, flow.flow_id)
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some demo flows failed to load".to_string()
    } else {
        format!("Seed verification failed for modules: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_failure_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [("customer_application", true), ("inspection_approval", false)];

        assert_eq!(
            verification_failure_message(&checks),
            "Seed verification failed for modules: inspection_approval"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("customer_application", true), ("inspection_approval", true)];

        assert_eq!(verification_failure_message(&checks), "Some demo flows failed to load");
    }
}
