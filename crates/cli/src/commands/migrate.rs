use signoff_core::config::LoadOptions;
use signoff_db::{connect_with_config, migrations};
use tracing::info;

use crate::commands::{prepare, CommandResult, StepFailure};

pub fn run(options: &LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("migrate", options) {
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
        let versions = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<Vec<i64>, StepFailure>(versions)
    });

    match result {
        Ok(versions) => {
            info!(
                event_name = "system.cli.migrations_applied",
                applied = versions.len(),
                "database schema is current"
            );
            let listed = versions.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
            CommandResult::success(
                "migrate",
                format!("applied pending migrations (schema versions: {listed})"),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
