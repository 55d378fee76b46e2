use instaquote_db::{connect_from_config, migrations};

use crate::commands::{
    load_config, runtime, CommandResult, EXIT_DATABASE, EXIT_MIGRATION, EXIT_RUNTIME,
};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        let version = migrations::applied_version(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        pool.close().await;
        Ok::<Option<i64>, (&'static str, String, u8)>(version)
    });

    match result {
        Ok(Some(version)) => {
            CommandResult::success("migrate", format!("schema at migration version {version}"))
        }
        Ok(None) => CommandResult::success("migrate", "no migrations to apply"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
