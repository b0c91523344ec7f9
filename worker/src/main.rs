// Subscriptions worker entry point
// Runs one delivery pass and exits with a code that classifies the outcome.

use chrono::Utc;
use common::config::Settings;
use common::delivery::{DeliveryOptions, Driver, RunSummary};
use common::errors::{DeliveryError, UserError, EXIT_OK};
use common::tableau::TableauClient;
use common::tables::InputTables;
use common::telemetry::init_logging;
use common::transport::{GoogleChat, SmtpMailer};
use std::sync::Arc;
use tracing::{error, info};

async fn run() -> Result<RunSummary, DeliveryError> {
    let settings = Settings::load().map_err(UserError::from)?;
    settings.validate()?;

    init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;

    info!(
        data_dir = %settings.run.data_dir.display(),
        timezone = %settings.run.timezone,
        incremental = settings.run.incremental,
        run_specific_email = %settings.run.run_specific_email,
        "Starting subscriptions worker"
    );

    let tables = InputTables::load(&settings.run.tables_dir())?;

    let tableau = Arc::new(TableauClient::sign_in(&settings.tableau).await?);
    let mail = Arc::new(SmtpMailer::from_config(&settings.mail)?);
    let chat = Arc::new(GoogleChat::from_config(&settings.chat)?);

    let driver = Driver::new(tableau, mail, chat, DeliveryOptions::from_settings(&settings));
    let now = Utc::now().with_timezone(&settings.run.timezone);

    driver.run(&tables, now).await
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(summary) => {
            info!(
                schedules = summary.schedules,
                emails_sent = summary.emails_sent,
                chat_posts = summary.chat_posts,
                "Worker finished"
            );
            EXIT_OK
        }
        Err(e) => {
            let code = e.exit_code();
            error!(error = %e, user_error = e.is_user_error(), "Worker failed");
            if e.is_user_error() {
                eprintln!("{}", e);
            } else {
                eprintln!("{:?}", anyhow::Error::from(e));
            }
            code
        }
    };

    std::process::exit(code);
}
