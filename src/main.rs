use chrono::Utc;
use env_logger::Env;
use log::error;
use log::info;
use records_pod::command_line_interface;
use records_pod::command_line_interface::CliOptions;
use records_pod::database_api::Database;
use records_pod::warp_api;
use std::io::Write;
use structopt::StructOpt;

#[tokio::main]
async fn main() {
    command_line_interface::load_config_files();
    env_logger::Builder::from_env(Env::default().filter_or("RUST_LOG", "info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let cli_options = CliOptions::from_args();
    info!(
        "Starting records pod version {}",
        warp_api::get_project_version()
    );

    let database_path = cli_options.database_path();
    let database = match Database::open(&database_path, cli_options.pool_size) {
        Ok(database) => database,
        Err(err) => {
            error!(
                "Failed to open database {}, {}",
                database_path.display(),
                err
            );
            std::process::exit(1);
        }
    };

    // Start web framework
    warp_api::run_server(&cli_options, database).await;
}
