use crate::constants;
use std::net::IpAddr;
use std::path::PathBuf;
use structopt::clap::AppSettings;
use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "Records pod, a small service for inventory items and clock-in records.",
    setting = AppSettings::DeriveDisplayOrder,
    setting = AppSettings::UnifiedHelpMessage,
)]
pub struct CliOptions {
    /// Port to listen to.
    #[structopt(short, long, default_value = "3030", env = "RECORDS_PORT")]
    pub port: u16,

    /// Network interface to listen on.
    /// Use "0.0.0.0" to accept connections from other machines.
    #[structopt(
        short,
        long,
        default_value = "127.0.0.1",
        name = "ADDRESS",
        env = "RECORDS_ADDRESS"
    )]
    pub address: IpAddr,

    /// Directory where the database file lives. Created if it does not exist.
    #[structopt(
        long,
        default_value = constants::DATABASE_DIR,
        name = "DIR",
        env = "RECORDS_DATABASE_DIR"
    )]
    pub database_dir: PathBuf,

    /// Name of the logical database holding the "items" and "clock_in_records" collections.
    #[structopt(
        long,
        default_value = constants::DATABASE_NAME,
        name = "NAME",
        env = "RECORDS_DATABASE_NAME"
    )]
    pub database_name: String,

    /// Maximum number of simultaneously open database connections.
    #[structopt(long, default_value = "8", env = "RECORDS_POOL_SIZE")]
    pub pool_size: u32,
}

impl CliOptions {
    pub fn database_path(&self) -> PathBuf {
        let file_name = format!("{}{}", self.database_name, constants::DATABASE_SUFFIX);
        self.database_dir.join(file_name)
    }
}

/// Load environment variables from an optional `.config` file, then from `.env`.
/// Variables already present in the environment are never overridden.
pub fn load_config_files() {
    dotenvy::from_filename(".config").ok();
    dotenvy::dotenv().ok();
}
