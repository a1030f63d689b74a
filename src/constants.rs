// Constants used in the project. These are "convention over configuration" for now.

pub const DATABASE_DIR: &str = "./data/db";
pub const DATABASE_NAME: &str = "admin_restapi";
pub const DATABASE_SUFFIX: &str = ".sqlite";

/// Collection holding inventory items.
pub const ITEMS_COLLECTION: &str = "items";
/// Collection holding attendance clock-in records.
pub const CLOCK_IN_COLLECTION: &str = "clock_in_records";

pub const WELCOME_MESSAGE: &str = "Welcome to the records pod!";
