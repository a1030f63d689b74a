pub mod api_model;
pub mod clock_in_api;
pub mod command_line_interface;
pub mod constants;
pub mod database_api;
pub mod database_migrate_refinery;
pub mod error;
pub mod items_api;
pub mod sql_converters;
pub mod warp_api;
