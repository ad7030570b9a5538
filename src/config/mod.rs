pub mod loader;

pub use loader::{display_zone, load_config, parse_config};
