pub mod logging;
pub mod settings;
