pub mod config;
pub mod error;
pub mod load;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
pub use load::{FixedLoadSensor, LoadSensor, ProcStatSensor};
