mod helpers;
mod points;

pub mod op;

pub use helpers::{parse_boolean_flag, parse_env_number};
pub use points::{Points, PointsConversionError};
