//! Domain records used throughout the loyalty engine.
//!
//! Records that are loaded from a backend carry their database `id`. Records that are about to be written use a
//! `New*` variant without one. Variant-heavy configuration (rule formulas, eligibility, limits, event payloads) is
//! modelled with tagged enums so that every evaluation path is checked for exhaustiveness at compile time.
use thiserror::Error;

pub use events::*;
pub use ledger::*;
pub use loyalty_common::Points;
pub use membership::*;
pub use program::*;
pub use referral::*;
pub use reward::*;
pub use rule::*;
pub use tenant::*;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Conversion error: {0}")]
pub struct ConversionError(pub String);

/// Declares a fieldless enum that is stored and transmitted as text, along with its `Display` and `FromStr`
/// implementations. The serde representation uses the same text.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::db_types::ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err($crate::db_types::ConversionError(format!(
                        "'{other}' is not a valid {}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

pub(crate) use text_enum;

mod events;
mod ledger;
mod membership;
mod program;
mod referral;
mod reward;
mod rule;
mod tenant;
