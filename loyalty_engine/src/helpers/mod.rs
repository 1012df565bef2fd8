mod redemption_codes;
mod time_windows;

pub use redemption_codes::{
    generate_redemption_code,
    is_well_formed_redemption_code,
    REDEMPTION_CODE_ALPHABET,
    REDEMPTION_CODE_LENGTH,
};
pub use time_windows::{
    compact_date,
    day_key,
    epoch_days,
    minutes_of_day,
    month_key,
    parse_time_of_day,
    start_of_day,
    start_of_month,
    start_of_next_year,
    start_of_year,
};
