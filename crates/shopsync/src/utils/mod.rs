pub mod money;
pub mod time;

pub use money::{truncate_2dp, truncate_money};
pub use time::{format_timestamp, parse_last_update, strip_quotes};
