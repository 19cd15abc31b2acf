pub mod forecast;
pub mod history;
pub mod manager;

pub use history::{PriceHistory, PriceSample};
pub use manager::{next_scheduled_start, RoundManager};
