pub mod achievements;
pub mod activity;
pub mod marketing;
pub mod rewards;
pub mod stats;
