pub mod screen;
pub mod search;
pub mod setup;
pub mod ui;
pub mod watchlist;
