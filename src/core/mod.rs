//! Core business logic abstractions

pub mod cache;
pub mod config;
pub mod error;
pub mod fund;
pub mod log;

// Re-export main types for cleaner imports
pub use error::{ServiceError, ServiceResult};
pub use fund::{
    FundDataProvider, FundEstimate, FundListEntry, FundSnapshot, IndexQuote, MainFlow,
    MarketBreadth, NavPoint, NorthFlow, PeriodReturns, ReturnPeriod, SectorQuote,
};
