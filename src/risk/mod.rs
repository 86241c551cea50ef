//! Portfolio risk management

pub mod portfolio;

pub use portfolio::{
    AdmissionRejection, PairTradeStats, PnL, PortfolioRiskManager, PortfolioState, Position,
    PositionStatus,
};
