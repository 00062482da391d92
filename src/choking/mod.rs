//! who gets to download from us: the preferred neighbors picked every unchoking
//! interval, plus the one optimistic peer rotated every optimistic interval.

mod optimistic;
mod preferred;

pub use optimistic::OptimisticScheduler;
pub use preferred::ChokeScheduler;
