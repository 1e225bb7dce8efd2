mod cache;
mod chain;
mod queue;
mod repository;
mod worker;

pub use cache::*;
pub use chain::*;
pub use queue::*;
pub use repository::*;
pub use worker::*;
