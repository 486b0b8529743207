pub mod adapter;
pub mod mock;

pub use adapter::{ChainAdapter, OnChainStreamState, TxHash};
pub use mock::{MockChainAdapter, SubmittedTransfer};
