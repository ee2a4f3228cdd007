pub mod block;
pub mod clock;
pub mod error;
pub mod hashing;
pub mod primitives;
pub mod state;
pub mod traits;
pub mod transaction;
