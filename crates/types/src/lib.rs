pub mod account;
pub mod address;
pub mod hash;
pub mod slot;

pub use account::*;
pub use address::*;
pub use hash::*;
pub use slot::*;
