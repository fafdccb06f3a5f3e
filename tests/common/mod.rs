pub mod asserts;
pub mod fixtures;
pub mod producers;

pub use asserts::*;
pub use fixtures::*;
pub use producers::*;
