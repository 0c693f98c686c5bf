pub mod chiefs;
pub mod common;
pub mod farmer;
pub mod sync;
