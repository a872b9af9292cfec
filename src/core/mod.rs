// Core modules implementing the frame model, iteration, encoding, and error modeling.
pub mod builder;
pub mod column;
pub mod error;
pub mod frame;
pub mod iter;
pub mod message;
pub mod value;
pub mod wire;
