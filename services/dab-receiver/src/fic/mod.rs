//! Fast Information Channel

pub mod fib_processor;
pub mod fic_handler;

pub use fib_processor::FibProcessor;
pub use fic_handler::FicHandler;
