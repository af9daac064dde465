pub mod decoder;
pub mod scanner;

pub use scanner::run_scanner;
