pub mod scanner;

pub use scanner::ensure_reachable;
