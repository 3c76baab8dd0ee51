#![warn(unreachable_patterns)]

pub mod console;
pub mod loader;
pub mod machine;
pub mod memory;
pub mod serial;
pub mod z80;
