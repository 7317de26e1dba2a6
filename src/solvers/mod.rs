pub mod maxmin;
pub mod nash;

pub use maxmin::MaxMinSolver;
pub use nash::NashSolver;
