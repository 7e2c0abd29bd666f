pub mod ids;
pub mod protocol;
pub mod timer;

pub use timer::TimerStatus;
