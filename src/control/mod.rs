// Feedback control for heading-hold and distance-to-target approach

pub mod pid;

pub use pid::{Pid, normalize_degrees, shortest_arc};
