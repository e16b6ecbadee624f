pub mod simulated;

pub use simulated::{SimulatedBehaviour, SimulatedProcessor};
