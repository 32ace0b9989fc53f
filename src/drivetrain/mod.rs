//! drivetrain - engine-agnostic transmission core (pure types + controller)

pub mod controller;
pub mod engine;
pub mod gearbox;
pub mod steering;
pub mod traction;
pub mod types;

pub use controller::DrivetrainController;
pub use types::*;
