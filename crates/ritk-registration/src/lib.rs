pub mod metric;
pub mod optimizer;
pub mod registration;
pub mod multires;
pub mod error;

pub use error::{RegistrationError, Result};
pub use multires::{MultiResolutionRegistration, RegistrationSchedule};
pub use registration::Registration;
