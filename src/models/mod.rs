pub mod alert;
pub mod case;
pub mod event;

pub use alert::{Alert, Detector, Evidence, Severity};
pub use case::Case;
pub use event::{AuthEvent, AuthResult};
