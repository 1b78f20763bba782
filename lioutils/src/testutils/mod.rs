pub mod fake_driver;

pub use fake_driver::{DriverCall, DriverOperation, FakeDriver};
