pub mod configfs;
pub mod driver;
pub mod exe;
pub mod targetcli;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testutils;

pub(crate) mod crate_private {
    pub trait Sealed {}
}
