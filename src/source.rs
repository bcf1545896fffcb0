pub mod file;
pub mod vsphere;

pub use self::file::{JsonLinesSource, ReplayLine};
pub use self::vsphere::{VmSummary, VsphereConfig, VsphereSource};
