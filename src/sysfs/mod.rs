//! Linux sysfs host backend.

mod locate;
mod parser;

pub use locate::SysfsLocator;
pub use parser::SysfsHost;
