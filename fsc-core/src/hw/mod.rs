//! Hardware interaction modules
//!
//! - `source` - the sensor source abstraction and source configuration
//! - `sysfs` - file-path sources with late-bound hwmon directories
//! - `util` - sources backed by external utility commands
//! - `fan` - fan outputs

mod fan;
mod source;
mod sysfs;
mod util;

pub use fan::Fan;
pub use source::{scale_to_register, ReadScope, SensorSource, SourceKind, SourceSpec};
pub use sysfs::{resolve_hwmon_path, SysfsSource};
pub use util::{format_write_command, CommandRunner, ShellRunner, UtilSource};

#[cfg(test)]
pub use util::MockCommandRunner;
