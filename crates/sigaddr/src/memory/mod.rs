mod local;
#[cfg(target_os = "windows")]
mod process;
mod reader;
mod region;
mod snapshot;

pub use local::CurrentProcess;
#[cfg(target_os = "windows")]
pub use process::ProcessHandle;
pub use reader::ReadMemory;
pub use region::{ModuleRegion, RegionFlags};
pub use snapshot::{SnapshotMemory, SnapshotMemoryBuilder};
