mod cleanup;
mod loader;
mod netlist;
mod rescan;
mod service_disco;
mod service_list;
mod six;

pub use cleanup::StorageCleanup;
pub use loader::{import_results, StorageLoader, StorageLoaderRolling};
pub use netlist::NetlistEnum;
pub use rescan::StorageRescan;
pub use service_disco::ServiceDisco;
pub use service_list::StorageServiceList;
pub use six::{SixDisco, StorageSixTargetlist};
