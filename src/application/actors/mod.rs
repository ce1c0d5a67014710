pub mod scanner_actor;

pub use scanner_actor::{
    spawn_scanner_actor, NearLimitScanner, ScanReport, ScannerHandle, ScannerMessage,
};
