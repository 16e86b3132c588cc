pub mod cdp;
pub mod inspect;
pub mod protection;
pub mod supervisor;

pub use inspect::{CdpPageInspector, PageInspector, PageSnapshot};
pub use protection::{detect, BlockReason, Protection, ProtectionDetails};
pub use supervisor::{
    AttachPolicy, BrowserHandle, BrowserLauncher, BrowserSupervisor, DebugEndpoint,
    HttpDebugEndpoint, ProbeOutcome,
};
