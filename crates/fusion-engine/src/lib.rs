pub mod config;
pub mod download;
pub mod endpoint;
pub mod media;
pub mod provider;
pub mod transport;
pub mod workflow;

pub use config::{FusionConfig, RelayConfig};
pub use download::SaveAction;
pub use endpoint::{relay_router, serve, RelayState};
pub use provider::{FusionProvider, HttpFusionProvider};
pub use transport::{build_transport, HttpRelayTransport, RelayTransport};
pub use workflow::{AssetId, FusionOutcome, FusionWorkflow, ImageAsset, Submission, WorkflowState};
