mod error;
mod probe;
mod registry;
mod session;
mod supervisor;

pub use error::{CaptureError, CaptureResult};
pub use probe::{ResolverProbe, StreamProbe};
pub use registry::{ChannelRegistry, RegistrySnapshot};
pub use session::CaptureSession;
pub use supervisor::{StreamSupervisor, ThumbnailSupervisor};
