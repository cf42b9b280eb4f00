// Audio module - capture backends, stream hosting and the fallback block pool

pub mod backend;
pub mod buffer_pool;
pub mod stream_host;

pub use backend::{default_backend, BlockSink, CaptureBackend, CaptureFormat, CaptureRequest, CaptureStream};
pub use buffer_pool::{BlockPool, DEFAULT_BUFFER_CAPACITY, DEFAULT_BUFFER_COUNT};
pub use stream_host::HostedStream;
