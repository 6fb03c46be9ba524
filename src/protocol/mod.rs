//! Wire protocol: frame codec, API requests and the dispatch registry

pub mod api;
pub mod frame;
pub mod registry;

pub use api::{actions, ApiRequest, ApiResult, Callback, Delivery, ACTION_FIELD};
pub use frame::{FrameHeader, HeaderRead, HEADER_LEN, MAX_BODY_LEN};
pub use registry::{ApiRegistry, Subscription};
