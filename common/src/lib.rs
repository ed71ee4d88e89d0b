pub mod address;
pub mod advert;
pub mod cache;
pub mod config;
pub mod frame;
pub mod policy;
pub mod queue;
pub mod select;

pub use address::{AddressError, DeviceAddress};
pub use advert::{Advertisement, AddressType, Reading, Skip};
pub use cache::{Observation, ObservedState, StateCache};
pub use config::{DimmerProfile, GatewayConfig, NamedDevice, TimingConfig};
pub use frame::{Frame, FrameError, FrameReassembler, StateFrame, FRAME_LEN};
pub use policy::{Backoff, ExpiryPolicy, RetryDecision};
pub use queue::{CommandQueue, Insertion, PendingCommand, Selected, Ticket};
pub use select::{RandomSelector, RoundRobin, Selector};
