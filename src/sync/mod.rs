pub mod clock;
pub mod pacer;
pub mod rate;

pub use clock::{StreamClock, TimeAnchor};
pub use pacer::Pacer;
pub use rate::{FrameRateTracker, RateMode, SharedRate};
