pub mod clock;
pub mod engine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    ApprovalService, CreateRequest, ExecuteInput, ExecuteOutcome, ReviewInput, ReviewOutcome,
};
