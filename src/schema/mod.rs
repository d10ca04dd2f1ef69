pub mod analytics;
pub mod booking;
pub mod customer;
pub mod event;
pub mod interest;
pub mod job_run;
pub mod message;

pub use analytics::*;
pub use booking::*;
pub use customer::*;
pub use event::*;
pub use interest::*;
pub use job_run::*;
pub use message::*;
