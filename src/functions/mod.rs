pub mod clock;
pub mod completion;
pub mod dispatcher;
pub mod eligibility;
pub mod engagement;
pub mod marketing;
pub mod reminders;
pub mod reviews;
pub mod run_ledger;
pub mod send_guard;
pub mod templates;
pub mod trigger;

pub use engagement::{AppState, execute_job};
pub use trigger::build_router;
