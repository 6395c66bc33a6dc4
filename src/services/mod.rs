pub mod purchase;

pub use purchase::{OutcomeStatus, PurchaseOutcome, PurchaseService, PurchaseSettings};
