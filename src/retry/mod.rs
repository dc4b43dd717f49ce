pub mod controller;

pub use controller::{
    COMMAND_SUBSTITUTIONS, RetryAttempt, RetryController, RetryOutcome, RetryTier, record_attempt,
};
