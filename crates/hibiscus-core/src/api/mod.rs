//! API layer: credential rotation, dispatch, outcome classification, and the
//! retry policies that sit between the scheduler and the network.

pub mod credentials;
pub mod dispatch;
pub mod models;
pub mod outcome;
pub mod retry;

pub use credentials::CredentialPool;
pub use dispatch::{Dispatch, HttpDispatcher};
pub use models::{account_balance, image_models, text_models, ModelInfo};
pub use outcome::{classify, Outcome};
pub use retry::{
    fetch_with_deadline, fetch_with_retry, fetch_with_safety_retry, RetryOptions, RetryState,
    SafetyFetch, SafetyRetryOptions,
};
