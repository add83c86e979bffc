pub mod api;
pub mod app;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod localfs;
pub mod logging;
pub mod persist;
pub mod preferences;
pub mod session;
pub mod sync;
pub mod transfer;

pub use api::CloudClient;
pub use app::{AppError, CloudSync};
pub use checkout::{CheckoutDecision, CheckoutPrompter};
pub use config::{ClientConfig, ConfigOverrides, resolve_config};
pub use session::{AuthOutcome, AuthState};
pub use sync::{SyncHandle, SyncReport};
pub use transfer::{TransferError, TransferEvent};
