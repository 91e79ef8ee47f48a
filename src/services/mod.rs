pub mod carts;
pub mod checkout;
pub mod compensation;
pub mod migration;
pub mod payment;
#[cfg(feature = "reconciliation")]
pub mod reconciliation;
pub mod seat_locks;
pub mod sessions;

pub use carts::CartService;
pub use checkout::{CallbackAck, CheckoutOrchestrator, CheckoutRedirect, ProviderEvent};
pub use migration::{MigrationOutcome, SessionMigration};
pub use payment::{PaymentGatewayClient, PaymentProvider};
pub use seat_locks::{Ownership, SeatLockManager};
pub use sessions::{SessionClaims, SessionIssuer};
