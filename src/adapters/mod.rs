//! External Collaborator Adapters
//!
//! Traits for everything outside the saga's trust boundary: the payment
//! network, the receipt/accounting system, and the notification channel.
//! The mock implementations back the test suite and the demo binary and
//! are compiled in through the `mock-collaborators` feature.

pub mod notification;
pub mod payment_network;
pub mod receipts;

// Re-export adapters for convenient access
pub use notification::{
    Notice, NotificationError, NotificationService, NotificationSink, TracingSink,
};
pub use payment_network::{BankInfo, PaymentNetwork, PaymentNetworkError};
pub use receipts::{Receipt, ReceiptEmitter, ReceiptError};

#[cfg(any(test, feature = "mock-collaborators"))]
pub use notification::RecordingSink;
#[cfg(any(test, feature = "mock-collaborators"))]
pub use payment_network::MockPaymentNetwork;
#[cfg(any(test, feature = "mock-collaborators"))]
pub use receipts::MockReceipts;
