//! Session synchronization between an external identity provider and the application.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod sink;
mod store;

pub use principal::{Identity, Traits};
pub use session::{SessionValue, SessionSnapshot};
pub use provider::{SessionSource, Subscription, IdentityCallback, LocalSessionSource};
pub use sink::{SideEffectSink, SinkCall, RecordingSink, TracingSink};
pub use store::{SessionStore, SessionReader};
