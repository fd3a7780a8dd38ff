//! WorkItem trait - ties a payload type to its wire discriminator.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed payload that travels through the work item queue.
///
/// `TYPE` is the `type` tag written into every envelope. It belongs to the
/// concrete type, so a payload can never be sent under someone else's
/// discriminator.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SubscriptionTrigger {
///     subscription_id: String,
/// }
///
/// impl WorkItem for SubscriptionTrigger {
///     const TYPE: &'static str = "SubscriptionTrigger";
/// }
/// ```
///
/// Payload fields are flattened next to `type` and `delay`, so a payload
/// must serialize to a JSON object and must not use those two names itself.
pub trait WorkItem: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
