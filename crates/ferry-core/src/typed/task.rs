//! Task trait - binds a task name to a payload type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed job payload.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
///     body: String,
/// }
///
/// impl Task for SendEmail {
///     const NAME: &'static str = "mail.send.v1";
/// }
/// ```
///
/// `NAME` must be a valid `TaskName`; registration checks it.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}
