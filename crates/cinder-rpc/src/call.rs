use serde::{Serialize, de::DeserializeOwned};

/// A named remote call with a fixed request and response shape.
///
/// The name is the routing key on the serving side. Both ends must agree
/// on the record types for a given name; tying them together in one
/// trait impl makes that a compile-time contract for code that shares
/// the definition.
///
/// ```rust
/// use cinder_rpc::RpcCall;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping { nonce: u32 }
///
/// #[derive(Serialize, Deserialize)]
/// struct Pong { nonce: u32 }
///
/// struct PingCall;
///
/// impl RpcCall for PingCall {
///     const NAME: &'static str = "ping";
///     type Request = Ping;
///     type Response = Pong;
/// }
/// ```
pub trait RpcCall: Send + Sync + 'static {
    /// Routing key. Must be unique among the calls a server registers.
    const NAME: &'static str;

    /// Record sent by the caller.
    type Request: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Record returned by the handler.
    type Response: Serialize + DeserializeOwned + Send + 'static;
}
