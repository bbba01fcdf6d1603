//! The service catalog.
//!
//! A [`Service`] exposes a set of named methods on a receiver as callable
//! targets. Method eligibility is enforced by the registration signature:
//! a method takes its argument by value and fills a mutable reply handle,
//! returning an error on failure. Argument and reply types must be
//! (de)serializable, and the reply must have a zero value to start from.
//!
//! Each registered method is erased to a bytes-in/bytes-out handler closed
//! over the connection codec, so dispatch never needs to know the concrete
//! types. A per-method call counter feeds the debug listing.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use geerpc_common::{Result, RpcError, WireCodec};

/// A decoded argument or produced reply with its concrete type erased, so
/// it can cross the dispatch boundary between the three method stages.
pub(crate) type DynValue = Box<dyn Any + Send>;

type DecodeFn = dyn Fn(WireCodec, &[u8]) -> std::result::Result<DynValue, String> + Send + Sync;
type CallFn = dyn Fn(DynValue) -> std::result::Result<DynValue, String> + Send + Sync;
type EncodeFn = dyn Fn(WireCodec, DynValue) -> std::result::Result<Vec<u8>, String> + Send + Sync;

/// One registered method, erased into its three dispatch stages plus
/// bookkeeping for the debug listing.
///
/// The stages are separate so the server can time the user call on its
/// own: argument decoding happens before a handle-timeout race starts and
/// reply encoding after it ends.
pub(crate) struct MethodSpec {
    decode: Box<DecodeFn>,
    call: Box<CallFn>,
    encode: Box<EncodeFn>,
    arg_type: &'static str,
    reply_type: &'static str,
    calls: AtomicU64,
}

impl MethodSpec {
    /// Decodes the wire body into the method's argument value.
    pub(crate) fn decode_args(
        &self,
        codec: WireCodec,
        body: &[u8],
    ) -> std::result::Result<DynValue, String> {
        (self.decode)(codec, body)
    }

    /// Runs the user method into a freshly zeroed reply. Any failure
    /// becomes the call's error string.
    pub(crate) fn call(&self, args: DynValue) -> std::result::Result<DynValue, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.call)(args)
    }

    /// Encodes a reply produced by [`MethodSpec::call`].
    pub(crate) fn encode_reply(
        &self,
        codec: WireCodec,
        reply: DynValue,
    ) -> std::result::Result<Vec<u8>, String> {
        (self.encode)(codec, reply)
    }

    pub(crate) fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Method metadata as shown on the debug page.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub arg_type: &'static str,
    pub reply_type: &'static str,
    pub num_calls: u64,
}

/// A named set of callable methods.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodSpec>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service {
    /// Starts building a service. The name must begin with an uppercase
    /// letter and at least one method must be registered.
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn method(&self, name: &str) -> Option<Arc<MethodSpec>> {
        self.methods.get(name).cloned()
    }

    /// Snapshot of the methods and their call counts, sorted by name.
    pub fn method_infos(&self) -> Vec<MethodInfo> {
        let mut infos: Vec<MethodInfo> = self
            .methods
            .iter()
            .map(|(name, spec)| MethodInfo {
                name: name.clone(),
                arg_type: spec.arg_type,
                reply_type: spec.reply_type,
                num_calls: spec.num_calls(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

/// Builder collecting the methods of a [`Service`].
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Arc<MethodSpec>>,
}

impl ServiceBuilder {
    /// Registers a method under `name`. Method names must begin with an
    /// uppercase letter; anything else fails [`ServiceBuilder::build`].
    ///
    /// The method receives its argument by value and writes its result
    /// through the reply handle; returning an error delivers that error to
    /// the remote caller instead of a reply.
    pub fn method<A, R, E, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        E: Display + 'static,
        F: Fn(A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        let decode = move |codec: WireCodec, body: &[u8]| -> std::result::Result<DynValue, String> {
            let args: A = codec
                .decode(body)
                .map_err(|err| format!("rpc server: cannot decode argument: {}", err))?;
            Ok(Box::new(args))
        };
        let call = move |args: DynValue| -> std::result::Result<DynValue, String> {
            let args = args
                .downcast::<A>()
                .map_err(|_| "rpc server: argument type mismatch".to_string())?;
            let mut reply = R::default();
            f(*args, &mut reply).map_err(|err| err.to_string())?;
            Ok(Box::new(reply))
        };
        let encode = move |codec: WireCodec, reply: DynValue| -> std::result::Result<Vec<u8>, String> {
            let reply = reply
                .downcast::<R>()
                .map_err(|_| "rpc server: reply type mismatch".to_string())?;
            codec
                .encode(&*reply)
                .map_err(|err| format!("rpc server: cannot encode reply: {}", err))
        };
        self.methods.insert(
            name.into(),
            Arc::new(MethodSpec {
                decode: Box::new(decode),
                call: Box::new(call),
                encode: Box::new(encode),
                arg_type: std::any::type_name::<A>(),
                reply_type: std::any::type_name::<R>(),
                calls: AtomicU64::new(0),
            }),
        );
        self
    }

    /// Validates the catalog entry and produces the [`Service`].
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidServiceName`] if the service name does not
    ///   begin with an uppercase letter
    /// - [`RpcError::InvalidMethodName`] if a method name does not begin
    ///   with an uppercase letter
    /// - [`RpcError::NoEligibleMethods`] if no method was registered
    pub fn build(self) -> Result<Service> {
        if !is_exported(&self.name) {
            return Err(RpcError::InvalidServiceName(self.name));
        }
        if let Some(method) = self.methods.keys().find(|name| !is_exported(name)) {
            return Err(RpcError::InvalidMethodName(format!(
                "{}.{}",
                self.name, method
            )));
        }
        if self.methods.is_empty() {
            return Err(RpcError::NoEligibleMethods(self.name));
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// The exported-name rule: callable targets begin with an uppercase
/// letter.
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        num1: i64,
        num2: i64,
    }

    fn sum_service() -> Service {
        Service::builder("Foo")
            .method("Sum", |args: SumArgs, reply: &mut i64| -> std::result::Result<(), String> {
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_dispatch_stages_round_trip() {
        let service = sum_service();
        let method = service.method("Sum").unwrap();
        let codec = WireCodec::Postcard;

        let body = codec.encode(&SumArgs { num1: 2, num2: 3 }).unwrap();
        let args = method.decode_args(codec, &body).unwrap();
        let reply = method.call(args).unwrap();
        let reply = method.encode_reply(codec, reply).unwrap();
        let sum: i64 = codec.decode(&reply).unwrap();
        assert_eq!(sum, 5);
    }

    #[test]
    fn test_only_the_user_call_is_counted() {
        let service = sum_service();
        let method = service.method("Sum").unwrap();
        let codec = WireCodec::Json;
        let body = codec.encode(&SumArgs { num1: 1, num2: 1 }).unwrap();

        assert_eq!(method.num_calls(), 0);
        let args = method.decode_args(codec, &body).unwrap();
        assert_eq!(method.num_calls(), 0, "decoding is not a call");

        method.call(args).unwrap();
        let args = method.decode_args(codec, &body).unwrap();
        method.call(args).unwrap();
        assert_eq!(method.num_calls(), 2);

        let infos = service.method_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "Sum");
        assert_eq!(infos[0].num_calls, 2);
    }

    #[test]
    fn test_decode_args_reports_bad_argument() {
        let service = sum_service();
        let method = service.method("Sum").unwrap();

        let err = method.decode_args(WireCodec::Json, b"not json").unwrap_err();
        assert!(err.contains("cannot decode argument"), "got: {}", err);
    }

    #[test]
    fn test_method_error_becomes_call_error() {
        let service = Service::builder("Strict")
            .method("Reject", |_args: i64, _reply: &mut i64| -> std::result::Result<(), String> {
                Err("always refused".to_string())
            })
            .build()
            .unwrap();
        let method = service.method("Reject").unwrap();
        let codec = WireCodec::Postcard;
        let body = codec.encode(&1i64).unwrap();

        let args = method.decode_args(codec, &body).unwrap();
        assert_eq!(method.call(args).unwrap_err(), "always refused");
    }

    #[test]
    fn test_lowercase_service_name_is_rejected() {
        let err = Service::builder("foo")
            .method("Sum", |_: i64, _: &mut i64| -> std::result::Result<(), String> { Ok(()) })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invalid service name"));
    }

    #[test]
    fn test_lowercase_method_name_is_rejected() {
        let err = Service::builder("Foo")
            .method("sum", |_: i64, _: &mut i64| -> std::result::Result<(), String> { Ok(()) })
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "rpc server: invalid method name: Foo.sum");
    }

    #[test]
    fn test_service_without_methods_is_rejected() {
        let err = Service::builder("Empty").build().unwrap_err();
        assert!(err.to_string().contains("no eligible methods"));
    }
}
