//! Boxed typed handlers.
//!
//! Registration erases a handler's concrete parameter and result types
//! behind a dynamic-`Value` closure: inbound params are decoded into the
//! method's `Params` type (failure becomes `InvalidParams` without
//! invoking the handler) and the typed result is re-encoded for the wire.

use std::sync::Arc;

use futures::future::BoxFuture;
use mcp_types::Error;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::params_from_value;
use mcp_types::result_to_value;
use serde_json::Value;

pub(crate) type MethodHandlerFn =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

pub(crate) type NotificationHandlerFn =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

pub(crate) fn wrap_method_handler<R, F, Fut>(handler: F) -> MethodHandlerFn
where
    R: ModelContextProtocolRequest,
    F: Fn(R::Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Result, Error>> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<'static, Result<Value, Error>> {
        let params = match params_from_value::<R::Params>(params) {
            Ok(params) => params,
            Err(err) => {
                return Box::pin(std::future::ready(Err(Error::invalid_params(
                    err.to_string(),
                ))));
            }
        };
        let fut = handler(params);
        Box::pin(async move {
            let result = fut.await?;
            result_to_value(&result)
                .map_err(|err| Error::internal_error(format!("failed to encode result: {err}")))
        })
    })
}

pub(crate) fn wrap_notification_handler<N, F, Fut>(handler: F) -> NotificationHandlerFn
where
    N: ModelContextProtocolNotification,
    F: Fn(N::Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<'static, Result<(), Error>> {
        match params_from_value::<N::Params>(params) {
            Ok(params) => Box::pin(handler(params)),
            Err(err) => Box::pin(std::future::ready(Err(Error::invalid_params(
                err.to_string(),
            )))),
        }
    })
}
