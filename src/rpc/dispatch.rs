//! Procedure dispatcher.
//!
//! Routes a validated request descriptor to exactly one procedure kind on
//! the connection's caller and normalizes the result into either an
//! immediate response value or a subscription handle. Business-logic
//! failures propagate unchanged; the connection manager shapes them.

use crate::router::{Caller, ProcedureRouter, Subscription};
use crate::rpc::envelope::{ProcedureKind, RequestDescriptor};
use crate::rpc::error::RpcError;

/// The two shapes a procedure invocation can normalize to.
pub enum DispatchOutcome {
    /// A single terminal result (query or mutation).
    Response(serde_json::Value),
    /// A live handle whose values are pushed later (subscription). The
    /// setup await has already completed by the time this is returned.
    Subscription(Subscription),
}

impl std::fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Response(value) => f.debug_tuple("Response").field(value).finish(),
            DispatchOutcome::Subscription(_) => f.debug_tuple("Subscription").finish(),
        }
    }
}

/// Invoke the procedure named by the descriptor on the caller.
///
/// `ProcedureKind` is a closed enum, so an unrecognized kind cannot reach
/// this point; the codec rejects it as a parse failure.
pub async fn dispatch<R: ProcedureRouter>(
    caller: &Caller<R>,
    descriptor: &RequestDescriptor,
) -> Result<DispatchOutcome, RpcError> {
    let input = descriptor.input.clone();
    match descriptor.kind {
        ProcedureKind::Query => caller
            .query(&descriptor.path, input)
            .await
            .map(DispatchOutcome::Response)
            .map_err(RpcError::Procedure),
        ProcedureKind::Mutation => caller
            .mutation(&descriptor.path, input)
            .await
            .map(DispatchOutcome::Response)
            .map_err(RpcError::Procedure),
        ProcedureKind::Subscription => caller
            .subscription(&descriptor.path, input)
            .await
            .map(DispatchOutcome::Subscription)
            .map_err(RpcError::Procedure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::envelope::RequestId;
    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct FixtureRouter;

    #[async_trait]
    impl ProcedureRouter for FixtureRouter {
        type Ctx = ();

        async fn query(
            &self,
            _ctx: &(),
            path: &str,
            _input: Value,
        ) -> Result<Value, crate::rpc::error::BoxError> {
            match path {
                "ping" => Ok(json!("pong")),
                _ => Err("no such query".into()),
            }
        }

        async fn mutation(
            &self,
            _ctx: &(),
            _path: &str,
            input: Value,
        ) -> Result<Value, crate::rpc::error::BoxError> {
            Ok(input)
        }

        async fn subscription(
            &self,
            _ctx: &(),
            _path: &str,
            _input: Value,
        ) -> Result<Subscription, crate::rpc::error::BoxError> {
            Ok(Subscription::new(stream::iter(vec![Ok(json!(1))])))
        }
    }

    fn descriptor(kind: ProcedureKind, path: &str) -> RequestDescriptor {
        RequestDescriptor {
            id: RequestId::from(1),
            kind,
            path: path.to_string(),
            input: json!("in"),
        }
    }

    #[tokio::test]
    async fn test_query_normalizes_to_response() {
        let caller = Caller::new(Arc::new(FixtureRouter), ());
        let outcome = dispatch(&caller, &descriptor(ProcedureKind::Query, "ping"))
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Response(value) => assert_eq!(value, json!("pong")),
            DispatchOutcome::Subscription(_) => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_mutation_receives_input() {
        let caller = Caller::new(Arc::new(FixtureRouter), ());
        let outcome = dispatch(&caller, &descriptor(ProcedureKind::Mutation, "set"))
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Response(value) => assert_eq!(value, json!("in")),
            DispatchOutcome::Subscription(_) => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_subscription_normalizes_to_handle() {
        let caller = Caller::new(Arc::new(FixtureRouter), ());
        let outcome = dispatch(&caller, &descriptor(ProcedureKind::Subscription, "tick"))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Subscription(_)));
    }

    #[tokio::test]
    async fn test_procedure_failure_propagates() {
        let caller = Caller::new(Arc::new(FixtureRouter), ());
        let err = dispatch(&caller, &descriptor(ProcedureKind::Query, "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Procedure(_)));
    }
}
